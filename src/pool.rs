//! Bounded slot pools for iterators and key contexts
//!
//! A slot is taken on acquire and given back when its [`PoolSlot`] is dropped.
//! `reset` reclaims every outstanding slot at once; slots handed out before the reset
//! become inert and do not touch the counters when they are later dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug)]
struct PoolState {
    name: &'static str,
    capacity: usize,
    in_use: usize,
    generation: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct SlotPool {
    state: Arc<Mutex<PoolState>>,
}

impl SlotPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                name,
                capacity,
                in_use: 0,
                generation: 0,
            })),
        }
    }

    /// Take a slot, or `None` when all are in use
    pub fn acquire(&self) -> Option<PoolSlot> {
        let mut state = self.state.lock();
        if state.in_use >= state.capacity {
            debug!("{} pool exhausted ({} in use)", state.name, state.in_use);
            return None;
        }
        state.in_use += 1;
        Some(PoolSlot {
            state: Arc::clone(&self.state),
            generation: state.generation,
        })
    }

    pub fn in_use(&self) -> usize {
        self.state.lock().in_use
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.in_use = 0;
        state.generation += 1;
    }
}

/// An occupied pool slot, returned on drop
#[derive(Debug)]
pub(crate) struct PoolSlot {
    state: Arc<Mutex<PoolState>>,
    generation: u64,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.generation == self.generation {
            state.in_use = state.in_use.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = SlotPool::new("test", 2);
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());

        drop(a);
        assert_eq!(pool.in_use(), 1);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn test_reset_makes_old_slots_inert() {
        let pool = SlotPool::new("test", 1);
        let stale = pool.acquire().unwrap();
        pool.reset();
        assert_eq!(pool.in_use(), 0);

        let fresh = pool.acquire().unwrap();
        drop(stale);
        assert_eq!(pool.in_use(), 1);
        drop(fresh);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_zero_capacity_pool() {
        assert!(SlotPool::new("test", 0).acquire().is_none());
    }
}
