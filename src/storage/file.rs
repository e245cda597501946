//! File-backed record storage
//!
//! All records live in one JSON document mapping storage keys to base64 encoded
//! values. Every mutation rewrites the document through a temporary file followed by a
//! rename, so each get/set/delete is atomic from the store's point of view.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::PersistentStorage;
use crate::error::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    records: BTreeMap<String, String>,
}

/// JSON file backend
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    records: BTreeMap<String, Vec<u8>>,
}

impl FileStorage {
    /// Open the document at `path`, starting empty if the file does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => decode_document(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Record file {:?} does not exist yet, starting empty", path);
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Opened record file {:?} ({} records)", path, records.len());
        Ok(Self { path, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn flush(&self) -> Result<()> {
        let document = Document {
            records: self
                .records
                .iter()
                .map(|(k, v)| (k.clone(), base64::engine::general_purpose::STANDARD.encode(v)))
                .collect(),
        };
        let content = serde_json::to_string_pretty(&document)
            .map_err(|e| Error::Storage(format!("failed to serialize record file: {}", e)))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn decode_document(content: &str) -> Result<BTreeMap<String, Vec<u8>>> {
    let document: Document = serde_json::from_str(content)
        .map_err(|e| Error::Storage(format!("failed to parse record file: {}", e)))?;
    document
        .records
        .into_iter()
        .map(|(key, value)| {
            base64::engine::general_purpose::STANDARD
                .decode(&value)
                .map(|bytes| (key.clone(), bytes))
                .map_err(|e| Error::Storage(format!("record {} is not valid base64: {}", key, e)))
        })
        .collect()
}

impl PersistentStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.records
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(key))
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.records.insert(key.to_string(), value.to_vec());
        self.flush()
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        if self.records.remove(key).is_none() {
            return Err(Error::not_found(key));
        }
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        let mut storage = FileStorage::open(&path).unwrap();
        assert!(storage.is_empty());
        storage.set("f/1/g", &[0x01, 0x02]).unwrap();
        storage.set("g/gfl", &[0xFF]).unwrap();
        storage.delete("g/gfl").unwrap();

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("f/1/g").unwrap(), vec![0x01, 0x02]);
        assert!(reopened.get("g/gfl").unwrap_err().is_not_found());
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(FileStorage::open(&path), Err(Error::Storage(_))));

        std::fs::write(&path, r#"{"records":{"f/1/g":"***"}}"#).unwrap();
        assert!(matches!(FileStorage::open(&path), Err(Error::Storage(_))));
    }

    #[test]
    fn test_delete_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::open(dir.path().join("records.json")).unwrap();
        assert!(storage.delete("f/1/k/0").unwrap_err().is_not_found());
    }
}
