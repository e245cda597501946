//! Groups and their endpoint membership

use tracing::{debug, warn};

use super::GroupDataProvider;
use crate::error::{Error, Result};
use crate::records::{relink, EndpointData, FabricData, GroupData, Located, Record};
use crate::types::{
    truncate_name, EndpointId, FabricIndex, GroupId, GroupInfo, INVALID_ENDPOINT_ID,
    UNDEFINED_GROUP_ID,
};

fn group_info(group: &GroupData) -> GroupInfo {
    GroupInfo {
        group_id: group.group_id,
        name: group.name.clone(),
    }
}

impl GroupDataProvider {
    fn find_group(&self, fabric: &FabricData, group_id: GroupId) -> Option<Located<GroupData>> {
        fabric
            .groups(&*self.storage)
            .find(|l| l.record.group_id == group_id)
    }

    fn group_at(&self, fabric: &FabricData, index: usize) -> Result<Located<GroupData>> {
        fabric.groups(&*self.storage).nth(index).ok_or_else(|| {
            Error::not_found(format!("group index {} of fabric {}", index, fabric.fabric_index))
        })
    }

    fn check_group_capacity(&self, fabric: &FabricData) -> Result<()> {
        if fabric.group_count as usize >= self.limits.max_groups_per_fabric {
            return Err(Error::InvalidListLength {
                what: "groups",
                max: self.limits.max_groups_per_fabric,
            });
        }
        Ok(())
    }

    /// Rename the group if it exists, otherwise append it
    pub fn set_group_info(&mut self, fabric_index: FabricIndex, info: &GroupInfo) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let fabric = self.fabric_data(fabric_index)?;

        let found = self.find_group(&fabric, info.group_id);
        if let Some(mut found) = found {
            found.record.name = truncate_name(&info.name).to_string();
            return found.record.save(&mut *self.storage);
        }
        self.set_group_info_at(fabric_index, fabric.group_count as usize, info)
    }

    /// Write a group at a list position.
    ///
    /// An index below the group count replaces the group there: its endpoints are
    /// removed and the new group takes over its place in the list.
    pub fn set_group_info_at(&mut self, fabric_index: FabricIndex, index: usize, info: &GroupInfo) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let mut fabric = self.fabric_data(fabric_index)?;
        let name = truncate_name(&info.name).to_string();

        let existing = self.find_group(&fabric, info.group_id);
        if let Some(mut existing) = existing {
            if existing.index != index {
                return Err(Error::DuplicateKeyId(format!(
                    "group 0x{:04x} already at index {}",
                    info.group_id, existing.index
                )));
            }
            existing.record.name = name;
            return existing.record.save(&mut *self.storage);
        }

        let count = fabric.group_count as usize;
        let mut group = GroupData::new(fabric_index, info.group_id);
        group.name = name;

        let prev = if index < count {
            let old = self.group_at(&fabric, index)?;
            group.next = old.record.next;
            if let Err(e) = self.remove_endpoints(fabric_index, old.record.group_id) {
                warn!(
                    "Failed to remove endpoints of replaced group 0x{:04x}: {}",
                    old.record.group_id, e
                );
            }
            old.record.delete(&mut *self.storage)?;
            self.notify_removed(fabric_index, &group_info(&old.record));
            old.prev
        } else if index == count {
            self.check_group_capacity(&fabric)?;
            group.next = UNDEFINED_GROUP_ID;
            fabric.group_count += 1;
            match index {
                0 => None,
                _ => Some(self.group_at(&fabric, index - 1)?.record.group_id),
            }
        } else {
            return Err(Error::InvalidArgument(format!(
                "group index {} past end of list ({} groups)",
                index, count
            )));
        };

        group.save(&mut *self.storage)?;
        relink::<GroupData>(
            &mut *self.storage,
            fabric_index,
            prev,
            &mut fabric.first_group,
            group.group_id,
        )?;
        fabric.save_registered(&mut *self.storage)?;
        self.notify_added(fabric_index, &group_info(&group));
        Ok(())
    }

    pub fn get_group_info_at(&self, fabric_index: FabricIndex, index: usize) -> Result<GroupInfo> {
        self.check_fabric(fabric_index)?;
        let fabric = self.fabric_data(fabric_index)?;
        Ok(group_info(&self.group_at(&fabric, index)?.record))
    }

    pub fn get_group_info(&self, fabric_index: FabricIndex, group_id: GroupId) -> Result<GroupInfo> {
        self.check_fabric(fabric_index)?;
        let fabric = self.fabric_data(fabric_index)?;
        self.find_group(&fabric, group_id)
            .map(|l| group_info(&l.record))
            .ok_or_else(|| Error::not_found(format!("group 0x{:04x} in fabric {}", group_id, fabric_index)))
    }

    pub fn remove_group_info_at(&mut self, fabric_index: FabricIndex, index: usize) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let mut fabric = self.fabric_data(fabric_index)?;
        let found = self.group_at(&fabric, index)?;
        self.remove_group(&mut fabric, found)
    }

    pub fn remove_group_info(&mut self, fabric_index: FabricIndex, group_id: GroupId) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let mut fabric = self.fabric_data(fabric_index)?;
        let found = self.find_group(&fabric, group_id).ok_or_else(|| {
            Error::not_found(format!("group 0x{:04x} in fabric {}", group_id, fabric_index))
        })?;
        self.remove_group(&mut fabric, found)
    }

    /// Delete a group with its endpoints and unlink it from the fabric
    fn remove_group(&mut self, fabric: &mut FabricData, found: Located<GroupData>) -> Result<()> {
        let endpoints: Vec<EndpointData> = found
            .record
            .endpoints(&*self.storage)
            .map(|l| l.record)
            .collect();
        for endpoint in endpoints {
            if let Err(e) = endpoint.delete(&mut *self.storage) {
                warn!(
                    "Failed to delete endpoint {} of group 0x{:04x}: {}",
                    endpoint.endpoint_id, endpoint.group_id, e
                );
            }
        }

        found.record.delete(&mut *self.storage)?;
        relink::<GroupData>(
            &mut *self.storage,
            fabric.fabric_index,
            found.prev,
            &mut fabric.first_group,
            found.record.next,
        )?;
        fabric.group_count = fabric.group_count.saturating_sub(1);
        fabric.save_registered(&mut *self.storage)?;
        self.notify_removed(fabric.fabric_index, &group_info(&found.record));
        Ok(())
    }

    pub fn has_endpoint(&self, fabric_index: FabricIndex, group_id: GroupId, endpoint_id: EndpointId) -> bool {
        if self.check_fabric(fabric_index).is_err() {
            return false;
        }
        let fabric = match self.fabric_data(fabric_index) {
            Ok(fabric) => fabric,
            Err(e) => {
                warn!("Failed to load fabric {}: {}", fabric_index, e);
                return false;
            }
        };
        self.find_group(&fabric, group_id).is_some_and(|group| {
            group
                .record
                .endpoints(&*self.storage)
                .any(|l| l.record.endpoint_id == endpoint_id)
        })
    }

    /// Add an endpoint to a group, creating the group when it does not exist yet.
    /// Adding an endpoint that is already a member succeeds without changes.
    pub fn add_endpoint(&mut self, fabric_index: FabricIndex, group_id: GroupId, endpoint_id: EndpointId) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let mut fabric = self.fabric_data(fabric_index)?;

        let found = self.find_group(&fabric, group_id);
        let Some(mut group) = found else {
            self.check_group_capacity(&fabric)?;

            EndpointData::new(fabric_index, group_id, endpoint_id).save(&mut *self.storage)?;
            let mut group = GroupData::new(fabric_index, group_id);
            group.first_endpoint = endpoint_id;
            group.endpoint_count = 1;
            group.next = fabric.first_group;
            group.save(&mut *self.storage)?;

            fabric.first_group = group_id;
            fabric.group_count += 1;
            fabric.save_registered(&mut *self.storage)?;
            self.notify_added(fabric_index, &group_info(&group));
            return Ok(());
        };

        let mut last = None;
        for endpoint in group.record.endpoints(&*self.storage) {
            if endpoint.record.endpoint_id == endpoint_id {
                return Ok(());
            }
            last = Some(endpoint.record.endpoint_id);
        }

        EndpointData::new(fabric_index, group_id, endpoint_id).save(&mut *self.storage)?;
        relink::<EndpointData>(
            &mut *self.storage,
            (fabric_index, group_id),
            last,
            &mut group.record.first_endpoint,
            endpoint_id,
        )?;
        group.record.endpoint_count += 1;
        group.record.save(&mut *self.storage)?;
        debug!("Endpoint {} joined group 0x{:04x}", endpoint_id, group_id);
        Ok(())
    }

    /// Remove an endpoint from a group. A group left without endpoints is removed.
    pub fn remove_endpoint(&mut self, fabric_index: FabricIndex, group_id: GroupId, endpoint_id: EndpointId) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let mut fabric = self.fabric_data(fabric_index)?;
        let mut group = self.find_group(&fabric, group_id).ok_or_else(|| {
            Error::not_found(format!("group 0x{:04x} in fabric {}", group_id, fabric_index))
        })?;
        let endpoint = group
            .record
            .endpoints(&*self.storage)
            .find(|l| l.record.endpoint_id == endpoint_id)
            .ok_or_else(|| {
                Error::not_found(format!("endpoint {} in group 0x{:04x}", endpoint_id, group_id))
            })?;

        if group.record.endpoint_count <= 1 {
            return self.remove_group(&mut fabric, group);
        }

        endpoint.record.delete(&mut *self.storage)?;
        relink::<EndpointData>(
            &mut *self.storage,
            (fabric_index, group_id),
            endpoint.prev,
            &mut group.record.first_endpoint,
            endpoint.record.next,
        )?;
        group.record.endpoint_count -= 1;
        group.record.save(&mut *self.storage)?;
        debug!("Endpoint {} left group 0x{:04x}", endpoint_id, group_id);
        Ok(())
    }

    /// Remove an endpoint from every group of the fabric that contains it
    pub fn remove_endpoint_from_all_groups(&mut self, fabric_index: FabricIndex, endpoint_id: EndpointId) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let fabric = self.fabric_data(fabric_index)?;
        let storage = &*self.storage;
        let groups: Vec<GroupId> = fabric
            .groups(storage)
            .filter(|group| {
                group
                    .record
                    .endpoints(storage)
                    .any(|l| l.record.endpoint_id == endpoint_id)
            })
            .map(|group| group.record.group_id)
            .collect();

        for group_id in groups {
            self.remove_endpoint(fabric_index, group_id, endpoint_id)?;
        }
        Ok(())
    }

    /// Drop every endpoint of a group while keeping the group itself
    pub fn remove_endpoints(&mut self, fabric_index: FabricIndex, group_id: GroupId) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let fabric = self.fabric_data(fabric_index)?;
        let mut group = self
            .find_group(&fabric, group_id)
            .ok_or_else(|| {
                Error::not_found(format!("group 0x{:04x} in fabric {}", group_id, fabric_index))
            })?
            .record;

        let endpoints: Vec<EndpointData> = group
            .endpoints(&*self.storage)
            .map(|l| l.record)
            .collect();
        for endpoint in endpoints {
            if let Err(e) = endpoint.delete(&mut *self.storage) {
                warn!(
                    "Failed to delete endpoint {} of group 0x{:04x}: {}",
                    endpoint.endpoint_id, group_id, e
                );
            }
        }

        group.first_endpoint = INVALID_ENDPOINT_ID;
        group.endpoint_count = 0;
        group.save(&mut *self.storage)
    }
}
