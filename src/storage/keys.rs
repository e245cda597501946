//! Storage key naming scheme
//!
//! Ids are rendered in lowercase hex without padding:
//!
//! | record            | key                              |
//! |-------------------|----------------------------------|
//! | fabric directory  | `g/gfl`                          |
//! | fabric summary    | `f/{fabric}/g`                   |
//! | group             | `f/{fabric}/g/{group}`           |
//! | endpoint          | `f/{fabric}/g/{group}/e/{ep}`    |
//! | group key map     | `f/{fabric}/gk/{link}`           |
//! | keyset            | `f/{fabric}/k/{keyset}`          |

use crate::types::{EndpointId, FabricIndex, GroupId, KeysetId};

pub fn fabric_list() -> String {
    "g/gfl".to_string()
}

pub fn fabric_groups(fabric: FabricIndex) -> String {
    format!("f/{:x}/g", fabric)
}

pub fn fabric_group(fabric: FabricIndex, group: GroupId) -> String {
    format!("f/{:x}/g/{:x}", fabric, group)
}

pub fn fabric_group_endpoint(fabric: FabricIndex, group: GroupId, endpoint: EndpointId) -> String {
    format!("f/{:x}/g/{:x}/e/{:x}", fabric, group, endpoint)
}

pub fn fabric_group_key(fabric: FabricIndex, link: u16) -> String {
    format!("f/{:x}/gk/{:x}", fabric, link)
}

pub fn fabric_keyset(fabric: FabricIndex, keyset: KeysetId) -> String {
    format!("f/{:x}/k/{:x}", fabric, keyset)
}
