use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use recgraph_core::{field_value::FieldValue, ids::RecordRef};

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotValue {
    Value(FieldValue),
    Relation(Vec<RecordRef>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub record: RecordRef,
    pub type_name: String,
    pub local_id: String,
    pub fields: IndexMap<String, SnapshotValue>,
}

/// Point-in-time copy of every live record, in handle order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub records: Vec<RecordSnapshot>,
}

impl StoreSnapshot {
    pub fn get(&self, record: RecordRef) -> Option<&RecordSnapshot> {
        self.records.iter().find(|r| r.record == record)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, StorageError> {
        rmp_serde::to_vec(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, StorageError> {
        rmp_serde::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}
