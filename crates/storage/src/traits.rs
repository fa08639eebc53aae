use std::sync::Arc;

use recgraph_core::{
    field_value::FieldValue,
    ids::*,
    schema::{CompiledType, Schema},
    CoreError,
};

use crate::error::StorageError;
use crate::record::{Record, RecordList};

/// Read side of a record store.
pub trait RecordStore {
    fn schema(&self) -> &Arc<Schema>;

    /// Live record behind `rref`, or `UseAfterDelete` / `UnknownRecord`.
    fn record(&self, rref: RecordRef) -> Result<&Record, CoreError>;

    fn exists(&self, rref: RecordRef) -> bool;

    fn by_local_id(&self, local_id: &str) -> Option<RecordRef>;

    /// Live records of a type, oldest first.
    fn records_of(&self, type_name: &str) -> Result<Vec<RecordRef>, CoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn model(&self, rref: RecordRef) -> Result<Arc<CompiledType>, CoreError> {
        Ok(self.record(rref)?.model().clone())
    }

    fn value(&self, rref: RecordRef, field: FieldIndex) -> Result<&FieldValue, StorageError> {
        let record = self.record(rref)?;
        record.value(field).ok_or_else(|| StorageError::NotAttribute {
            type_name: record.type_name().to_string(),
            field: record.model().field(field).name().to_string(),
        })
    }

    fn list(&self, rref: RecordRef, field: FieldIndex) -> Result<&RecordList, StorageError> {
        let record = self.record(rref)?;
        record.list(field).ok_or_else(|| StorageError::NotRelational {
            type_name: record.type_name().to_string(),
            field: record.model().field(field).name().to_string(),
        })
    }
}
