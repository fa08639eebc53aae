use recgraph_core::{field_value::FieldValue, ids::RecordRef, reader::RecordReader, CoreError};
use recgraph_storage::StorageError;

use crate::{Engine, EngineError};

/// Read-only view of the engine centred on one record, handed to compute
/// functions and `find` predicates.
pub(crate) struct ReadCtx<'a> {
    pub engine: &'a mut Engine,
    pub record: RecordRef,
}

impl RecordReader for ReadCtx<'_> {
    fn record(&self) -> RecordRef {
        self.record
    }

    fn get_of(&mut self, record: RecordRef, field: &str) -> Result<FieldValue, CoreError> {
        self.engine.read_value(record, field).map_err(into_core)
    }

    fn related_of(&mut self, record: RecordRef, field: &str) -> Result<Vec<RecordRef>, CoreError> {
        self.engine.read_related(record, field).map_err(into_core)
    }
}

fn into_core(err: EngineError) -> CoreError {
    match err {
        EngineError::Core(e) | EngineError::Storage(StorageError::Core(e)) => e,
        other => CoreError::Compute(other.to_string()),
    }
}
