use crate::error::CoreError;
use crate::field_value::FieldValue;
use crate::ids::RecordRef;

/// Read access centred on one record, handed to compute functions and to
/// search predicates.
///
/// Reads resolve pending recomputation of the fields they touch. Reads made
/// by a computation are never registered as observer dependencies.
pub trait RecordReader {
    /// The record being computed or tested.
    fn record(&self) -> RecordRef;

    fn get_of(&mut self, record: RecordRef, field: &str) -> Result<FieldValue, CoreError>;

    fn related_of(&mut self, record: RecordRef, field: &str) -> Result<Vec<RecordRef>, CoreError>;

    fn get(&mut self, field: &str) -> Result<FieldValue, CoreError> {
        let record = self.record();
        self.get_of(record, field)
    }

    fn related(&mut self, field: &str) -> Result<Vec<RecordRef>, CoreError> {
        let record = self.record();
        self.related_of(record, field)
    }
}
