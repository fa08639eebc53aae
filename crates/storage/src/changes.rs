use std::sync::Arc;

use indexmap::IndexSet;
use recgraph_core::{ids::*, schema::CompiledType};

/// Everything a mutation touched, in the order it was touched.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub fields: IndexSet<(RecordRef, FieldIndex)>,
    pub created: Vec<RecordRef>,
    pub deleted: Vec<(RecordRef, Arc<CompiledType>)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_field(&mut self, record: RecordRef, field: FieldIndex) {
        self.fields.insert((record, field));
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.created.is_empty() && self.deleted.is_empty()
    }

    pub fn was_deleted(&self, record: RecordRef) -> bool {
        self.deleted.iter().any(|(r, _)| *r == record)
    }

    /// Append `other`, keeping first-touch order.
    pub fn merge(&mut self, other: ChangeSet) {
        self.fields.extend(other.fields);
        self.created.extend(other.created);
        self.deleted.extend(other.deleted);
    }
}
