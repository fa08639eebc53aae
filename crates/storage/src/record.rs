use std::sync::Arc;

use recgraph_core::{
    field_value::FieldValue,
    ids::*,
    schema::{CompiledType, FieldKind, Trigger},
};

/// Scheduler state of one computed or sorted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStatus {
    Clean,
    Dirty,
    Computing,
}

/// Ordered members of one relational field of one record.
///
/// Read-only outside this crate; every change goes through the store so the
/// inverse side and the inbound index stay in step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordList {
    items: Vec<RecordRef>,
}

impl RecordList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RecordRef> + '_ {
        self.items.iter().copied()
    }

    pub fn contains(&self, record: RecordRef) -> bool {
        self.items.contains(&record)
    }

    pub fn first(&self) -> Option<RecordRef> {
        self.items.first().copied()
    }

    pub fn to_vec(&self) -> Vec<RecordRef> {
        self.items.clone()
    }

    pub fn as_slice(&self) -> &[RecordRef] {
        &self.items
    }

    pub(crate) fn push(&mut self, record: RecordRef) {
        self.items.push(record);
    }

    pub(crate) fn remove(&mut self, record: RecordRef) -> bool {
        match self.items.iter().position(|r| *r == record) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_order(&mut self, items: Vec<RecordRef>) {
        self.items = items;
    }
}

impl<'a> IntoIterator for &'a RecordList {
    type Item = RecordRef;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, RecordRef>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter().copied()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Value(FieldValue),
    Relation(RecordList),
}

/// A live record: one slot per field of its type.
#[derive(Debug, Clone)]
pub struct Record {
    pub(crate) rref: RecordRef,
    pub(crate) model: Arc<CompiledType>,
    pub(crate) local_id: LocalId,
    pub(crate) slots: Vec<Slot>,
    pub(crate) compute_status: Vec<FieldStatus>,
    pub(crate) sort_status: Vec<FieldStatus>,
}

impl Record {
    /// Slots start at their defaults; computed fields start dirty.
    pub(crate) fn new(rref: RecordRef, model: Arc<CompiledType>, local_id: LocalId) -> Self {
        let slots = model
            .fields()
            .iter()
            .map(|field| match field.kind() {
                FieldKind::Attribute { default, .. } => Slot::Value(default.clone()),
                FieldKind::Relation(_) => Slot::Relation(RecordList::default()),
            })
            .collect();
        let compute_status = model
            .fields()
            .iter()
            .map(|field| {
                if field.is_computed() {
                    FieldStatus::Dirty
                } else {
                    FieldStatus::Clean
                }
            })
            .collect();
        let sort_status = vec![FieldStatus::Clean; model.fields().len()];
        Self {
            rref,
            model,
            local_id,
            slots,
            compute_status,
            sort_status,
        }
    }

    pub fn rref(&self) -> RecordRef {
        self.rref
    }

    pub fn model(&self) -> &Arc<CompiledType> {
        &self.model
    }

    pub fn type_name(&self) -> &str {
        self.model.name()
    }

    pub fn local_id(&self) -> &LocalId {
        &self.local_id
    }

    /// Scalar value of an attribute field; `None` for relations.
    pub fn value(&self, field: FieldIndex) -> Option<&FieldValue> {
        match self.slots.get(field.get()) {
            Some(Slot::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Members of a relational field; `None` for attributes.
    pub fn list(&self, field: FieldIndex) -> Option<&RecordList> {
        match self.slots.get(field.get()) {
            Some(Slot::Relation(list)) => Some(list),
            _ => None,
        }
    }

    pub(crate) fn list_mut(&mut self, field: FieldIndex) -> Option<&mut RecordList> {
        match self.slots.get_mut(field.get()) {
            Some(Slot::Relation(list)) => Some(list),
            _ => None,
        }
    }

    pub fn status(&self, field: FieldIndex, trigger: Trigger) -> FieldStatus {
        let statuses = match trigger {
            Trigger::Compute => &self.compute_status,
            Trigger::Sort => &self.sort_status,
        };
        statuses.get(field.get()).copied().unwrap_or(FieldStatus::Clean)
    }

    pub(crate) fn set_status(&mut self, field: FieldIndex, trigger: Trigger, status: FieldStatus) {
        let statuses = match trigger {
            Trigger::Compute => &mut self.compute_status,
            Trigger::Sort => &mut self.sort_status,
        };
        if let Some(slot) = statuses.get_mut(field.get()) {
            *slot = status;
        }
    }
}
