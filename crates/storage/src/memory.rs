use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use recgraph_core::{
    field_value::FieldValue,
    ids::*,
    schema::{CompiledType, Schema, Trigger},
    CoreError,
};

use crate::changes::ChangeSet;
use crate::error::StorageError;
use crate::record::{FieldStatus, Record};
use crate::snapshot::{RecordSnapshot, SnapshotValue, StoreSnapshot};
use crate::traits::RecordStore;

/// In-process record store.
///
/// Owns every live record plus the indexes needed to find them: by local
/// id, by type, and an inbound index of every `(owner, field)` listing a
/// record, so deletion can reach links made without an inverse.
///
/// Local ids of deleted records stay retired for the life of the store.
pub struct MemoryStore {
    schema: Arc<Schema>,
    records: BTreeMap<RecordRef, Record>,
    by_local_id: HashMap<LocalId, RecordRef>,
    retired: HashSet<LocalId>,
    by_type: HashMap<Arc<str>, BTreeSet<RecordRef>>,
    inbound: HashMap<RecordRef, BTreeSet<(RecordRef, FieldIndex)>>,
    next_ref: u64,
}

impl MemoryStore {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            records: BTreeMap::new(),
            by_local_id: HashMap::new(),
            retired: HashSet::new(),
            by_type: HashMap::new(),
            inbound: HashMap::new(),
            next_ref: 1,
        }
    }

    fn record_mut(&mut self, rref: RecordRef) -> Result<&mut Record, CoreError> {
        let next_ref = self.next_ref;
        self.records
            .get_mut(&rref)
            .ok_or_else(|| missing(rref, next_ref))
    }

    /// Allocate a record of `model` with its defaults applied.
    ///
    /// With no `local_id` the record gets a synthetic one built from its
    /// handle.
    pub fn allocate(
        &mut self,
        model: &Arc<CompiledType>,
        local_id: Option<LocalId>,
        changes: &mut ChangeSet,
    ) -> Result<RecordRef, StorageError> {
        if let Some(id) = &local_id {
            self.check_available(id)?;
        }
        let rref = RecordRef::from_raw(self.next_ref);
        self.next_ref += 1;
        let local_id = local_id.unwrap_or_else(|| LocalId::synthetic(model.name(), rref));

        self.by_local_id.insert(local_id.clone(), rref);
        self.by_type
            .entry(model.name().clone())
            .or_default()
            .insert(rref);
        self.records
            .insert(rref, Record::new(rref, model.clone(), local_id));
        changes.created.push(rref);
        trace!(record = %rref, type_name = %model.name(), "allocated record");
        Ok(rref)
    }

    /// Write an attribute. Returns whether the stored value changed.
    pub fn set_value(
        &mut self,
        rref: RecordRef,
        field: FieldIndex,
        value: FieldValue,
        changes: &mut ChangeSet,
    ) -> Result<bool, StorageError> {
        let record = self.record_mut(rref)?;
        let type_name = record.type_name().to_string();
        let Some(crate::record::Slot::Value(current)) = record.slots.get_mut(field.get()) else {
            return Err(StorageError::NotAttribute {
                type_name,
                field: record.model.field(field).name().to_string(),
            });
        };
        if *current == value {
            return Ok(false);
        }
        *current = value;
        changes.mark_field(rref, field);
        Ok(true)
    }

    /// Link `target` into `owner.field`.
    ///
    /// A `one` field drops its previous entry first. With `inverse`, the
    /// target's inverse field is linked back as well.
    pub fn link(
        &mut self,
        owner: RecordRef,
        field: FieldIndex,
        target: RecordRef,
        inverse: bool,
        changes: &mut ChangeSet,
    ) -> Result<(), StorageError> {
        let model = self.record(owner)?.model().clone();
        let compiled = model.field(field);
        let rel = compiled.relation().ok_or_else(|| StorageError::NotRelational {
            type_name: model.name().to_string(),
            field: compiled.name().to_string(),
        })?;
        let target_type = self.record(target)?.model().name().clone();
        if target_type != *rel.target() {
            return Err(StorageError::TargetTypeMismatch {
                type_name: model.name().to_string(),
                field: compiled.name().to_string(),
                expected: rel.target().to_string(),
                found: target_type.to_string(),
            });
        }

        let list = self.list(owner, field)?;
        if list.contains(target) {
            return Ok(());
        }
        if !rel.is_many()
            && let Some(previous) = list.first()
        {
            self.unlink(owner, field, previous, inverse, changes)?;
        }

        if let Some(list) = self.record_mut(owner)?.list_mut(field) {
            list.push(target);
        }
        self.inbound.entry(target).or_default().insert((owner, field));
        changes.mark_field(owner, field);

        if inverse && let Some(back) = rel.inverse_index() {
            self.link(target, back, owner, true, changes)?;
        }
        Ok(())
    }

    /// Unlink `target` from `owner.field`; no-op when it is not a member.
    pub fn unlink(
        &mut self,
        owner: RecordRef,
        field: FieldIndex,
        target: RecordRef,
        inverse: bool,
        changes: &mut ChangeSet,
    ) -> Result<(), StorageError> {
        let record = self.record_mut(owner)?;
        let model = record.model.clone();
        let compiled = model.field(field);
        let rel = compiled.relation().ok_or_else(|| StorageError::NotRelational {
            type_name: model.name().to_string(),
            field: compiled.name().to_string(),
        })?;
        let removed = record.list_mut(field).is_some_and(|list| list.remove(target));
        if !removed {
            return Ok(());
        }
        if let Some(sources) = self.inbound.get_mut(&target) {
            sources.remove(&(owner, field));
            if sources.is_empty() {
                self.inbound.remove(&target);
            }
        }
        changes.mark_field(owner, field);

        if inverse
            && self.exists(target)
            && let Some(back) = rel.inverse_index()
        {
            self.unlink(target, back, owner, true, changes)?;
        }
        Ok(())
    }

    /// Unlink every member of `owner.field`, in order.
    pub fn clear(
        &mut self,
        owner: RecordRef,
        field: FieldIndex,
        inverse: bool,
        changes: &mut ChangeSet,
    ) -> Result<(), StorageError> {
        let members = self.list(owner, field)?.to_vec();
        for member in members {
            self.unlink(owner, field, member, inverse, changes)?;
        }
        Ok(())
    }

    /// Replace the order of `owner.field` with a permutation of its members.
    pub fn reorder(
        &mut self,
        owner: RecordRef,
        field: FieldIndex,
        order: Vec<RecordRef>,
        changes: &mut ChangeSet,
    ) -> Result<(), StorageError> {
        let record = self.record_mut(owner)?;
        let Some(list) = record.list_mut(field) else {
            return Err(StorageError::NotRelational {
                type_name: record.type_name().to_string(),
                field: record.model.field(field).name().to_string(),
            });
        };
        if list.as_slice() == order.as_slice() {
            return Ok(());
        }
        list.set_order(order);
        changes.mark_field(owner, field);
        Ok(())
    }

    /// Whether `local_id` belonged to a record that has been removed.
    pub fn is_retired(&self, local_id: &str) -> bool {
        self.retired.contains(local_id)
    }

    fn check_available(&self, local_id: &LocalId) -> Result<(), StorageError> {
        if self.by_local_id.contains_key(local_id) {
            return Err(StorageError::DuplicateLocalId(local_id.to_string()));
        }
        if self.retired.contains(local_id) {
            return Err(StorageError::RetiredLocalId(local_id.to_string()));
        }
        Ok(())
    }

    /// Move a record to a new local id, keeping its handle and links.
    pub fn rekey(&mut self, rref: RecordRef, local_id: LocalId) -> Result<(), StorageError> {
        if self.by_local_id.get(&local_id) == Some(&rref) {
            return Ok(());
        }
        self.check_available(&local_id)?;
        let record = self.record_mut(rref)?;
        let previous = std::mem::replace(&mut record.local_id, local_id.clone());
        self.by_local_id.remove(&previous);
        self.by_local_id.insert(local_id, rref);
        Ok(())
    }

    /// Remove a record after unlinking it from every collection, its own
    /// relations first and then anything still listing it.
    pub fn remove(
        &mut self,
        rref: RecordRef,
        changes: &mut ChangeSet,
    ) -> Result<Arc<CompiledType>, StorageError> {
        let model = self.record(rref)?.model().clone();
        for (field, _) in model.relation_fields() {
            self.clear(rref, field.index(), true, changes)?;
        }
        let sources = self.inbound.remove(&rref).unwrap_or_default();
        for (owner, field) in sources {
            if self.exists(owner) {
                self.unlink(owner, field, rref, false, changes)?;
            }
        }

        if let Some(record) = self.records.remove(&rref) {
            self.by_local_id.remove(&record.local_id);
            self.retired.insert(record.local_id);
        }
        if let Some(set) = self.by_type.get_mut(model.name()) {
            set.remove(&rref);
        }
        self.inbound.remove(&rref);
        changes.deleted.push((rref, model.clone()));
        trace!(record = %rref, type_name = %model.name(), "removed record");
        Ok(model)
    }

    pub fn status(&self, rref: RecordRef, field: FieldIndex, trigger: Trigger) -> Result<FieldStatus, CoreError> {
        Ok(self.record(rref)?.status(field, trigger))
    }

    pub fn set_status(
        &mut self,
        rref: RecordRef,
        field: FieldIndex,
        trigger: Trigger,
        status: FieldStatus,
    ) -> Result<(), CoreError> {
        self.record_mut(rref)?.set_status(field, trigger, status);
        Ok(())
    }

    /// Records currently listing `rref` in one of their fields.
    pub fn inbound(&self, rref: RecordRef) -> Vec<(RecordRef, FieldIndex)> {
        self.inbound
            .get(&rref)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let records = self
            .records
            .values()
            .map(|record| RecordSnapshot {
                record: record.rref(),
                type_name: record.type_name().to_string(),
                local_id: record.local_id().to_string(),
                fields: record
                    .model()
                    .fields()
                    .iter()
                    .filter_map(|field| {
                        let value = match (record.value(field.index()), record.list(field.index())) {
                            (Some(v), _) => SnapshotValue::Value(v.clone()),
                            (None, Some(list)) => SnapshotValue::Relation(list.to_vec()),
                            (None, None) => return None,
                        };
                        Some((field.name().to_string(), value))
                    })
                    .collect(),
            })
            .collect();
        StoreSnapshot { records }
    }
}

fn missing(rref: RecordRef, next_ref: u64) -> CoreError {
    if rref.raw() > 0 && rref.raw() < next_ref {
        CoreError::UseAfterDelete(rref)
    } else {
        CoreError::UnknownRecord(rref)
    }
}

impl RecordStore for MemoryStore {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn record(&self, rref: RecordRef) -> Result<&Record, CoreError> {
        self.records
            .get(&rref)
            .ok_or_else(|| missing(rref, self.next_ref))
    }

    fn exists(&self, rref: RecordRef) -> bool {
        self.records.contains_key(&rref)
    }

    fn by_local_id(&self, local_id: &str) -> Option<RecordRef> {
        self.by_local_id.get(local_id).copied()
    }

    fn records_of(&self, type_name: &str) -> Result<Vec<RecordRef>, CoreError> {
        self.schema.require(type_name)?;
        Ok(self
            .by_type
            .get(type_name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
