use std::cmp::Ordering;
use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use recgraph_core::{
    field_value::FieldValue,
    ids::*,
    schema::{CompiledSortKey, DependencyPath, SortOrder, Trigger},
    CoreError,
};
use recgraph_storage::{ChangeSet, FieldStatus, RecordStore};

use crate::compute::ReadCtx;
use crate::interpreter::Origin;
use crate::reactivity::Frame;
use crate::{Engine, EngineError};

/// FIFO of dirty fields waiting for the end of the batch.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    queue: VecDeque<(RecordRef, FieldIndex, Trigger)>,
}

impl Scheduler {
    pub fn push(&mut self, record: RecordRef, field: FieldIndex, trigger: Trigger) {
        self.queue.push_back((record, field, trigger));
    }

    pub fn pop(&mut self) -> Option<(RecordRef, FieldIndex, Trigger)> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl Engine {
    /// Record a mutation: dirty its dependents, then keep it for observers.
    pub(crate) fn commit(&mut self, changes: ChangeSet) -> Result<(), EngineError> {
        self.absorb(&changes)?;
        self.batch.changes.merge(changes);
        Ok(())
    }

    fn absorb(&mut self, changes: &ChangeSet) -> Result<(), EngineError> {
        for &(record, field) in &changes.fields {
            let Ok(model) = self.store.model(record) else {
                continue;
            };
            for dependent in model.field(field).dependents() {
                for owner in self.walk_back(record, &dependent.back_path) {
                    self.mark_dirty(owner, dependent.owner_field, dependent.trigger)?;
                }
            }
        }
        for &record in &changes.created {
            let Ok(model) = self.store.model(record) else {
                continue;
            };
            for field in model.fields() {
                if field.is_computed() && field.is_eager() {
                    self.scheduler.push(record, field.index(), Trigger::Compute);
                }
            }
        }
        Ok(())
    }

    /// Records reached from `start` by following `path`, deduplicated.
    fn walk_back(&self, start: RecordRef, path: &[FieldIndex]) -> Vec<RecordRef> {
        let mut current = vec![start];
        for &field in path {
            let mut next = Vec::new();
            for record in &current {
                let Ok(list) = self.store.list(*record, field) else {
                    continue;
                };
                for member in list {
                    if !next.contains(&member) {
                        next.push(member);
                    }
                }
            }
            current = next;
        }
        current
    }

    /// Clean to dirty. Eager fields and sorts are queued; a lazy field passes
    /// the dirtiness on to its own dependents right away.
    fn mark_dirty(
        &mut self,
        record: RecordRef,
        field: FieldIndex,
        trigger: Trigger,
    ) -> Result<(), EngineError> {
        if !self.store.exists(record)
            || self.store.status(record, field, trigger)? != FieldStatus::Clean
        {
            return Ok(());
        }
        self.store.set_status(record, field, trigger, FieldStatus::Dirty)?;
        let model = self.store.model(record)?;
        let compiled = model.field(field);
        if trigger == Trigger::Sort || compiled.is_eager() {
            self.scheduler.push(record, field, trigger);
            return Ok(());
        }
        // Observers of a lazy field hear about the invalidation; the value
        // follows on their next read.
        self.batch.changes.mark_field(record, field);
        for dependent in compiled.dependents() {
            for owner in self.walk_back(record, &dependent.back_path) {
                self.mark_dirty(owner, dependent.owner_field, dependent.trigger)?;
            }
        }
        Ok(())
    }

    /// Drain the queue. Fails with `ComputeDivergence` past the configured
    /// iteration cap; any failure empties the queue.
    pub(crate) fn settle(&mut self) -> Result<(), EngineError> {
        let limit = self.config.max_settle_iterations;
        let mut iterations = 0;
        while let Some((record, field, trigger)) = self.scheduler.pop() {
            if !self.store.exists(record)
                || self.store.status(record, field, trigger)? != FieldStatus::Dirty
            {
                continue;
            }
            iterations += 1;
            if iterations > limit {
                let pending = self.scheduler.len() + 1;
                self.scheduler.clear();
                warn!(iterations = limit, pending, "recomputation did not settle");
                return Err(EngineError::ComputeDivergence {
                    iterations: limit,
                    pending,
                });
            }
            let result = match trigger {
                Trigger::Compute => self.recompute(record, field),
                Trigger::Sort => self.resort(record, field),
            };
            if let Err(e) = result {
                self.scheduler.clear();
                return Err(e);
            }
        }
        if iterations > 0 {
            debug!(iterations, "batch settled");
        }
        Ok(())
    }

    /// Bring a field up to date before it is read.
    pub(crate) fn ensure_fresh(&mut self, record: RecordRef, field: FieldIndex) -> Result<(), EngineError> {
        let model = self.store.model(record)?;
        let compiled = model.field(field);
        if compiled.is_computed() {
            match self.store.status(record, field, Trigger::Compute)? {
                FieldStatus::Clean => {}
                FieldStatus::Dirty => self.recompute(record, field)?,
                FieldStatus::Computing => {
                    return Err(CoreError::ComputeCycle {
                        record,
                        type_name: model.name().to_string(),
                        field: compiled.name().to_string(),
                    }
                    .into());
                }
            }
        }
        if compiled.is_sorted() && self.store.status(record, field, Trigger::Sort)? == FieldStatus::Dirty {
            self.resort(record, field)?;
        }
        Ok(())
    }

    fn recompute(&mut self, record: RecordRef, field: FieldIndex) -> Result<(), EngineError> {
        let model = self.store.model(record)?;
        let compiled = model.field(field);
        let Some(computation) = compiled.computation() else {
            self.store.set_status(record, field, Trigger::Compute, FieldStatus::Clean)?;
            return Ok(());
        };
        let func = computation.func().clone();
        trace!(record = %record, type_name = %model.name(), field = %compiled.name(), "recompute");

        self.store.set_status(record, field, Trigger::Compute, FieldStatus::Computing)?;
        self.reactivity.push_frame(Frame::Compute);
        let result = (*func)(&mut ReadCtx { engine: self, record });
        self.reactivity.pop_frame();

        match result {
            Ok(update) => {
                self.store.set_status(record, field, Trigger::Compute, FieldStatus::Clean)?;
                self.write_field(record, field, update, Origin::Scheduler)
            }
            Err(e) => {
                if self.store.exists(record) {
                    self.store.set_status(record, field, Trigger::Compute, FieldStatus::Dirty)?;
                }
                Err(e.into())
            }
        }
    }

    /// Sort a copy of the members and only publish the new order if it
    /// differs from the current one.
    fn resort(&mut self, record: RecordRef, field: FieldIndex) -> Result<(), EngineError> {
        let model = self.store.model(record)?;
        let compiled = model.field(field);
        let keys = compiled.sort_keys().to_vec();
        trace!(record = %record, type_name = %model.name(), field = %compiled.name(), "resort");

        self.store.set_status(record, field, Trigger::Sort, FieldStatus::Computing)?;
        self.reactivity.push_frame(Frame::Compute);
        let keyed = self.sort_keys_of(record, field, &keys);
        self.reactivity.pop_frame();
        let mut keyed = match keyed {
            Ok(keyed) => keyed,
            Err(e) => {
                self.store.set_status(record, field, Trigger::Sort, FieldStatus::Dirty)?;
                return Err(e);
            }
        };

        keyed.sort_by(|(_, a), (_, b)| compare_keys(&keys, a, b));
        let order: Vec<RecordRef> = keyed.into_iter().map(|(member, _)| member).collect();

        let mut changes = ChangeSet::new();
        self.store.reorder(record, field, order, &mut changes)?;
        // Absorb while still computing so the resort does not requeue itself.
        let committed = self.commit(changes);
        self.store.set_status(record, field, Trigger::Sort, FieldStatus::Clean)?;
        committed
    }

    fn sort_keys_of(
        &mut self,
        record: RecordRef,
        field: FieldIndex,
        keys: &[CompiledSortKey],
    ) -> Result<Vec<(RecordRef, Vec<FieldValue>)>, EngineError> {
        let members = self.store.list(record, field)?.to_vec();
        let mut keyed = Vec::with_capacity(members.len());
        for member in members {
            let mut values = Vec::with_capacity(keys.len());
            for key in keys {
                values.push(self.value_at(member, &key.path)?);
            }
            keyed.push((member, values));
        }
        Ok(keyed)
    }

    /// Value at a dotted path, following the first record of each relation.
    fn value_at(&mut self, record: RecordRef, path: &DependencyPath) -> Result<FieldValue, EngineError> {
        let mut current = record;
        let segments = path.segments();
        for (i, segment) in segments.iter().enumerate() {
            let model = self.store.model(current)?;
            let Some(index) = model.field_index(segment) else {
                return Ok(FieldValue::Null);
            };
            self.ensure_fresh(current, index)?;
            let is_last = i + 1 == segments.len();
            if let Some(value) = self.store.record(current)?.value(index) {
                return Ok(if is_last { value.clone() } else { FieldValue::Null });
            }
            let list = self.store.list(current, index)?;
            if is_last {
                return Ok(FieldValue::Boolean(!list.is_empty()));
            }
            match list.first() {
                Some(next) => current = next,
                None => return Ok(FieldValue::Null),
            }
        }
        Ok(FieldValue::Null)
    }
}

/// Lexicographic over the keys; `sort_by` keeps ties in their current order.
fn compare_keys(keys: &[CompiledSortKey], a: &[FieldValue], b: &[FieldValue]) -> Ordering {
    for (key, (x, y)) in keys.iter().zip(a.iter().zip(b.iter())) {
        let ord = match key.order {
            SortOrder::Asc => nulls_last(x, y, || x.sort_cmp(y)),
            SortOrder::Desc => nulls_last(x, y, || y.sort_cmp(x)),
            SortOrder::TruthyFirst => y.is_truthy().cmp(&x.is_truthy()),
            SortOrder::FalsyFirst => x.is_truthy().cmp(&y.is_truthy()),
        };
        if ord.is_ne() {
            return ord;
        }
    }
    Ordering::Equal
}

fn nulls_last(a: &FieldValue, b: &FieldValue, cmp: impl FnOnce() -> Ordering) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => cmp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(order: SortOrder) -> CompiledSortKey {
        CompiledSortKey {
            path: DependencyPath::parse("id").unwrap(),
            order,
        }
    }

    fn sorted(order: SortOrder, values: Vec<FieldValue>) -> Vec<FieldValue> {
        let keys = [key(order)];
        let mut rows: Vec<Vec<FieldValue>> = values.into_iter().map(|v| vec![v]).collect();
        rows.sort_by(|a, b| compare_keys(&keys, a, b));
        rows.into_iter().map(|mut row| row.remove(0)).collect()
    }

    #[test]
    fn asc_and_desc_put_nulls_last() {
        let values = vec![FieldValue::Integer(2), FieldValue::Null, FieldValue::Integer(1)];
        assert_eq!(
            sorted(SortOrder::Asc, values.clone()),
            vec![FieldValue::Integer(1), FieldValue::Integer(2), FieldValue::Null]
        );
        assert_eq!(
            sorted(SortOrder::Desc, values),
            vec![FieldValue::Integer(2), FieldValue::Integer(1), FieldValue::Null]
        );
    }

    #[test]
    fn truthy_first_is_stable() {
        let values = vec![
            FieldValue::Integer(0),
            FieldValue::Text("b".into()),
            FieldValue::Null,
            FieldValue::Text("a".into()),
        ];
        assert_eq!(
            sorted(SortOrder::TruthyFirst, values.clone()),
            vec![
                FieldValue::Text("b".into()),
                FieldValue::Text("a".into()),
                FieldValue::Integer(0),
                FieldValue::Null,
            ]
        );
        assert_eq!(
            sorted(SortOrder::FalsyFirst, values),
            vec![
                FieldValue::Integer(0),
                FieldValue::Null,
                FieldValue::Text("b".into()),
                FieldValue::Text("a".into()),
            ]
        );
    }
}
