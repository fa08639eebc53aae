pub mod config;
pub mod error;
pub mod reactivity;

mod batch;
mod compute;
mod interpreter;
mod records;
mod scheduler;

pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind};
pub use reactivity::{Change, Notification, ObserverFn, WatchKey};

use std::sync::Arc;

use recgraph_core::{
    commands::{Data, FieldUpdate},
    field_value::FieldValue,
    ids::*,
    reader::RecordReader,
    schema::Schema,
    CoreError,
};
use recgraph_storage::{ChangeSet, MemoryStore, RecordList, RecordStore, StoreSnapshot};

use crate::batch::BatchState;
use crate::compute::ReadCtx;
use crate::interpreter::{Claims, Origin};
use crate::reactivity::{Frame, Reactivity};
use crate::scheduler::Scheduler;

/// A reactive record graph over one finalized schema.
///
/// Every public call is a batch: mutations apply, dependent computations
/// settle, and observers are notified before the call returns. Calls made
/// inside [`Engine::batch`] join the enclosing batch instead.
pub struct Engine {
    schema: Arc<Schema>,
    store: MemoryStore,
    config: EngineConfig,
    scheduler: Scheduler,
    reactivity: Reactivity,
    batch: BatchState,
    temporary_ids: TemporaryIds,
}

impl Engine {
    pub fn new(schema: Schema) -> Self {
        Self::with_config(schema, EngineConfig::default())
    }

    pub fn with_config(schema: Schema, config: EngineConfig) -> Self {
        let schema = Arc::new(schema);
        Self {
            store: MemoryStore::new(schema.clone()),
            schema,
            config,
            scheduler: Scheduler::default(),
            reactivity: Reactivity::default(),
            batch: BatchState::default(),
            temporary_ids: TemporaryIds::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read-only view of the store, for diagnostics and invariant checks.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Next negative id for a client-only record.
    pub fn next_temporary_id(&mut self) -> i64 {
        self.temporary_ids.next_id()
    }

    // ========================================================================
    // Batches
    // ========================================================================

    /// Run `f` as one batch. Observers hear about everything it changed
    /// once, after the outermost batch settles.
    pub fn batch<T>(&mut self, f: impl FnOnce(&mut Engine) -> Result<T, EngineError>) -> Result<T, EngineError> {
        self.run_batch(f)
    }

    fn run_batch<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, EngineError>) -> Result<T, EngineError> {
        self.batch.enter();
        let result = f(self);
        if !self.batch.exit() {
            return result;
        }
        let settled = self.settle();
        self.notify();
        match (result, settled) {
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    fn notify(&mut self) {
        let changes: ChangeSet = self.batch.take_changes();
        if changes.is_empty() {
            return;
        }
        let mut keyed = Vec::with_capacity(changes.fields.len() + changes.created.len() + changes.deleted.len());
        for &record in &changes.created {
            if let Ok(model) = self.store.model(record) {
                let type_name = model.name().clone();
                keyed.push((WatchKey::Type(type_name.clone()), Change::Created { record, type_name }));
            }
        }
        for &(record, field) in &changes.fields {
            if let Ok(model) = self.store.model(record) {
                keyed.push((
                    WatchKey::Field(record, field),
                    Change::Field {
                        record,
                        field: model.field(field).name().clone(),
                    },
                ));
            }
        }
        for (record, model) in &changes.deleted {
            let type_name = model.name().clone();
            keyed.push((
                WatchKey::Type(type_name.clone()),
                Change::Deleted {
                    record: *record,
                    type_name,
                },
            ));
        }
        self.reactivity.dispatch(&keyed);
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Create a record, apply `data`, and settle.
    pub fn create(&mut self, type_name: &str, data: Data) -> Result<RecordRef, EngineError> {
        self.run_batch(|engine| engine.create_record(type_name, data))
    }

    /// Update the record identified by `data`, creating it if needed.
    pub fn insert(&mut self, type_name: &str, data: Data) -> Result<RecordRef, EngineError> {
        self.run_batch(|engine| engine.insert_record(type_name, data))
    }

    /// Apply every field of `data`. Nothing is written unless all of it is
    /// valid.
    pub fn update(&mut self, record: RecordRef, data: Data) -> Result<(), EngineError> {
        self.run_batch(|engine| {
            let model = engine.store.model(record)?;
            engine.validate_data(&model, Some(record), &data, Origin::External, &mut Claims::default())?;
            engine.apply_data(record, &model, data)
        })
    }

    /// Write a single field.
    pub fn apply(
        &mut self,
        record: RecordRef,
        field: &str,
        update: impl Into<FieldUpdate>,
    ) -> Result<(), EngineError> {
        let update = update.into();
        self.run_batch(|engine| {
            let model = engine.store.model(record)?;
            let index = model
                .field_index(field)
                .ok_or_else(|| EngineError::invalid(model.name(), field, "unknown field"))?;
            engine.write_field(record, index, update, Origin::External)
        })
    }

    /// Delete a record, unlinking it everywhere, plus its causal relations.
    pub fn delete(&mut self, record: RecordRef) -> Result<(), EngineError> {
        self.run_batch(|engine| engine.delete_record(record))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn field_index(&self, record: RecordRef, field: &str) -> Result<FieldIndex, EngineError> {
        let model = self.store.model(record)?;
        model.field_index(field).ok_or_else(|| {
            CoreError::UnknownField {
                type_name: model.name().to_string(),
                field: field.to_string(),
            }
            .into()
        })
    }

    fn read_field(&mut self, record: RecordRef, field: &str) -> Result<FieldIndex, EngineError> {
        let index = self.field_index(record, field)?;
        self.ensure_fresh(record, index)?;
        self.reactivity.observe(WatchKey::Field(record, index));
        Ok(index)
    }

    pub(crate) fn read_value(&mut self, record: RecordRef, field: &str) -> Result<FieldValue, EngineError> {
        let index = self.read_field(record, field)?;
        Ok(self.store.value(record, index)?.clone())
    }

    pub(crate) fn read_related(&mut self, record: RecordRef, field: &str) -> Result<Vec<RecordRef>, EngineError> {
        let index = self.read_field(record, field)?;
        Ok(self.store.list(record, index)?.to_vec())
    }

    /// Value of an attribute field.
    pub fn get(&mut self, record: RecordRef, field: &str) -> Result<FieldValue, EngineError> {
        self.run_batch(|engine| engine.read_value(record, field))
    }

    /// Members of a relational field, in order.
    pub fn list(&mut self, record: RecordRef, field: &str) -> Result<&RecordList, EngineError> {
        let index = self.run_batch(|engine| engine.read_field(record, field))?;
        Ok(self.store.list(record, index)?)
    }

    /// Owned copy of a relational field's members.
    pub fn related(&mut self, record: RecordRef, field: &str) -> Result<Vec<RecordRef>, EngineError> {
        self.run_batch(|engine| engine.read_related(record, field))
    }

    /// First member of a relational field.
    pub fn one(&mut self, record: RecordRef, field: &str) -> Result<Option<RecordRef>, EngineError> {
        Ok(self.list(record, field)?.first())
    }

    /// Every live record of a type, oldest first.
    pub fn records(&mut self, type_name: &str) -> Result<Vec<RecordRef>, EngineError> {
        let model = self.schema.require(type_name)?;
        self.reactivity.observe(WatchKey::Type(model.name().clone()));
        Ok(self.store.records_of(type_name)?)
    }

    /// First record of a type accepted by `predicate`.
    ///
    /// The predicate only gets read access, centred on the candidate. Under
    /// `track`, the type and every field it reads are observed.
    pub fn find<F>(&mut self, type_name: &str, mut predicate: F) -> Result<Option<RecordRef>, EngineError>
    where
        F: FnMut(&mut dyn RecordReader) -> Result<bool, CoreError>,
    {
        self.run_batch(|engine| {
            for record in engine.records(type_name)? {
                if predicate(&mut ReadCtx { engine: &mut *engine, record })? {
                    return Ok(Some(record));
                }
            }
            Ok(None)
        })
    }

    pub fn by_local_id(&self, local_id: &str) -> Option<RecordRef> {
        self.store.by_local_id(local_id)
    }

    pub fn local_id(&self, record: RecordRef) -> Result<LocalId, EngineError> {
        Ok(self.store.record(record)?.local_id().clone())
    }

    pub fn exists(&self, record: RecordRef) -> bool {
        self.store.exists(record)
    }

    /// Copy of every live record with all computations brought up to date.
    pub fn snapshot(&mut self) -> Result<StoreSnapshot, EngineError> {
        self.run_batch(|engine| {
            let schema = engine.schema.clone();
            for model in schema.types() {
                let pending: Vec<FieldIndex> = model
                    .fields()
                    .iter()
                    .filter(|f| f.is_computed() || f.is_sorted())
                    .map(|f| f.index())
                    .collect();
                if pending.is_empty() {
                    continue;
                }
                for record in engine.store.records_of(model.name())? {
                    for &field in &pending {
                        if engine.store.exists(record) {
                            engine.ensure_fresh(record, field)?;
                        }
                    }
                }
            }
            Ok(())
        })?;
        Ok(self.store.snapshot())
    }

    // ========================================================================
    // Observers
    // ========================================================================

    pub fn subscribe(&mut self, callback: impl FnMut(&Notification) + 'static) -> ObserverId {
        self.reactivity.subscribe(Box::new(callback))
    }

    pub fn unsubscribe(&mut self, observer: ObserverId) -> bool {
        self.reactivity.unsubscribe(observer)
    }

    /// Run `f`, making every read it performs a dependency of `observer`.
    /// Dependencies from earlier tracking are dropped first.
    pub fn track<T>(
        &mut self,
        observer: ObserverId,
        f: impl FnOnce(&mut Engine) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.reactivity.reset(observer);
        self.reactivity.push_frame(Frame::Observe(observer));
        let result = f(self);
        self.reactivity.pop_frame();
        result
    }

    /// Add a single field dependency to `observer`.
    pub fn watch(&mut self, observer: ObserverId, record: RecordRef, field: &str) -> Result<(), EngineError> {
        let index = self.field_index(record, field)?;
        self.reactivity.watch(observer, WatchKey::Field(record, index));
        Ok(())
    }

    pub fn is_subscribed(&self, observer: ObserverId) -> bool {
        self.reactivity.is_subscribed(observer)
    }
}
