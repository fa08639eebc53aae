use std::collections::HashSet;

use recgraph_core::{
    commands::{Command, Data, FieldUpdate, Target},
    field_value::FieldValue,
    ids::*,
    schema::{CompiledField, CompiledType, FieldKind, RelationDef},
};
use recgraph_storage::{ChangeSet, RecordStore};

use crate::{Engine, EngineError};

/// Who is writing: computed fields only accept writes from the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    External,
    Scheduler,
}

/// Local ids an update is about to create, so that no two targets in it
/// claim the same identity.
#[derive(Debug, Default)]
pub(crate) struct Claims(HashSet<LocalId>);

impl Claims {
    pub(crate) fn contains(&self, local_id: &LocalId) -> bool {
        self.0.contains(local_id)
    }

    pub(crate) fn claim(&mut self, local_id: LocalId) {
        self.0.insert(local_id);
    }
}

impl Engine {
    // ========================================================================
    // Validation
    // ========================================================================

    /// Check a whole update against `model` without touching the store.
    ///
    /// `record` is `None` while the record does not exist yet, which also
    /// lifts the immutability of identifying fields. Nested targets are
    /// resolved as far as their identity, so an update that validates
    /// cannot fail halfway through.
    pub(crate) fn validate_data(
        &self,
        model: &CompiledType,
        record: Option<RecordRef>,
        data: &Data,
        origin: Origin,
        claims: &mut Claims,
    ) -> Result<(), EngineError> {
        for (name, update) in data.iter() {
            let field = model
                .field_by_name(name)
                .ok_or_else(|| EngineError::invalid(model.name(), name, "unknown field"))?;
            self.validate_field(model, record, field, update, origin, claims)?;
        }
        Ok(())
    }

    pub(crate) fn validate_field(
        &self,
        model: &CompiledType,
        record: Option<RecordRef>,
        field: &CompiledField,
        update: &FieldUpdate,
        origin: Origin,
        claims: &mut Claims,
    ) -> Result<(), EngineError> {
        let invalid = |reason: &str| EngineError::invalid(model.name(), field.name(), reason);
        if field.is_computed() && origin == Origin::External {
            return Err(invalid("computed fields are read-only"));
        }
        match (field.kind(), update) {
            (FieldKind::Attribute { kind, .. }, FieldUpdate::Value(value)) => {
                let normalized = kind
                    .normalize(value.clone())
                    .map_err(|e| invalid(&e.to_string()))?;
                if field.is_identifying()
                    && let Some(record) = record
                    && *self.store.value(record, field.index())? != normalized
                {
                    return Err(invalid("identifying fields cannot change"));
                }
                Ok(())
            }
            (FieldKind::Attribute { .. }, FieldUpdate::Relation(_)) => {
                Err(invalid("relation commands need a relational field"))
            }
            (FieldKind::Relation(_), FieldUpdate::Value(FieldValue::Null | FieldValue::Boolean(false))) => {
                Ok(())
            }
            (FieldKind::Relation(_), FieldUpdate::Value(_)) => {
                Err(invalid("only null or false can be assigned to a relation"))
            }
            (FieldKind::Relation(rel), FieldUpdate::Relation(commands)) => {
                for command in commands {
                    if let Command::Replace(targets) = command
                        && !rel.is_many()
                        && targets.len() > 1
                    {
                        return Err(invalid("a one relation holds at most one record"));
                    }
                    for target in command.targets() {
                        self.validate_target(model, field, rel, target, claims)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn validate_target(
        &self,
        model: &CompiledType,
        field: &CompiledField,
        rel: &RelationDef,
        target: &Target,
        claims: &mut Claims,
    ) -> Result<(), EngineError> {
        match target {
            Target::Record(record) => {
                let target_model = self.store.model(*record)?;
                if target_model.name() != rel.target() {
                    return Err(EngineError::invalid(
                        model.name(),
                        field.name(),
                        format!("expected a {} record, got a {}", rel.target(), target_model.name()),
                    ));
                }
                Ok(())
            }
            Target::Insert(data) => {
                let target_model = self.schema.require(rel.target())?.clone();
                self.plan_landing(&target_model, data, false, claims)?;
                Ok(())
            }
            Target::Create(data) => {
                let target_model = self.schema.require(rel.target())?.clone();
                self.plan_landing(&target_model, data, true, claims)?;
                Ok(())
            }
        }
    }

    // ========================================================================
    // Application
    // ========================================================================

    /// Validate and apply a single field write.
    pub(crate) fn write_field(
        &mut self,
        record: RecordRef,
        field: FieldIndex,
        update: FieldUpdate,
        origin: Origin,
    ) -> Result<(), EngineError> {
        let model = self.store.model(record)?;
        let mut claims = Claims::default();
        self.validate_field(&model, Some(record), model.field(field), &update, origin, &mut claims)?;
        self.apply_field(record, &model, field, update)
    }

    /// Apply an update that already passed `validate_data`.
    pub(crate) fn apply_data(
        &mut self,
        record: RecordRef,
        model: &CompiledType,
        data: Data,
    ) -> Result<(), EngineError> {
        for (name, update) in data {
            if let Some(field) = model.field_index(&name) {
                self.apply_field(record, model, field, update)?;
            }
        }
        Ok(())
    }

    fn apply_field(
        &mut self,
        record: RecordRef,
        model: &CompiledType,
        field: FieldIndex,
        update: FieldUpdate,
    ) -> Result<(), EngineError> {
        let mut changes = ChangeSet::new();
        let result = self.write_slot(record, model, field, update, &mut changes);
        self.commit(changes)?;
        result
    }

    fn write_slot(
        &mut self,
        record: RecordRef,
        model: &CompiledType,
        field: FieldIndex,
        update: FieldUpdate,
        changes: &mut ChangeSet,
    ) -> Result<(), EngineError> {
        let compiled = model.field(field);
        match (compiled.kind(), update) {
            (FieldKind::Attribute { kind, .. }, FieldUpdate::Value(value)) => {
                let value = kind.normalize(value)?;
                self.store.set_value(record, field, value, changes)?;
            }
            (FieldKind::Attribute { .. }, FieldUpdate::Relation(_)) => {
                return Err(EngineError::invalid(
                    model.name(),
                    compiled.name(),
                    "relation commands need a relational field",
                ));
            }
            (FieldKind::Relation(_), FieldUpdate::Value(_)) => {
                self.store.clear(record, field, true, changes)?;
            }
            (FieldKind::Relation(rel), FieldUpdate::Relation(commands)) => {
                for command in commands {
                    self.run_command(record, field, rel, command, changes)?;
                }
            }
        }
        Ok(())
    }

    fn run_command(
        &mut self,
        record: RecordRef,
        field: FieldIndex,
        rel: &RelationDef,
        command: Command,
        changes: &mut ChangeSet,
    ) -> Result<(), EngineError> {
        match command {
            Command::Add(target) => {
                let target = self.resolve_target(rel.target(), target)?;
                self.store.link(record, field, target, true, changes)?;
            }
            Command::AddNoInverse(target) => {
                let target = self.resolve_target(rel.target(), target)?;
                self.store.link(record, field, target, false, changes)?;
            }
            Command::Delete(target) => {
                let target = self.resolve_target(rel.target(), target)?;
                self.store.unlink(record, field, target, true, changes)?;
            }
            Command::DeleteNoInverse(target) => {
                let target = self.resolve_target(rel.target(), target)?;
                self.store.unlink(record, field, target, false, changes)?;
            }
            Command::Clear => self.store.clear(record, field, true, changes)?,
            Command::Replace(targets) => {
                let mut wanted = Vec::with_capacity(targets.len());
                for target in targets {
                    let target = self.resolve_target(rel.target(), target)?;
                    if !wanted.contains(&target) {
                        wanted.push(target);
                    }
                }
                let current = self.store.list(record, field)?.to_vec();
                for member in &current {
                    if !wanted.contains(member) {
                        self.store.unlink(record, field, *member, true, changes)?;
                    }
                }
                for target in wanted {
                    if !current.contains(&target) {
                        self.store.link(record, field, target, true, changes)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_target(&mut self, type_name: &str, target: Target) -> Result<RecordRef, EngineError> {
        match target {
            Target::Record(record) => Ok(record),
            Target::Insert(data) => self.insert_record(type_name, data),
            Target::Create(data) => self.create_record(type_name, data),
        }
    }
}
