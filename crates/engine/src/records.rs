use std::sync::Arc;

use tracing::{debug, warn};

use recgraph_core::{
    commands::Data,
    field_value::{AttributeKind, FieldValue},
    ids::*,
    schema::CompiledType,
};
use recgraph_storage::{ChangeSet, RecordStore, StorageError};

use crate::interpreter::{Claims, Origin};
use crate::{Engine, EngineError};

impl Engine {
    pub(crate) fn create_record(&mut self, type_name: &str, data: Data) -> Result<RecordRef, EngineError> {
        let model = self.schema.require(type_name)?.clone();
        let landing = self.plan_landing(&model, &data, true, &mut Claims::default())?;
        self.land(&model, data, landing)
    }

    /// Find by identity and update, or supersede a temporary record, or
    /// create.
    pub(crate) fn insert_record(&mut self, type_name: &str, data: Data) -> Result<RecordRef, EngineError> {
        let model = self.schema.require(type_name)?.clone();
        let landing = self.plan_landing(&model, &data, false, &mut Claims::default())?;
        self.land(&model, data, landing)
    }

    /// Decide which record `data` lands on and validate it there, without
    /// writing anything.
    ///
    /// `create` refuses an identity that is already live. Identities claimed
    /// earlier in the same update count as live.
    pub(crate) fn plan_landing(
        &self,
        model: &CompiledType,
        data: &Data,
        create: bool,
        claims: &mut Claims,
    ) -> Result<Landing, EngineError> {
        let key = identifying_values(model, data)?;
        let Some(local_id) = local_id_for(model, &key) else {
            self.validate_data(model, None, data, Origin::External, claims)?;
            return Ok(Landing::Fresh { local_id: None });
        };

        let taken = self.store.by_local_id(local_id.as_str());
        if create && (taken.is_some() || claims.contains(&local_id)) {
            return Err(StorageError::DuplicateLocalId(local_id.to_string()).into());
        }
        if taken.is_none() && self.store.is_retired(local_id.as_str()) {
            return Err(StorageError::RetiredLocalId(local_id.to_string()).into());
        }

        let landing = match taken {
            Some(existing) => Landing::Existing(existing),
            None if claims.contains(&local_id) => Landing::Fresh {
                local_id: Some(local_id),
            },
            None => {
                claims.claim(local_id.clone());
                match self.superseded_by(model, data)? {
                    Some(temporary) if !create => Landing::Supersede {
                        temporary,
                        local_id,
                        key,
                    },
                    _ => Landing::Fresh {
                        local_id: Some(local_id),
                    },
                }
            }
        };
        let record = match &landing {
            Landing::Existing(record) => Some(*record),
            _ => None,
        };
        self.validate_data(model, record, data, Origin::External, claims)?;
        Ok(landing)
    }

    fn land(&mut self, model: &Arc<CompiledType>, data: Data, landing: Landing) -> Result<RecordRef, EngineError> {
        let record = match landing {
            Landing::Existing(record) => record,
            Landing::Supersede {
                temporary,
                local_id,
                key,
            } => {
                let previous = self.store.record(temporary)?.local_id().clone();
                self.store.rekey(temporary, local_id.clone())?;
                let mut changes = ChangeSet::new();
                for (field, value) in key {
                    self.store.set_value(temporary, field, value, &mut changes)?;
                }
                self.commit(changes)?;
                debug!(record = %temporary, from = %previous, to = %local_id, "superseded temporary record");
                temporary
            }
            Landing::Fresh { local_id } => {
                let mut changes = ChangeSet::new();
                let record = self.store.allocate(model, local_id, &mut changes)?;
                self.commit(changes)?;
                debug!(record = %record, type_name = %model.name(), "created record");
                record
            }
        };
        self.apply_data(record, model, data)?;
        Ok(record)
    }

    /// A live temporary record that `data` supersedes: the incoming id is a
    /// real one and every natural-key value matches.
    fn superseded_by(&self, model: &CompiledType, data: &Data) -> Result<Option<RecordRef>, EngineError> {
        if model.natural_key().is_empty() {
            return Ok(None);
        }
        let Some(&id_field) = model.identifying_fields().first() else {
            return Ok(None);
        };
        let incoming = data
            .value(model.field(id_field).name())
            .and_then(FieldValue::as_integer);
        if !incoming.is_some_and(|id| id >= 0) {
            return Ok(None);
        }

        let mut wanted = Vec::with_capacity(model.natural_key().len());
        for &index in model.natural_key() {
            let field = model.field(index);
            let Some(value) = data.value(field.name()) else {
                return Ok(None);
            };
            let kind = field.attribute_kind().unwrap_or(AttributeKind::Plain);
            let Ok(value) = kind.normalize(value.clone()) else {
                return Ok(None);
            };
            wanted.push((index, value));
        }

        for candidate in self.store.records_of(model.name())? {
            let record = self.store.record(candidate)?;
            let temporary = record
                .value(id_field)
                .and_then(FieldValue::as_integer)
                .is_some_and(|id| id < 0);
            if temporary && wanted.iter().all(|(index, value)| record.value(*index) == Some(value)) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    pub(crate) fn delete_record(&mut self, record: RecordRef) -> Result<(), EngineError> {
        self.store.record(record)?;
        for target in self.cascade(record)? {
            if !self.store.exists(target) {
                continue;
            }
            let mut changes = ChangeSet::new();
            let model = self.store.remove(target, &mut changes)?;
            self.commit(changes)?;
            self.reactivity.forget_record(target);
            debug!(record = %target, type_name = %model.name(), "deleted record");
        }
        Ok(())
    }

    /// `root` followed by everything reachable through causal relations,
    /// breadth first.
    fn cascade(&self, root: RecordRef) -> Result<Vec<RecordRef>, EngineError> {
        let mut doomed = vec![root];
        let mut frontier = vec![root];
        let mut depth = 0;
        while !frontier.is_empty() {
            if depth == self.config.max_cascade_depth {
                warn!(record = %root, depth, "causal deletion cut short");
                break;
            }
            let mut next = Vec::new();
            for record in frontier {
                let model = self.store.model(record)?;
                for (field, rel) in model.relation_fields() {
                    if !rel.is_causal() {
                        continue;
                    }
                    for member in self.store.list(record, field.index())? {
                        if !doomed.contains(&member) {
                            doomed.push(member);
                            next.push(member);
                        }
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        Ok(doomed)
    }
}

/// Where an `insert` or `create` lands.
pub(crate) enum Landing {
    Existing(RecordRef),
    Supersede {
        temporary: RecordRef,
        local_id: LocalId,
        key: Vec<(FieldIndex, FieldValue)>,
    },
    Fresh { local_id: Option<LocalId> },
}

/// Normalized identifying values given in `data`; every one is required.
fn identifying_values(model: &CompiledType, data: &Data) -> Result<Vec<(FieldIndex, FieldValue)>, EngineError> {
    let mut values = Vec::with_capacity(model.identifying_fields().len());
    for &index in model.identifying_fields() {
        let field = model.field(index);
        let value = data
            .value(field.name())
            .ok_or_else(|| EngineError::invalid(model.name(), field.name(), "identifying field is missing"))?;
        let kind = field.attribute_kind().unwrap_or(AttributeKind::Plain);
        let value = kind
            .normalize(value.clone())
            .map_err(|e| EngineError::invalid(model.name(), field.name(), e.to_string()))?;
        values.push((index, value));
    }
    Ok(values)
}

fn local_id_for(model: &CompiledType, key: &[(FieldIndex, FieldValue)]) -> Option<LocalId> {
    if key.is_empty() {
        return None;
    }
    let parts: Vec<String> = key.iter().map(|(_, value)| value.key_repr()).collect();
    Some(LocalId::from_key(model.name(), &parts))
}
