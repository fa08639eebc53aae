use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::commands::FieldUpdate;
use crate::error::{CoreError, SchemaError};
use crate::field_value::{AttributeKind, FieldValue};
use crate::ids::{FieldIndex, RecordRef};
use crate::reader::RecordReader;
use crate::schema::decl::{Cardinality, ComputeDecl, ComputeFn, DeclKind, SortOrder, TypeDecl};

/// A dotted field path such as `thread.name`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DependencyPath(Vec<Arc<str>>);

impl DependencyPath {
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<Arc<str>> = path.split('.').map(Arc::from).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(Self(segments))
    }

    pub fn segments(&self) -> &[Arc<str>] {
        &self.0
    }

    pub fn first(&self) -> &str {
        &self.0[0]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn prefixed(&self, head: &Arc<str>) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.push(head.clone());
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }
}

impl fmt::Display for DependencyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl fmt::Debug for DependencyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DependencyPath({self})")
    }
}

/// What a dirty dependency schedules on its owner field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Compute,
    Sort,
}

/// Reverse dependency edge: a write to the field holding this entry dirties
/// `owner_field` on every record reached by walking `back_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    pub owner_type: Arc<str>,
    pub owner_field: FieldIndex,
    pub trigger: Trigger,
    /// Inverse fields to follow from the written record back to the owner.
    pub back_path: Vec<FieldIndex>,
}

#[derive(Debug, Clone)]
pub struct RelationDef {
    pub(crate) cardinality: Cardinality,
    pub(crate) target: Arc<str>,
    pub(crate) inverse: Option<Arc<str>>,
    pub(crate) inverse_index: Option<FieldIndex>,
    pub(crate) causal: bool,
}

impl RelationDef {
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    pub fn target(&self) -> &Arc<str> {
        &self.target
    }

    pub fn inverse(&self) -> Option<&Arc<str>> {
        self.inverse.as_ref()
    }

    /// Index of the inverse field on the target type, resolved by finalize.
    pub fn inverse_index(&self) -> Option<FieldIndex> {
        self.inverse_index
    }

    pub fn is_causal(&self) -> bool {
        self.causal
    }
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    Attribute { kind: AttributeKind, default: FieldValue },
    Relation(RelationDef),
}

#[derive(Clone)]
pub struct Computation {
    pub(crate) deps: Vec<DependencyPath>,
    pub(crate) func: ComputeFn,
    pub(crate) related: Option<DependencyPath>,
}

impl Computation {
    pub fn deps(&self) -> &[DependencyPath] {
        &self.deps
    }

    pub fn func(&self) -> &ComputeFn {
        &self.func
    }

    pub fn related_path(&self) -> Option<&DependencyPath> {
        self.related.as_ref()
    }
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("deps", &self.deps)
            .field("related", &self.related)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSortKey {
    pub path: DependencyPath,
    pub order: SortOrder,
}

#[derive(Debug, Clone)]
pub struct CompiledField {
    pub(crate) index: FieldIndex,
    pub(crate) name: Arc<str>,
    pub(crate) kind: FieldKind,
    pub(crate) computation: Option<Computation>,
    pub(crate) sort: Vec<CompiledSortKey>,
    pub(crate) eager: bool,
    pub(crate) identifying: bool,
    pub(crate) dependents: Vec<Dependent>,
}

impl CompiledField {
    pub fn index(&self) -> FieldIndex {
        self.index
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn relation(&self) -> Option<&RelationDef> {
        match &self.kind {
            FieldKind::Relation(rel) => Some(rel),
            FieldKind::Attribute { .. } => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        self.relation().is_some()
    }

    pub fn attribute_kind(&self) -> Option<AttributeKind> {
        match &self.kind {
            FieldKind::Attribute { kind, .. } => Some(*kind),
            FieldKind::Relation(_) => None,
        }
    }

    pub fn default_value(&self) -> FieldValue {
        match &self.kind {
            FieldKind::Attribute { default, .. } => default.clone(),
            FieldKind::Relation(_) => FieldValue::Null,
        }
    }

    pub fn computation(&self) -> Option<&Computation> {
        self.computation.as_ref()
    }

    pub fn is_computed(&self) -> bool {
        self.computation.is_some()
    }

    pub fn sort_keys(&self) -> &[CompiledSortKey] {
        &self.sort
    }

    pub fn is_sorted(&self) -> bool {
        !self.sort.is_empty()
    }

    pub fn is_eager(&self) -> bool {
        self.eager
    }

    pub fn is_identifying(&self) -> bool {
        self.identifying
    }

    /// Reverse dependency entries, populated by finalize.
    pub fn dependents(&self) -> &[Dependent] {
        &self.dependents
    }
}

/// A compiled type: immutable, shared by all of its records.
#[derive(Debug, Clone)]
pub struct CompiledType {
    pub(crate) name: Arc<str>,
    pub(crate) fields: Vec<CompiledField>,
    pub(crate) by_name: IndexMap<Arc<str>, FieldIndex>,
    pub(crate) identifying: Vec<FieldIndex>,
    pub(crate) natural_key: Vec<FieldIndex>,
}

impl CompiledType {
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn fields(&self) -> &[CompiledField] {
        &self.fields
    }

    pub fn field(&self, index: FieldIndex) -> &CompiledField {
        &self.fields[index.get()]
    }

    pub fn field_index(&self, name: &str) -> Option<FieldIndex> {
        self.by_name.get(name).copied()
    }

    pub fn field_by_name(&self, name: &str) -> Option<&CompiledField> {
        self.field_index(name).map(|idx| self.field(idx))
    }

    pub fn identifying_fields(&self) -> &[FieldIndex] {
        &self.identifying
    }

    pub fn natural_key(&self) -> &[FieldIndex] {
        &self.natural_key
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = (&CompiledField, &RelationDef)> {
        self.fields
            .iter()
            .filter_map(|f| f.relation().map(|rel| (f, rel)))
    }
}

fn invalid(decl: &TypeDecl, field: &str, reason: &str) -> SchemaError {
    SchemaError::InvalidDeclaration {
        type_name: decl.name.clone(),
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn undeclared(decl: &TypeDecl, field: &str, dependency: &str) -> SchemaError {
    SchemaError::UndeclaredDependency {
        type_name: decl.name.clone(),
        field: field.to_string(),
        dependency: dependency.to_string(),
    }
}

/// Compile one type declaration.
///
/// Only checks that need nothing outside the declaration run here; targets,
/// inverses and multi-segment paths are checked when the registry is
/// finalized.
pub fn compile(decl: TypeDecl) -> Result<CompiledType, SchemaError> {
    let mut by_name: IndexMap<Arc<str>, FieldIndex> = IndexMap::new();
    for (i, (name, _)) in decl.fields.iter().enumerate() {
        if by_name.insert(Arc::from(name.as_str()), FieldIndex::new(i)).is_some() {
            return Err(SchemaError::DuplicateField {
                type_name: decl.name.clone(),
                field: name.clone(),
            });
        }
    }

    let identifying: HashSet<&str> = decl.identifying.iter().map(String::as_str).collect();
    let mut fields = Vec::with_capacity(decl.fields.len());

    for (i, (name, fd)) in decl.fields.iter().enumerate() {
        let kind = match &fd.kind {
            DeclKind::Attribute { kind } => {
                if let Some(option) = fd.misplaced.first() {
                    return Err(invalid(&decl, name, &format!("{option} only applies to relations")));
                }
                if !fd.sort.is_empty() {
                    return Err(invalid(&decl, name, "only relations can be sorted"));
                }
                let default = match &fd.default {
                    Some(v) => kind
                        .normalize(v.clone())
                        .map_err(|e| invalid(&decl, name, &e.to_string()))?,
                    None => FieldValue::Null,
                };
                FieldKind::Attribute { kind: *kind, default }
            }
            DeclKind::Relation { cardinality, target, inverse, causal } => {
                if fd.default.is_some() {
                    return Err(invalid(&decl, name, "relations take no default"));
                }
                if !fd.sort.is_empty() && *cardinality == Cardinality::One {
                    return Err(invalid(&decl, name, "sorting requires a many relation"));
                }
                FieldKind::Relation(RelationDef {
                    cardinality: *cardinality,
                    target: Arc::from(target.as_str()),
                    inverse: inverse.as_deref().map(Arc::from),
                    inverse_index: None,
                    causal: *causal,
                })
            }
        };

        let relational = matches!(kind, FieldKind::Relation(_));
        let computation = match &fd.compute {
            None => None,
            Some(ComputeDecl::Function { deps, func }) => {
                let mut parsed = Vec::with_capacity(deps.len());
                for dep in deps {
                    let path = DependencyPath::parse(dep).ok_or_else(|| undeclared(&decl, name, dep))?;
                    if !by_name.contains_key(path.first()) {
                        return Err(undeclared(&decl, name, dep));
                    }
                    if path.len() == 1 && path.first() == name {
                        return Err(invalid(&decl, name, "a computed field cannot depend on itself"));
                    }
                    parsed.push(path);
                }
                Some(Computation { deps: parsed, func: func.clone(), related: None })
            }
            Some(ComputeDecl::Related(raw)) => {
                let path = DependencyPath::parse(raw).ok_or_else(|| undeclared(&decl, name, raw))?;
                if path.len() < 2 {
                    return Err(invalid(&decl, name, "a related path needs a relation and a field"));
                }
                if !by_name.contains_key(path.first()) {
                    return Err(undeclared(&decl, name, raw));
                }
                Some(Computation {
                    deps: vec![path.clone()],
                    func: related_compute(path.clone(), relational),
                    related: Some(path),
                })
            }
        };

        let mut sort = Vec::with_capacity(fd.sort.len());
        for key in &fd.sort {
            let path = DependencyPath::parse(&key.path)
                .ok_or_else(|| undeclared(&decl, name, &key.path))?;
            sort.push(CompiledSortKey { path, order: key.order });
        }

        fields.push(CompiledField {
            index: FieldIndex::new(i),
            name: Arc::from(name.as_str()),
            kind,
            computation,
            sort,
            eager: !fd.lazy,
            identifying: identifying.contains(name.as_str()),
            dependents: Vec::new(),
        });
    }

    let resolve_key_fields = |names: &[String]| -> Result<Vec<FieldIndex>, SchemaError> {
        names
            .iter()
            .map(|name| {
                let reject = |reason: &str| SchemaError::InvalidIdentifyingField {
                    type_name: decl.name.clone(),
                    field: name.clone(),
                    reason: reason.to_string(),
                };
                let idx = by_name.get(name.as_str()).copied().ok_or_else(|| reject("not declared"))?;
                let field = &fields[idx.get()];
                if field.is_relation() {
                    return Err(reject("relations cannot be key fields"));
                }
                if field.is_computed() {
                    return Err(reject("computed fields cannot be key fields"));
                }
                Ok(idx)
            })
            .collect()
    };
    let identifying = resolve_key_fields(&decl.identifying)?;
    let natural_key = resolve_key_fields(&decl.natural_key)?;

    Ok(CompiledType {
        name: Arc::from(decl.name.as_str()),
        fields,
        by_name,
        identifying,
        natural_key,
    })
}

/// Compute function behind `related(path)`.
fn related_compute(path: DependencyPath, relational: bool) -> ComputeFn {
    Arc::new(move |reader: &mut dyn RecordReader| -> Result<FieldUpdate, CoreError> {
        let segments = path.segments();
        let (last, hops) = match segments.split_last() {
            Some(split) => split,
            None => return Ok(FieldUpdate::Value(FieldValue::Null)),
        };
        let mut current: Vec<RecordRef> = vec![reader.record()];
        for hop in hops {
            let mut next = Vec::new();
            for record in &current {
                for target in reader.related_of(*record, hop)? {
                    if !next.contains(&target) {
                        next.push(target);
                    }
                }
            }
            current = next;
        }
        if relational {
            let mut reached = Vec::new();
            for record in &current {
                for target in reader.related_of(*record, last)? {
                    if !reached.contains(&target) {
                        reached.push(target);
                    }
                }
            }
            Ok(FieldUpdate::records(reached))
        } else {
            match current.first() {
                Some(record) => Ok(FieldUpdate::Value(reader.get_of(*record, last)?)),
                None => Ok(FieldUpdate::Value(FieldValue::Null)),
            }
        }
    })
}
