use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{CoreError, SchemaError};
use crate::ids::FieldIndex;
use crate::schema::compiled::{
    compile, CompiledField, CompiledType, Dependent, DependencyPath, FieldKind, Trigger,
};

/// Per-type compiled declarations, keyed by type name.
///
/// Types are registered up front, then `finalize` checks everything that
/// spans types and produces the immutable [`Schema`] an engine runs on.
#[derive(Debug, Default)]
pub struct Registry {
    types: IndexMap<Arc<str>, Arc<CompiledType>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `decl` and store it, replacing any type of the same name.
    pub fn register(
        &mut self,
        decl: crate::schema::decl::TypeDecl,
    ) -> Result<Arc<CompiledType>, SchemaError> {
        let compiled = Arc::new(compile(decl)?);
        self.types.insert(compiled.name().clone(), compiled.clone());
        Ok(compiled)
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.types.shift_remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.types.clear();
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CompiledType>> {
        self.types.get(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Link every registered type: resolve relation targets and inverses,
    /// validate dependency paths, and build the reverse-dependency index.
    pub fn finalize(&self) -> Result<Schema, SchemaError> {
        let mut types: IndexMap<Arc<str>, CompiledType> = self
            .types
            .iter()
            .map(|(name, ty)| (name.clone(), (**ty).clone()))
            .collect();

        // Relations: targets and inverses.
        let mut inverses = Vec::new();
        for ty in types.values() {
            for (field, rel) in ty.relation_fields() {
                let target = types.get(rel.target()).ok_or_else(|| SchemaError::UnknownTargetType {
                    type_name: ty.name().to_string(),
                    field: field.name().to_string(),
                    target: rel.target().to_string(),
                })?;
                let Some(inverse) = rel.inverse() else { continue };
                let mismatch = |reason: String| SchemaError::InverseMismatch {
                    type_name: ty.name().to_string(),
                    field: field.name().to_string(),
                    inverse: inverse.to_string(),
                    reason,
                };
                let inverse_field = target.field_by_name(inverse).ok_or_else(|| {
                    SchemaError::UnknownInverse {
                        type_name: ty.name().to_string(),
                        field: field.name().to_string(),
                        target: target.name().to_string(),
                        inverse: inverse.to_string(),
                    }
                })?;
                let Some(back) = inverse_field.relation() else {
                    return Err(mismatch("inverse is not a relation".into()));
                };
                if back.target() != ty.name() {
                    return Err(mismatch(format!("inverse targets {}", back.target())));
                }
                if back.inverse().map(|s| &**s) != Some(&**field.name()) {
                    return Err(mismatch(format!(
                        "inverse names {:?} as its own inverse",
                        back.inverse()
                    )));
                }
                inverses.push((ty.name().clone(), field.index(), inverse_field.index()));
            }
        }
        for (type_name, field, inverse) in inverses {
            if let Some(ty) = types.get_mut(&type_name) {
                if let FieldKind::Relation(rel) = &mut ty.fields[field.get()].kind {
                    rel.inverse_index = Some(inverse);
                }
            }
        }

        // Dependencies: computations and sorts.
        let mut entries: Vec<(Arc<str>, FieldIndex, Dependent)> = Vec::new();
        for ty in types.values() {
            for field in ty.fields() {
                if let Some(computation) = field.computation() {
                    for dep in computation.deps() {
                        let hops = resolve_path(&types, ty, field, dep, dep)?;
                        push_dependents(&mut entries, ty, field, Trigger::Compute, &hops);
                    }
                    if let Some(path) = computation.related_path() {
                        check_related(&types, ty, field, path)?;
                    }
                }
                if field.is_sorted() {
                    let Some(rel) = field.relation() else { continue };
                    let Some(member_type) = types.get(rel.target()) else { continue };
                    let membership = DependencyPath::parse(field.name()).ok_or_else(|| {
                        SchemaError::UndeclaredDependency {
                            type_name: ty.name().to_string(),
                            field: field.name().to_string(),
                            dependency: field.name().to_string(),
                        }
                    })?;
                    let hops = resolve_path(&types, ty, field, &membership, &membership)?;
                    push_dependents(&mut entries, ty, field, Trigger::Sort, &hops);
                    for key in field.sort_keys() {
                        // Validate relative to the member type, then index the
                        // path as seen from the owner.
                        resolve_path(&types, member_type, field, &key.path, &key.path)?;
                        let full = key.path.prefixed(field.name());
                        let hops = resolve_path(&types, ty, field, &full, &key.path)?;
                        push_dependents(&mut entries, ty, field, Trigger::Sort, &hops);
                    }
                }
            }
        }
        for (type_name, field, dependent) in entries {
            if let Some(ty) = types.get_mut(&type_name) {
                let slot = &mut ty.fields[field.get()].dependents;
                if !slot.contains(&dependent) {
                    slot.push(dependent);
                }
            }
        }

        Ok(Schema {
            types: types.into_iter().map(|(name, ty)| (name, Arc::new(ty))).collect(),
        })
    }
}

/// One resolved step of a dependency path.
struct Hop {
    type_name: Arc<str>,
    field: FieldIndex,
    inverse: Option<FieldIndex>,
}

fn resolve_path(
    types: &IndexMap<Arc<str>, CompiledType>,
    start: &CompiledType,
    owner_field: &CompiledField,
    path: &DependencyPath,
    reported: &DependencyPath,
) -> Result<Vec<Hop>, SchemaError> {
    let undeclared = || SchemaError::UndeclaredDependency {
        type_name: start.name().to_string(),
        field: owner_field.name().to_string(),
        dependency: reported.to_string(),
    };
    let mut hops = Vec::with_capacity(path.len());
    let mut current = start;
    let segments = path.segments();
    for (i, segment) in segments.iter().enumerate() {
        let field = current.field_by_name(segment).ok_or_else(undeclared)?;
        let inverse = field.relation().and_then(|rel| rel.inverse_index());
        hops.push(Hop {
            type_name: current.name().clone(),
            field: field.index(),
            inverse,
        });
        if i + 1 < segments.len() {
            let rel = field.relation().ok_or_else(undeclared)?;
            if inverse.is_none() {
                return Err(SchemaError::DependencyWithoutInverse {
                    type_name: start.name().to_string(),
                    field: owner_field.name().to_string(),
                    dependency: reported.to_string(),
                    segment: segment.to_string(),
                });
            }
            current = types.get(rel.target()).ok_or_else(undeclared)?;
        }
    }
    Ok(hops)
}

fn push_dependents(
    entries: &mut Vec<(Arc<str>, FieldIndex, Dependent)>,
    owner: &CompiledType,
    owner_field: &CompiledField,
    trigger: Trigger,
    hops: &[Hop],
) {
    for (i, hop) in hops.iter().enumerate() {
        let back_path = hops[..i]
            .iter()
            .rev()
            .filter_map(|h| h.inverse)
            .collect();
        entries.push((
            hop.type_name.clone(),
            hop.field,
            Dependent {
                owner_type: owner.name().clone(),
                owner_field: owner_field.index(),
                trigger,
                back_path,
            },
        ));
    }
}

fn check_related(
    types: &IndexMap<Arc<str>, CompiledType>,
    ty: &CompiledType,
    field: &CompiledField,
    path: &DependencyPath,
) -> Result<(), SchemaError> {
    let mut current = ty;
    let segments = path.segments();
    for segment in &segments[..segments.len() - 1] {
        let Some(rel) = current.field_by_name(segment).and_then(CompiledField::relation) else {
            return Ok(());
        };
        let Some(next) = types.get(rel.target()) else { return Ok(()) };
        current = next;
    }
    let Some(last) = segments.last().and_then(|s| current.field_by_name(s)) else {
        return Ok(());
    };
    let compatible = match (field.relation(), last.relation()) {
        (None, None) => true,
        (Some(mine), Some(theirs)) => mine.target() == theirs.target(),
        _ => false,
    };
    if compatible {
        Ok(())
    } else {
        Err(SchemaError::InvalidDeclaration {
            type_name: ty.name().to_string(),
            field: field.name().to_string(),
            reason: format!("related path {path} does not match the field's kind"),
        })
    }
}

/// A finalized, immutable set of linked types.
#[derive(Debug, Clone)]
pub struct Schema {
    types: IndexMap<Arc<str>, Arc<CompiledType>>,
}

impl Schema {
    pub fn get(&self, name: &str) -> Option<&Arc<CompiledType>> {
        self.types.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Arc<CompiledType>, CoreError> {
        self.get(name)
            .ok_or_else(|| CoreError::UnknownType(name.to_string()))
    }

    pub fn types(&self) -> impl Iterator<Item = &Arc<CompiledType>> {
        self.types.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::FieldUpdate;
    use crate::field_value::FieldValue;
    use crate::schema::decl::{FieldDecl, SortKey, TypeDecl};

    fn thread() -> TypeDecl {
        TypeDecl::new("Thread")
            .identify_by(["id"])
            .field("id", FieldDecl::attr())
            .field("name", FieldDecl::attr())
            .field(
                "messages",
                FieldDecl::many("Message").inverse("thread").sort([SortKey::asc("id")]),
            )
    }

    fn message() -> TypeDecl {
        TypeDecl::new("Message")
            .identify_by(["id"])
            .field("id", FieldDecl::attr())
            .field("body", FieldDecl::html())
            .field("thread", FieldDecl::one("Thread").inverse("messages"))
            .field("thread_name", FieldDecl::attr().related("thread.name"))
    }

    #[test]
    fn finalize_links_inverses() {
        let mut registry = Registry::new();
        registry.register(thread()).unwrap();
        registry.register(message()).unwrap();
        let schema = registry.finalize().unwrap();

        let thread = schema.get("Thread").unwrap();
        let message = schema.get("Message").unwrap();
        let messages = thread.field_by_name("messages").unwrap().relation().unwrap();
        assert_eq!(messages.inverse_index(), message.field_index("thread"));
        let back = message.field_by_name("thread").unwrap().relation().unwrap();
        assert_eq!(back.inverse_index(), thread.field_index("messages"));
    }

    #[test]
    fn dependents_walk_back_through_inverse() {
        let mut registry = Registry::new();
        registry.register(thread()).unwrap();
        registry.register(message()).unwrap();
        let schema = registry.finalize().unwrap();

        // Writing Thread.name dirties Message.thread_name, reached via Thread.messages.
        let thread = schema.get("Thread").unwrap();
        let message = schema.get("Message").unwrap();
        let name = thread.field_by_name("name").unwrap();
        assert_eq!(
            name.dependents(),
            &[Dependent {
                owner_type: Arc::from("Message"),
                owner_field: message.field_index("thread_name").unwrap(),
                trigger: Trigger::Compute,
                back_path: vec![thread.field_index("messages").unwrap()],
            }]
        );

        // Writing Message.id resorts Thread.messages, reached via Message.thread.
        let id = message.field_by_name("id").unwrap();
        assert!(id.dependents().iter().any(|d| d.trigger == Trigger::Sort
            && d.owner_type.as_ref() == "Thread"
            && d.back_path == vec![message.field_index("thread").unwrap()]));
    }

    #[test]
    fn reregistering_overwrites() {
        let mut registry = Registry::new();
        registry.register(thread()).unwrap();
        registry
            .register(TypeDecl::new("Thread").field("title", FieldDecl::attr()))
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("Thread").unwrap().field_by_name("title").is_some());
        assert!(registry.get("Thread").unwrap().field_by_name("name").is_none());
    }

    #[test]
    fn missing_inverse_is_rejected() {
        let mut registry = Registry::new();
        registry
            .register(TypeDecl::new("A").field("bs", FieldDecl::many("B").inverse("a")))
            .unwrap();
        registry
            .register(TypeDecl::new("B").field("name", FieldDecl::attr()))
            .unwrap();
        assert!(matches!(
            registry.finalize(),
            Err(SchemaError::UnknownInverse { .. })
        ));
    }

    #[test]
    fn one_sided_inverse_is_rejected() {
        let mut registry = Registry::new();
        registry
            .register(TypeDecl::new("A").field("bs", FieldDecl::many("B").inverse("a")))
            .unwrap();
        registry
            .register(TypeDecl::new("B").field("a", FieldDecl::one("A")))
            .unwrap();
        assert!(matches!(
            registry.finalize(),
            Err(SchemaError::InverseMismatch { .. })
        ));
    }

    #[test]
    fn inverse_pointing_elsewhere_is_rejected() {
        let mut registry = Registry::new();
        registry
            .register(TypeDecl::new("A").field("bs", FieldDecl::many("B").inverse("a")))
            .unwrap();
        registry
            .register(TypeDecl::new("C").field("x", FieldDecl::attr()))
            .unwrap();
        registry
            .register(TypeDecl::new("B").field("a", FieldDecl::one("C").inverse("x")))
            .unwrap();
        assert!(matches!(
            registry.finalize(),
            Err(SchemaError::InverseMismatch { .. })
        ));
    }

    #[test]
    fn unknown_target_is_rejected() {
        let mut registry = Registry::new();
        registry
            .register(TypeDecl::new("A").field("ghost", FieldDecl::one("Ghost")))
            .unwrap();
        assert!(matches!(
            registry.finalize(),
            Err(SchemaError::UnknownTargetType { .. })
        ));
    }

    #[test]
    fn undeclared_dependency_fails_compile() {
        let mut registry = Registry::new();
        let err = registry
            .register(TypeDecl::new("A").field(
                "label",
                FieldDecl::attr().compute(["nope"], |_| Ok(FieldUpdate::Value(FieldValue::Null))),
            ))
            .unwrap_err();
        assert!(matches!(err, SchemaError::UndeclaredDependency { .. }));
    }

    #[test]
    fn deep_undeclared_dependency_fails_finalize() {
        let mut registry = Registry::new();
        registry.register(thread()).unwrap();
        registry
            .register(message().field(
                "label",
                FieldDecl::attr().compute(["thread.missing"], |_| {
                    Ok(FieldUpdate::Value(FieldValue::Null))
                }),
            ))
            .unwrap();
        assert!(matches!(
            registry.finalize(),
            Err(SchemaError::UndeclaredDependency { .. })
        ));
    }

    #[test]
    fn traversal_without_inverse_is_rejected() {
        let mut registry = Registry::new();
        registry
            .register(
                TypeDecl::new("A")
                    .field("b", FieldDecl::one("B"))
                    .field("b_name", FieldDecl::attr().related("b.name")),
            )
            .unwrap();
        registry
            .register(TypeDecl::new("B").field("name", FieldDecl::attr()))
            .unwrap();
        assert!(matches!(
            registry.finalize(),
            Err(SchemaError::DependencyWithoutInverse { .. })
        ));
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let err = compile(
            TypeDecl::new("A")
                .field("x", FieldDecl::attr())
                .field("x", FieldDecl::attr()),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn identifying_field_must_be_plain_attribute() {
        let err = compile(
            TypeDecl::new("A")
                .identify_by(["b"])
                .field("b", FieldDecl::one("B")),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidIdentifyingField { .. }));
    }

    #[test]
    fn bad_default_is_rejected() {
        let err = compile(TypeDecl::new("A").field("when", FieldDecl::date().default("soon")))
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDeclaration { .. }));
    }

    #[test]
    fn relation_options_on_attributes_are_rejected() {
        for decl in [FieldDecl::attr().inverse("thread"), FieldDecl::html().causal()] {
            let err = compile(TypeDecl::new("A").field("body", decl)).unwrap_err();
            assert!(matches!(
                err,
                SchemaError::InvalidDeclaration { ref field, .. } if field == "body"
            ));
        }
    }

    #[test]
    fn related_kind_must_match() {
        let mut registry = Registry::new();
        registry.register(thread()).unwrap();
        registry
            .register(message().field("oops", FieldDecl::many("Message").related("thread.name")))
            .unwrap();
        assert!(matches!(
            registry.finalize(),
            Err(SchemaError::InvalidDeclaration { .. })
        ));
    }
}
