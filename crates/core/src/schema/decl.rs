use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::commands::FieldUpdate;
use crate::error::CoreError;
use crate::field_value::{AttributeKind, FieldValue};
use crate::reader::RecordReader;

/// Pure function of a record's other fields.
pub type ComputeFn =
    Arc<dyn Fn(&mut dyn RecordReader) -> Result<FieldUpdate, CoreError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Smaller first; nulls last.
    Asc,
    /// Greater first; nulls last.
    Desc,
    TruthyFirst,
    FalsyFirst,
}

/// One key of a relation's ordering, evaluated on each member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub path: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(path: &str) -> Self {
        Self { path: path.to_string(), order: SortOrder::Asc }
    }

    pub fn desc(path: &str) -> Self {
        Self { path: path.to_string(), order: SortOrder::Desc }
    }

    pub fn truthy_first(path: &str) -> Self {
        Self { path: path.to_string(), order: SortOrder::TruthyFirst }
    }

    pub fn falsy_first(path: &str) -> Self {
        Self { path: path.to_string(), order: SortOrder::FalsyFirst }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum DeclKind {
    Attribute {
        kind: AttributeKind,
    },
    Relation {
        cardinality: Cardinality,
        target: String,
        inverse: Option<String>,
        causal: bool,
    },
}

#[derive(Clone)]
pub(crate) enum ComputeDecl {
    Function { deps: Vec<String>, func: ComputeFn },
    Related(String),
}

/// Declaration of a single field, built fluently.
#[derive(Clone)]
pub struct FieldDecl {
    pub(crate) kind: DeclKind,
    pub(crate) default: Option<FieldValue>,
    pub(crate) compute: Option<ComputeDecl>,
    pub(crate) sort: Vec<SortKey>,
    pub(crate) lazy: bool,
    /// Relation-only options applied to an attribute; rejected at compile.
    pub(crate) misplaced: Vec<&'static str>,
}

impl FieldDecl {
    fn attribute(kind: AttributeKind) -> Self {
        Self {
            kind: DeclKind::Attribute { kind },
            default: None,
            compute: None,
            sort: Vec::new(),
            lazy: false,
            misplaced: Vec::new(),
        }
    }

    fn relation(cardinality: Cardinality, target: &str) -> Self {
        Self {
            kind: DeclKind::Relation {
                cardinality,
                target: target.to_string(),
                inverse: None,
                causal: false,
            },
            default: None,
            compute: None,
            sort: Vec::new(),
            lazy: false,
            misplaced: Vec::new(),
        }
    }

    pub fn attr() -> Self {
        Self::attribute(AttributeKind::Plain)
    }

    pub fn date() -> Self {
        Self::attribute(AttributeKind::Date)
    }

    pub fn datetime() -> Self {
        Self::attribute(AttributeKind::DateTime)
    }

    pub fn html() -> Self {
        Self::attribute(AttributeKind::Html)
    }

    pub fn one(target: &str) -> Self {
        Self::relation(Cardinality::One, target)
    }

    pub fn many(target: &str) -> Self {
        Self::relation(Cardinality::Many, target)
    }

    pub fn default(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn inverse(mut self, name: &str) -> Self {
        match &mut self.kind {
            DeclKind::Relation { inverse, .. } => *inverse = Some(name.to_string()),
            DeclKind::Attribute { .. } => self.misplaced.push("inverse"),
        }
        self
    }

    /// Deleting the owner also deletes the linked records.
    pub fn causal(mut self) -> Self {
        match &mut self.kind {
            DeclKind::Relation { causal, .. } => *causal = true,
            DeclKind::Attribute { .. } => self.misplaced.push("causal"),
        }
        self
    }

    pub fn sort(mut self, keys: impl IntoIterator<Item = SortKey>) -> Self {
        self.sort = keys.into_iter().collect();
        self
    }

    /// Derive the field from `deps` (dotted paths) with `func`.
    pub fn compute<I, S, F>(mut self, deps: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&mut dyn RecordReader) -> Result<FieldUpdate, CoreError> + Send + Sync + 'static,
    {
        self.compute = Some(ComputeDecl::Function {
            deps: deps.into_iter().map(|dep| dep.as_ref().to_string()).collect(),
            func: Arc::new(func),
        });
        self
    }

    /// Mirror the value found at a dotted relation path.
    pub fn related(mut self, path: &str) -> Self {
        self.compute = Some(ComputeDecl::Related(path.to_string()));
        self
    }

    /// Recompute on next read instead of at the end of the batch.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }
}

impl fmt::Debug for FieldDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let compute = match &self.compute {
            None => None,
            Some(ComputeDecl::Function { deps, .. }) => Some(format!("fn{deps:?}")),
            Some(ComputeDecl::Related(path)) => Some(format!("related({path})")),
        };
        f.debug_struct("FieldDecl")
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("compute", &compute)
            .field("sort", &self.sort)
            .field("lazy", &self.lazy)
            .finish()
    }
}

/// Declaration of a record type: ordered fields plus identity rules.
#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub(crate) name: String,
    pub(crate) fields: Vec<(String, FieldDecl)>,
    pub(crate) identifying: Vec<String>,
    pub(crate) natural_key: Vec<String>,
}

impl TypeDecl {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            identifying: Vec::new(),
            natural_key: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, decl: FieldDecl) -> Self {
        self.fields.push((name.to_string(), decl));
        self
    }

    /// Fields whose values form the local identifier.
    pub fn identify_by<'a>(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        self.identifying = fields.into_iter().map(str::to_string).collect();
        self
    }

    /// Fields matching a temporary record to the persisted record that
    /// supersedes it.
    pub fn natural_key<'a>(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        self.natural_key = fields.into_iter().map(str::to_string).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
