use thiserror::Error;

use crate::ids::RecordRef;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("record {0} was deleted")]
    UseAfterDelete(RecordRef),

    #[error("unknown record {0}")]
    UnknownRecord(RecordRef),

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("type {type_name} has no field {field}")]
    UnknownField { type_name: String, field: String },

    #[error("compute cycle on {type_name}.{field} of record {record}")]
    ComputeCycle {
        record: RecordRef,
        type_name: String,
        field: String,
    },

    #[error("compute failed: {0}")]
    Compute(String),
}

/// Malformed or inconsistent type declarations, raised at registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("{type_name} declares field {field} twice")]
    DuplicateField { type_name: String, field: String },

    #[error("{type_name}.{field} targets unknown type {target}")]
    UnknownTargetType {
        type_name: String,
        field: String,
        target: String,
    },

    #[error("{type_name}.{field} names inverse {target}.{inverse}, which does not exist")]
    UnknownInverse {
        type_name: String,
        field: String,
        target: String,
        inverse: String,
    },

    #[error("{type_name}.{field} and its inverse {inverse} disagree: {reason}")]
    InverseMismatch {
        type_name: String,
        field: String,
        inverse: String,
        reason: String,
    },

    #[error("{type_name}.{field} depends on undeclared field {dependency}")]
    UndeclaredDependency {
        type_name: String,
        field: String,
        dependency: String,
    },

    #[error("{type_name}.{field} depends on {dependency}, but segment {segment} has no inverse")]
    DependencyWithoutInverse {
        type_name: String,
        field: String,
        dependency: String,
        segment: String,
    },

    #[error("{type_name}.{field} cannot identify records: {reason}")]
    InvalidIdentifyingField {
        type_name: String,
        field: String,
        reason: String,
    },

    #[error("{type_name}.{field}: {reason}")]
    InvalidDeclaration {
        type_name: String,
        field: String,
        reason: String,
    },
}
