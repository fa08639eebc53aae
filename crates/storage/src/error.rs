use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("core error: {0}")]
    Core(#[from] recgraph_core::CoreError),

    #[error("local id already in use: {0}")]
    DuplicateLocalId(String),

    #[error("local id belonged to a deleted record: {0}")]
    RetiredLocalId(String),

    #[error("{type_name}.{field} links {expected}, got a {found}")]
    TargetTypeMismatch {
        type_name: String,
        field: String,
        expected: String,
        found: String,
    },

    #[error("{type_name}.{field} is not a relation")]
    NotRelational { type_name: String, field: String },

    #[error("{type_name}.{field} is not an attribute")]
    NotAttribute { type_name: String, field: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}
