use recgraph_core::CoreError;
use recgraph_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("invalid command for {type_name}.{field}: {reason}")]
    InvalidCommand {
        type_name: String,
        field: String,
        reason: String,
    },

    #[error("recomputation did not settle after {iterations} iterations ({pending} still queued)")]
    ComputeDivergence { iterations: usize, pending: usize },
}

/// Coarse classification of an [`EngineError`], independent of which layer
/// raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    InvalidCommand,
    UseAfterDelete,
    ComputeCycle,
    ComputeDivergence,
    Other,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Core(e) | Self::Storage(StorageError::Core(e)) => match e {
                CoreError::Schema(_) => ErrorKind::Schema,
                CoreError::UseAfterDelete(_) => ErrorKind::UseAfterDelete,
                CoreError::ComputeCycle { .. } => ErrorKind::ComputeCycle,
                _ => ErrorKind::Other,
            },
            Self::Storage(
                StorageError::TargetTypeMismatch { .. }
                | StorageError::NotRelational { .. }
                | StorageError::NotAttribute { .. }
                | StorageError::RetiredLocalId(_),
            ) => ErrorKind::InvalidCommand,
            Self::Storage(_) => ErrorKind::Other,
            Self::InvalidCommand { .. } => ErrorKind::InvalidCommand,
            Self::ComputeDivergence { .. } => ErrorKind::ComputeDivergence,
        }
    }

    pub(crate) fn invalid(type_name: &str, field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            type_name: type_name.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
