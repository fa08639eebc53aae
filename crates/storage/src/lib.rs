pub mod changes;
pub mod error;
pub mod memory;
pub mod record;
pub mod snapshot;
pub mod traits;

pub use changes::ChangeSet;
pub use error::StorageError;
pub use memory::MemoryStore;
pub use record::{FieldStatus, Record, RecordList};
pub use snapshot::{RecordSnapshot, SnapshotValue, StoreSnapshot};
pub use traits::*;
