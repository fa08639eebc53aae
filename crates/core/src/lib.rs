pub mod commands;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod reader;
pub mod schema;

pub use commands::{Command, Data, FieldUpdate, Target};
pub use error::{CoreError, SchemaError};
pub use field_value::{AttributeKind, FieldValue, Markup};
pub use ids::*;
pub use reader::RecordReader;
