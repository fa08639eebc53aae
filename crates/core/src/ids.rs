use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! counter_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

counter_id!(RecordRef);
counter_id!(ObserverId);

/// Position of a field inside its compiled type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldIndex(u32);

impl FieldIndex {
    pub fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn get(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for FieldIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldIndex({})", self.0)
    }
}

/// Stable local identifier of a record: `{Type}_{key}`.
///
/// The key is the comma-joined representation of the type's identifying
/// field values, or `#{handle}` for types without identifying fields.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(String);

impl LocalId {
    pub fn from_key(type_name: &str, key_parts: &[String]) -> Self {
        Self(format!("{type_name}_{}", key_parts.join(",")))
    }

    pub fn synthetic(type_name: &str, record: RecordRef) -> Self {
        Self(format!("{type_name}_#{}", record.raw()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", self.0)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for LocalId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Hands out negative ids for client-only records, strictly decreasing.
#[derive(Debug, Clone)]
pub struct TemporaryIds {
    next: i64,
}

impl Default for TemporaryIds {
    fn default() -> Self {
        Self::new()
    }
}

impl TemporaryIds {
    pub fn new() -> Self {
        Self { next: -1 }
    }

    pub fn next_id(&mut self) -> i64 {
        let id = self.next;
        self.next -= 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_ids_decrease() {
        let mut ids = TemporaryIds::new();
        assert_eq!(ids.next_id(), -1);
        assert_eq!(ids.next_id(), -2);
        assert_eq!(ids.next_id(), -3);
    }

    #[test]
    fn local_id_formats() {
        let id = LocalId::from_key("Thread", &["mail.channel".into(), "42".into()]);
        assert_eq!(id.as_str(), "Thread_mail.channel,42");

        let synthetic = LocalId::synthetic("ChatWindow", RecordRef::from_raw(7));
        assert_eq!(synthetic.to_string(), "ChatWindow_#7");
    }
}
