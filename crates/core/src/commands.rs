use indexmap::IndexMap;

use crate::field_value::FieldValue;
use crate::ids::RecordRef;

/// A record to link, either existing or described by nested data.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Record(RecordRef),
    /// Find-or-create in the relation's target type, then link.
    Insert(Data),
    /// Always create in the relation's target type, then link.
    Create(Data),
}

impl From<RecordRef> for Target {
    fn from(record: RecordRef) -> Self {
        Target::Record(record)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add(Target),
    AddNoInverse(Target),
    Delete(Target),
    DeleteNoInverse(Target),
    Clear,
    Replace(Vec<Target>),
}

impl Command {
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Add(_) => "Add",
            Self::AddNoInverse(_) => "AddNoInverse",
            Self::Delete(_) => "Delete",
            Self::DeleteNoInverse(_) => "DeleteNoInverse",
            Self::Clear => "Clear",
            Self::Replace(_) => "Replace",
        }
    }

    /// Targets referenced by this command, in order.
    pub fn targets(&self) -> Vec<&Target> {
        match self {
            Self::Add(t) | Self::AddNoInverse(t) | Self::Delete(t) | Self::DeleteNoInverse(t) => {
                vec![t]
            }
            Self::Replace(ts) => ts.iter().collect(),
            Self::Clear => Vec::new(),
        }
    }
}

/// The value written to one field: a scalar, or relation commands.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Value(FieldValue),
    Relation(Vec<Command>),
}

impl FieldUpdate {
    /// Replace a relation's members with exactly `records`.
    pub fn records(records: Vec<RecordRef>) -> Self {
        FieldUpdate::Relation(vec![Command::Replace(
            records.into_iter().map(Target::Record).collect(),
        )])
    }

    pub fn clear() -> Self {
        FieldUpdate::Relation(vec![Command::Clear])
    }
}

impl From<FieldValue> for FieldUpdate {
    fn from(value: FieldValue) -> Self {
        FieldUpdate::Value(value)
    }
}

macro_rules! scalar_update {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldUpdate {
                fn from(value: $ty) -> Self {
                    FieldUpdate::Value(value.into())
                }
            }
        )*
    };
}

scalar_update!(&str, String, i64, i32, bool, f64);

impl From<RecordRef> for FieldUpdate {
    fn from(record: RecordRef) -> Self {
        FieldUpdate::records(vec![record])
    }
}

impl From<Vec<RecordRef>> for FieldUpdate {
    fn from(records: Vec<RecordRef>) -> Self {
        FieldUpdate::records(records)
    }
}

impl From<Command> for FieldUpdate {
    fn from(command: Command) -> Self {
        FieldUpdate::Relation(vec![command])
    }
}

impl From<Vec<Command>> for FieldUpdate {
    fn from(commands: Vec<Command>) -> Self {
        FieldUpdate::Relation(commands)
    }
}

/// Field name -> update, applied in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Data {
    fields: IndexMap<String, FieldUpdate>,
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, update: impl Into<FieldUpdate>) -> Self {
        self.fields.insert(field.to_string(), update.into());
        self
    }

    pub fn set(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.with(field, FieldUpdate::Value(value.into()))
    }

    pub fn link(self, field: &str, record: RecordRef) -> Self {
        self.with(field, Command::Add(Target::Record(record)))
    }

    pub fn unlink(self, field: &str, record: RecordRef) -> Self {
        self.with(field, Command::Delete(Target::Record(record)))
    }

    pub fn replace(self, field: &str, records: Vec<RecordRef>) -> Self {
        self.with(field, FieldUpdate::records(records))
    }

    pub fn clear(self, field: &str) -> Self {
        self.with(field, FieldUpdate::clear())
    }

    pub fn get(&self, field: &str) -> Option<&FieldUpdate> {
        self.fields.get(field)
    }

    /// Scalar value given for `field`, if any.
    pub fn value(&self, field: &str) -> Option<&FieldValue> {
        match self.fields.get(field) {
            Some(FieldUpdate::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldUpdate)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl IntoIterator for Data {
    type Item = (String, FieldUpdate);
    type IntoIter = indexmap::map::IntoIter<String, FieldUpdate>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl FromIterator<(String, FieldUpdate)> for Data {
    fn from_iter<I: IntoIterator<Item = (String, FieldUpdate)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
