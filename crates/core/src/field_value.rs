use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Markup that is safe to render as-is.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Markup(String);

impl Markup {
    /// Wrap a string that is already markup.
    pub fn from_trusted(html: impl Into<String>) -> Self {
        Self(html.into())
    }

    /// Escape plain text into markup; newlines become `<br/>`.
    pub fn escape(text: &str) -> Self {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#x27;"),
                '\n' => out.push_str("<br/>"),
                _ => out.push(c),
            }
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Markup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Markup({:?})", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Html(Markup),
    List(Vec<FieldValue>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Html(a), Self::Html(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Truthiness as the UI layer understands it: null, false, zero and
    /// empty text/markup/lists are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Boolean(b) => *b,
            FieldValue::Integer(n) => *n != 0,
            FieldValue::Float(x) => *x != 0.0,
            FieldValue::Text(s) => !s.is_empty(),
            FieldValue::Html(m) => !m.as_str().is_empty(),
            FieldValue::List(items) => !items.is_empty(),
            FieldValue::Date(_) | FieldValue::DateTime(_) => true,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_html(&self) -> Option<&Markup> {
        match self {
            FieldValue::Html(m) => Some(m),
            _ => None,
        }
    }

    /// Text used when this value takes part in a local identifier.
    pub fn key_repr(&self) -> String {
        match self {
            FieldValue::Null => "null".to_string(),
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Integer(n) => n.to_string(),
            FieldValue::Float(x) => x.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Date(d) => d.format(DATE_FORMAT).to_string(),
            FieldValue::DateTime(dt) => dt.format(DATETIME_FORMATS[0]).to_string(),
            FieldValue::Html(m) => m.as_str().to_string(),
            FieldValue::List(items) => items
                .iter()
                .map(FieldValue::key_repr)
                .collect::<Vec<_>>()
                .join("|"),
        }
    }

    /// Total order used by sort keys. Values of different kinds order by
    /// kind rank; integers and floats compare numerically.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Integer(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::Html(a), Self::Html(b)) => a.as_str().cmp(b.as_str()),
            (Self::List(a), Self::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.sort_cmp(y);
                    if ord.is_ne() {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Boolean(_) => 1,
            FieldValue::Integer(_) | FieldValue::Float(_) => 2,
            FieldValue::Text(_) => 3,
            FieldValue::Date(_) => 4,
            FieldValue::DateTime(_) => 5,
            FieldValue::Html(_) => 6,
            FieldValue::List(_) => 7,
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(value.into())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(value: NaiveDateTime) -> Self {
        FieldValue::DateTime(value)
    }
}

impl From<Markup> for FieldValue {
    fn from(value: Markup) -> Self {
        FieldValue::Html(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Declared semantic kind of an attribute; drives write normalization.
///
/// Two values are the same for a field once both are normalized and equal,
/// so dates compare by calendar value and markup by its serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttributeKind {
    #[default]
    Plain,
    Date,
    DateTime,
    Html,
}

impl AttributeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Html => "html",
        }
    }

    pub fn normalize(&self, value: FieldValue) -> Result<FieldValue, CoreError> {
        if value.is_null() {
            return Ok(value);
        }
        match self {
            Self::Plain => Ok(value),
            Self::Date => match value {
                FieldValue::Date(_) => Ok(value),
                FieldValue::DateTime(dt) => Ok(FieldValue::Date(dt.date())),
                FieldValue::Text(s) => NaiveDate::parse_from_str(&s, DATE_FORMAT)
                    .map(FieldValue::Date)
                    .map_err(|e| CoreError::InvalidData(format!("bad date {s:?}: {e}"))),
                other => Err(CoreError::InvalidData(format!(
                    "cannot store {other:?} in a date field"
                ))),
            },
            Self::DateTime => match value {
                FieldValue::DateTime(_) => Ok(value),
                FieldValue::Date(d) => Ok(FieldValue::DateTime(d.and_time(NaiveTime::MIN))),
                FieldValue::Text(s) => parse_datetime(&s).map(FieldValue::DateTime),
                other => Err(CoreError::InvalidData(format!(
                    "cannot store {other:?} in a datetime field"
                ))),
            },
            Self::Html => match value {
                FieldValue::Html(_) => Ok(value),
                FieldValue::Text(s) => Ok(FieldValue::Html(Markup::escape(&s))),
                other => Err(CoreError::InvalidData(format!(
                    "cannot store {other:?} in an html field"
                ))),
            },
        }
    }
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime, CoreError> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| CoreError::InvalidData(format!("bad datetime {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_text_normalizes_to_calendar_value() {
        let normalized = AttributeKind::Date
            .normalize(FieldValue::Text("2024-03-01".into()))
            .unwrap();
        assert_eq!(normalized, FieldValue::Date(date(2024, 3, 1)));
    }

    #[test]
    fn datetime_accepts_server_format_and_iso() {
        let a = AttributeKind::DateTime
            .normalize(FieldValue::Text("2024-03-01 10:30:00".into()))
            .unwrap();
        let b = AttributeKind::DateTime
            .normalize(FieldValue::Text("2024-03-01T10:30:00".into()))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn html_escapes_plain_text() {
        let normalized = AttributeKind::Html
            .normalize(FieldValue::Text("<b>hi</b>\nthere".into()))
            .unwrap();
        assert_eq!(
            normalized,
            FieldValue::Html(Markup::from_trusted("&lt;b&gt;hi&lt;/b&gt;<br/>there"))
        );
    }

    #[test]
    fn html_markup_is_kept_verbatim() {
        let markup = FieldValue::Html(Markup::from_trusted("<p>x</p>"));
        assert_eq!(AttributeKind::Html.normalize(markup.clone()).unwrap(), markup);
    }

    #[test]
    fn kind_rejects_incompatible_values() {
        assert!(AttributeKind::Date.normalize(FieldValue::Integer(3)).is_err());
        assert!(AttributeKind::Html.normalize(FieldValue::Boolean(true)).is_err());
        assert!(AttributeKind::Date.normalize(FieldValue::Text("yesterday".into())).is_err());
    }

    #[test]
    fn null_passes_every_kind() {
        for kind in [AttributeKind::Plain, AttributeKind::Date, AttributeKind::DateTime, AttributeKind::Html] {
            assert_eq!(kind.normalize(FieldValue::Null).unwrap(), FieldValue::Null);
        }
    }

    #[test]
    fn sort_cmp_mixes_numbers() {
        assert_eq!(FieldValue::Integer(2).sort_cmp(&FieldValue::Float(2.5)), Ordering::Less);
        assert_eq!(FieldValue::Float(3.0).sort_cmp(&FieldValue::Integer(3)), Ordering::Equal);
    }

    #[test]
    fn truthiness() {
        assert!(!FieldValue::Null.is_truthy());
        assert!(!FieldValue::Text(String::new()).is_truthy());
        assert!(FieldValue::Integer(-1).is_truthy());
        assert!(FieldValue::Date(date(2020, 1, 1)).is_truthy());
    }

    #[test]
    fn msgpack_preserves_dates() {
        let value = FieldValue::Date(date(2021, 12, 31));
        let bytes = value.to_msgpack().unwrap();
        assert_eq!(FieldValue::from_msgpack(&bytes).unwrap(), value);
    }

    #[test]
    fn msgpack_garbage_is_a_serialization_error() {
        let err = FieldValue::from_msgpack(&[0xc1]).unwrap_err();
        assert!(matches!(err, CoreError::Serialization(_)));
    }
}
