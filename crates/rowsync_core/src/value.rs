//! Dynamic column values and column data types.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Map key carrying a non-finite real (`{"$real": "inf"}`).
pub const NON_FINITE_REAL_KEY: &str = "$real";

/// A dynamic column value.
///
/// Values are serialized untagged so a batch file row reads as a plain JSON
/// array (`[1, "Widget", null, 2.5]`). JSON has no literal for infinities
/// or NaN, so those reals are written as a one-entry map keyed by
/// [`NON_FINITE_REAL_KEY`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncValue {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// Double precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl SyncValue {
    /// Returns true if the value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SyncValue::Null)
    }

    /// Returns the integer value, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SyncValue::Integer(v) => Some(*v),
            SyncValue::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Returns the text value, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SyncValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for integer `1`/boolean `true`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SyncValue::Boolean(b) => Some(*b),
            SyncValue::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }
}

fn non_finite_name(v: f64) -> &'static str {
    if v.is_nan() {
        "nan"
    } else if v.is_sign_negative() {
        "-inf"
    } else {
        "inf"
    }
}

impl Serialize for SyncValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SyncValue::Null => serializer.serialize_unit(),
            SyncValue::Boolean(b) => serializer.serialize_bool(*b),
            SyncValue::Integer(v) => serializer.serialize_i64(*v),
            SyncValue::Real(v) if v.is_finite() => serializer.serialize_f64(*v),
            SyncValue::Real(v) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(NON_FINITE_REAL_KEY, non_finite_name(*v))?;
                map.end()
            }
            SyncValue::Text(s) => serializer.serialize_str(s),
            SyncValue::Blob(bytes) => bytes.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NonFiniteReal {
    #[serde(rename = "$real")]
    real: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValueRepr {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    NonFinite(NonFiniteReal),
}

impl<'de> Deserialize<'de> for SyncValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match ValueRepr::deserialize(deserializer)? {
            ValueRepr::Null => SyncValue::Null,
            ValueRepr::Boolean(b) => SyncValue::Boolean(b),
            ValueRepr::Integer(v) => SyncValue::Integer(v),
            ValueRepr::Real(v) => SyncValue::Real(v),
            ValueRepr::Text(s) => SyncValue::Text(s),
            ValueRepr::Blob(bytes) => SyncValue::Blob(bytes),
            ValueRepr::NonFinite(NonFiniteReal { real }) => SyncValue::Real(match real.as_str() {
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                "nan" => f64::NAN,
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "unknown non-finite real {other:?}"
                    )))
                }
            }),
        })
    }
}

impl From<i64> for SyncValue {
    fn from(v: i64) -> Self {
        SyncValue::Integer(v)
    }
}

impl From<i32> for SyncValue {
    fn from(v: i32) -> Self {
        SyncValue::Integer(i64::from(v))
    }
}

impl From<f64> for SyncValue {
    fn from(v: f64) -> Self {
        SyncValue::Real(v)
    }
}

impl From<bool> for SyncValue {
    fn from(v: bool) -> Self {
        SyncValue::Boolean(v)
    }
}

impl From<&str> for SyncValue {
    fn from(v: &str) -> Self {
        SyncValue::Text(v.to_string())
    }
}

impl From<String> for SyncValue {
    fn from(v: String) -> Self {
        SyncValue::Text(v)
    }
}

impl From<Vec<u8>> for SyncValue {
    fn from(v: Vec<u8>) -> Self {
        SyncValue::Blob(v)
    }
}

impl<T: Into<SyncValue>> From<Option<T>> for SyncValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SyncValue::Null)
    }
}

/// Logical column type, mapped to a native type by each provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDataType {
    /// Integer affinity.
    Integer,
    /// Floating point affinity.
    Real,
    /// Text affinity.
    Text,
    /// Binary affinity.
    Blob,
    /// Boolean stored as 0/1.
    Boolean,
    /// Exact numeric stored as text or real depending on the provider.
    Numeric,
}

impl SyncDataType {
    /// Maps a declared SQL type name to a logical type using SQLite's
    /// affinity rules, which are lenient enough for any dialect.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            SyncDataType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            SyncDataType::Text
        } else if upper.contains("BLOB") || upper.is_empty() {
            SyncDataType::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            SyncDataType::Real
        } else if upper.contains("BOOL") || upper == "BIT" {
            SyncDataType::Boolean
        } else {
            SyncDataType::Numeric
        }
    }
}

impl fmt::Display for SyncDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncDataType::Integer => "integer",
            SyncDataType::Real => "real",
            SyncDataType::Text => "text",
            SyncDataType::Blob => "blob",
            SyncDataType::Boolean => "boolean",
            SyncDataType::Numeric => "numeric",
        };
        f.write_str(name)
    }
}
