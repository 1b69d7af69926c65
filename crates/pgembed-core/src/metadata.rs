use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::PgEmbedError;

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Uuid(Uuid),
}

impl MetadataValue {
    /// Whether the value compares numerically.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Integer(_) | Self::Long(_) | Self::Float(_) | Self::Double(_)
        )
    }

    /// Convert to JSON. UUIDs become their hyphenated string form.
    ///
    /// NaN and infinities have no JSON representation and are rejected.
    pub fn to_json(&self) -> Result<Value, PgEmbedError> {
        let value = match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Long(l) => Value::from(*l),
            Self::Float(f) => Value::Number(finite_number(f64::from(*f))?),
            Self::Double(d) => Value::Number(finite_number(*d)?),
            Self::Uuid(u) => Value::String(u.to_string()),
        };
        Ok(value)
    }

    /// Convert a JSON scalar back into a metadata value.
    ///
    /// Integers that fit in 32 bits become `Integer`, other integers `Long`,
    /// fractional numbers `Double`. `null` yields `None`.
    pub fn from_json(key: &str, value: &Value) -> Result<Option<Self>, PgEmbedError> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(Self::String(s.clone()))),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Some(match i32::try_from(i) {
                        Ok(small) => Self::Integer(small),
                        Err(_) => Self::Long(i),
                    }))
                } else if n.is_u64() {
                    Err(PgEmbedError::Encoding(format!(
                        "metadata key '{key}': integer {n} does not fit in a signed 64-bit value"
                    )))
                } else {
                    n.as_f64().map(|d| Some(Self::Double(d))).ok_or_else(|| {
                        PgEmbedError::Encoding(format!("metadata key '{key}': invalid number {n}"))
                    })
                }
            }
            Value::Bool(_) | Value::Array(_) | Value::Object(_) => Err(PgEmbedError::Encoding(
                format!("metadata key '{key}': unsupported JSON value {value}"),
            )),
        }
    }
}

fn finite_number(value: f64) -> Result<Number, PgEmbedError> {
    Number::from_f64(value).ok_or_else(|| {
        PgEmbedError::Encoding(format!("non-finite number {value} cannot be stored as JSON"))
    })
}

/// Plain text form: strings unquoted, UUIDs hyphenated.
impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Long(l) => write!(f, "{l}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::Uuid(u) => write!(f, "{u}"),
        }
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f32> for MetadataValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<Uuid> for MetadataValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// String-keyed scalar metadata attached to a [`TextSegment`](crate::TextSegment).
///
/// The typed getters accept any representation that converts without loss,
/// so a value that went through JSON (where every integer looks alike and a
/// UUID is a string) reads back the same way it was written.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
    entries: HashMap<String, MetadataValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.put(key, value);
        self
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.entries.iter()
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_uuid(&self, key: &str) -> Option<Uuid> {
        match self.entries.get(key)? {
            MetadataValue::Uuid(u) => Some(*u),
            MetadataValue::String(s) => Uuid::parse_str(s).ok(),
            _ => None,
        }
    }

    pub fn get_integer(&self, key: &str) -> Option<i32> {
        match self.entries.get(key)? {
            MetadataValue::Integer(i) => Some(*i),
            MetadataValue::Long(l) => i32::try_from(*l).ok(),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            MetadataValue::Integer(i) => Some(i64::from(*i)),
            MetadataValue::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f32> {
        match self.entries.get(key)? {
            MetadataValue::Float(f) => Some(*f),
            MetadataValue::Double(d) => Some(*d as f32),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.entries.get(key)? {
            MetadataValue::Float(f) => Some(f64::from(*f)),
            MetadataValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Serialize all entries as a JSON object.
    pub fn to_json_object(&self) -> Result<Map<String, Value>, PgEmbedError> {
        self.entries
            .iter()
            .map(|(key, value)| Ok((key.clone(), value.to_json()?)))
            .collect()
    }

    /// Parse a JSON object produced by [`to_json_object`](Self::to_json_object).
    /// `null` is treated as an empty object; `null` members are skipped.
    pub fn from_json_value(value: &Value) -> Result<Self, PgEmbedError> {
        let object = match value {
            Value::Null => return Ok(Self::new()),
            Value::Object(object) => object,
            other => {
                return Err(PgEmbedError::Encoding(format!(
                    "expected a JSON object for metadata, got {other}"
                )))
            }
        };
        let mut metadata = Self::new();
        for (key, value) in object {
            if let Some(value) = MetadataValue::from_json(key, value)? {
                metadata.entries.insert(key.clone(), value);
            }
        }
        Ok(metadata)
    }
}

impl From<HashMap<String, MetadataValue>> for Metadata {
    fn from(entries: HashMap<String, MetadataValue>) -> Self {
        Self { entries }
    }
}

impl FromIterator<(String, MetadataValue)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, MetadataValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Metadata {
    type Item = (String, MetadataValue);
    type IntoIter = std::collections::hash_map::IntoIter<String, MetadataValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_typed_reads() {
        let id = Uuid::new_v4();
        let metadata = Metadata::new()
            .with("name", "doc")
            .with("page", 7)
            .with("offset", 5_000_000_000i64)
            .with("ratio", 0.1f32)
            .with("score", 0.123456789012345f64)
            .with("source_id", id);

        let json = Value::Object(metadata.to_json_object().unwrap());
        let text = serde_json::to_string(&json).unwrap();
        let back = Metadata::from_json_value(&serde_json::from_str(&text).unwrap()).unwrap();

        assert_eq!(back.get_string("name"), Some("doc"));
        assert_eq!(back.get_integer("page"), Some(7));
        assert_eq!(back.get_long("offset"), Some(5_000_000_000));
        assert_eq!(back.get_float("ratio"), Some(0.1f32));
        assert_eq!(back.get_double("score"), Some(0.123456789012345));
        assert_eq!(back.get_uuid("source_id"), Some(id));
    }

    #[test]
    fn non_finite_floats_are_encoding_errors() {
        let metadata = Metadata::new().with("bad", f64::NAN);
        assert!(matches!(
            metadata.to_json_object(),
            Err(PgEmbedError::Encoding(_))
        ));
        assert!(MetadataValue::Float(f32::INFINITY).to_json().is_err());
    }

    #[test]
    fn from_json_rejects_non_scalars() {
        let value = serde_json::json!({ "tags": ["a", "b"] });
        assert!(matches!(
            Metadata::from_json_value(&value),
            Err(PgEmbedError::Encoding(_))
        ));
        let value = serde_json::json!([1, 2]);
        assert!(Metadata::from_json_value(&value).is_err());
    }

    #[test]
    fn from_json_null_is_empty_and_null_members_skipped() {
        assert!(Metadata::from_json_value(&Value::Null).unwrap().is_empty());
        let value = serde_json::json!({ "a": null, "b": 1 });
        let metadata = Metadata::from_json_value(&value).unwrap();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.get("b"), Some(&MetadataValue::Integer(1)));
    }

    #[test]
    fn getters_do_not_cross_kinds() {
        let metadata = Metadata::new().with("n", 3).with("s", "not-a-uuid");
        assert_eq!(metadata.get_string("n"), None);
        assert_eq!(metadata.get_double("n"), None);
        assert_eq!(metadata.get_uuid("s"), None);
        assert_eq!(metadata.get_integer("missing"), None);
    }

    #[test]
    fn display_is_plain_text() {
        assert_eq!(MetadataValue::from("en").to_string(), "en");
        assert_eq!(MetadataValue::from(0.1f32).to_string(), "0.1");
        assert_eq!(MetadataValue::from(-3i64).to_string(), "-3");
        let id = Uuid::nil();
        assert_eq!(
            MetadataValue::from(id).to_string(),
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn long_reads_as_integer_only_when_it_fits() {
        let metadata = Metadata::new()
            .with("small", 42i64)
            .with("big", i64::from(i32::MAX) + 1);
        assert_eq!(metadata.get_integer("small"), Some(42));
        assert_eq!(metadata.get_integer("big"), None);
    }
}
