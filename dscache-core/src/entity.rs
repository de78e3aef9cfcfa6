//! Cacheable entity trait and the dynamic property-list record.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RecordError;

/// A structured record that can be written to the store and cached.
///
/// # Implementation Requirements
///
/// - `kind()` is the schema tag stored beside every cache entry; it must be
///   the same for all instances and differ between record shapes
/// - The type must serialize to a JSON object. Scalars, sequences and `null`
///   are rejected when written
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Schema tag of this record shape.
    fn kind() -> &'static str;

    /// Whether this is an untyped property bag rather than a declared shape.
    ///
    /// Batched reads refuse dynamic destinations because they would accept
    /// any cached shape.
    fn is_dynamic() -> bool {
        false
    }
}

/// Untyped record: a flat map of property names to JSON values.
///
/// This is what queries return for full (non keys-only) results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyList(Map<String, Value>);

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `entity`, rejecting anything that is not a structured record.
    pub fn from_entity<T: Entity>(entity: &T) -> Result<Self, RecordError> {
        let value = serde_json::to_value(entity).map_err(|e| RecordError::Encode {
            kind: T::kind(),
            reason: e.to_string(),
        })?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(RecordError::NotARecord {
                kind: T::kind(),
                found: json_type_name(&other),
            }),
        }
    }

    /// Decode this record into `T`.
    pub fn into_entity<T: Entity>(self) -> Result<T, RecordError> {
        serde_json::from_value(Value::Object(self.0)).map_err(|e| RecordError::Decode {
            kind: T::kind(),
            reason: e.to_string(),
        })
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.0.get(property)
    }

    pub fn insert(&mut self, property: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(property.into(), value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl Entity for PropertyList {
    fn kind() -> &'static str {
        "PropertyList"
    }

    fn is_dynamic() -> bool {
        true
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
