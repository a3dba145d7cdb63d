//! Immutable, ordered event payloads.
//!
//! A [`Payload`] is one event's key/value data. Keys are unique, insertion
//! order is preserved, and serialization is deterministic: the same payload
//! always produces the same JSON bytes, so byte sizes computed at enqueue time
//! stay valid for the lifetime of the stored event.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::{self, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Nested(Payload),
}

impl PayloadValue {
    /// Renders the value the way it appears in a GET query string.
    ///
    /// Scalars use their plain text form; nested payloads are JSON encoded.
    pub fn to_query_value(&self) -> String {
        match self {
            PayloadValue::Bool(b) => b.to_string(),
            PayloadValue::Integer(i) => i.to_string(),
            PayloadValue::Float(f) => f.to_string(),
            PayloadValue::String(s) => s.clone(),
            PayloadValue::Nested(p) => p.to_json().unwrap_or_default(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PayloadValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::String(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::String(value)
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue::Bool(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Integer(value)
    }
}

impl From<i32> for PayloadValue {
    fn from(value: i32) -> Self {
        PayloadValue::Integer(value.into())
    }
}

impl From<u32> for PayloadValue {
    fn from(value: u32) -> Self {
        PayloadValue::Integer(value.into())
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        PayloadValue::Float(value)
    }
}

impl From<Payload> for PayloadValue {
    fn from(value: Payload) -> Self {
        PayloadValue::Nested(value)
    }
}

/// One event's data: an ordered mapping with unique keys.
///
/// Payloads are built once through [`PayloadBuilder`] and never mutated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    entries: Vec<(String, PayloadValue)>,
}

impl Payload {
    /// Starts building a payload.
    pub fn builder() -> PayloadBuilder {
        PayloadBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PayloadValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Serializes to the wire form: one JSON object.
    ///
    /// Fails if any float, nested ones included, is NaN or infinite.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Size in bytes of the serialized form.
    pub fn byte_size(&self) -> serde_json::Result<u64> {
        Ok(self.to_json()?.len() as u64)
    }

    /// Flattens the payload into query-string pairs for single-event GET requests.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_query_value()))
            .collect()
    }
}

/// Builder for [`Payload`].
///
/// Inserting an existing key replaces its value but keeps its original position.
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    entries: Vec<(String, PayloadValue)>,
}

impl PayloadBuilder {
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.put(key.into(), value.into());
        self
    }

    pub fn string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, PayloadValue::String(value.into()))
    }

    pub fn integer(self, key: impl Into<String>, value: i64) -> Self {
        self.insert(key, PayloadValue::Integer(value))
    }

    pub fn float(self, key: impl Into<String>, value: f64) -> Self {
        self.insert(key, PayloadValue::Float(value))
    }

    pub fn boolean(self, key: impl Into<String>, value: bool) -> Self {
        self.insert(key, PayloadValue::Bool(value))
    }

    pub fn nested(self, key: impl Into<String>, value: Payload) -> Self {
        self.insert(key, PayloadValue::Nested(value))
    }

    pub fn build(self) -> Payload {
        Payload {
            entries: self.entries,
        }
    }

    fn put(&mut self, key: String, value: PayloadValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

impl Serialize for PayloadValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PayloadValue::Bool(b) => serializer.serialize_bool(*b),
            PayloadValue::Integer(i) => serializer.serialize_i64(*i),
            // serde_json would write these as null, which does not read back.
            PayloadValue::Float(f) if !f.is_finite() => Err(ser::Error::custom(format!(
                "non-finite float {f} has no JSON form"
            ))),
            PayloadValue::Float(f) => serializer.serialize_f64(*f),
            PayloadValue::String(s) => serializer.serialize_str(s),
            PayloadValue::Nested(p) => p.serialize(serializer),
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object of scalar or object values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Payload, A::Error> {
        let mut builder = PayloadBuilder::default();
        while let Some((key, value)) = access.next_entry::<String, PayloadValue>()? {
            builder.put(key, value);
        }
        Ok(builder.build())
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PayloadVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = PayloadValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string, number, boolean or object")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<PayloadValue, E> {
        Ok(PayloadValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<PayloadValue, E> {
        Ok(PayloadValue::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<PayloadValue, E> {
        Ok(match i64::try_from(v) {
            Ok(i) => PayloadValue::Integer(i),
            Err(_) => PayloadValue::Float(v as f64),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<PayloadValue, E> {
        Ok(PayloadValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<PayloadValue, E> {
        Ok(PayloadValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<PayloadValue, E> {
        Ok(PayloadValue::String(v))
    }

    fn visit_map<A: MapAccess<'de>>(self, access: A) -> Result<PayloadValue, A::Error> {
        PayloadVisitor.visit_map(access).map(PayloadValue::Nested)
    }
}

impl<'de> Deserialize<'de> for PayloadValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
