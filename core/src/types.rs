//! Option values and the option map exchanged with the engine.
//!
//! # Design
//! What an option *means* (URL, headers, fingerprints) is the engine's
//! business. This module only models values so that they survive the wire
//! unchanged: binary bodies stay `Bytes` and are written with the MessagePack
//! `bin` family, text stays `Str`, and header lists keep their order and
//! duplicates. `Serialize`/`Deserialize` are written by hand because an
//! untagged derive would turn a UTF-8 body back into a string.
//!
//! An absent option is an absent key. There is no null variant.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single option or result value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
    /// Raw bytes, carried verbatim.
    Bytes(Bytes),
    /// Ordered name/value pairs. Duplicate names are kept.
    Headers(Vec<(String, String)>),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptionValue::Int(n) => Some(*n as f64),
            OptionValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            OptionValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Byte view. Strings are exposed as their UTF-8 bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            OptionValue::Bytes(b) => Some(b),
            OptionValue::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_headers(&self) -> Option<&[(String, String)]> {
        match self {
            OptionValue::Headers(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Short type name used in validation messages.
    pub fn kind(&self) -> &'static str {
        match self {
            OptionValue::Str(_) => "string",
            OptionValue::Int(_) => "integer",
            OptionValue::Float(_) => "float",
            OptionValue::Bool(_) => "boolean",
            OptionValue::List(_) => "list",
            OptionValue::Bytes(_) => "bytes",
            OptionValue::Headers(_) => "headers",
        }
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Str(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        OptionValue::Int(i64::from(v))
    }
}

impl From<u16> for OptionValue {
    fn from(v: u16) -> Self {
        OptionValue::Int(i64::from(v))
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(v: Vec<String>) -> Self {
        OptionValue::List(v)
    }
}

impl From<Vec<&str>> for OptionValue {
    fn from(v: Vec<&str>) -> Self {
        OptionValue::List(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Bytes> for OptionValue {
    fn from(v: Bytes) -> Self {
        OptionValue::Bytes(v)
    }
}

impl From<Vec<u8>> for OptionValue {
    fn from(v: Vec<u8>) -> Self {
        OptionValue::Bytes(Bytes::from(v))
    }
}

impl From<&[u8]> for OptionValue {
    fn from(v: &[u8]) -> Self {
        OptionValue::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<Vec<(String, String)>> for OptionValue {
    fn from(v: Vec<(String, String)>) -> Self {
        OptionValue::Headers(v)
    }
}

impl Serialize for OptionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OptionValue::Str(v) => serializer.serialize_str(v),
            OptionValue::Int(v) => serializer.serialize_i64(*v),
            OptionValue::Float(v) => serializer.serialize_f64(*v),
            OptionValue::Bool(v) => serializer.serialize_bool(*v),
            OptionValue::List(items) => items.serialize(serializer),
            OptionValue::Bytes(b) => serializer.serialize_bytes(b),
            OptionValue::Headers(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (name, value) in pairs {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
        }
    }
}

struct OptionValueVisitor;

impl<'de> Visitor<'de> for OptionValueVisitor {
    type Value = OptionValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, number, boolean, string list, byte string or header map")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<OptionValue, E> {
        Ok(OptionValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<OptionValue, E> {
        Ok(OptionValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<OptionValue, E> {
        i64::try_from(v)
            .map(OptionValue::Int)
            .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &"an integer within i64 range"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<OptionValue, E> {
        Ok(OptionValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<OptionValue, E> {
        Ok(OptionValue::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<OptionValue, E> {
        Ok(OptionValue::Str(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<OptionValue, E> {
        Ok(OptionValue::Bytes(Bytes::copy_from_slice(v)))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<OptionValue, E> {
        Ok(OptionValue::Bytes(Bytes::from(v)))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<OptionValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<String>()? {
            items.push(item);
        }
        Ok(OptionValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<OptionValue, A::Error> {
        let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((name, value)) = map.next_entry::<String, String>()? {
            pairs.push((name, value));
        }
        Ok(OptionValue::Headers(pairs))
    }
}

impl<'de> Deserialize<'de> for OptionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(OptionValueVisitor)
    }
}

/// Per-request options, keyed by caller-facing parameter name.
///
/// Mutated by the caller before submission; the codec only ever borrows it.
/// Keys are kept sorted so that equal maps encode to equal bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestOptions {
    entries: BTreeMap<String, OptionValue>,
}

/// A decoded engine result has the same shape as a request.
pub type ResultMap = RequestOptions;

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Insert a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Option<OptionValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Insert `Some`, remove on `None`.
    pub fn set_opt<V: Into<OptionValue>>(&mut self, key: impl Into<String>, value: Option<V>) {
        let key = key.into();
        match value {
            Some(v) => {
                self.entries.insert(key, v.into());
            }
            None => {
                self.entries.remove(&key);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<OptionValue> {
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

    pub fn iter(&self) -> btree_map::Iter<'_, String, OptionValue> {
        self.entries.iter()
    }

    /// Overlay `other` on top of `self`; `other` wins on collisions.
    pub fn extend_from(&mut self, other: &RequestOptions) {
        for (key, value) in other.iter() {
            self.entries.insert(key.clone(), value.clone());
        }
    }
}

impl<K: Into<String>, V: Into<OptionValue>> FromIterator<(K, V)> for RequestOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RequestOptions {
    type Item = (&'a String, &'a OptionValue);
    type IntoIter = btree_map::Iter<'a, String, OptionValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
