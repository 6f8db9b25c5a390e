//! Immutable JSON values with structural ordering and cheap sharing.
//!
//! [`Value`] is the in-memory representation every node, delta and queued
//! event is built from. It differs from `serde_json::Value` in three ways
//! that the pub/sub core depends on:
//!
//! - every value knows the byte length of its serialized form without
//!   re-serializing ([`Value::serialized_size`]); aggregate sizes are
//!   computed once at construction,
//! - arrays are `Arc`-shared slices, so [`Array::slice`] shares elements
//!   instead of deep-copying them (node histories hand out suffixes of
//!   their delta log this way),
//! - values have a total order (tag rank first, content second), which
//!   gives node names and queue contents a defined comparison.
//!
//! Object keys are unique; iteration and the defined comparison use
//! descending key order. Conversion to and from `serde_json::Value`
//! happens only at the HTTP edge ([`Value::from_serde`],
//! [`Value::to_serde`]).

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Serialized length of a string literal including quotes and escapes.
///
/// Mirrors the escaping rules of the wire serializer: `"` and `\` become
/// two bytes, the common control characters get two-byte shorthands, the
/// remaining control characters become `\uXXXX`, everything else (including
/// multi-byte UTF-8) passes through.
fn escaped_len(s: &str) -> usize {
    let mut n = 2;
    for b in s.bytes() {
        n += match b {
            b'"' | b'\\' => 2,
            0x08 | 0x09 | 0x0A | 0x0C | 0x0D => 2,
            b if b < 0x20 => 6,
            _ => 1,
        };
    }
    n
}

/// A JSON number that remembers its wire representation.
///
/// Keeps the integer/float identity of its source (`1` never turns into
/// `1.0`) and caches the serialized length.
#[derive(Clone, Debug)]
pub struct Number {
    inner: serde_json::Number,
    size: u32,
}

impl Number {
    fn new(inner: serde_json::Number) -> Self {
        let size = inner.to_string().len() as u32;
        Number { inner, size }
    }

    #[must_use]
    pub fn from_i64(n: i64) -> Self {
        Number::new(serde_json::Number::from(n))
    }

    #[must_use]
    pub fn from_u64(n: u64) -> Self {
        Number::new(serde_json::Number::from(n))
    }

    /// Non-finite floats have no JSON representation and map to zero.
    #[must_use]
    pub fn from_f64(n: f64) -> Self {
        let inner = serde_json::Number::from_f64(n)
            .unwrap_or_else(|| serde_json::Number::from(0));
        Number::new(inner)
    }

    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.inner.as_f64().unwrap_or(0.0)
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.inner.as_i64()
    }

    pub(crate) fn to_serde(&self) -> serde_json::Number {
        self.inner.clone()
    }

    fn serialized_size(&self) -> usize {
        self.size as usize
    }
}

impl From<serde_json::Number> for Number {
    fn from(inner: serde_json::Number) -> Self {
        Number::new(inner)
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        // JSON numbers are never NaN.
        self.as_f64()
            .partial_cmp(&other.as_f64())
            .unwrap_or(Ordering::Equal)
    }
}

/// An immutable, `Arc`-shared JSON array.
///
/// An `Array` is a window (offset + length) over shared element storage.
/// [`Array::slice`] produces another window over the same storage; the
/// elements themselves are never copied.
#[derive(Clone, Debug)]
pub struct Array {
    items: Arc<[Value]>,
    start: usize,
    len: usize,
    size: usize,
}

impl Array {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        let items: Arc<[Value]> = items.into();
        let len = items.len();
        let size = Self::measure(items.iter());
        Array { items, start: 0, len, size }
    }

    #[must_use]
    pub fn empty() -> Self {
        Array::new(Vec::new())
    }

    fn measure<'a>(items: impl Iterator<Item = &'a Value>) -> usize {
        let mut size = 2;
        let mut count = 0;
        for item in items {
            size += item.serialized_size();
            count += 1;
        }
        if count > 1 {
            size += count - 1;
        }
        size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        if index < self.len {
            Some(&self.items[self.start + index])
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> + '_ {
        self.items[self.start..self.start + self.len].iter()
    }

    /// A sub-array sharing this array's element storage.
    ///
    /// # Panics
    ///
    /// Panics if `start + len` exceeds the array length.
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> Array {
        assert!(
            start + len <= self.len,
            "slice [{start}, {start}+{len}) out of range for array of length {}",
            self.len
        );
        let abs = self.start + start;
        let size = Self::measure(self.items[abs..abs + len].iter());
        Array { items: Arc::clone(&self.items), start: abs, len, size }
    }

    fn serialized_size(&self) -> usize {
        self.size
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl Eq for Array {}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Array::new(iter.into_iter().collect())
    }
}

/// An immutable JSON object with unique, sorted keys.
///
/// Entries are stored sorted ascending; iteration ([`Object::iter`],
/// [`Object::keys`]) and the defined ordering run in descending key order.
#[derive(Clone, Debug)]
pub struct Object {
    entries: Arc<[(Arc<str>, Value)]>,
    size: usize,
}

impl Object {
    /// Build an object from key/value pairs. Later duplicates win.
    #[must_use]
    pub fn new(pairs: Vec<(String, Value)>) -> Self {
        let mut map = std::collections::BTreeMap::new();
        for (key, value) in pairs {
            map.insert(key, value);
        }
        let entries: Vec<(Arc<str>, Value)> = map
            .into_iter()
            .map(|(k, v)| (Arc::<str>::from(k.as_str()), v))
            .collect();
        let size = Self::measure(&entries);
        Object { entries: entries.into(), size }
    }

    #[must_use]
    pub fn empty() -> Self {
        Object::new(Vec::new())
    }

    fn measure(entries: &[(Arc<str>, Value)]) -> usize {
        let mut size = 2;
        for (key, value) in entries {
            size += escaped_len(key) + 1 + value.serialized_size();
        }
        if entries.len() > 1 {
            size += entries.len() - 1;
        }
        size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .binary_search_by(|(k, _)| k.as_ref().cmp(key))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keys in descending order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().rev().map(|(k, _)| k.as_ref())
    }

    /// Entries in descending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.entries.iter().rev().map(|(k, v)| (k.as_ref(), v))
    }

    /// A copy of this object with one key inserted or replaced.
    #[must_use]
    pub fn with(&self, key: &str, value: Value) -> Object {
        let mut pairs: Vec<(String, Value)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        pairs.push((key.to_string(), value));
        Object::new(pairs)
    }

    /// A copy of this object without the given key.
    #[must_use]
    pub fn without(&self, key: &str) -> Object {
        let pairs: Vec<(String, Value)> = self
            .entries
            .iter()
            .filter(|(k, _)| k.as_ref() != key)
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Object::new(pairs)
    }

    fn serialized_size(&self) -> usize {
        self.size
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().eq(other.entries.iter())
    }
}

impl Eq for Object {}

/// An immutable JSON value.
///
/// Cloning is shallow: strings, arrays and objects share their storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(Arc<str>),
    Array(Array),
    Object(Object),
}

impl Value {
    /// Byte length of the serialized form, without serializing.
    ///
    /// Aggregates return a cached size; strings are measured without
    /// allocating.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        match self {
            Value::Null => 4,
            Value::Bool(true) => 4,
            Value::Bool(false) => 5,
            Value::Number(n) => n.serialized_size(),
            Value::String(s) => escaped_len(s),
            Value::Array(a) => a.serialized_size(),
            Value::Object(o) => o.serialized_size(),
        }
    }

    #[must_use]
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Array::new(items))
    }

    #[must_use]
    pub fn object<K: Into<String>>(pairs: Vec<(K, Value)>) -> Value {
        Value::Object(Object::new(
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    fn tag_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    /// Convert from the wire representation.
    #[must_use]
    pub fn from_serde(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(Number::from(n.clone())),
            serde_json::Value::String(s) => Value::String(Arc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_serde).collect())
            }
            serde_json::Value::Object(map) => Value::Object(Object::new(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_serde(v)))
                    .collect(),
            )),
        }
    }

    /// Convert to the wire representation.
    #[must_use]
    pub fn to_serde(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.to_serde()),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(a) => {
                serde_json::Value::Array(a.iter().map(Value::to_serde).collect())
            }
            Value::Object(o) => {
                let mut map = serde_json::Map::new();
                for (key, value) in o.entries.iter() {
                    map.insert(key.to_string(), value.to_serde());
                }
                serde_json::Value::Object(map)
            }
        }
    }

    /// Serialized form as a string. Intended for tests and logging.
    #[must_use]
    pub fn to_json(&self) -> String {
        self.to_serde().to_string()
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.as_ref().cmp(b.as_ref()),
            (Value::Array(a), Value::Array(b)) => a.iter().cmp(b.iter()),
            (Value::Object(a), Value::Object(b)) => a.iter().cmp(b.iter()),
            _ => self.tag_rank().cmp(&other.tag_rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Number::from_i64(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(Number::from_u64(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(Number::from_f64(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(j: serde_json::Value) -> Value {
        Value::from_serde(&j)
    }

    #[test]
    fn test_serialized_size_matches_wire_bytes() {
        let cases = vec![
            serde_json::json!(null),
            serde_json::json!(true),
            serde_json::json!(false),
            serde_json::json!(42),
            serde_json::json!(-7.5),
            serde_json::json!("hello"),
            serde_json::json!("quote \" and \\ and \n"),
            serde_json::json!([1, [2, 3], "x"]),
            serde_json::json!({"a": 1, "b": {"c": [true, null]}}),
            serde_json::json!({}),
            serde_json::json!([]),
        ];
        for case in cases {
            let value = v(case.clone());
            assert_eq!(
                value.serialized_size(),
                case.to_string().len(),
                "size mismatch for {case}"
            );
        }
    }

    #[test]
    fn test_structural_equality_ignores_key_order() {
        let a = Value::object(vec![("x", Value::from(1i64)), ("y", Value::from(2i64))]);
        let b = Value::object(vec![("y", Value::from(2i64)), ("x", Value::from(1i64))]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let o = Value::object(vec![("k", Value::from(1i64)), ("k", Value::from(2i64))]);
        assert_eq!(o.as_object().unwrap().get("k"), Some(&Value::from(2i64)));
        assert_eq!(o.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_object_keys_descend() {
        let o = Object::new(vec![
            ("a".into(), Value::Null),
            ("c".into(), Value::Null),
            ("b".into(), Value::Null),
        ]);
        let keys: Vec<&str> = o.keys().collect();
        assert_eq!(keys, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_tag_order() {
        let ordered = vec![
            Value::Null,
            Value::Bool(false),
            Value::from(0i64),
            Value::from(""),
            Value::array(vec![]),
            Value::object::<&str>(vec![]),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_number_order_is_numeric() {
        assert!(Value::from(2i64) < Value::from(10i64));
        assert!(Value::from(-1i64) < Value::from(0.5));
    }

    #[test]
    fn test_slice_shares_elements() {
        let base = Array::new((0..8).map(|n| Value::from(n as i64)).collect());
        let tail = base.slice(5, 3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.get(0), Some(&Value::from(5i64)));
        // The slice points into the same storage.
        let base_elem = base.get(5).unwrap();
        let tail_elem = tail.get(0).unwrap();
        assert!(std::ptr::eq(base_elem, tail_elem));
    }

    #[test]
    fn test_slice_size_matches_serialization() {
        let base = Array::new(vec![
            v(serde_json::json!({"a": 1})),
            Value::from("hi"),
            Value::from(12345i64),
        ]);
        let slice = base.slice(1, 2);
        let as_value = Value::Array(slice);
        assert_eq!(as_value.serialized_size(), as_value.to_json().len());
    }

    #[test]
    fn test_serde_round_trip() {
        let original = serde_json::json!({
            "channel": "/a/b",
            "data": {"nested": [1, 2.5, "three", null, true]}
        });
        assert_eq!(v(original.clone()).to_serde(), original);
    }

    #[test]
    fn test_integer_identity_survives() {
        assert_eq!(v(serde_json::json!(1)).to_json(), "1");
        assert_eq!(v(serde_json::json!(1.0)).to_json(), "1.0");
        assert_ne!(v(serde_json::json!(1)), v(serde_json::json!(1.0)));
    }
}
