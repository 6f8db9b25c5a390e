//! Node identity: keys and node names.
//!
//! A node is addressed by a [`NodeName`], an ordered list of
//! domain/value [`Key`]s with each domain appearing at most once. Names
//! compare shorter-first, then key by key, which gives the node table a
//! total order.

use std::cmp::Ordering;
use std::fmt;

use crate::json::Value;

/// One domain/value pair of a node name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    domain: String,
    value: String,
}

impl Key {
    #[must_use]
    pub fn new(domain: impl Into<String>, value: impl Into<String>) -> Self {
        Key { domain: domain.into(), value: value.into() }
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.domain, &self.value).cmp(&(&other.domain, &other.value))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.domain, self.value)
    }
}

/// Canonical identity of a node.
///
/// Keys are kept sorted by domain. Two names are equal when their key
/// sequences are equal; ordering compares lengths first (shorter names
/// sort first), then keys pairwise.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NodeName {
    keys: Vec<Key>,
}

impl NodeName {
    #[must_use]
    pub fn new() -> Self {
        NodeName { keys: Vec::new() }
    }

    /// Build a name from a JSON object, sorting properties by domain.
    ///
    /// String property values keep their text; any other value
    /// contributes its JSON form.
    #[must_use]
    pub fn from_json_object(object: &Value) -> Self {
        let mut name = NodeName::new();
        if let Some(object) = object.as_object() {
            for (domain, value) in object.iter() {
                let text = match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_json(),
                };
                name.add(Key::new(domain, text));
            }
        }
        name
    }

    /// Insert a key, keeping domain order; an existing domain's value is
    /// replaced.
    pub fn add(&mut self, key: Key) -> &mut Self {
        match self.keys.binary_search_by(|k| k.domain().cmp(key.domain())) {
            Ok(pos) => self.keys[pos] = key,
            Err(pos) => self.keys.insert(pos, key),
        }
        self
    }

    #[must_use]
    pub fn find_key(&self, domain: &str) -> Option<&Key> {
        self.keys
            .binary_search_by(|k| k.domain().cmp(domain))
            .ok()
            .map(|pos| &self.keys[pos])
    }

    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Render the name back to a JSON object of domain/value strings.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::object(
            self.keys
                .iter()
                .map(|k| (k.domain().to_string(), Value::from(k.value())))
                .collect::<Vec<_>>(),
        )
    }
}

impl PartialOrd for NodeName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.keys
            .len()
            .cmp(&other.keys.len())
            .then_with(|| self.keys.cmp(&other.keys))
    }
}

impl FromIterator<Key> for NodeName {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        let mut name = NodeName::new();
        for key in iter {
            name.add(key);
        }
        name
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::Value;

    fn name(pairs: &[(&str, &str)]) -> NodeName {
        pairs.iter().map(|(d, v)| Key::new(*d, *v)).collect()
    }

    #[test]
    fn test_keys_sorted_by_domain() {
        let n = name(&[("b", "2"), ("a", "1"), ("c", "3")]);
        let domains: Vec<&str> = n.keys().iter().map(Key::domain).collect();
        assert_eq!(domains, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_add_replaces_existing_domain() {
        let mut n = name(&[("a", "1")]);
        n.add(Key::new("a", "other"));
        assert_eq!(n.keys().len(), 1);
        assert_eq!(n.find_key("a").unwrap().value(), "other");
    }

    #[test]
    fn test_shorter_names_sort_first() {
        let short = name(&[("z", "9")]);
        let long = name(&[("a", "1"), ("b", "2")]);
        assert!(short < long);
    }

    #[test]
    fn test_same_length_compares_keys() {
        let a = name(&[("a", "1"), ("b", "2")]);
        let b = name(&[("a", "1"), ("b", "3")]);
        assert!(a < b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_json_object_stringifies_values() {
        let object = Value::from_serde(&serde_json::json!({
            "market": "bananas",
            "limit": 5,
            "active": true
        }));
        let n = NodeName::from_json_object(&object);
        assert_eq!(n.find_key("market").unwrap().value(), "bananas");
        assert_eq!(n.find_key("limit").unwrap().value(), "5");
        assert_eq!(n.find_key("active").unwrap().value(), "true");
    }

    #[test]
    fn test_to_json_round_trip() {
        let n = name(&[("p1", "a"), ("p2", "b")]);
        assert_eq!(NodeName::from_json_object(&n.to_json()), n);
    }

    #[test]
    fn test_find_key_missing_domain() {
        let n = name(&[("a", "1")]);
        assert!(n.find_key("b").is_none());
    }
}
