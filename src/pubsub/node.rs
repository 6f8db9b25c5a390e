//! Versioned nodes: a current value, a version counter, and a bounded
//! delta history.

use std::collections::VecDeque;
use std::fmt;

use crate::json::{delta, Value};

/// Monotonic node version.
///
/// A fresh version starts at a random point so that stale clients of a
/// restarted server cannot accidentally resume against a node that merely
/// reuses their old numbers. Arithmetic wraps; distances are computed in
/// 64 bits and clamped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeVersion(u32);

impl NodeVersion {
    /// A randomly seeded initial version.
    #[must_use]
    pub fn generate() -> Self {
        NodeVersion(rand::random::<u32>())
    }

    #[must_use]
    pub fn from_number(n: u32) -> Self {
        NodeVersion(n)
    }

    /// `self - rhs`, clamped to the `i64` view of the wrapped counters.
    #[must_use]
    pub fn distance(self, rhs: NodeVersion) -> i64 {
        i64::from(self.0) - i64::from(rhs.0)
    }

    #[must_use]
    pub fn next(self) -> NodeVersion {
        NodeVersion(self.0.wrapping_add(1))
    }

    #[must_use]
    pub fn to_json(self) -> Value {
        Value::from(u64::from(self.0))
    }
}

impl std::ops::Add<u32> for NodeVersion {
    type Output = NodeVersion;

    fn add(self, rhs: u32) -> NodeVersion {
        NodeVersion(self.0.wrapping_add(rhs))
    }
}

impl std::ops::Sub<u32> for NodeVersion {
    type Output = NodeVersion;

    fn sub(self, rhs: u32) -> NodeVersion {
        NodeVersion(self.0.wrapping_sub(rhs))
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a subscriber at a known version should receive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdatePayload {
    /// The subscriber can catch up by applying these deltas in order
    /// (empty when it is already current).
    Deltas(Value),
    /// The gap is not bridgeable; this is the full current value and the
    /// subscriber must treat it as a replacement.
    Full(Value),
}

/// A versioned JSON cell with a bounded history of deltas.
///
/// # Invariants
///
/// - the version moves by exactly one per accepted update,
/// - `history.len() <= version - oldest_version`,
/// - the summed serialized size of the history stays within the update
///   size budget; the oldest entries are evicted first,
/// - equal consecutive values still advance the version and are still
///   announced — clients rely on update ordering, not on payload change.
#[derive(Clone, Debug)]
pub struct Node {
    data: Value,
    version: NodeVersion,
    updates: VecDeque<Value>,
    updates_size: usize,
}

impl Node {
    #[must_use]
    pub fn new(version: NodeVersion, data: Value) -> Self {
        Node { data, version, updates: VecDeque::new(), updates_size: 0 }
    }

    #[must_use]
    pub fn current_version(&self) -> NodeVersion {
        self.version
    }

    #[must_use]
    pub fn oldest_version(&self) -> NodeVersion {
        self.version - self.updates.len() as u32
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Catch a subscriber up from `known_version`.
    ///
    /// Returns the deltas between `known_version` and the current version
    /// when the history still covers the gap; otherwise the full current
    /// value.
    #[must_use]
    pub fn get_update_from(&self, known_version: NodeVersion) -> UpdatePayload {
        let distance = self.version.distance(known_version);

        if distance == 0 {
            return UpdatePayload::Deltas(Value::array(Vec::new()));
        }
        if distance < 0 || distance > self.updates.len() as i64 {
            return UpdatePayload::Full(self.data.clone());
        }

        let start = self.updates.len() - distance as usize;
        UpdatePayload::Deltas(Value::array(
            self.updates.iter().skip(start).cloned().collect(),
        ))
    }

    /// Replace the value, advancing the version by one.
    ///
    /// A delta against the previous value is appended to the history when
    /// it fits within `serialized_size(new) * keep_update_size_percent /
    /// 100` bytes; the history is then trimmed front-first to the same
    /// budget. Always reports `true`: an update with an unchanged value
    /// is an update all the same.
    pub fn update(&mut self, new_data: Value, keep_update_size_percent: u32) -> bool {
        let max_size = new_data.serialized_size() * keep_update_size_percent as usize / 100;

        if new_data != self.data {
            if max_size > 0 {
                if let Some(patch) = delta(&self.data, &new_data, max_size) {
                    self.updates_size += patch.serialized_size();
                    self.updates.push_back(patch);
                }
            }
            self.data = new_data;
        }

        self.version = self.version.next();
        self.remove_old_versions(max_size);
        true
    }

    fn remove_old_versions(&mut self, max_size: usize) {
        while self.updates_size > max_size {
            match self.updates.pop_front() {
                Some(evicted) => self.updates_size -= evicted.serialized_size(),
                None => break,
            }
        }
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.updates.len()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data: {}\nversion: {}", self.data, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::apply;

    fn v(j: serde_json::Value) -> Value {
        Value::from_serde(&j)
    }

    fn node_at(version: u32, data: serde_json::Value) -> Node {
        Node::new(NodeVersion::from_number(version), v(data))
    }

    #[test]
    fn test_new_node_has_no_history() {
        let node = node_at(100, serde_json::json!({"a": 1}));
        assert_eq!(node.current_version(), node.oldest_version());
        assert_eq!(node.history_len(), 0);
    }

    #[test]
    fn test_update_increments_version_by_one() {
        let mut node = node_at(100, serde_json::json!({"a": 1}));
        assert!(node.update(v(serde_json::json!({"a": 2})), 100));
        assert_eq!(node.current_version(), NodeVersion::from_number(101));
        assert!(node.update(v(serde_json::json!({"a": 3})), 100));
        assert_eq!(node.current_version(), NodeVersion::from_number(102));
    }

    #[test]
    fn test_equal_update_advances_version_without_delta() {
        let mut node = node_at(5, serde_json::json!({"a": 1}));
        assert!(node.update(v(serde_json::json!({"a": 1})), 100));
        assert_eq!(node.current_version(), NodeVersion::from_number(6));
        assert_eq!(node.history_len(), 0);
    }

    #[test]
    fn test_up_to_date_subscriber_gets_empty_deltas() {
        let node = node_at(7, serde_json::json!(1));
        match node.get_update_from(NodeVersion::from_number(7)) {
            UpdatePayload::Deltas(deltas) => assert!(deltas.as_array().unwrap().is_empty()),
            other => panic!("expected empty deltas, got {other:?}"),
        }
    }

    #[test]
    fn test_future_version_gets_full_data() {
        let node = node_at(7, serde_json::json!({"a": 1}));
        match node.get_update_from(NodeVersion::from_number(9)) {
            UpdatePayload::Full(data) => assert_eq!(data, v(serde_json::json!({"a": 1}))),
            other => panic!("expected full data, got {other:?}"),
        }
    }

    #[test]
    fn test_history_gap_gets_full_data() {
        let mut node = node_at(0, serde_json::json!({"a": 0}));
        // A tiny budget keeps the history empty.
        for i in 1..=3 {
            node.update(v(serde_json::json!({"a": i})), 0);
        }
        match node.get_update_from(NodeVersion::from_number(1)) {
            UpdatePayload::Full(data) => assert_eq!(data, v(serde_json::json!({"a": 3}))),
            other => panic!("expected full data, got {other:?}"),
        }
    }

    #[test]
    fn test_deltas_replay_to_current_value() {
        let pad = "a longer stretch of stable padding";
        let mut node = node_at(0, serde_json::json!({"a": 0, "pad": pad}));
        let mut snapshots = vec![node.data().clone()];
        for i in 1..=4 {
            node.update(v(serde_json::json!({"a": i, "pad": pad})), 100);
            snapshots.push(node.data().clone());
        }
        assert_eq!(node.history_len(), 4);

        let known = NodeVersion::from_number(1);
        let UpdatePayload::Deltas(deltas) = node.get_update_from(known) else {
            panic!("history should cover the gap");
        };

        let mut state = snapshots[1].clone();
        for patch in deltas.as_array().unwrap().iter() {
            state = apply(&state, patch).unwrap();
        }
        assert_eq!(&state, node.data());
    }

    #[test]
    fn test_history_size_is_bounded() {
        let mut node = node_at(0, serde_json::json!({"a": 0, "pad": "xxxxxxxxxxxxxxxx"}));
        for i in 1..200 {
            node.update(v(serde_json::json!({"a": i, "pad": "xxxxxxxxxxxxxxxx"})), 30);
        }
        let budget = node.data().serialized_size() * 30 / 100;
        assert!(
            node.updates_size <= budget,
            "history {} exceeds budget {budget}",
            node.updates_size
        );
        assert!(node.history_len() < 200);
    }

    #[test]
    fn test_oldest_version_tracks_history() {
        let mut node = node_at(10, serde_json::json!({"a": 0, "pad": "yyyyyyyyyyyyyyyy"}));
        node.update(v(serde_json::json!({"a": 1, "pad": "yyyyyyyyyyyyyyyy"})), 100);
        node.update(v(serde_json::json!({"a": 2, "pad": "yyyyyyyyyyyyyyyy"})), 100);
        assert_eq!(
            node.current_version().distance(node.oldest_version()),
            node.history_len() as i64
        );
    }

    #[test]
    fn test_version_wraps() {
        let mut node = Node::new(NodeVersion::from_number(u32::MAX), Value::from(1i64));
        node.update(Value::from(2i64), 0);
        assert_eq!(node.current_version(), NodeVersion::from_number(0));
    }
}
