//! Bijection between Bayeux channels and node names.
//!
//! A channel `/a/b/c` maps to a node name whose keys carry the path
//! segments under position domains: `{p1: "a", p2: "b", p3: "c"}`. The
//! reverse direction orders segments by the numeric domain suffix, so the
//! mapping stays bijective past nine segments (where plain string order
//! of `p10` vs `p2` would lie).

use crate::pubsub::{Key, NodeName};

/// Node name for a slash-delimited channel.
///
/// The empty channel maps to the empty name; empty path segments are
/// preserved as empty key values.
#[must_use]
pub fn node_name_from_channel(channel: &str) -> NodeName {
    let path = channel.strip_prefix('/').unwrap_or(channel);
    if path.is_empty() {
        return NodeName::new();
    }
    path.split('/')
        .enumerate()
        .map(|(i, segment)| Key::new(format!("p{}", i + 1), segment))
        .collect()
}

/// Channel string for a node name built by [`node_name_from_channel`].
#[must_use]
pub fn channel_from_node_name(name: &NodeName) -> String {
    let mut segments: Vec<(usize, &str)> = name
        .keys()
        .iter()
        .filter_map(|key| {
            key.domain()
                .strip_prefix('p')
                .and_then(|n| n.parse::<usize>().ok())
                .map(|position| (position, key.value()))
        })
        .collect();
    segments.sort_by_key(|(position, _)| *position);

    let mut channel = String::new();
    for (_, value) in segments {
        channel.push('/');
        channel.push_str(value);
    }
    channel
}

/// Whether a channel addresses the protocol itself.
#[must_use]
pub fn is_meta_channel(channel: &str) -> bool {
    channel.starts_with("/meta/")
}
