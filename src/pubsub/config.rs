//! Pub/sub root configuration.

/// Tunables of the pub/sub root.
///
/// Snapshots are shared behind `Arc` and replaced atomically; a caller
/// keeps its snapshot for the duration of one operation.
#[derive(Clone, Debug)]
pub struct PubSubConfig {
    /// Whether subscriptions pass through the adapter's authorize step.
    pub authorization_required: bool,

    /// Node history budget as a percentage of the current value's
    /// serialized size.
    pub keep_update_size_percent: u32,

    /// Keep nodes alive after their last subscriber leaves, so state
    /// published via `update_node` survives subscriber churn.
    pub retain_unsubscribed_nodes: bool,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        PubSubConfig {
            authorization_required: true,
            keep_update_size_percent: 30,
            retain_unsubscribed_nodes: true,
        }
    }
}

impl PubSubConfig {
    /// Configuration with the authorize step disabled.
    #[must_use]
    pub fn authorization_not_required() -> Self {
        PubSubConfig { authorization_required: false, ..PubSubConfig::default() }
    }
}
