//! Bayeux transport configuration.

use std::time::Duration;

/// Per-deployment tunables of the Bayeux session layer.
#[derive(Clone, Debug)]
pub struct BayeuxConfig {
    /// How long an idle, unreferenced session survives before it is
    /// destroyed.
    pub session_timeout: Duration,

    /// How long a `/meta/connect` long poll is held open waiting for
    /// events before it is answered empty.
    pub long_polling_timeout: Duration,

    /// Maximum number of buffered events per session. When exceeded, the
    /// oldest events are dropped.
    pub max_messages_per_client: usize,

    /// Maximum summed serialized size of buffered events per session, in
    /// bytes. Oldest first here as well.
    pub max_messages_size_per_client: usize,
}

impl Default for BayeuxConfig {
    fn default() -> Self {
        BayeuxConfig {
            session_timeout: Duration::from_secs(30),
            long_polling_timeout: Duration::from_secs(20),
            max_messages_per_client: 100,
            max_messages_size_per_client: 10 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BayeuxConfig::default();
        assert_eq!(config.session_timeout, Duration::from_secs(30));
        assert_eq!(config.max_messages_per_client, 100);
        assert_eq!(config.max_messages_size_per_client, 10_240);
    }
}
