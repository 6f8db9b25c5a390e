//! The session registry: opaque ids, use counts, idle timers.
//!
//! Sessions are created on handshake and found by id on every later
//! request. A session is "in use" while at least one response references
//! it; when the last reference is released an idle timer starts, and a
//! session that stays unreferenced for `session_timeout` is destroyed.
//!
//! Session ids come from a [`SessionIdGenerator`]. The default generator
//! is cryptographically strong: holding a session id must be the only way
//! to act on a session, so ids must not be guessable.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::distr::Alphanumeric;
use rand::Rng;

use crate::bayeux::config::BayeuxConfig;
use crate::bayeux::session::Session;
use crate::pubsub::Root;

const SESSION_ID_LENGTH: usize = 32;

/// Produces fresh session ids.
///
/// `connection_name` names the transport connection the handshake arrived
/// on; generators may fold it into the id or ignore it.
pub trait SessionIdGenerator: Send + Sync {
    fn generate(&self, connection_name: &str) -> String;
}

/// The default generator: 32 alphanumeric characters from a CSPRNG.
pub struct RandomIdGenerator;

impl SessionIdGenerator for RandomIdGenerator {
    fn generate(&self, _connection_name: &str) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LENGTH)
            .map(char::from)
            .collect()
    }
}

struct SessionEntry {
    session: Session,
    use_count: u32,
    /// Bumped whenever the idle timer is armed or cancelled, so a stale
    /// timer task cannot reap a session that was picked up again.
    timer_generation: u64,
    idle_timer: Option<tokio::task::JoinHandle<()>>,
}

struct ConnectorInner {
    root: Root,
    config: Mutex<Arc<BayeuxConfig>>,
    generator: Box<dyn SessionIdGenerator>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

/// Concurrent registry of Bayeux sessions.
///
/// All mutations go through one mutex; clones share the registry.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

impl Connector {
    #[must_use]
    pub fn new(root: Root, config: BayeuxConfig) -> Self {
        Connector::with_generator(root, config, Box::new(RandomIdGenerator))
    }

    #[must_use]
    pub fn with_generator(
        root: Root,
        config: BayeuxConfig,
        generator: Box<dyn SessionIdGenerator>,
    ) -> Self {
        Connector {
            inner: Arc::new(ConnectorInner {
                root,
                config: Mutex::new(Arc::new(config)),
                generator,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Root {
        &self.inner.root
    }

    #[must_use]
    pub fn config(&self) -> Arc<BayeuxConfig> {
        self.inner.config.lock().clone()
    }

    pub fn set_config(&self, config: BayeuxConfig) {
        *self.inner.config.lock() = Arc::new(config);
    }

    /// Create a session under a fresh id, with a use count of one.
    #[must_use]
    pub fn create_session(&self, connection_name: &str) -> Session {
        let config = self.config();
        let mut sessions = self.inner.sessions.lock();

        let mut id = self.inner.generator.generate(connection_name);
        while sessions.contains_key(&id) {
            id = self.inner.generator.generate(connection_name);
        }

        let session = Session::new(id.clone(), self.inner.root.clone(), config);
        tracing::debug!(session = %id, connection = connection_name, "session created");
        sessions.insert(
            id,
            SessionEntry {
                session: session.clone(),
                use_count: 1,
                timer_generation: 0,
                idle_timer: None,
            },
        );
        session
    }

    /// Look a session up, taking a use-count reference and cancelling any
    /// running idle timer.
    #[must_use]
    pub fn find_session(&self, id: &str) -> Option<Session> {
        let mut sessions = self.inner.sessions.lock();
        let entry = sessions.get_mut(id)?;
        entry.use_count += 1;
        entry.timer_generation += 1;
        if let Some(timer) = entry.idle_timer.take() {
            timer.abort();
        }
        Some(entry.session.clone())
    }

    /// Release one use-count reference; the last release arms the idle
    /// timer.
    ///
    /// Without a tokio runtime on the current thread the timer cannot be
    /// armed and the session stays until dropped explicitly.
    pub fn idle_session(&self, session: &Session) {
        let timeout = self.config().session_timeout;
        let mut sessions = self.inner.sessions.lock();
        let Some(entry) = sessions.get_mut(session.session_id()) else {
            return;
        };
        entry.use_count = entry.use_count.saturating_sub(1);
        if entry.use_count > 0 {
            return;
        }

        entry.timer_generation += 1;
        let generation = entry.timer_generation;
        let connector = self.clone();
        let id = session.session_id().to_string();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        entry.idle_timer = Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            connector.session_timeout_reached(&id, generation);
        }));
    }

    /// Remove a session immediately if nothing references it.
    pub fn drop_session(&self, id: &str) {
        let removed = {
            let mut sessions = self.inner.sessions.lock();
            match sessions.get(id) {
                Some(entry) if entry.use_count == 0 => sessions.remove(id),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            if let Some(timer) = entry.idle_timer {
                timer.abort();
            }
            entry.session.close();
        }
    }

    /// Close every session, cancel every timer, release every parked
    /// response.
    pub fn shut_down(&self) {
        let entries: Vec<SessionEntry> = {
            let mut sessions = self.inner.sessions.lock();
            sessions.drain().map(|(_, entry)| entry).collect()
        };
        tracing::info!(sessions = entries.len(), "connector shutting down");
        for entry in entries {
            if let Some(timer) = entry.idle_timer {
                timer.abort();
            }
            entry.session.close();
        }
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    fn session_timeout_reached(&self, id: &str, generation: u64) {
        let expired = {
            let mut sessions = self.inner.sessions.lock();
            match sessions.get(id) {
                Some(entry)
                    if entry.use_count == 0 && entry.timer_generation == generation =>
                {
                    sessions.remove(id).map(|entry| entry.session)
                }
                _ => None,
            }
        };
        if let Some(session) = expired {
            tracing::debug!(session = %id, "idle session timed out");
            session.close();
        }
    }
}
