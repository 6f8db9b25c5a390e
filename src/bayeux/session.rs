//! Per-client Bayeux session state.
//!
//! A [`Session`] buffers outgoing events for one client and cooperates
//! with at most one blocked HTTP response at a time. It is also the
//! [`Subscriber`] the pub/sub root talks to: subscription acknowledgements
//! and node updates both arrive here and leave through the event queue.
//!
//! # Queue discipline
//!
//! The queue is bounded by a message count and a summed byte size; when
//! either cap is exceeded the oldest events are dropped silently. Clients
//! observe the loss as a version gap and resubscribe. Order is FIFO.
//!
//! # The response slot
//!
//! `wait_for_events` either returns buffered events immediately (without
//! retaining the listener) or parks the listener. A second listener
//! displaces the first, which is told about the doubled connection. The
//! long-poll timeout and `close()` both release a parked listener with an
//! empty payload.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bayeux::channel::channel_from_node_name;
use crate::bayeux::config::BayeuxConfig;
use crate::json::Value;
use crate::pubsub::{
    Node, NodeName, PublishResult, Root, Subscriber, SubscriberHandle, SubscriptionError,
    UnsubscribeOutcome,
};

/// A response waiting for events on a session.
///
/// `on_messages` is called at most once per park: with queued events when
/// they arrive, or with an empty list on timeout, shutdown, or when the
/// parked response is displaced.
pub trait PollListener: Send + Sync {
    fn on_messages(&self, events: Vec<Value>);

    /// Another response attached to the same session while this one was
    /// parked.
    fn on_second_connection(&self);
}

struct SessionState {
    queue: VecDeque<Value>,
    queue_bytes: usize,
    waiting: Option<Arc<dyn PollListener>>,
    subscriptions: HashSet<NodeName>,
    /// Pending subscriptions, with the request id to echo in the ack.
    pending: HashMap<NodeName, Option<Value>>,
    closed: bool,
}

pub(crate) struct SessionInner {
    id: String,
    root: Root,
    config: Arc<BayeuxConfig>,
    state: Mutex<SessionState>,
}

/// Handle to one client's session. Clones share the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    #[must_use]
    pub fn new(id: impl Into<String>, root: Root, config: Arc<BayeuxConfig>) -> Self {
        Session {
            inner: Arc::new(SessionInner {
                id: id.into(),
                root,
                config,
                state: Mutex::new(SessionState {
                    queue: VecDeque::new(),
                    queue_bytes: 0,
                    waiting: None,
                    subscriptions: HashSet::new(),
                    pending: HashMap::new(),
                    closed: false,
                }),
            }),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.id
    }

    /// The identity under which this session subscribes at the root.
    #[must_use]
    pub fn subscriber_handle(&self) -> SubscriberHandle {
        SubscriberHandle::new(self.inner.clone())
    }

    /// Ask the root for a subscription; the ack is delivered through the
    /// event queue once the adapter has decided.
    pub fn subscribe(&self, name: NodeName, request_id: Option<Value>) {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.pending.insert(name.clone(), request_id);
        }
        self.inner.root.subscribe(self.subscriber_handle(), name);
    }

    /// Drop a subscription, live or still pending, and queue the ack.
    pub fn unsubscribe(&self, name: &NodeName, request_id: Option<Value>) {
        if self.inner.state.lock().closed {
            return;
        }
        let outcome = self.inner.root.unsubscribe(&self.subscriber_handle(), name);

        let flush = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            let mut events = Vec::new();
            match outcome {
                UnsubscribeOutcome::Unsubscribed => {
                    state.subscriptions.remove(name);
                    events.push(self.inner.unsubscribe_ack(name, true, None, request_id));
                }
                UnsubscribeOutcome::PendingCancelled => {
                    let subscribe_id = state.pending.remove(name).flatten();
                    events.push(self.inner.subscribe_ack(name, true, None, subscribe_id));
                    events.push(self.inner.unsubscribe_ack(name, true, None, request_id));
                }
                UnsubscribeOutcome::NotSubscribed => {
                    events.push(self.inner.unsubscribe_ack(
                        name,
                        false,
                        Some("not subscribed"),
                        request_id,
                    ));
                }
            }
            self.inner.enqueue_locked(&mut state, events)
        };
        deliver(flush);
    }

    /// Forward a publish to the application adapter.
    #[must_use]
    pub fn publish(&self, channel: &str, data: &Value, message: &Value) -> PublishResult {
        self.inner
            .root
            .publish(channel, data, message, &self.subscriber_handle())
    }

    /// Drain the buffered events without blocking.
    #[must_use]
    pub fn events(&self) -> Vec<Value> {
        let mut state = self.inner.state.lock();
        drain(&mut state)
    }

    /// Return buffered events, or park `listener` until some arrive.
    ///
    /// When events are returned directly the listener is not retained. A
    /// listener that was already parked is displaced and notified.
    #[must_use]
    pub fn wait_for_events(&self, listener: Arc<dyn PollListener>) -> Vec<Value> {
        let (events, displaced) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Vec::new();
            }
            if state.queue.is_empty() {
                (Vec::new(), state.waiting.replace(listener))
            } else {
                (drain(&mut state), None)
            }
        };
        if let Some(old) = displaced {
            tracing::debug!(session = %self.inner.id, "second connection detected");
            old.on_second_connection();
        }
        events
    }

    /// Release a parked response with no events.
    pub fn timeout(&self) {
        let waiting = self.inner.state.lock().waiting.take();
        if let Some(listener) = waiting {
            listener.on_messages(Vec::new());
        }
    }

    /// Like [`Session::timeout`], but only if `listener` is the one still
    /// parked. Used by transport timers, which may race a flush.
    pub fn timeout_listener(&self, listener: &Arc<dyn PollListener>) {
        let waiting = {
            let mut state = self.inner.state.lock();
            match &state.waiting {
                Some(current) if Arc::ptr_eq(current, listener) => state.waiting.take(),
                _ => None,
            }
        };
        if let Some(listener) = waiting {
            listener.on_messages(Vec::new());
        }
    }

    /// Tear the session down: all subscriptions are ended, the queue is
    /// cleared, and a parked response is released empty. Idempotent.
    pub fn close(&self) {
        let (waiting, names) = {
            let mut guard = self.inner.state.lock();
            if guard.closed {
                return;
            }
            let state = &mut *guard;
            state.closed = true;
            state.queue.clear();
            state.queue_bytes = 0;
            let names: Vec<NodeName> = state
                .subscriptions
                .drain()
                .chain(state.pending.drain().map(|(name, _)| name))
                .collect();
            (state.waiting.take(), names)
        };

        if let Some(listener) = waiting {
            listener.on_messages(Vec::new());
        }

        let handle = self.subscriber_handle();
        for name in names {
            let _ = self.inner.root.unsubscribe(&handle, &name);
        }
        tracing::debug!(session = %self.inner.id, "session closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl SessionInner {
    fn subscribe_ack(
        &self,
        name: &NodeName,
        successful: bool,
        error: Option<&str>,
        id: Option<Value>,
    ) -> Value {
        self.meta_ack("/meta/subscribe", name, successful, error, id)
    }

    fn unsubscribe_ack(
        &self,
        name: &NodeName,
        successful: bool,
        error: Option<&str>,
        id: Option<Value>,
    ) -> Value {
        self.meta_ack("/meta/unsubscribe", name, successful, error, id)
    }

    fn meta_ack(
        &self,
        channel: &str,
        name: &NodeName,
        successful: bool,
        error: Option<&str>,
        id: Option<Value>,
    ) -> Value {
        let mut fields: Vec<(String, Value)> = vec![
            ("channel".into(), Value::from(channel)),
            ("clientId".into(), Value::from(self.id.as_str())),
            ("subscription".into(), Value::from(channel_from_node_name(name))),
            ("successful".into(), Value::from(successful)),
        ];
        if let Some(error) = error {
            fields.push(("error".into(), Value::from(error)));
        }
        if let Some(id) = id {
            fields.push(("id".into(), id));
        }
        Value::object(fields)
    }

    /// Enqueue events, enforce the caps, and hand back a parked listener
    /// (with the drained queue) for notification outside the lock.
    fn enqueue_locked(
        &self,
        state: &mut SessionState,
        events: Vec<Value>,
    ) -> Option<(Arc<dyn PollListener>, Vec<Value>)> {
        if events.is_empty() {
            return None;
        }
        for event in events {
            state.queue_bytes += event.serialized_size();
            state.queue.push_back(event);
        }

        while state.queue.len() > self.config.max_messages_per_client
            || state.queue_bytes > self.config.max_messages_size_per_client
        {
            match state.queue.pop_front() {
                Some(dropped) => {
                    state.queue_bytes -= dropped.serialized_size();
                    tracing::debug!(session = %self.id, "event queue full, dropped oldest event");
                }
                None => break,
            }
        }

        if state.queue.is_empty() {
            return None;
        }
        let listener = state.waiting.take()?;
        Some((listener, drain(state)))
    }
}

impl Subscriber for SessionInner {
    fn on_update(&self, name: &NodeName, node: &Node) {
        let flush = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let mut events = Vec::new();
            match state.pending.remove(name) {
                Some(request_id) => {
                    // First delivery doubles as the subscription ack. The
                    // initial value is only forwarded when it is an object
                    // carrying actual payload fields.
                    state.subscriptions.insert(name.clone());
                    events.push(self.subscribe_ack(name, true, None, request_id));
                    if matches!(node.data(), Value::Object(_)) {
                        if let Some(event) = update_event(name, node.data()) {
                            events.push(event);
                        }
                    }
                }
                None => {
                    if let Some(event) = update_event(name, node.data()) {
                        events.push(event);
                    }
                }
            }
            self.enqueue_locked(&mut state, events)
        };
        deliver(flush);
    }

    fn on_subscription_failed(&self, name: &NodeName, error: SubscriptionError) {
        let flush = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            match state.pending.remove(name) {
                Some(request_id) => {
                    let ack =
                        self.subscribe_ack(name, false, Some(error.as_str()), request_id);
                    self.enqueue_locked(&mut state, vec![ack])
                }
                None => None,
            }
        };
        deliver(flush);
    }
}

fn drain(state: &mut SessionState) -> Vec<Value> {
    state.queue_bytes = 0;
    state.queue.drain(..).collect()
}

fn deliver(flush: Option<(Arc<dyn PollListener>, Vec<Value>)>) {
    if let Some((listener, events)) = flush {
        listener.on_messages(events);
    }
}

/// Shape a node value into the client-facing event for a channel.
///
/// Object values contribute their `"data"` member (and an `"id"` member,
/// verbatim, when present); other values ride under `data` unchanged.
/// Null and the empty array carry nothing worth sending.
fn update_event(name: &NodeName, data: &Value) -> Option<Value> {
    match data {
        Value::Null => None,
        Value::Array(items) if items.is_empty() => None,
        Value::Object(object) => {
            let mut fields: Vec<(String, Value)> = vec![(
                "channel".into(),
                Value::from(channel_from_node_name(name)),
            )];
            match object.get("data") {
                Some(payload) => {
                    fields.push(("data".into(), payload.clone()));
                    if let Some(id) = object.get("id") {
                        fields.push(("id".into(), id.clone()));
                    }
                }
                None => fields.push(("data".into(), data.clone())),
            }
            Some(Value::object(fields))
        }
        other => Some(Value::object(vec![
            ("channel".to_string(), Value::from(channel_from_node_name(name))),
            ("data".to_string(), other.clone()),
        ])),
    }
}
