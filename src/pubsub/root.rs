//! The pub/sub root: owner of every node and subscription.
//!
//! The root mediates between subscribers and the application [`Adapter`].
//! A subscription walks validate → authorize → initialize before the
//! subscriber is attached and handed the node's current state; each step
//! may be answered synchronously from inside the adapter call or deferred
//! and answered later from another thread.
//!
//! Locking: one mutex guards the node table and the pending-subscription
//! table. Adapter callbacks and subscriber notifications always run with
//! the lock released, so a synchronous reply re-entering the root cannot
//! deadlock, and a slow adapter cannot stall `update_node`.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::json::Value;
use crate::pubsub::adapter::{
    Adapter, AuthorizationReply, InitializationReply, PublishResult, SubscriberHandle,
    SubscriptionError, ValidationReply,
};
use crate::pubsub::config::PubSubConfig;
use crate::pubsub::name::NodeName;
use crate::pubsub::node::{Node, NodeVersion};

/// Result of [`Root::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// A live subscription was removed.
    Unsubscribed,
    /// The subscription was still in flight; it has been cancelled and its
    /// eventual adapter reply will be ignored.
    PendingCancelled,
    /// The subscriber held no subscription for the node.
    NotSubscribed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Validating,
    Authorizing,
    Initializing,
}

struct PendingSubscription {
    subscriber: SubscriberHandle,
    stage: Stage,
}

struct NodeEntry {
    node: Node,
    subscribers: Vec<SubscriberHandle>,
}

#[derive(Default)]
struct RootState {
    nodes: HashMap<NodeName, NodeEntry>,
    validated: HashSet<NodeName>,
    validating: HashSet<NodeName>,
    initializing: HashSet<NodeName>,
    pending: HashMap<NodeName, Vec<PendingSubscription>>,
}

/// Work queued up under the lock, executed after it is released.
enum Action {
    Validate(NodeName),
    Authorize(SubscriberHandle, NodeName),
    Initialize(NodeName),
    Deliver(SubscriberHandle, NodeName, Node),
    Fail(SubscriberHandle, NodeName, SubscriptionError),
}

pub(crate) struct RootShared {
    adapter: Arc<dyn Adapter>,
    config: Mutex<Arc<PubSubConfig>>,
    state: Mutex<RootState>,
}

/// Handle to the process-wide pub/sub registry.
///
/// Cloning is cheap and every clone sees the same nodes and
/// subscriptions.
#[derive(Clone)]
pub struct Root {
    shared: Arc<RootShared>,
}

impl Root {
    #[must_use]
    pub fn new(adapter: Arc<dyn Adapter>, config: PubSubConfig) -> Self {
        Root {
            shared: Arc::new(RootShared {
                adapter,
                config: Mutex::new(Arc::new(config)),
                state: Mutex::new(RootState::default()),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<RootShared>) -> Self {
        Root { shared }
    }

    /// The current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<PubSubConfig> {
        self.shared.config.lock().clone()
    }

    /// Atomically replace the configuration; in-flight operations keep the
    /// snapshot they started with.
    pub fn set_config(&self, config: PubSubConfig) {
        *self.shared.config.lock() = Arc::new(config);
    }

    /// Begin a subscription for `subscriber` on `name`.
    ///
    /// The outcome arrives through the subscriber's callbacks: the node's
    /// current state via `on_update` on success, or
    /// `on_subscription_failed` with the failing stage.
    pub fn subscribe(&self, subscriber: SubscriberHandle, name: NodeName) {
        let cfg = self.config();
        let mut actions = Vec::new();
        {
            let mut state = self.shared.state.lock();

            let entries = state.pending.entry(name.clone()).or_default();
            if entries.iter().any(|p| p.subscriber == subscriber) {
                tracing::debug!(node = %name, "subscription already in flight");
                return;
            }
            entries.push(PendingSubscription {
                subscriber: subscriber.clone(),
                stage: Stage::Validating,
            });

            if state.nodes.contains_key(&name) || state.validated.contains(&name) {
                advance_validated(&mut state, &cfg, &name, &subscriber, &mut actions);
            } else if state.validating.insert(name.clone()) {
                actions.push(Action::Validate(name.clone()));
            }
        }
        self.run(actions);
    }

    /// End a subscription, live or still in flight.
    pub fn unsubscribe(
        &self,
        subscriber: &SubscriberHandle,
        name: &NodeName,
    ) -> UnsubscribeOutcome {
        let cfg = self.config();
        let mut state = self.shared.state.lock();

        if let Some(entry) = state.nodes.get_mut(name) {
            if let Some(pos) = entry.subscribers.iter().position(|s| s == subscriber) {
                entry.subscribers.remove(pos);
                if entry.subscribers.is_empty() && !cfg.retain_unsubscribed_nodes {
                    state.nodes.remove(name);
                    tracing::debug!(node = %name, "reclaimed unsubscribed node");
                }
                return UnsubscribeOutcome::Unsubscribed;
            }
        }

        if remove_pending(&mut state.pending, name, subscriber) {
            return UnsubscribeOutcome::PendingCancelled;
        }

        UnsubscribeOutcome::NotSubscribed
    }

    /// Replace a node's value and fan the update out to its subscribers.
    ///
    /// Creates the node when it does not exist yet. An update equal to the
    /// current value is still a new version and is still announced.
    pub fn update_node(&self, name: &NodeName, data: Value) {
        let cfg = self.config();
        let mut actions = Vec::new();
        {
            let mut state = self.shared.state.lock();
            match state.nodes.get_mut(name) {
                Some(entry) => {
                    entry.node.update(data, cfg.keep_update_size_percent);
                    for subscriber in &entry.subscribers {
                        actions.push(Action::Deliver(
                            subscriber.clone(),
                            name.clone(),
                            entry.node.clone(),
                        ));
                    }
                }
                None => {
                    state.nodes.insert(
                        name.clone(),
                        NodeEntry {
                            node: Node::new(NodeVersion::generate(), data),
                            subscribers: Vec::new(),
                        },
                    );
                }
            }
        }
        self.run(actions);
    }

    /// Delegate a client publish to the adapter.
    pub fn publish(
        &self,
        channel: &str,
        data: &Value,
        message: &Value,
        subscriber: &SubscriberHandle,
    ) -> PublishResult {
        let adapter = Arc::clone(&self.shared.adapter);
        match catch_unwind(AssertUnwindSafe(|| {
            adapter.publish(channel, data, message, subscriber, self)
        })) {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(channel, "publish callback panicked");
                PublishResult::failed("internal error")
            }
        }
    }

    /// Current state of a node, if it exists.
    #[must_use]
    pub fn node_snapshot(&self, name: &NodeName) -> Option<Node> {
        self.shared.state.lock().nodes.get(name).map(|e| e.node.clone())
    }

    pub(crate) fn validation_answered(&self, name: &NodeName, valid: bool) {
        let cfg = self.config();
        let mut actions = Vec::new();
        {
            let mut state = self.shared.state.lock();
            state.validating.remove(name);

            if valid {
                state.validated.insert(name.clone());
                let waiting: Vec<SubscriberHandle> = state
                    .pending
                    .get(name)
                    .map(|list| {
                        list.iter()
                            .filter(|p| p.stage == Stage::Validating)
                            .map(|p| p.subscriber.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                for subscriber in waiting {
                    advance_validated(&mut state, &cfg, name, &subscriber, &mut actions);
                }
            } else {
                tracing::debug!(node = %name, "node name rejected by adapter");
                if let Some(list) = state.pending.get_mut(name) {
                    let mut kept = Vec::new();
                    for p in list.drain(..) {
                        if p.stage == Stage::Validating {
                            actions.push(Action::Fail(
                                p.subscriber,
                                name.clone(),
                                SubscriptionError::Invalid,
                            ));
                        } else {
                            kept.push(p);
                        }
                    }
                    *list = kept;
                }
                prune_pending(&mut state.pending, name);
            }
        }
        self.run(actions);
    }

    pub(crate) fn authorization_answered(
        &self,
        name: &NodeName,
        subscriber: &SubscriberHandle,
        granted: bool,
    ) {
        let mut actions = Vec::new();
        {
            let mut state = self.shared.state.lock();
            let waiting = state
                .pending
                .get(name)
                .map(|list| {
                    list.iter()
                        .any(|p| &p.subscriber == subscriber && p.stage == Stage::Authorizing)
                })
                .unwrap_or(false);
            if !waiting {
                // Cancelled by unsubscribe, or a duplicate answer.
                return;
            }

            if granted {
                ensure_node(&mut state, name, subscriber, &mut actions);
            } else {
                remove_pending(&mut state.pending, name, subscriber);
                actions.push(Action::Fail(
                    subscriber.clone(),
                    name.clone(),
                    SubscriptionError::NotAuthorized,
                ));
            }
        }
        self.run(actions);
    }

    pub(crate) fn initialization_answered(&self, name: &NodeName, initial: Option<Value>) {
        let mut actions = Vec::new();
        {
            let mut state = self.shared.state.lock();
            state.initializing.remove(name);

            let waiting: Vec<SubscriberHandle> = state
                .pending
                .get(name)
                .map(|list| {
                    list.iter()
                        .filter(|p| p.stage == Stage::Initializing)
                        .map(|p| p.subscriber.clone())
                        .collect()
                })
                .unwrap_or_default();
            if waiting.is_empty() {
                return;
            }

            let mut init_failed = false;
            if !state.nodes.contains_key(name) {
                match initial {
                    Some(value) => {
                        state.nodes.insert(
                            name.clone(),
                            NodeEntry {
                                node: Node::new(NodeVersion::generate(), value),
                                subscribers: Vec::new(),
                            },
                        );
                    }
                    None => {
                        tracing::debug!(node = %name, "initialization skipped by adapter");
                        init_failed = true;
                    }
                }
            }

            for subscriber in waiting {
                if init_failed {
                    remove_pending(&mut state.pending, name, &subscriber);
                    actions.push(Action::Fail(
                        subscriber,
                        name.clone(),
                        SubscriptionError::InitFailed,
                    ));
                } else {
                    ensure_node(&mut state, name, &subscriber, &mut actions);
                }
            }
        }
        self.run(actions);
    }

    fn run(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Validate(name) => {
                    let reply = ValidationReply {
                        root: Arc::downgrade(&self.shared),
                        name: name.clone(),
                    };
                    let call = catch_unwind(AssertUnwindSafe(|| {
                        self.shared.adapter.validate(&name, reply)
                    }));
                    if call.is_err() {
                        tracing::error!(node = %name, "validate callback panicked");
                        self.validation_answered(&name, false);
                    }
                }
                Action::Authorize(subscriber, name) => {
                    let reply = AuthorizationReply {
                        root: Arc::downgrade(&self.shared),
                        name: name.clone(),
                        subscriber: subscriber.clone(),
                    };
                    let call = catch_unwind(AssertUnwindSafe(|| {
                        self.shared.adapter.authorize(&subscriber, &name, reply)
                    }));
                    if call.is_err() {
                        tracing::error!(node = %name, "authorize callback panicked");
                        self.authorization_answered(&name, &subscriber, false);
                    }
                }
                Action::Initialize(name) => {
                    let reply = InitializationReply {
                        root: Arc::downgrade(&self.shared),
                        name: name.clone(),
                    };
                    let call = catch_unwind(AssertUnwindSafe(|| {
                        self.shared.adapter.initialize(&name, reply)
                    }));
                    if call.is_err() {
                        tracing::error!(node = %name, "initialize callback panicked");
                        self.initialization_answered(&name, None);
                    }
                }
                Action::Deliver(subscriber, name, node) => {
                    let call = catch_unwind(AssertUnwindSafe(|| {
                        subscriber.on_update(&name, &node)
                    }));
                    if call.is_err() {
                        tracing::error!(node = %name, "subscriber update handler panicked");
                    }
                }
                Action::Fail(subscriber, name, error) => {
                    let call = catch_unwind(AssertUnwindSafe(|| {
                        subscriber.on_subscription_failed(&name, error)
                    }));
                    if call.is_err() {
                        tracing::error!(node = %name, "subscriber failure handler panicked");
                    }
                }
            }
        }
    }
}

/// Move one pending subscription past the validation stage.
fn advance_validated(
    state: &mut RootState,
    cfg: &PubSubConfig,
    name: &NodeName,
    subscriber: &SubscriberHandle,
    actions: &mut Vec<Action>,
) {
    if cfg.authorization_required {
        set_stage(&mut state.pending, name, subscriber, Stage::Authorizing);
        actions.push(Action::Authorize(subscriber.clone(), name.clone()));
    } else {
        ensure_node(state, name, subscriber, actions);
    }
}

/// Attach the subscriber if the node exists, otherwise drive (or join) an
/// initialization request.
fn ensure_node(
    state: &mut RootState,
    name: &NodeName,
    subscriber: &SubscriberHandle,
    actions: &mut Vec<Action>,
) {
    let RootState { nodes, pending, initializing, .. } = state;

    if let Some(entry) = nodes.get_mut(name) {
        remove_pending(pending, name, subscriber);
        if !entry.subscribers.contains(subscriber) {
            entry.subscribers.push(subscriber.clone());
        }
        actions.push(Action::Deliver(
            subscriber.clone(),
            name.clone(),
            entry.node.clone(),
        ));
    } else {
        set_stage(pending, name, subscriber, Stage::Initializing);
        if initializing.insert(name.clone()) {
            actions.push(Action::Initialize(name.clone()));
        }
    }
}

fn set_stage(
    pending: &mut HashMap<NodeName, Vec<PendingSubscription>>,
    name: &NodeName,
    subscriber: &SubscriberHandle,
    stage: Stage,
) {
    if let Some(list) = pending.get_mut(name) {
        for p in list.iter_mut() {
            if &p.subscriber == subscriber {
                p.stage = stage;
            }
        }
    }
}

fn remove_pending(
    pending: &mut HashMap<NodeName, Vec<PendingSubscription>>,
    name: &NodeName,
    subscriber: &SubscriberHandle,
) -> bool {
    let mut removed = false;
    if let Some(list) = pending.get_mut(name) {
        if let Some(pos) = list.iter().position(|p| &p.subscriber == subscriber) {
            list.remove(pos);
            removed = true;
        }
    }
    prune_pending(pending, name);
    removed
}

fn prune_pending(pending: &mut HashMap<NodeName, Vec<PendingSubscription>>, name: &NodeName) {
    if pending.get(name).is_some_and(Vec::is_empty) {
        pending.remove(name);
    }
}
