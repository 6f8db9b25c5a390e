//! The application adapter: validation, authorization, initialization and
//! publish handling supplied by user code.
//!
//! Validate/authorize/initialize requests carry a reply handle. The
//! adapter may answer from inside the call or keep the handle and answer
//! later from any thread; the root accepts both. A handle answers at most
//! once (it is consumed), and answering after the root has shut down is a
//! no-op.

use std::sync::Weak;

use crate::json::Value;
use crate::pubsub::name::NodeName;
use crate::pubsub::node::Node;
use crate::pubsub::root::{Root, RootShared};

/// Why a subscription was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The adapter rejected the node name.
    Invalid,
    /// The adapter rejected this subscriber for the node.
    NotAuthorized,
    /// The adapter declined to provide an initial value.
    InitFailed,
}

impl SubscriptionError {
    /// The wire string reported to clients.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionError::Invalid => "invalid subscription",
            SubscriptionError::NotAuthorized => "authorization failed",
            SubscriptionError::InitFailed => "initialization failed",
        }
    }
}

/// Outcome of a publish callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishResult {
    pub successful: bool,
    pub error: Option<String>,
}

impl PublishResult {
    #[must_use]
    pub fn ok() -> Self {
        PublishResult { successful: true, error: None }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        PublishResult { successful: false, error: Some(error.into()) }
    }
}

/// Receives node events from the root.
///
/// A successful subscription is announced by the first [`on_update`]
/// carrying the node's current state; failures arrive through
/// [`on_subscription_failed`].
///
/// [`on_update`]: Subscriber::on_update
/// [`on_subscription_failed`]: Subscriber::on_subscription_failed
pub trait Subscriber: Send + Sync {
    fn on_update(&self, name: &NodeName, node: &Node);

    fn on_subscription_failed(&self, name: &NodeName, error: SubscriptionError);
}

/// Identity-keyed handle to a subscriber.
///
/// The root stores subscribers by identity, not by value: two handles are
/// equal exactly when they point at the same subscriber.
#[derive(Clone)]
pub struct SubscriberHandle(std::sync::Arc<dyn Subscriber>);

impl SubscriberHandle {
    #[must_use]
    pub fn new(subscriber: std::sync::Arc<dyn Subscriber>) -> Self {
        SubscriberHandle(subscriber)
    }

    pub(crate) fn key(&self) -> usize {
        std::sync::Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn on_update(&self, name: &NodeName, node: &Node) {
        self.0.on_update(name, node);
    }

    pub fn on_subscription_failed(&self, name: &NodeName, error: SubscriptionError) {
        self.0.on_subscription_failed(name, error);
    }
}

impl PartialEq for SubscriberHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for SubscriberHandle {}

impl std::hash::Hash for SubscriberHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SubscriberHandle({:#x})", self.key())
    }
}

/// One-shot reply to a validation request.
pub struct ValidationReply {
    pub(crate) root: Weak<RootShared>,
    pub(crate) name: NodeName,
}

impl ValidationReply {
    /// Report whether the node name is valid.
    pub fn answer(self, valid: bool) {
        if let Some(shared) = self.root.upgrade() {
            Root::from_shared(shared).validation_answered(&self.name, valid);
        }
    }

    #[must_use]
    pub fn name(&self) -> &NodeName {
        &self.name
    }
}

/// One-shot reply to an authorization request.
pub struct AuthorizationReply {
    pub(crate) root: Weak<RootShared>,
    pub(crate) name: NodeName,
    pub(crate) subscriber: SubscriberHandle,
}

impl AuthorizationReply {
    /// Report whether the subscriber may attach to the node.
    pub fn answer(self, authorized: bool) {
        if let Some(shared) = self.root.upgrade() {
            Root::from_shared(shared).authorization_answered(
                &self.name,
                &self.subscriber,
                authorized,
            );
        }
    }

    #[must_use]
    pub fn name(&self) -> &NodeName {
        &self.name
    }
}

/// One-shot reply to an initialization request.
pub struct InitializationReply {
    pub(crate) root: Weak<RootShared>,
    pub(crate) name: NodeName,
}

impl InitializationReply {
    /// Provide the node's initial value, or `None` to skip creation.
    pub fn answer(self, initial: Option<Value>) {
        if let Some(shared) = self.root.upgrade() {
            Root::from_shared(shared).initialization_answered(&self.name, initial);
        }
    }

    #[must_use]
    pub fn name(&self) -> &NodeName {
        &self.name
    }
}

/// User-supplied callbacks driving node lifecycle and publishes.
///
/// The defaults reject everything, which makes a partially implemented
/// adapter fail closed.
pub trait Adapter: Send + Sync {
    /// Is this node name meaningful to the application?
    fn validate(&self, _name: &NodeName, reply: ValidationReply) {
        reply.answer(false);
    }

    /// May this subscriber attach to the node?
    fn authorize(
        &self,
        _subscriber: &SubscriberHandle,
        _name: &NodeName,
        reply: AuthorizationReply,
    ) {
        reply.answer(false);
    }

    /// Produce the node's first value; answering `None` skips creation.
    fn initialize(&self, _name: &NodeName, reply: InitializationReply) {
        reply.answer(None);
    }

    /// Handle a client publish to a non-meta channel.
    fn publish(
        &self,
        _channel: &str,
        _data: &Value,
        _message: &Value,
        _subscriber: &SubscriberHandle,
        _root: &Root,
    ) -> PublishResult {
        PublishResult::failed("no callback installed.")
    }
}
