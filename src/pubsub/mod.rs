//! The pub/sub core: versioned nodes, node identity, the application
//! adapter contract, and the root that ties them together.

pub mod adapter;
pub mod config;
pub mod name;
pub mod node;
pub mod root;

pub use adapter::{
    Adapter, AuthorizationReply, InitializationReply, PublishResult, Subscriber,
    SubscriberHandle, SubscriptionError, ValidationReply,
};
pub use config::PubSubConfig;
pub use name::{Key, NodeName};
pub use node::{Node, NodeVersion, UpdatePayload};
pub use root::{Root, UnsubscribeOutcome};
