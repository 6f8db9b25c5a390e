//! comet-rs: a Bayeux (comet) publish/subscribe server core.
//!
//! The crate connects many remote clients to a shared, in-memory tree of
//! versioned JSON data objects ("nodes") and delivers updates over a
//! long-polling HTTP transport speaking the Bayeux protocol.
//!
//! Three subsystems make up the core:
//!
//! - [`pubsub`] — the process-wide [`Root`](pubsub::Root) of named nodes,
//!   each with a current value, a monotonic version, and a bounded
//!   history of deltas; validation, authorization and initialization are
//!   delegated to an application [`Adapter`](pubsub::Adapter).
//! - [`bayeux`] — per-client [`Session`](bayeux::Session)s with bounded
//!   event queues and at most one blocked response each, the
//!   [`Connector`](bayeux::Connector) session registry, and the message
//!   dispatcher with its axum transport.
//! - [`json`] — the immutable [`Value`](json::Value) model with
//!   structural ordering, cached serialized sizes, and the
//!   [`delta`](json::delta) patch operator.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use comet_rs::bayeux::{bayeux_service, BayeuxConfig, Connector};
//! use comet_rs::pubsub::{Adapter, PubSubConfig, Root};
//!
//! struct MyAdapter;
//! impl Adapter for MyAdapter {}
//!
//! # async fn run() -> anyhow::Result<()> {
//! let root = Root::new(Arc::new(MyAdapter), PubSubConfig::default());
//! let connector = Connector::new(root, BayeuxConfig::default());
//! let app = bayeux_service(connector);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod bayeux;
pub mod error;
pub mod json;
pub mod pubsub;

pub use bayeux::{BayeuxConfig, Connector, Session};
pub use error::{CometError, Result};
pub use json::Value;
pub use pubsub::{Adapter, NodeName, PubSubConfig, Root};
