//! Standalone Bayeux server with a permissive adapter.
//!
//! Every channel validates, every subscriber is authorized, and nodes
//! start out null; state enters the tree through `Root::update_node`
//! (embedding applications) or client publishes once an adapter with a
//! publish handler is installed. Useful for protocol testing and as a
//! template for embedding the library.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use comet_rs::bayeux::{bayeux_service, BayeuxConfig, Connector};
use comet_rs::json::Value;
use comet_rs::pubsub::{
    Adapter, AuthorizationReply, InitializationReply, NodeName, PubSubConfig, Root,
    SubscriberHandle, ValidationReply,
};

#[derive(Parser, Debug)]
#[command(name = "cometd", version, about = "Bayeux long-polling pub/sub server")]
struct Options {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Seconds an idle session survives before it is destroyed.
    #[arg(long, default_value_t = 30)]
    session_timeout: u64,

    /// Seconds a /meta/connect long poll is held open.
    #[arg(long, default_value_t = 20)]
    poll_timeout: u64,

    /// Maximum buffered events per client.
    #[arg(long, default_value_t = 100)]
    max_messages: usize,

    /// Maximum buffered event bytes per client.
    #[arg(long, default_value_t = 10_240)]
    max_message_bytes: usize,

    /// Node history budget as a percentage of the node's value size.
    #[arg(long, default_value_t = 30)]
    keep_update_size_percent: u32,
}

/// Adapter that accepts every subscription and seeds nodes with null.
struct AcceptAllAdapter;

impl Adapter for AcceptAllAdapter {
    fn validate(&self, _name: &NodeName, reply: ValidationReply) {
        reply.answer(true);
    }

    fn authorize(
        &self,
        _subscriber: &SubscriberHandle,
        _name: &NodeName,
        reply: AuthorizationReply,
    ) {
        reply.answer(true);
    }

    fn initialize(&self, _name: &NodeName, reply: InitializationReply) {
        reply.answer(Some(Value::Null));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let options = Options::parse();

    let root = Root::new(
        Arc::new(AcceptAllAdapter),
        PubSubConfig {
            authorization_required: false,
            keep_update_size_percent: options.keep_update_size_percent,
            ..PubSubConfig::default()
        },
    );
    let connector = Connector::new(
        root,
        BayeuxConfig {
            session_timeout: Duration::from_secs(options.session_timeout),
            long_polling_timeout: Duration::from_secs(options.poll_timeout),
            max_messages_per_client: options.max_messages,
            max_messages_size_per_client: options.max_message_bytes,
        },
    );

    let app = bayeux_service(connector.clone());
    let listener = tokio::net::TcpListener::bind(options.listen)
        .await
        .with_context(|| format!("binding {}", options.listen))?;
    tracing::info!(listen = %options.listen, "cometd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("serving")?;

    connector.shut_down();
    Ok(())
}
