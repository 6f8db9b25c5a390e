//! HTTP transport for the Bayeux dispatcher, built on axum.
//!
//! One route accepts every request:
//!
//! - `POST` with `application/json`: the body is a Bayeux message or an
//!   array of them;
//! - `POST` with `application/x-www-form-urlencoded`: one or more
//!   `message=<urlencoded JSON>` fields, each parsed independently and
//!   concatenated in order;
//! - `GET`: the same form encoding in the query string (the cometd
//!   jQuery client does this).
//!
//! Structurally broken input gets an HTTP 400. A batch whose last message
//! is `/meta/connect` long-polls: the response is held until events
//! arrive for the session or the poll timeout fires.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::bayeux::connector::Connector;
use crate::bayeux::dispatch::{dispatch_messages, ParkedConnect};
use crate::bayeux::session::PollListener;
use crate::error::{CometError, Result};
use crate::json::Value;

/// Router serving the Bayeux endpoint at `/`.
pub fn bayeux_service(connector: Connector) -> Router {
    Router::new()
        .route("/", get(bayeux_handler).post(bayeux_handler))
        .with_state(connector)
}

async fn bayeux_handler(
    State(connector): State<Connector>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let messages = if method == Method::GET {
        match query.as_deref() {
            Some(query) => parse_form_messages(query),
            None => Err(CometError::protocol("GET without query")),
        }
    } else {
        parse_body_messages(&headers, &body)
    };

    let messages = match messages {
        Ok(messages) => messages,
        Err(err) => {
            tracing::debug!(error = %err, "rejecting malformed request");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let connection_name = connection_name(&headers);
    let mut result = match dispatch_messages(&connector, &messages, &connection_name) {
        Ok(result) => result,
        Err(err) => {
            tracing::debug!(error = %err, "rejecting invalid batch");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let mut replies = std::mem::take(&mut result.replies);
    if let Some(parked) = result.parked.take() {
        let timeout = connector.config().long_polling_timeout;
        replies.extend(complete_poll(parked, timeout).await);
    }
    result.finish(&connector);

    let wire: Vec<serde_json::Value> = replies.iter().map(Value::to_serde).collect();
    Json(serde_json::Value::Array(wire)).into_response()
}

/// Hold a parked connect open until events arrive, the poll times out, or
/// the session goes away. Returns the events followed by the connect ack.
pub async fn complete_poll(parked: ParkedConnect, timeout: Duration) -> Vec<Value> {
    let (tx, mut rx) = oneshot::channel();
    let listener: Arc<dyn PollListener> =
        Arc::new(ChannelListener { tx: Mutex::new(Some(tx)) });

    let mut events = parked.session.wait_for_events(Arc::clone(&listener));
    if events.is_empty() && !parked.session.is_closed() {
        events = tokio::select! {
            flushed = &mut rx => flushed.unwrap_or_default(),
            () = tokio::time::sleep(timeout) => {
                parked.session.timeout_listener(&listener);
                rx.await.unwrap_or_default()
            }
        };
    }

    events.push(parked.connect_ack);
    events
}

/// Adapts the parked-response callback to a oneshot the handler awaits.
struct ChannelListener {
    tx: Mutex<Option<oneshot::Sender<Vec<Value>>>>,
}

impl PollListener for ChannelListener {
    fn on_messages(&self, events: Vec<Value>) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(events);
        }
    }

    fn on_second_connection(&self) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Vec::new());
        }
    }
}

fn parse_body_messages(headers: &HeaderMap, body: &[u8]) -> Result<Vec<serde_json::Value>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let text = std::str::from_utf8(body)
            .map_err(|_| CometError::protocol("form body is not UTF-8"))?;
        parse_form_messages(text)
    } else {
        parse_json_messages(body)
    }
}

/// Parse an `application/json` body into a flat message list.
pub fn parse_json_messages(body: &[u8]) -> Result<Vec<serde_json::Value>> {
    let parsed: serde_json::Value = serde_json::from_slice(body)?;
    Ok(flatten(parsed))
}

/// Parse `message=<urlencoded JSON>` fields into a flat message list.
pub fn parse_form_messages(encoded: &str) -> Result<Vec<serde_json::Value>> {
    let mut messages = Vec::new();
    for (key, value) in url::form_urlencoded::parse(encoded.as_bytes()) {
        if key == "message" {
            let parsed: serde_json::Value = serde_json::from_str(&value)?;
            messages.extend(flatten(parsed));
        }
    }
    if messages.is_empty() {
        return Err(CometError::protocol("no message parameter"));
    }
    Ok(messages)
}

/// A top-level array is a batch; anything else is a batch of one.
fn flatten(value: serde_json::Value) -> Vec<serde_json::Value> {
    match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    }
}

fn connection_name(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}
