//! Bayeux message dispatch.
//!
//! One HTTP request carries a batch of Bayeux messages; this module turns
//! the batch into replies. Two kinds of reply exist:
//!
//! - **direct** replies, assembled here and returned with the same
//!   response: handshake acks, `"invalid clientId"` failures, connection
//!   type failures, disconnect acks, publish acks;
//! - **queued** replies, which ride the session's event queue: subscribe
//!   and unsubscribe acks and node updates. `/meta/connect` flushes the
//!   queue, with the connect ack appended after the events; a batch that
//!   produced no direct replies at all answers with the queue contents,
//!   so a lone subscribe still carries its ack home.
//!
//! A connect long-polls (the response blocks until events arrive or the
//! poll times out) only when it is the batch's last message, the batch
//! contains no disconnect, nothing else produced a direct reply, and the
//! flush found the queue empty. Everything else answers immediately.
//!
//! Structurally broken input (a non-object message, a missing channel, a
//! subscribe without subscription) fails the whole request; the transport
//! answers with HTTP 400.

use std::collections::HashMap;

use crate::bayeux::channel::{is_meta_channel, node_name_from_channel};
use crate::bayeux::connector::Connector;
use crate::bayeux::session::Session;
use crate::error::{CometError, Result};
use crate::json::Value;

const HANDSHAKE: &str = "/meta/handshake";
const CONNECT: &str = "/meta/connect";
const SUBSCRIBE: &str = "/meta/subscribe";
const UNSUBSCRIBE: &str = "/meta/unsubscribe";
const DISCONNECT: &str = "/meta/disconnect";

const PROTOCOL_VERSION: &str = "1.0";
const LONG_POLLING: &str = "long-polling";

/// A connect that should block until events arrive or the poll times out.
pub struct ParkedConnect {
    pub session: Session,
    /// The ack to append after whatever events release the poll.
    pub connect_ack: Value,
}

/// Outcome of dispatching one request's batch.
///
/// The result holds use-count references on every session the batch
/// touched; call [`DispatchResult::finish`] once the response is written.
pub struct DispatchResult {
    pub replies: Vec<Value>,
    pub parked: Option<ParkedConnect>,
    acquired: Vec<Session>,
    dropped: Vec<String>,
}

impl DispatchResult {
    /// Release the session references taken by the dispatch, and discard
    /// sessions that disconnected during it.
    pub fn finish(self, connector: &Connector) {
        for session in &self.acquired {
            connector.idle_session(session);
        }
        for id in &self.dropped {
            connector.drop_session(id);
        }
    }
}

/// Sessions resolved so far in this batch; each is found (and its use
/// count taken) at most once per request. `order` keeps acquisition
/// order for the end-of-batch queue drain.
struct SessionSet<'a> {
    connector: &'a Connector,
    sessions: HashMap<String, Session>,
    order: Vec<Session>,
}

impl SessionSet<'_> {
    fn resolve(&mut self, id: &str) -> Option<Session> {
        if let Some(session) = self.sessions.get(id) {
            return Some(session.clone());
        }
        let session = self.connector.find_session(id)?;
        self.sessions.insert(id.to_string(), session.clone());
        self.order.push(session.clone());
        Some(session)
    }

    fn insert_created(&mut self, session: Session) {
        self.sessions
            .insert(session.session_id().to_string(), session.clone());
        self.order.push(session);
    }
}

/// Dispatch a flattened batch of Bayeux messages.
///
/// On a protocol error the session references taken so far are released
/// before the error propagates.
pub fn dispatch_messages(
    connector: &Connector,
    messages: &[serde_json::Value],
    connection_name: &str,
) -> Result<DispatchResult> {
    let mut set = SessionSet { connector, sessions: HashMap::new(), order: Vec::new() };
    let mut dropped: Vec<String> = Vec::new();

    match dispatch_batch(connector, messages, connection_name, &mut set, &mut dropped) {
        Ok((replies, parked)) => Ok(DispatchResult {
            replies,
            parked,
            acquired: set.order,
            dropped,
        }),
        Err(err) => {
            for session in &set.order {
                connector.idle_session(session);
            }
            for id in &dropped {
                connector.drop_session(id);
            }
            Err(err)
        }
    }
}

fn dispatch_batch(
    connector: &Connector,
    messages: &[serde_json::Value],
    connection_name: &str,
    set: &mut SessionSet<'_>,
    dropped: &mut Vec<String>,
) -> Result<(Vec<Value>, Option<ParkedConnect>)> {
    if messages.is_empty() {
        return Err(CometError::protocol("empty message batch"));
    }

    let has_disconnect = messages.iter().any(|message| {
        message.get("channel").and_then(serde_json::Value::as_str) == Some(DISCONNECT)
    });
    let last_index = messages.len() - 1;

    let mut replies: Vec<Value> = Vec::new();
    let mut parked: Option<ParkedConnect> = None;

    for (index, raw) in messages.iter().enumerate() {
        let message = raw
            .as_object()
            .ok_or_else(|| CometError::protocol("message is not an object"))?;
        let channel = message
            .get("channel")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CometError::protocol("message without channel"))?;
        let request_id: Option<Value> = message.get("id").map(Value::from_serde);
        let client_id = message.get("clientId").and_then(serde_json::Value::as_str);

        match channel {
            HANDSHAKE => {
                if message.get("version").is_none() {
                    return Err(CometError::protocol("handshake without version"));
                }
                let types = message
                    .get("supportedConnectionTypes")
                    .and_then(serde_json::Value::as_array)
                    .ok_or_else(|| {
                        CometError::protocol("handshake without supportedConnectionTypes")
                    })?;
                let long_polling = types
                    .iter()
                    .any(|t| t.as_str() == Some(LONG_POLLING));

                if long_polling {
                    let session = connector.create_session(connection_name);
                    replies.push(handshake_reply(
                        Some(session.session_id()),
                        true,
                        None,
                        request_id,
                    ));
                    set.insert_created(session);
                } else {
                    tracing::debug!("handshake without long-polling support");
                    replies.push(handshake_reply(
                        None,
                        false,
                        Some("unsupported connection type"),
                        request_id,
                    ));
                }
            }

            CONNECT => match client_id.and_then(|id| set.resolve(id)) {
                None => replies.push(connect_retry_reply(client_id, request_id)),
                Some(session) => {
                    let connection_type = message
                        .get("connectionType")
                        .and_then(serde_json::Value::as_str);
                    if connection_type != Some(LONG_POLLING) {
                        replies.push(meta_failure(
                            CONNECT,
                            client_id,
                            "unsupported connection type",
                            request_id,
                        ));
                        continue;
                    }

                    let ack = connect_ack(session.session_id(), request_id);
                    let events = session.events();
                    if !events.is_empty() {
                        replies.extend(events);
                        replies.push(ack);
                    } else if index == last_index && !has_disconnect && replies.is_empty() {
                        parked = Some(ParkedConnect { session, connect_ack: ack });
                    } else {
                        replies.push(ack);
                    }
                }
            },

            SUBSCRIBE => match client_id.and_then(|id| set.resolve(id)) {
                None => replies.push(meta_failure(
                    SUBSCRIBE,
                    client_id,
                    "invalid clientId",
                    request_id,
                )),
                Some(session) => {
                    let subscription = message
                        .get("subscription")
                        .and_then(serde_json::Value::as_str)
                        .ok_or_else(|| {
                            CometError::protocol("subscribe without subscription")
                        })?;
                    session.subscribe(node_name_from_channel(subscription), request_id);
                }
            },

            UNSUBSCRIBE => match client_id.and_then(|id| set.resolve(id)) {
                None => replies.push(meta_failure(
                    UNSUBSCRIBE,
                    client_id,
                    "invalid clientId",
                    request_id,
                )),
                Some(session) => {
                    let subscription = message
                        .get("subscription")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("");
                    session.unsubscribe(&node_name_from_channel(subscription), request_id);
                }
            },

            DISCONNECT => match client_id.and_then(|id| set.resolve(id)) {
                None => replies.push(meta_failure(
                    DISCONNECT,
                    client_id,
                    "invalid clientId",
                    request_id,
                )),
                Some(session) => {
                    replies.push(disconnect_ack(session.session_id(), request_id));
                    session.close();
                    dropped.push(session.session_id().to_string());
                }
            },

            meta if is_meta_channel(meta) => {
                replies.push(meta_failure(meta, client_id, "unknown channel", request_id));
            }

            publish_channel => {
                if !publish_channel.starts_with('/') {
                    return Err(CometError::protocol("channel without leading slash"));
                }
                match client_id.and_then(|id| set.resolve(id)) {
                    None => replies.push(meta_failure(
                        publish_channel,
                        client_id,
                        "invalid clientId",
                        request_id,
                    )),
                    Some(session) => {
                        let data = message
                            .get("data")
                            .map(Value::from_serde)
                            .unwrap_or(Value::Null);
                        let envelope = Value::from_serde(raw);
                        let result = session.publish(publish_channel, &data, &envelope);

                        let mut fields: Vec<(String, Value)> = vec![
                            ("channel".into(), Value::from(publish_channel)),
                            ("successful".into(), Value::from(result.successful)),
                        ];
                        if let Some(error) = result.error {
                            fields.push(("error".into(), Value::from(error)));
                        }
                        if let Some(id) = request_id {
                            fields.push(("id".into(), id));
                        }
                        replies.push(Value::object(fields));
                    }
                }
            }
        }
    }

    // A response that produced no direct replies still answers with
    // whatever the touched sessions have queued (a lone subscribe or
    // unsubscribe reports its ack this way).
    if replies.is_empty() && parked.is_none() {
        for session in &set.order {
            replies.extend(session.events());
        }
    }

    Ok((replies, parked))
}

fn handshake_reply(
    client_id: Option<&str>,
    successful: bool,
    error: Option<&str>,
    request_id: Option<Value>,
) -> Value {
    let mut fields: Vec<(String, Value)> = vec![
        ("channel".into(), Value::from(HANDSHAKE)),
        ("version".into(), Value::from(PROTOCOL_VERSION)),
        (
            "supportedConnectionTypes".into(),
            Value::array(vec![Value::from(LONG_POLLING)]),
        ),
        ("successful".into(), Value::from(successful)),
    ];
    if let Some(client_id) = client_id {
        fields.push(("clientId".into(), Value::from(client_id)));
    }
    if let Some(error) = error {
        fields.push(("error".into(), Value::from(error)));
    }
    if let Some(id) = request_id {
        fields.push(("id".into(), id));
    }
    Value::object(fields)
}

/// Failed connect for an unknown client: the advice tells the client to
/// start over with a handshake.
fn connect_retry_reply(client_id: Option<&str>, request_id: Option<Value>) -> Value {
    let mut fields: Vec<(String, Value)> = vec![
        ("channel".into(), Value::from(CONNECT)),
        ("successful".into(), Value::from(false)),
        (
            "advice".into(),
            Value::object(vec![("reconnect", Value::from("handshake"))]),
        ),
    ];
    if let Some(client_id) = client_id {
        fields.push(("clientId".into(), Value::from(client_id)));
    }
    if let Some(id) = request_id {
        fields.push(("id".into(), id));
    }
    Value::object(fields)
}

fn connect_ack(client_id: &str, request_id: Option<Value>) -> Value {
    let mut fields: Vec<(String, Value)> = vec![
        ("channel".into(), Value::from(CONNECT)),
        ("clientId".into(), Value::from(client_id)),
        ("successful".into(), Value::from(true)),
    ];
    if let Some(id) = request_id {
        fields.push(("id".into(), id));
    }
    Value::object(fields)
}

fn disconnect_ack(client_id: &str, request_id: Option<Value>) -> Value {
    let mut fields: Vec<(String, Value)> = vec![
        ("channel".into(), Value::from(DISCONNECT)),
        ("clientId".into(), Value::from(client_id)),
        ("successful".into(), Value::from(true)),
    ];
    if let Some(id) = request_id {
        fields.push(("id".into(), id));
    }
    Value::object(fields)
}

fn meta_failure(
    channel: &str,
    client_id: Option<&str>,
    error: &str,
    request_id: Option<Value>,
) -> Value {
    let mut fields: Vec<(String, Value)> = vec![
        ("channel".into(), Value::from(channel)),
        ("successful".into(), Value::from(false)),
        ("error".into(), Value::from(error)),
    ];
    if let Some(client_id) = client_id {
        fields.push(("clientId".into(), Value::from(client_id)));
    }
    if let Some(id) = request_id {
        fields.push(("id".into(), id));
    }
    Value::object(fields)
}
