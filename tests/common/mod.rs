//! Shared test fixtures: a scriptable adapter, a predictable session id
//! generator, and a recording poll listener.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use comet_rs::bayeux::{PollListener, SessionIdGenerator};
use comet_rs::json::Value;
use comet_rs::pubsub::{
    Adapter, AuthorizationReply, InitializationReply, NodeName, PublishResult, Root,
    SubscriberHandle, ValidationReply,
};

/// Adapter whose answers are scripted by the test.
///
/// An answer registered before the request arrives is served
/// synchronously from inside the adapter call; registering it afterwards
/// answers the stored reply handle, exercising the deferred path. The
/// same helper covers both orders.
#[derive(Default)]
pub struct TestAdapter {
    state: Mutex<AdapterState>,
}

#[derive(Default)]
struct AdapterState {
    validation_answers: HashMap<NodeName, bool>,
    validation_requests: Vec<(NodeName, ValidationReply)>,
    authorization_answers: HashMap<(SubscriberHandle, NodeName), bool>,
    authorization_requests: Vec<(SubscriberHandle, NodeName, AuthorizationReply)>,
    initialization_answers: HashMap<NodeName, Option<Value>>,
    initialization_requests: Vec<(NodeName, InitializationReply)>,
    publishes: Vec<Value>,
    publish_result: Option<PublishResult>,
}

impl TestAdapter {
    pub fn new() -> Self {
        TestAdapter::default()
    }

    pub fn answer_validation_request(&self, name: NodeName, valid: bool) {
        let pending: Vec<ValidationReply> = {
            let mut state = self.state.lock();
            state.validation_answers.insert(name.clone(), valid);
            let mut kept = Vec::new();
            let mut matching = Vec::new();
            for (n, reply) in state.validation_requests.drain(..) {
                if n == name {
                    matching.push(reply);
                } else {
                    kept.push((n, reply));
                }
            }
            state.validation_requests = kept;
            matching
        };
        for reply in pending {
            reply.answer(valid);
        }
    }

    pub fn answer_authorization_request(
        &self,
        subscriber: &SubscriberHandle,
        name: NodeName,
        granted: bool,
    ) {
        let pending: Vec<AuthorizationReply> = {
            let mut state = self.state.lock();
            state
                .authorization_answers
                .insert((subscriber.clone(), name.clone()), granted);
            let mut kept = Vec::new();
            let mut matching = Vec::new();
            for (sub, n, reply) in state.authorization_requests.drain(..) {
                if n == name && &sub == subscriber {
                    matching.push(reply);
                } else {
                    kept.push((sub, n, reply));
                }
            }
            state.authorization_requests = kept;
            matching
        };
        for reply in pending {
            reply.answer(granted);
        }
    }

    pub fn answer_initialization_request(&self, name: NodeName, initial: Value) {
        self.set_initialization(name, Some(initial));
    }

    pub fn skip_initialization_request(&self, name: NodeName) {
        self.set_initialization(name, None);
    }

    fn set_initialization(&self, name: NodeName, initial: Option<Value>) {
        let pending: Vec<InitializationReply> = {
            let mut state = self.state.lock();
            state.initialization_answers.insert(name.clone(), initial.clone());
            let mut kept = Vec::new();
            let mut matching = Vec::new();
            for (n, reply) in state.initialization_requests.drain(..) {
                if n == name {
                    matching.push(reply);
                } else {
                    kept.push((n, reply));
                }
            }
            state.initialization_requests = kept;
            matching
        };
        for reply in pending {
            reply.answer(initial.clone());
        }
    }

    pub fn set_publish_result(&self, result: PublishResult) {
        self.state.lock().publish_result = Some(result);
    }

    /// Everything published through the adapter, as
    /// `{channel, data, message}` records.
    pub fn publishes(&self) -> Vec<Value> {
        self.state.lock().publishes.clone()
    }
}

impl Adapter for TestAdapter {
    fn validate(&self, name: &NodeName, reply: ValidationReply) {
        let answer = self.state.lock().validation_answers.get(name).copied();
        match answer {
            Some(valid) => reply.answer(valid),
            None => self
                .state
                .lock()
                .validation_requests
                .push((name.clone(), reply)),
        }
    }

    fn authorize(
        &self,
        subscriber: &SubscriberHandle,
        name: &NodeName,
        reply: AuthorizationReply,
    ) {
        let answer = self
            .state
            .lock()
            .authorization_answers
            .get(&(subscriber.clone(), name.clone()))
            .copied();
        match answer {
            Some(granted) => reply.answer(granted),
            None => self.state.lock().authorization_requests.push((
                subscriber.clone(),
                name.clone(),
                reply,
            )),
        }
    }

    fn initialize(&self, name: &NodeName, reply: InitializationReply) {
        let answer = self.state.lock().initialization_answers.get(name).cloned();
        match answer {
            Some(initial) => reply.answer(initial),
            None => self
                .state
                .lock()
                .initialization_requests
                .push((name.clone(), reply)),
        }
    }

    fn publish(
        &self,
        channel: &str,
        data: &Value,
        message: &Value,
        _subscriber: &SubscriberHandle,
        _root: &Root,
    ) -> PublishResult {
        let mut state = self.state.lock();
        state.publishes.push(Value::object(vec![
            ("channel", Value::from(channel)),
            ("data", data.clone()),
            ("message", message.clone()),
        ]));
        state.publish_result.clone().unwrap_or_else(PublishResult::ok)
    }
}

/// Session ids like `192.168.210.1:9999/0`, `…/1`, in creation order.
#[derive(Default)]
pub struct SequentialIdGenerator {
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        SequentialIdGenerator::default()
    }
}

impl SessionIdGenerator for SequentialIdGenerator {
    fn generate(&self, connection_name: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{connection_name}/{n}")
    }
}

/// A poll listener that records everything it is told.
#[derive(Default)]
pub struct RecordingListener {
    messages: Mutex<Vec<Vec<Value>>>,
    second_connections: AtomicUsize,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingListener::default())
    }

    pub fn messages(&self) -> Vec<Vec<Value>> {
        self.messages.lock().clone()
    }

    pub fn last_message(&self) -> Option<Vec<Value>> {
        self.messages.lock().last().cloned()
    }

    pub fn second_connections(&self) -> usize {
        self.second_connections.load(Ordering::SeqCst)
    }
}

impl PollListener for RecordingListener {
    fn on_messages(&self, events: Vec<Value>) {
        self.messages.lock().push(events);
    }

    fn on_second_connection(&self) {
        self.second_connections.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shorthand for building model values from JSON literals.
pub fn v(j: serde_json::Value) -> Value {
    Value::from_serde(&j)
}

/// Assert that `actual` equals the array of JSON literals in `expected`.
pub fn assert_replies(actual: &[Value], expected: serde_json::Value) {
    let expected: Vec<Value> = expected
        .as_array()
        .expect("expected value must be an array")
        .iter()
        .map(Value::from_serde)
        .collect();
    assert_eq!(
        actual,
        expected.as_slice(),
        "\nactual:   {}\nexpected: {}",
        Value::array(actual.to_vec()),
        Value::array(expected.clone())
    );
}
