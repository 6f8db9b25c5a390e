//! Pub/sub root scenarios: subscription staging, fan-out, retention and
//! adapter fault containment.

mod common;

use std::sync::Arc;

use common::{v, TestAdapter};
use comet_rs::bayeux::node_name_from_channel;
use comet_rs::json::Value;
use comet_rs::pubsub::{
    Adapter, Node, NodeName, NodeVersion, PubSubConfig, PublishResult, Root, Subscriber,
    SubscriberHandle, SubscriptionError, UnsubscribeOutcome, ValidationReply,
};
use parking_lot::Mutex;

#[derive(Default)]
struct RecordingSubscriber {
    updates: Mutex<Vec<(NodeName, Value, NodeVersion)>>,
    failures: Mutex<Vec<(NodeName, SubscriptionError)>>,
}

impl RecordingSubscriber {
    fn new() -> Arc<Self> {
        Arc::new(RecordingSubscriber::default())
    }

    fn handle(this: &Arc<Self>) -> SubscriberHandle {
        SubscriberHandle::new(this.clone())
    }

    fn update_data(&self) -> Vec<Value> {
        self.updates.lock().iter().map(|(_, data, _)| data.clone()).collect()
    }

    fn versions(&self) -> Vec<NodeVersion> {
        self.updates.lock().iter().map(|(_, _, version)| *version).collect()
    }

    fn failures(&self) -> Vec<(NodeName, SubscriptionError)> {
        self.failures.lock().clone()
    }
}

impl Subscriber for RecordingSubscriber {
    fn on_update(&self, name: &NodeName, node: &Node) {
        self.updates
            .lock()
            .push((name.clone(), node.data().clone(), node.current_version()));
    }

    fn on_subscription_failed(&self, name: &NodeName, error: SubscriptionError) {
        self.failures.lock().push((name.clone(), error));
    }
}

fn open_root() -> (Root, Arc<TestAdapter>) {
    let adapter = Arc::new(TestAdapter::new());
    let root = Root::new(adapter.clone(), PubSubConfig::authorization_not_required());
    (root, adapter)
}

fn grant(adapter: &TestAdapter, name: &NodeName, initial: Value) {
    adapter.answer_validation_request(name.clone(), true);
    adapter.answer_initialization_request(name.clone(), initial);
}

#[test]
fn test_successful_subscription_delivers_current_value() {
    let (root, adapter) = open_root();
    let name = node_name_from_channel("/a/b");
    grant(&adapter, &name, v(serde_json::json!({"data": 1})));

    let subscriber = RecordingSubscriber::new();
    root.subscribe(RecordingSubscriber::handle(&subscriber), name);

    assert_eq!(subscriber.update_data(), vec![v(serde_json::json!({"data": 1}))]);
    assert!(subscriber.failures().is_empty());
}

#[test]
fn test_authorization_is_enforced_when_required() {
    let adapter = Arc::new(TestAdapter::new());
    let root = Root::new(adapter.clone(), PubSubConfig::default());
    let name = node_name_from_channel("/secret");
    let subscriber = RecordingSubscriber::new();

    adapter.answer_validation_request(name.clone(), true);
    root.subscribe(RecordingSubscriber::handle(&subscriber), name.clone());

    // Still pending on the authorize stage.
    assert!(subscriber.failures().is_empty());
    assert!(subscriber.update_data().is_empty());

    adapter.answer_authorization_request(&RecordingSubscriber::handle(&subscriber), name.clone(), false);
    assert_eq!(
        subscriber.failures(),
        vec![(name, SubscriptionError::NotAuthorized)]
    );
}

#[test]
fn test_versions_increment_by_one_per_update() {
    let (root, adapter) = open_root();
    let name = node_name_from_channel("/ticker");
    grant(&adapter, &name, v(serde_json::json!(0)));

    let subscriber = RecordingSubscriber::new();
    root.subscribe(RecordingSubscriber::handle(&subscriber), name.clone());

    for n in 1..=5i64 {
        root.update_node(&name, v(serde_json::json!(n)));
    }

    let versions = subscriber.versions();
    assert_eq!(versions.len(), 6);
    for pair in versions.windows(2) {
        assert_eq!(pair[1].distance(pair[0]), 1);
    }
}

#[test]
fn test_identical_updates_fan_out_every_time() {
    let (root, adapter) = open_root();
    let name = node_name_from_channel("/a/b");
    grant(&adapter, &name, Value::Null);

    let subscriber = RecordingSubscriber::new();
    root.subscribe(RecordingSubscriber::handle(&subscriber), name.clone());

    for _ in 0..3 {
        root.update_node(&name, v(serde_json::json!({"data": 1})));
    }

    // One initial delivery plus three updates, none deduplicated.
    assert_eq!(subscriber.update_data().len(), 4);
}

#[test]
fn test_update_reaches_every_subscriber() {
    let (root, adapter) = open_root();
    let name = node_name_from_channel("/a/b");
    grant(&adapter, &name, Value::Null);

    let first = RecordingSubscriber::new();
    let second = RecordingSubscriber::new();
    root.subscribe(RecordingSubscriber::handle(&first), name.clone());
    root.subscribe(RecordingSubscriber::handle(&second), name.clone());

    root.update_node(&name, v(serde_json::json!({"data": 7})));

    for subscriber in [&first, &second] {
        assert_eq!(
            subscriber.update_data().last(),
            Some(&v(serde_json::json!({"data": 7})))
        );
    }
}

#[test]
fn test_unsubscribe_outcomes() {
    let (root, adapter) = open_root();
    let name = node_name_from_channel("/a/b");
    let subscriber = RecordingSubscriber::new();

    assert_eq!(
        root.unsubscribe(&RecordingSubscriber::handle(&subscriber), &name),
        UnsubscribeOutcome::NotSubscribed
    );

    grant(&adapter, &name, Value::Null);
    root.subscribe(RecordingSubscriber::handle(&subscriber), name.clone());
    assert_eq!(
        root.unsubscribe(&RecordingSubscriber::handle(&subscriber), &name),
        UnsubscribeOutcome::Unsubscribed
    );
    assert_eq!(
        root.unsubscribe(&RecordingSubscriber::handle(&subscriber), &name),
        UnsubscribeOutcome::NotSubscribed
    );
}

#[test]
fn test_cancelled_pending_subscription_is_suppressed() {
    let (root, adapter) = open_root();
    let name = node_name_from_channel("/slow");
    let subscriber = RecordingSubscriber::new();

    root.subscribe(RecordingSubscriber::handle(&subscriber), name.clone());
    assert_eq!(
        root.unsubscribe(&RecordingSubscriber::handle(&subscriber), &name),
        UnsubscribeOutcome::PendingCancelled
    );

    // The adapter answers after the cancellation; nothing may reach the
    // subscriber and no subscription may come alive.
    adapter.answer_validation_request(name.clone(), true);
    adapter.answer_initialization_request(name.clone(), v(serde_json::json!({"data": 1})));

    assert!(subscriber.update_data().is_empty());
    assert!(subscriber.failures().is_empty());

    root.update_node(&name, v(serde_json::json!({"data": 2})));
    assert!(subscriber.update_data().is_empty());
}

#[test]
fn test_unsubscribed_nodes_are_retained_by_default() {
    let (root, adapter) = open_root();
    let name = node_name_from_channel("/kept");
    grant(&adapter, &name, v(serde_json::json!(1)));

    let subscriber = RecordingSubscriber::new();
    root.subscribe(RecordingSubscriber::handle(&subscriber), name.clone());
    root.unsubscribe(&RecordingSubscriber::handle(&subscriber), &name);

    assert!(root.node_snapshot(&name).is_some());
}

#[test]
fn test_unsubscribed_nodes_can_be_reclaimed() {
    let adapter = Arc::new(TestAdapter::new());
    let root = Root::new(
        adapter.clone(),
        PubSubConfig {
            authorization_required: false,
            retain_unsubscribed_nodes: false,
            ..PubSubConfig::default()
        },
    );
    let name = node_name_from_channel("/transient");
    grant(&adapter, &name, v(serde_json::json!(1)));

    let subscriber = RecordingSubscriber::new();
    root.subscribe(RecordingSubscriber::handle(&subscriber), name.clone());
    root.unsubscribe(&RecordingSubscriber::handle(&subscriber), &name);

    assert!(root.node_snapshot(&name).is_none());
}

#[test]
fn test_update_node_creates_missing_nodes() {
    let (root, _adapter) = open_root();
    let name = node_name_from_channel("/fresh");
    assert!(root.node_snapshot(&name).is_none());

    root.update_node(&name, v(serde_json::json!({"data": 1})));

    let node = root.node_snapshot(&name).expect("node was created");
    assert_eq!(node.data(), &v(serde_json::json!({"data": 1})));
}

#[test]
fn test_panicking_validate_fails_the_subscription() {
    struct PanickyAdapter;
    impl Adapter for PanickyAdapter {
        fn validate(&self, _name: &NodeName, _reply: ValidationReply) {
            panic!("application bug");
        }
    }

    let root = Root::new(Arc::new(PanickyAdapter), PubSubConfig::authorization_not_required());
    let name = node_name_from_channel("/broken");
    let subscriber = RecordingSubscriber::new();

    root.subscribe(RecordingSubscriber::handle(&subscriber), name.clone());

    assert_eq!(
        subscriber.failures(),
        vec![(name.clone(), SubscriptionError::Invalid)]
    );

    // The root stays usable for other nodes.
    let other = node_name_from_channel("/fine");
    root.update_node(&other, v(serde_json::json!(1)));
    assert!(root.node_snapshot(&other).is_some());
}

#[test]
fn test_publish_result_is_returned_verbatim() {
    let (root, adapter) = open_root();
    let subscriber = RecordingSubscriber::new();

    let ok = root.publish(
        "/test/a",
        &v(serde_json::json!(1)),
        &v(serde_json::json!({"channel": "/test/a", "data": 1})),
        &RecordingSubscriber::handle(&subscriber),
    );
    assert_eq!(ok, PublishResult::ok());

    adapter.set_publish_result(PublishResult::failed("not allowed"));
    let failed = root.publish(
        "/test/a",
        &v(serde_json::json!(2)),
        &v(serde_json::json!({"channel": "/test/a", "data": 2})),
        &RecordingSubscriber::handle(&subscriber),
    );
    assert_eq!(failed, PublishResult::failed("not allowed"));
}

#[test]
fn test_panicking_publish_reports_internal_error() {
    struct PanickyPublish;
    impl Adapter for PanickyPublish {
        fn publish(
            &self,
            _channel: &str,
            _data: &Value,
            _message: &Value,
            _subscriber: &SubscriberHandle,
            _root: &Root,
        ) -> PublishResult {
            panic!("application bug");
        }
    }

    let root = Root::new(Arc::new(PanickyPublish), PubSubConfig::default());
    let subscriber = RecordingSubscriber::new();
    let result = root.publish(
        "/test/a",
        &Value::Null,
        &v(serde_json::json!({"channel": "/test/a"})),
        &RecordingSubscriber::handle(&subscriber),
    );
    assert_eq!(result, PublishResult::failed("internal error"));
}
