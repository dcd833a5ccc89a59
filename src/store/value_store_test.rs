use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use serde_json::Value;

use super::value_store::Callback;
use super::value_store::Deliveries;
use super::value_store::ValueStore;
use super::SubscriptionMode;

/// Callback that records every payload it receives.
fn recording() -> (Arc<Mutex<Vec<Value>>>, Callback) {
    let log: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let callback: Callback = Arc::new(move |payload: &Value| {
        sink.lock().push(payload.clone());
    });
    (log, callback)
}

#[test]
fn get_returns_null_for_missing_key() {
    let store = ValueStore::new();

    assert_eq!(*store.get("missing"), Value::Null);
}

#[test]
fn set_and_get_round_trip() {
    let mut store = ValueStore::new();

    store.set("k", json!({ "a": 1 }));

    assert_eq!(*store.get("k"), json!({ "a": 1 }));
}

#[test]
fn notify_patch_reaches_only_patch_subscribers() {
    let mut store = ValueStore::new();
    let (patch_log, patch_cb) = recording();
    let (set_log, set_cb) = recording();
    store.add_callback("k", SubscriptionMode::Patch, 1, patch_cb);
    store.add_callback("k", SubscriptionMode::Set, 2, set_cb);

    let mut out = Deliveries::new();
    store.notify_patch("k", json!({ "delta": true }), &mut out);
    out.dispatch();

    assert_eq!(*patch_log.lock(), vec![json!({ "delta": true })]);
    assert!(set_log.lock().is_empty());
}

#[test]
fn callbacks_fire_in_subscription_order() {
    let mut store = ValueStore::new();
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    for marker in [1u32, 2, 3] {
        let order = order.clone();
        let callback: Callback = Arc::new(move |_: &Value| order.lock().push(marker));
        store.add_callback("k", SubscriptionMode::Set, marker as u64, callback);
    }

    let mut out = Deliveries::new();
    store.notify_set("k", Value::Null, &mut out);
    out.dispatch();

    assert_eq!(*order.lock(), vec![1, 2, 3]);
}

#[test]
fn remove_callback_prunes_valueless_entry() {
    let mut store = ValueStore::new();
    let (_, callback) = recording();
    store.add_callback("k", SubscriptionMode::Patch, 1, callback);
    assert!(store.has_entry("k"));

    store.remove_callback("k", SubscriptionMode::Patch, 1);

    assert!(!store.has_entry("k"));
}

#[test]
fn entry_with_value_survives_callback_removal() {
    let mut store = ValueStore::new();
    let (_, callback) = recording();
    store.set("k", json!(1));
    store.add_callback("k", SubscriptionMode::Set, 1, callback);

    store.remove_callback("k", SubscriptionMode::Set, 1);

    assert!(store.has_entry("k"));
    assert_eq!(*store.get("k"), json!(1));
}

#[test]
fn set_null_prunes_unsubscribed_entry() {
    let mut store = ValueStore::new();
    store.set("k", json!(1));

    store.set("k", Value::Null);

    assert!(!store.has_entry("k"));
}

#[test]
fn set_null_keeps_subscribed_entry() {
    let mut store = ValueStore::new();
    let (_, callback) = recording();
    store.set("k", json!(1));
    store.add_callback("k", SubscriptionMode::Patch, 1, callback);

    store.set("k", Value::Null);

    assert!(store.has_entry("k"));
    assert_eq!(*store.get("k"), Value::Null);
    assert_eq!(store.subscriber_count("k"), 1);
}

#[test]
fn panicking_callback_does_not_block_later_deliveries() {
    let mut store = ValueStore::new();
    let panicking: Callback = Arc::new(|_: &Value| panic!("boom"));
    let (log, recording_cb) = recording();
    store.add_callback("k", SubscriptionMode::Set, 1, panicking);
    store.add_callback("k", SubscriptionMode::Set, 2, recording_cb);

    let mut out = Deliveries::new();
    store.notify_set("k", json!("payload"), &mut out);
    out.dispatch();

    assert_eq!(*log.lock(), vec![json!("payload")]);
}

#[test]
fn iter_values_skips_valueless_entries() {
    let mut store = ValueStore::new();
    let (_, callback) = recording();
    store.set("with-value", json!({ "a": 1 }));
    store.add_callback("subscriber-only", SubscriptionMode::Patch, 1, callback);

    let keys: Vec<&str> = store.iter_values().map(|(key, _)| key).collect();

    assert_eq!(keys, vec!["with-value"]);
}
