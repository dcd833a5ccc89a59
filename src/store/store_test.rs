use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use serde_json::Value;
use serial_test::serial;

use super::Store;

type Log = Arc<Mutex<Vec<Value>>>;

fn recording() -> (Log, impl Fn(&Value) + Send + Sync + 'static) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    (log, move |payload: &Value| sink.lock().push(payload.clone()))
}

#[test]
fn get_missing_key_returns_null() {
    let store = Store::new();

    assert_eq!(store.get("missing"), Value::Null);
}

#[test]
fn patch_then_set_duality() {
    let store = Store::new();
    store.set("user", json!({ "name": "John", "age": 30, "city": "NYC" }));

    store.patch("user", json!({ "age": 31 }));
    assert_eq!(
        store.get("user"),
        json!({ "name": "John", "age": 31, "city": "NYC" })
    );

    let (patches, callback) = recording();
    let _sub = store.on_patch("user", callback);

    store.set("user", json!({ "name": "Jane", "age": 25 }));
    assert_eq!(store.get("user"), json!({ "name": "Jane", "age": 25 }));

    // Initial full value, then the diff of the replacement: removed
    // properties arrive as explicit nulls.
    let log = patches.lock();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1], json!({ "name": "Jane", "age": 25, "city": null }));
}

#[test]
fn subscribers_get_initial_value_synchronously() {
    let store = Store::new();
    let (patches, patch_cb) = recording();
    let (sets, set_cb) = recording();

    let _p = store.on_patch("never-set", patch_cb);
    let _s = store.on_set("never-set", set_cb);

    assert_eq!(*patches.lock(), vec![Value::Null]);
    assert_eq!(*sets.lock(), vec![Value::Null]);

    let (index_log, index_cb) = recording();
    let _i = store.on_set("idx:kind=widget", index_cb);
    assert_eq!(*index_log.lock(), vec![json!({})]);
}

#[test]
fn patch_subscribers_receive_the_patch_as_given() {
    let store = Store::new();
    store.set("doc", json!({ "a": 1 }));
    let (patches, callback) = recording();
    let _sub = store.on_patch("doc", callback);

    store.patch("doc", json!({ "b": { "c": 2 } }));

    let log = patches.lock();
    assert_eq!(log[1], json!({ "b": { "c": 2 } }));
    drop(log);
    assert_eq!(store.get("doc"), json!({ "a": 1, "b": { "c": 2 } }));
}

#[test]
fn set_subscribers_receive_every_intermediate_state() {
    let store = Store::new();
    let (sets, callback) = recording();
    let _sub = store.on_set("counter", callback);

    store.set("counter", json!({ "n": 1 }));
    store.set("counter", json!({ "n": 2 }));

    // No coalescing: initial null plus both full states.
    assert_eq!(
        *sets.lock(),
        vec![Value::Null, json!({ "n": 1 }), json!({ "n": 2 })]
    );
}

#[test]
fn patch_null_deletes_and_notifies() {
    let store = Store::new();
    store.set("doc", json!({ "type": "a", "persist": false }));
    let (patches, patch_cb) = recording();
    let (sets, set_cb) = recording();
    let _p = store.on_patch("doc", patch_cb);
    let _s = store.on_set("doc", set_cb);

    store.patch("doc", Value::Null);

    assert_eq!(store.get("doc"), Value::Null);
    assert_eq!(patches.lock().last(), Some(&Value::Null));
    assert_eq!(sets.lock().last(), Some(&Value::Null));
}

#[test]
fn deletion_removes_key_from_active_indices() {
    let store = Store::new();
    store.patch("obj1", json!({ "type": "a" }));
    store.patch("obj2", json!({ "type": "a" }));

    let (bucket_log, bucket_cb) = recording();
    let _sub = store.on_set("idx:type=a", bucket_cb);
    assert_eq!(bucket_log.lock()[0], json!({ "obj1": {}, "obj2": {} }));

    store.patch("obj1", Value::Null);

    assert_eq!(bucket_log.lock().last(), Some(&json!({ "obj2": {} })));
}

#[test]
fn index_updates_incrementally_on_patch() {
    let store = Store::new();
    store.patch("obj1", json!({ "type": "typeA" }));
    store.patch("obj2", json!({ "type": "typeB" }));

    let (type_a_log, type_a_cb) = recording();
    let _a = store.on_set("idx:type=typeA", type_a_cb);
    assert_eq!(type_a_log.lock()[0], json!({ "obj1": {} }));

    store.patch("obj1", json!({ "type": "typeB" }));

    assert_eq!(type_a_log.lock().last(), Some(&json!({})));

    let (type_b_log, type_b_cb) = recording();
    let _b = store.on_set("idx:type=typeB", type_b_cb);
    assert_eq!(type_b_log.lock()[0], json!({ "obj1": {}, "obj2": {} }));
}

#[test]
fn all_values_patch_is_delta_only() {
    let store = Store::new();
    store.patch("obj1", json!({ "type": "typeA" }));
    store.patch("obj2", json!({ "type": "typeC" }));

    let (all_values_log, callback) = recording();
    let _sub = store.on_patch("idx:type=?", callback);
    assert_eq!(all_values_log.lock()[0], json!({ "typeA": {}, "typeC": {} }));

    store.patch("obj1", json!({ "type": "typeB" }));

    // The vacated value arrives as null; untouched "typeC" stays absent.
    assert_eq!(
        all_values_log.lock().last(),
        Some(&json!({ "typeA": null, "typeB": {} }))
    );
}

#[test]
fn patch_not_touching_indexed_property_skips_index_subscribers() {
    let store = Store::new();
    store.patch("obj1", json!({ "type": "a", "name": "x" }));
    let (bucket_log, callback) = recording();
    let _sub = store.on_set("idx:type=a", callback);
    assert_eq!(bucket_log.lock().len(), 1);

    store.patch("obj1", json!({ "name": "y" }));

    assert_eq!(bucket_log.lock().len(), 1);
}

#[test]
fn direct_key_notifications_precede_index_notifications() {
    let store = Store::new();
    store.patch("obj1", json!({ "type": "a" }));

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let direct_order = order.clone();
    let index_order = order.clone();
    let _direct = store.on_set("obj1", move |_| direct_order.lock().push("direct"));
    let _index = store.on_set("idx:type=a", move |_| index_order.lock().push("index"));
    order.lock().clear();

    store.patch("obj1", json!({ "type": "b" }));

    assert_eq!(*order.lock(), vec!["direct", "index"]);
}

#[test]
fn unsubscribe_stops_future_notifications() {
    let store = Store::new();
    let (log, callback) = recording();
    let subscription = store.on_set("k", callback);

    store.set("k", json!(1));
    subscription.unsubscribe();
    store.set("k", json!(2));

    assert_eq!(*log.lock(), vec![Value::Null, json!(1)]);
}

#[test]
fn dropping_the_token_unsubscribes() {
    let store = Store::new();
    let (log, callback) = recording();
    let subscription = store.on_set("k", callback);
    drop(subscription);

    store.set("k", json!(1));

    assert_eq!(*log.lock(), vec![Value::Null]);
}

#[test]
fn callback_may_subscribe_during_notification() {
    let store = Store::new();
    let inner_log: Log = Arc::new(Mutex::new(Vec::new()));
    let late_subscription = Arc::new(Mutex::new(None));

    let hook_store = store.clone();
    let hook_slot = late_subscription.clone();
    let hook_log = inner_log.clone();
    let _outer = store.on_set("k", move |payload: &Value| {
        if !payload.is_null() && hook_slot.lock().is_none() {
            let sink = hook_log.clone();
            let sub = hook_store.on_set("k", move |v: &Value| sink.lock().push(v.clone()));
            *hook_slot.lock() = Some(sub);
        }
    });

    store.set("k", json!(1));
    store.set("k", json!(2));

    // The late subscriber saw its initial value and the second mutation.
    assert_eq!(*inner_log.lock(), vec![json!(1), json!(2)]);
}

#[test]
fn legacy_on_forwards_to_on_patch() {
    let store = Store::new();
    store.set("doc", json!({ "a": 1 }));
    let (log, callback) = recording();
    #[allow(deprecated)]
    let _sub = store.on("doc", callback);

    store.patch("doc", json!({ "b": 2 }));

    let log = log.lock();
    assert_eq!(log[0], json!({ "a": 1 }));
    assert_eq!(log[1], json!({ "b": 2 }));
}

#[test]
fn scalar_values_round_trip() {
    let store = Store::new();

    store.set("answer", json!(42));
    assert_eq!(store.get("answer"), json!(42));

    store.patch("answer", json!("text"));
    assert_eq!(store.get("answer"), json!("text"));
}

#[test]
#[serial]
fn global_instance_is_process_wide() {
    let first = Store::global();
    first.set("global-test-key", json!({ "shared": true }));

    assert_eq!(
        Store::global().get("global-test-key"),
        json!({ "shared": true })
    );

    first.set("global-test-key", Value::Null);
}
