//! Authoritative key→value map with per-key subscriber lists.
//!
//! Holds one entry per key: the current value plus the patch-mode and
//! set-mode subscriber lists. Entries are created on first mutation or first
//! subscription and pruned once both subscriber lists are empty and the value
//! is `Null`, so a churn of short-lived keys cannot grow the map unboundedly.
//!
//! Notification never invokes callbacks directly: `notify_patch`/`notify_set`
//! push (callback, payload) pairs onto a [`Deliveries`] batch that the caller
//! dispatches after releasing the store lock. The batch snapshots the
//! subscriber list at notify time, so a callback that subscribes or
//! unsubscribes during dispatch cannot corrupt iteration or miss a delivery.

use std::collections::HashMap;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde_json::Value;
use tracing::error;

/// Subscriber callback. Invoked with the patch payload (patch mode) or the
/// full new value (set mode).
pub(crate) type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle identifying one registered callback.
pub type SubscriberId = u64;

/// Which delivery semantics a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionMode {
    /// Deltas: the applied patch, or a computed diff for full replacements
    Patch,
    /// Full values: the complete value after every mutation
    Set,
}

struct Subscriber {
    id: SubscriberId,
    callback: Callback,
}

#[derive(Default)]
struct StoredEntry {
    value: Value,
    patch_subscribers: Vec<Subscriber>,
    set_subscribers: Vec<Subscriber>,
}

impl StoredEntry {
    fn is_prunable(&self) -> bool {
        self.value.is_null() && self.patch_subscribers.is_empty() && self.set_subscribers.is_empty()
    }
}

/// Ordered batch of pending callback invocations.
///
/// Payloads are computed inside the store's critical section; `dispatch`
/// runs outside it. A panicking callback is caught and logged so the
/// remaining deliveries in the batch still run.
pub(crate) struct Deliveries {
    queue: Vec<(Callback, Value)>,
}

impl Deliveries {
    pub(crate) fn new() -> Self {
        Self { queue: Vec::new() }
    }

    pub(crate) fn push(
        &mut self,
        callback: Callback,
        payload: Value,
    ) {
        self.queue.push((callback, payload));
    }

    pub(crate) fn append(
        &mut self,
        mut other: Deliveries,
    ) {
        self.queue.append(&mut other.queue);
    }

    pub(crate) fn dispatch(self) {
        for (callback, payload) in self.queue {
            invoke(&callback, &payload);
        }
    }
}

/// Invokes one callback, containing any panic it raises.
pub(crate) fn invoke(
    callback: &Callback,
    payload: &Value,
) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(payload))) {
        error!("Subscriber callback panicked: {}", panic_message(&panic));
    }
}

/// Best-effort extraction of a panic payload message.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}

pub(crate) struct ValueStore {
    entries: HashMap<String, StoredEntry>,
}

impl ValueStore {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Current value for `key`; `Null` when absent.
    pub(crate) fn get(
        &self,
        key: &str,
    ) -> &Value {
        self.entries.get(key).map(|e| &e.value).unwrap_or(&Value::Null)
    }

    /// Raw overwrite, no merge. Setting `Null` clears the value and prunes
    /// the entry if nothing subscribes to it.
    pub(crate) fn set(
        &mut self,
        key: &str,
        value: Value,
    ) {
        if value.is_null() {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.value = Value::Null;
                if entry.is_prunable() {
                    self.entries.remove(key);
                }
            }
        } else {
            self.entries.entry(key.to_string()).or_default().value = value;
        }
    }

    pub(crate) fn add_callback(
        &mut self,
        key: &str,
        mode: SubscriptionMode,
        id: SubscriberId,
        callback: Callback,
    ) {
        let entry = self.entries.entry(key.to_string()).or_default();
        let list = match mode {
            SubscriptionMode::Patch => &mut entry.patch_subscribers,
            SubscriptionMode::Set => &mut entry.set_subscribers,
        };
        list.push(Subscriber { id, callback });
    }

    pub(crate) fn remove_callback(
        &mut self,
        key: &str,
        mode: SubscriptionMode,
        id: SubscriberId,
    ) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        let list = match mode {
            SubscriptionMode::Patch => &mut entry.patch_subscribers,
            SubscriptionMode::Set => &mut entry.set_subscribers,
        };
        list.retain(|s| s.id != id);
        if entry.is_prunable() {
            self.entries.remove(key);
        }
    }

    /// Queues the patch payload for every patch-mode subscriber of `key`.
    pub(crate) fn notify_patch(
        &self,
        key: &str,
        payload: Value,
        out: &mut Deliveries,
    ) {
        let Some(entry) = self.entries.get(key) else {
            return;
        };
        for subscriber in &entry.patch_subscribers {
            out.push(subscriber.callback.clone(), payload.clone());
        }
    }

    /// Queues the full value for every set-mode subscriber of `key`.
    pub(crate) fn notify_set(
        &self,
        key: &str,
        payload: Value,
        out: &mut Deliveries,
    ) {
        let Some(entry) = self.entries.get(key) else {
            return;
        };
        for subscriber in &entry.set_subscribers {
            out.push(subscriber.callback.clone(), payload.clone());
        }
    }

    /// Iterates keys holding a non-null value (index back-fill scan).
    pub(crate) fn iter_values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.value.is_null())
            .map(|(key, entry)| (key.as_str(), &entry.value))
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(
        &self,
        key: &str,
    ) -> usize {
        self.entries
            .get(key)
            .map(|e| e.patch_subscribers.len() + e.set_subscribers.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn has_entry(
        &self,
        key: &str,
    ) -> bool {
        self.entries.contains_key(key)
    }
}
