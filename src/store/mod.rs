//! Reactive in-memory document store.
//!
//! [`Store`] composes the value map, the secondary-index manager, and the
//! RPC registry behind one facade:
//!
//! - `patch` applies a partial update by deep-merge; `set` replaces a value
//!   wholesale. Patch-mode subscribers receive deltas (the applied patch, or
//!   a computed diff for `set`), set-mode subscribers receive full values.
//! - Keys under the reserved `idx:` prefix are synthetic read-only index
//!   views: `idx:P=V` is the set of object ids whose property `P` holds the
//!   scalar `V`, `idx:P=?` enumerates the distinct values of `P`. The index
//!   for `P` is activated lazily by the first such subscription.
//! - `on_call`/`call` form a named async RPC bus shared by every handle to
//!   the same store.
//!
//! One mutex guards the value map, index state, and RPC registry together:
//! a subscriber can never observe index state that disagrees with the value
//! map. Mutations commit and compute their complete notification batch
//! inside the critical section; callbacks run after the lock is released, in
//! order — direct-key patch, direct-key set, then index notifications.

pub mod merge;
mod index;
mod rpc;
mod user;
mod value_store;

pub use rpc::HandlerResult;
pub use rpc::RpcHandler;
pub use user::StoreUser;
pub use value_store::SubscriberId;
pub use value_store::SubscriptionMode;

#[cfg(test)]
mod store_test;
#[cfg(test)]
mod value_store_test;

use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::StoreError;
use index::IndexManager;
use rpc::RpcRegistry;
use value_store::invoke;
use value_store::panic_message;
use value_store::Callback;
use value_store::Deliveries;
use value_store::ValueStore;

/// Reserved prefix addressing synthetic index views.
const INDEX_PREFIX: &str = "idx:";
/// Value part of an all-values index key (`idx:P=?`).
const ALL_VALUES: &str = "?";

lazy_static::lazy_static! {
    static ref GLOBAL_STORE: Store = Store::new();
}

struct StoreState {
    values: ValueStore,
    indices: IndexManager,
    rpc: RpcRegistry,
}

struct StoreInner {
    state: Mutex<StoreState>,
    next_subscriber_id: AtomicU64,
}

/// Shared handle to one store instance. Cloning is cheap and every clone
/// addresses the same data.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    values: ValueStore::new(),
                    indices: IndexManager::new(),
                    rpc: RpcRegistry::new(),
                }),
                next_subscriber_id: AtomicU64::new(1),
            }),
        }
    }

    /// Process-wide default instance. A convenience factory only — explicit
    /// instances passed by handle are the primary wiring.
    pub fn global() -> Store {
        GLOBAL_STORE.clone()
    }

    /// Current value for `key`, `Null` when absent. Never panics, never
    /// returns an "undefined" state.
    pub fn get(
        &self,
        key: &str,
    ) -> Value {
        self.inner.state.lock().values.get(key).clone()
    }

    /// Applies a partial update to `key` by deep-merge. A `Null` patch is a
    /// full deletion. Patch-mode subscribers receive the patch as given;
    /// set-mode subscribers receive the merged new value.
    pub fn patch(
        &self,
        key: &str,
        patch: Value,
    ) {
        let mut direct = Deliveries::new();
        let mut index = Deliveries::new();
        {
            let mut state = self.inner.state.lock();
            let old = state.values.get(key).clone();

            if patch.is_null() {
                state.values.set(key, Value::Null);
                let StoreState { values, indices, .. } = &mut *state;
                // Deletion can affect any indexed property the object held.
                indices.update_indices(values, key, &old, &Value::Null, &mut index);
                values.notify_patch(key, Value::Null, &mut direct);
                values.notify_set(key, Value::Null, &mut direct);
            } else {
                let touches_index = state.indices.touches_indexed_property(&patch);
                let new_value = merge::merge(&old, &patch);
                state.values.set(key, new_value.clone());
                let StoreState { values, indices, .. } = &mut *state;
                if touches_index {
                    indices.update_indices(values, key, &old, &new_value, &mut index);
                }
                values.notify_patch(key, patch, &mut direct);
                values.notify_set(key, new_value, &mut direct);
            }
        }
        direct.append(index);
        direct.dispatch();
    }

    /// Replaces the value of `key` wholesale. Properties absent from `value`
    /// are removed; patch-mode subscribers receive the computed diff, with
    /// `Null` entries for every removed property.
    pub fn set(
        &self,
        key: &str,
        value: Value,
    ) {
        let mut direct = Deliveries::new();
        let mut index = Deliveries::new();
        {
            let mut state = self.inner.state.lock();
            let old = state.values.get(key).clone();

            state.values.set(key, value.clone());
            let StoreState { values, indices, .. } = &mut *state;
            indices.update_indices(values, key, &old, &value, &mut index);

            if value.is_null() {
                if !old.is_null() {
                    values.notify_patch(key, merge::diff(&old, &Value::Null), &mut direct);
                }
                values.notify_set(key, Value::Null, &mut direct);
            } else {
                values.notify_patch(key, merge::diff(&old, &value), &mut direct);
                values.notify_set(key, value, &mut direct);
            }
        }
        direct.append(index);
        direct.dispatch();
    }

    /// Subscribes to deltas on `key`. The callback fires synchronously once
    /// with the current full value (or index state), then with every
    /// subsequent patch until the returned token is dropped.
    pub fn on_patch(
        &self,
        key: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(key, SubscriptionMode::Patch, Arc::new(callback))
    }

    /// Subscribes to full values on `key`. Same initial-delivery contract as
    /// [`Store::on_patch`].
    pub fn on_set(
        &self,
        key: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(key, SubscriptionMode::Set, Arc::new(callback))
    }

    /// Deprecated alias of [`Store::on_patch`].
    #[deprecated(note = "use on_patch instead")]
    pub fn on(
        &self,
        key: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        warn!("Store::on() is deprecated, use on_patch() instead");
        self.on_patch(key, callback)
    }

    fn subscribe(
        &self,
        key: &str,
        mode: SubscriptionMode,
        callback: Callback,
    ) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let mut activation = Deliveries::new();
        let initial;
        {
            let mut state = self.inner.state.lock();
            if let Some((property, value)) = parse_index_key(key) {
                let StoreState { values, indices, .. } = &mut *state;
                indices.activate(values, property, &mut activation);
                state.values.add_callback(key, mode, id, callback.clone());
                initial = if value == ALL_VALUES {
                    state.indices.get_all_values(property)
                } else {
                    state.indices.get_index(property, value)
                };
            } else {
                state.values.add_callback(key, mode, id, callback.clone());
                initial = state.values.get(key).clone();
            }
        }
        activation.dispatch();
        invoke(&callback, &initial);
        Subscription {
            store: self.clone(),
            key: key.to_string(),
            mode,
            id,
        }
    }

    fn remove_subscriber(
        &self,
        key: &str,
        mode: SubscriptionMode,
        id: SubscriberId,
    ) {
        self.inner.state.lock().values.remove_callback(key, mode, id);
    }

    /// Registers an async handler for `name`. Last registration wins.
    pub fn on_call<F, Fut>(
        &self,
        name: &str,
        handler: F,
    ) where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let boxed: RpcHandler = Arc::new(move |args| handler(args).boxed());
        self.inner.state.lock().rpc.register(name, boxed);
    }

    /// Invokes the handler registered for `name`.
    ///
    /// # Errors
    /// - [`StoreError::HandlerNotFound`] when no handler is registered
    /// - [`StoreError::HandlerExecutionFailed`] when the handler returns an
    ///   error or panics; the message embeds the original cause
    pub async fn call(
        &self,
        name: &str,
        args: Vec<Value>,
    ) -> std::result::Result<Value, StoreError> {
        let handler = self
            .inner
            .state
            .lock()
            .rpc
            .get(name)
            .ok_or_else(|| StoreError::HandlerNotFound(name.to_string()))?;

        match std::panic::AssertUnwindSafe(handler(args)).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(StoreError::HandlerExecutionFailed {
                name: name.to_string(),
                message,
            }),
            Err(panic) => Err(StoreError::HandlerExecutionFailed {
                name: name.to_string(),
                message: panic_message(&*panic),
            }),
        }
    }

    /// Snapshot of every key holding a non-null value. Used by persistence.
    pub fn dump(&self) -> Vec<(String, Value)> {
        self.inner
            .state
            .lock()
            .values
            .iter_values()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }
}

/// Splits an `idx:property=value` key. Keys without the prefix or the `=`
/// separator are treated as regular keys.
fn parse_index_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(INDEX_PREFIX)?;
    let eq = rest.find('=')?;
    Some((&rest[..eq], &rest[eq + 1..]))
}

/// Live subscription token. Dropping it (or calling
/// [`Subscription::unsubscribe`]) removes the callback; future notifications
/// stop, though a delivery batch already snapshotted may still invoke the
/// callback one final time.
#[must_use = "dropping a Subscription immediately unsubscribes it"]
pub struct Subscription {
    store: Store,
    key: String,
    mode: SubscriptionMode,
    id: SubscriberId,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> SubscriptionMode {
        self.mode
    }

    /// Explicit spelling of drop.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.store.remove_subscriber(&self.key, self.mode, self.id);
    }
}
