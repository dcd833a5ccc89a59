//! Scoped store handle with automatic subscription management.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use serde_json::Value;

use super::HandlerResult;
use super::Store;
use super::Subscription;
use super::SubscriptionMode;
use crate::StoreError;

/// A store handle that tracks its own subscriptions so a scoped consumer (a
/// connection, a worker) can be torn down in one call. Dropping the user
/// unsubscribes everything it registered.
///
/// At most one subscription per `(key, mode)` pair is kept: re-subscribing
/// replaces (and thereby unsubscribes) the previous one, so a consumer
/// re-sending a subscribe request does not stack duplicate deliveries.
pub struct StoreUser {
    store: Store,
    subscriptions: Mutex<HashMap<(String, SubscriptionMode), Subscription>>,
}

impl StoreUser {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Subscribes to deltas on `key`, replacing any previous patch-mode
    /// subscription this user holds for it.
    pub fn on_patch(
        &self,
        key: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) {
        let subscription = self.store.on_patch(key, callback);
        self.track(key, SubscriptionMode::Patch, subscription);
    }

    /// Subscribes to full values on `key`, replacing any previous set-mode
    /// subscription this user holds for it.
    pub fn on_set(
        &self,
        key: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) {
        let subscription = self.store.on_set(key, callback);
        self.track(key, SubscriptionMode::Set, subscription);
    }

    fn track(
        &self,
        key: &str,
        mode: SubscriptionMode,
        subscription: Subscription,
    ) {
        // Replacing the map entry drops the old token, which unsubscribes it.
        self.subscriptions
            .lock()
            .insert((key.to_string(), mode), subscription);
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Value {
        self.store.get(key)
    }

    pub fn set(
        &self,
        key: &str,
        value: Value,
    ) {
        self.store.set(key, value);
    }

    pub fn patch(
        &self,
        key: &str,
        patch: Value,
    ) {
        self.store.patch(key, patch);
    }

    pub fn on_call<F, Fut>(
        &self,
        name: &str,
        handler: F,
    ) where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.store.on_call(name, handler);
    }

    pub async fn call(
        &self,
        name: &str,
        args: Vec<Value>,
    ) -> std::result::Result<Value, StoreError> {
        self.store.call(name, args).await
    }

    /// Drops this user's subscriptions (both modes) for `key`.
    pub fn unsubscribe(
        &self,
        key: &str,
    ) {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.remove(&(key.to_string(), SubscriptionMode::Patch));
        subscriptions.remove(&(key.to_string(), SubscriptionMode::Set));
    }

    /// Drops every subscription this user holds.
    pub fn unsubscribe_all(&self) {
        self.subscriptions.lock().clear();
    }

    /// Number of live subscriptions held by this user.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}
