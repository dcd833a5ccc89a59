//! Named async RPC handler registry.
//!
//! Handlers are registered against a name and invoked with a vector of JSON
//! arguments. Registration overwrites silently: the last handler registered
//! for a name wins.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

/// Outcome of one handler invocation. `Err` carries the original failure
/// message, which [`crate::Store::call`] wraps into
/// [`crate::StoreError::HandlerExecutionFailed`].
pub type HandlerResult = std::result::Result<Value, String>;

/// Registered handler: takes the call arguments, returns an async result.
pub type RpcHandler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

pub(crate) struct RpcRegistry {
    handlers: HashMap<String, RpcHandler>,
}

impl RpcRegistry {
    pub(crate) fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub(crate) fn register(
        &mut self,
        name: &str,
        handler: RpcHandler,
    ) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub(crate) fn get(
        &self,
        name: &str,
    ) -> Option<RpcHandler> {
        self.handlers.get(name).cloned()
    }
}
