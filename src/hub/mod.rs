//! Server-side transport adapter.
//!
//! [`ConnectionHub`] accepts duplex connections (TCP or WebSocket), maps
//! each to its own [`StoreUser`], and translates wire messages into store
//! operations. RPC calls try a locally registered handler first, then
//! forward to whichever connection registered the target function; the
//! matching response is relayed back to the original caller by call id.
//!
//! On disconnect, the connection's subscriptions are torn down and every
//! function it registered is dropped from the registry. Forwarded calls that
//! never receive a response are evicted after a bounded lifetime and fail
//! the caller with an error response.

pub mod message;
pub mod tcp;
pub mod ws;


use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use nanoid::nanoid;
use serde_json::Map;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::store::Store;
use crate::store::StoreUser;
use crate::store::SubscriptionMode;
use crate::HubError;
use crate::StoreError;
use message::ClientMessage;
use message::ParseError;
use message::ServerMessage;

/// Store key where the hub mirrors its connection bookkeeping.
pub const SERVER_STATUS_KEY: &str = "serverStatus";

/// Default lifetime for a forwarded call awaiting its response.
pub const DEFAULT_PENDING_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub type ConnectionId = String;

struct HubConnection {
    user: Arc<StoreUser>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    remote_addr: Option<String>,
}

struct PendingCall {
    origin: ConnectionId,
    name: String,
}

struct HubInner {
    store: Store,
    connections: DashMap<ConnectionId, HubConnection>,
    registered_functions: DashMap<String, ConnectionId>,
    pending_calls: DashMap<u64, PendingCall>,
    pending_call_timeout: Duration,
}

#[derive(Clone)]
pub struct ConnectionHub {
    inner: Arc<HubInner>,
}

impl ConnectionHub {
    pub fn new(store: Store) -> Self {
        let hub = Self {
            inner: Arc::new(HubInner {
                store,
                connections: DashMap::new(),
                registered_functions: DashMap::new(),
                pending_calls: DashMap::new(),
                pending_call_timeout: DEFAULT_PENDING_CALL_TIMEOUT,
            }),
        };
        hub.inner.store.patch(SERVER_STATUS_KEY, server_status_patch(0, None));
        hub
    }

    /// Overrides the pending-call lifetime. Must be called before serving.
    pub fn with_pending_call_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("pending-call timeout must be set before the hub is shared");
        inner.pending_call_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Registers a new connection and returns its id. Every message queued
    /// on `outbound` belongs on the wire verbatim.
    pub fn register_connection(
        &self,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        remote_addr: Option<String>,
    ) -> ConnectionId {
        let connection_id = nanoid!();
        let user = Arc::new(StoreUser::new(self.inner.store.clone()));
        self.inner.connections.insert(
            connection_id.clone(),
            HubConnection {
                user,
                outbound,
                remote_addr: remote_addr.clone(),
            },
        );
        info!(connection = %connection_id, "Client connected");
        self.inner.store.patch(
            SERVER_STATUS_KEY,
            server_status_patch(
                self.inner.connections.len(),
                remote_addr.map(|addr| (addr, Value::Bool(true))),
            ),
        );
        connection_id
    }

    /// Tears down one connection: drops its subscriptions, unregisters its
    /// functions, and updates the server-status key.
    pub fn disconnect(
        &self,
        connection_id: &str,
    ) {
        let Some((_, connection)) = self.inner.connections.remove(connection_id) else {
            return;
        };
        connection.user.unsubscribe_all();
        self.inner
            .registered_functions
            .retain(|_, owner| owner != connection_id);
        self.inner.store.patch(
            SERVER_STATUS_KEY,
            server_status_patch(
                self.inner.connections.len(),
                connection.remote_addr.map(|addr| (addr, Value::Null)),
            ),
        );
        info!(connection = %connection_id, "Client disconnected");
    }

    /// Parses and dispatches one inbound wire message.
    ///
    /// Malformed commands are logged and dropped; malformed calls are
    /// answered with an error response so the caller's promise settles.
    pub async fn handle_text(
        &self,
        connection_id: &str,
        text: &str,
    ) {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle_message(connection_id, message).await,
            Err(err) => {
                let reply = match &err {
                    ParseError::Json(_) | ParseError::NotAnObject => {
                        Some(ServerMessage::error(None, "Invalid message format"))
                    }
                    ParseError::MissingDiscriminator { id } => {
                        Some(ServerMessage::error(*id, err.to_string()))
                    }
                    _ => err
                        .reply_id()
                        .map(|id| ServerMessage::error(Some(id), err.to_string())),
                };
                warn!(
                    connection = %connection_id,
                    error = %HubError::MalformedMessage(err),
                    "Dropping malformed message"
                );
                if let Some(reply) = reply {
                    self.send(connection_id, reply);
                }
            }
        }
    }

    pub async fn handle_message(
        &self,
        connection_id: &str,
        message: ClientMessage,
    ) {
        match message {
            ClientMessage::Set { key, value } => {
                if let Some(user) = self.user_of(connection_id) {
                    user.set(&key, value);
                }
            }
            ClientMessage::Patch { key, patch } => {
                if let Some(user) = self.user_of(connection_id) {
                    user.patch(&key, patch);
                }
            }
            ClientMessage::Subscribe { key, mode, legacy } => {
                if legacy {
                    warn!("'on' subscribe command is deprecated, use 'onPatch' instead");
                }
                self.subscribe(connection_id, key, mode);
            }
            ClientMessage::Unsubscribe { key } => {
                if let Some(user) = self.user_of(connection_id) {
                    user.unsubscribe(&key);
                }
            }
            ClientMessage::RegisterFunction { name } => {
                debug!(function = %name, connection = %connection_id, "Registered function");
                self.inner
                    .registered_functions
                    .insert(name, connection_id.to_string());
            }
            ClientMessage::Get { id, key } => {
                if let Some(user) = self.user_of(connection_id) {
                    self.send(connection_id, ServerMessage::success(id, user.get(&key)));
                }
            }
            ClientMessage::Invoke { id, name, args } => {
                self.handle_invoke(connection_id, id, name, args).await;
            }
            ClientMessage::CallResponse {
                id,
                success,
                result,
                error,
            } => {
                self.handle_call_response(id, success, result, error);
            }
        }
    }

    /// Subscribes a connection to `key`, forwarding every delivery as an
    /// `update` message. The first delivery always carries the full current
    /// value with `patch: null`; later deliveries are mode-specific.
    fn subscribe(
        &self,
        connection_id: &str,
        key: String,
        mode: SubscriptionMode,
    ) {
        let Some(connection) = self.inner.connections.get(connection_id) else {
            return;
        };
        let outbound = connection.outbound.clone();
        let user = connection.user.clone();
        drop(connection);

        let first = Arc::new(AtomicBool::new(true));
        let update_key = key.clone();
        let callback = move |payload: &Value| {
            let initial = first.swap(false, Ordering::Relaxed);
            let message = if initial || mode == SubscriptionMode::Set {
                ServerMessage::Update {
                    key: update_key.clone(),
                    patch: Value::Null,
                    value: payload.clone(),
                }
            } else {
                ServerMessage::Update {
                    key: update_key.clone(),
                    patch: payload.clone(),
                    value: Value::Null,
                }
            };
            let _ = outbound.send(message);
        };

        match mode {
            SubscriptionMode::Patch => user.on_patch(&key, callback),
            SubscriptionMode::Set => user.on_set(&key, callback),
        }
    }

    /// Dispatches a `call` request: local handler first, then the remote
    /// registry, then an error response.
    async fn handle_invoke(
        &self,
        connection_id: &str,
        id: u64,
        name: String,
        args: Vec<Value>,
    ) {
        let Some(user) = self.user_of(connection_id) else {
            return;
        };
        match user.call(&name, args.clone()).await {
            Ok(result) => self.send(connection_id, ServerMessage::success(id, result)),
            Err(StoreError::HandlerNotFound(_)) => {
                self.forward_call(connection_id, id, name, args);
            }
            Err(err) => self.send(connection_id, ServerMessage::error(Some(id), err.to_string())),
        }
    }

    fn forward_call(
        &self,
        origin: &str,
        id: u64,
        name: String,
        args: Vec<Value>,
    ) {
        let Some(owner) = self
            .inner
            .registered_functions
            .get(&name)
            .map(|entry| entry.value().clone())
        else {
            self.send(origin, ServerMessage::error(Some(id), format!("Function '{name}' not found")));
            return;
        };

        let Some(target) = self.inner.connections.get(&owner) else {
            // Stale registration left by a vanished connection.
            self.inner.registered_functions.remove(&name);
            self.send(origin, ServerMessage::error(Some(id), format!("Function '{name}' not found")));
            return;
        };
        let outbound = target.outbound.clone();
        drop(target);

        self.inner.pending_calls.insert(
            id,
            PendingCall {
                origin: origin.to_string(),
                name: name.clone(),
            },
        );

        let request = ServerMessage::CallRequest {
            id,
            key: name.clone(),
            args,
        };
        if outbound.send(request).is_err() {
            self.inner.pending_calls.remove(&id);
            self.send(origin, ServerMessage::error(Some(id), "Function call failed"));
            return;
        }

        // Bound the pending-call lifetime so an unanswered forward cannot
        // leak its entry or hang the caller forever.
        let hub = self.clone();
        let timeout = self.inner.pending_call_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, pending)) = hub.inner.pending_calls.remove(&id) {
                warn!(id, function = %pending.name, "Forwarded call timed out");
                let err = StoreError::CallTimeout {
                    name: pending.name,
                    timeout,
                };
                hub.send(&pending.origin, ServerMessage::error(Some(id), err.to_string()));
            }
        });
    }

    /// Matches a handler connection's response to its pending call and
    /// relays it to the origin.
    fn handle_call_response(
        &self,
        id: Option<u64>,
        success: bool,
        result: Value,
        error: Option<String>,
    ) {
        let Some(id) = id else {
            error!("Missing call ID in response");
            return;
        };
        let Some((_, pending)) = self.inner.pending_calls.remove(&id) else {
            warn!(id, "No pending call found for ID");
            return;
        };
        self.send(
            &pending.origin,
            ServerMessage::Response {
                id: Some(id),
                success,
                result: Some(result),
                error,
            },
        );
    }

    fn user_of(
        &self,
        connection_id: &str,
    ) -> Option<Arc<StoreUser>> {
        self.inner
            .connections
            .get(connection_id)
            .map(|connection| connection.user.clone())
    }

    /// Queues a message for one connection's writer.
    fn try_send(
        &self,
        connection_id: &str,
        message: ServerMessage,
    ) -> std::result::Result<(), HubError> {
        let Some(connection) = self.inner.connections.get(connection_id) else {
            return Err(HubError::UnknownConnection(connection_id.to_string()));
        };
        connection
            .outbound
            .send(message)
            .map_err(|_| HubError::TransportDisconnected)
    }

    /// As [`ConnectionHub::try_send`], but a failed send only logs: the
    /// connection is gone or going, and disconnect cleanup handles the rest.
    fn send(
        &self,
        connection_id: &str,
        message: ServerMessage,
    ) {
        if let Err(e) = self.try_send(connection_id, message) {
            debug!(connection = %connection_id, error = %e, "Dropping outbound message");
        }
    }
}

/// Builds the `serverStatus` patch for a connect/disconnect transition.
/// A `Null` client entry removes the address from the clients map.
fn server_status_patch(
    connected: usize,
    client: Option<(String, Value)>,
) -> Value {
    let mut patch = Map::new();
    patch.insert("type".to_string(), Value::String("serverStatus".to_string()));
    patch.insert("connected".to_string(), Value::from(connected));
    let mut clients = Map::new();
    if let Some((addr, action)) = client {
        clients.insert(addr, action);
    }
    patch.insert("clients".to_string(), Value::Object(clients));
    Value::Object(patch)
}
