//! Wire protocol: one JSON object per message.
//!
//! Client→server traffic splits into commands (`cmd`, no reply), calls
//! (`call`, replied to by id) and call responses (`type: "callResponse"`,
//! sent by a connection answering a forwarded call). Server→client traffic
//! is the [`ServerMessage`] enum.
//!
//! Parsing distinguishes an absent field from an explicit `null`: `{"cmd":
//! "set", "key": "k"}` is malformed, while `{"cmd": "set", "key": "k",
//! "value": null}` is a legal deletion.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::store::SubscriptionMode;

/// Parsed client→server message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `{cmd: "set", key, value}` — full-value replacement
    Set { key: String, value: Value },
    /// `{cmd: "patch", key, patch}` — partial update
    Patch { key: String, patch: Value },
    /// `{cmd: "onPatch" | "onSet" | "on", key}` — subscribe
    Subscribe {
        key: String,
        mode: SubscriptionMode,
        /// Sent as the deprecated `on` command
        legacy: bool,
    },
    /// `{cmd: "unsubscribe", key}`
    Unsubscribe { key: String },
    /// `{cmd: "onCall", key}` — register a forwarding target for a function
    RegisterFunction { name: String },
    /// `{call: "get", id, key}`
    Get { id: u64, key: String },
    /// `{call: "call", id, key, value: [args]}`
    Invoke {
        id: u64,
        name: String,
        args: Vec<Value>,
    },
    /// `{type: "callResponse", id, success, result|error}` — a handler
    /// connection answering a forwarded call. `id` stays optional so the hub
    /// can log the exact missing-id condition before dropping the message.
    CallResponse {
        id: Option<u64>,
        success: bool,
        result: Value,
        error: Option<String>,
    },
}

/// Why a client message could not be parsed. Variants carry the reply id
/// when the sender expects a response, so malformed calls still settle the
/// caller's promise with an error.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("Invalid message format: {0}")]
    Json(String),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Missing {field} in '{context}' message")]
    MissingField {
        context: &'static str,
        field: &'static str,
        id: Option<u64>,
    },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Unknown call type: {name}")]
    UnknownCall { name: String, id: Option<u64> },

    #[error("Message must specify either cmd, call, or be a response")]
    MissingDiscriminator { id: Option<u64> },
}

impl ParseError {
    /// Id to answer with, when the sender expects a reply.
    pub fn reply_id(&self) -> Option<u64> {
        match self {
            ParseError::MissingField { id, .. } => *id,
            ParseError::UnknownCall { id, .. } => *id,
            ParseError::MissingDiscriminator { id } => *id,
            _ => None,
        }
    }
}

impl ClientMessage {
    /// Parses one wire message.
    pub fn parse(text: &str) -> std::result::Result<ClientMessage, ParseError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ParseError::Json(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(ParseError::NotAnObject);
        };

        let id = map.get("id").and_then(Value::as_u64);

        // Call responses are dispatched on `type` before cmd/call.
        if map.get("type").and_then(Value::as_str) == Some("callResponse") {
            return Ok(ClientMessage::CallResponse {
                id,
                success: map.get("success").and_then(Value::as_bool).unwrap_or(false),
                result: map.get("result").cloned().unwrap_or(Value::Null),
                error: map
                    .get("error")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string()),
            });
        }

        if let Some(cmd) = map.get("cmd").and_then(Value::as_str) {
            return match cmd {
                "set" => Ok(ClientMessage::Set {
                    key: require_key(&map, "set", None)?,
                    value: require_field(&map, "set", "value", None)?,
                }),
                "patch" => Ok(ClientMessage::Patch {
                    key: require_key(&map, "patch", None)?,
                    patch: require_field(&map, "patch", "patch", None)?,
                }),
                "onPatch" => Ok(ClientMessage::Subscribe {
                    key: require_key(&map, "onPatch", None)?,
                    mode: SubscriptionMode::Patch,
                    legacy: false,
                }),
                "onSet" => Ok(ClientMessage::Subscribe {
                    key: require_key(&map, "onSet", None)?,
                    mode: SubscriptionMode::Set,
                    legacy: false,
                }),
                "on" => Ok(ClientMessage::Subscribe {
                    key: require_key(&map, "on", None)?,
                    mode: SubscriptionMode::Patch,
                    legacy: true,
                }),
                "unsubscribe" => Ok(ClientMessage::Unsubscribe {
                    key: require_key(&map, "unsubscribe", None)?,
                }),
                "onCall" => Ok(ClientMessage::RegisterFunction {
                    name: require_key(&map, "onCall", None)?,
                }),
                other => Err(ParseError::UnknownCommand(other.to_string())),
            };
        }

        if let Some(call) = map.get("call").and_then(Value::as_str) {
            return match call {
                "get" => Ok(ClientMessage::Get {
                    id: require_id(&map, "get")?,
                    key: require_key(&map, "get", id)?,
                }),
                "call" => {
                    let args = match map.get("value") {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Array(items)) => items.clone(),
                        Some(_) => {
                            return Err(ParseError::MissingField {
                                context: "call",
                                field: "value (argument array)",
                                id,
                            })
                        }
                    };
                    Ok(ClientMessage::Invoke {
                        id: require_id(&map, "call")?,
                        name: require_key(&map, "call", id)?,
                        args,
                    })
                }
                other => Err(ParseError::UnknownCall {
                    name: other.to_string(),
                    id,
                }),
            };
        }

        Err(ParseError::MissingDiscriminator { id })
    }
}

fn require_key(
    map: &Map<String, Value>,
    context: &'static str,
    id: Option<u64>,
) -> std::result::Result<String, ParseError> {
    match map.get("key").and_then(Value::as_str) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(ParseError::MissingField {
            context,
            field: "key",
            id,
        }),
    }
}

fn require_field(
    map: &Map<String, Value>,
    context: &'static str,
    field: &'static str,
    id: Option<u64>,
) -> std::result::Result<Value, ParseError> {
    // Explicit null is present (and means deletion); absence is malformed.
    map.get(field).cloned().ok_or(ParseError::MissingField {
        context,
        field,
        id,
    })
}

fn require_id(
    map: &Map<String, Value>,
    context: &'static str,
) -> std::result::Result<u64, ParseError> {
    map.get("id").and_then(Value::as_u64).ok_or(ParseError::MissingField {
        context,
        field: "id",
        id: None,
    })
}

/// Server→client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Subscription delivery. Exactly one of `patch`/`value` is meaningful:
    /// patch-mode deliveries carry `patch` with `value: null`, set-mode
    /// deliveries carry `value` with `patch: null`. The first delivery after
    /// subscribing always carries the full current value in `value`.
    Update {
        key: String,
        patch: Value,
        value: Value,
    },
    /// Reply to a `get`/`call` request, correlated by id.
    Response {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Forwarded call, hub → the connection that registered the function.
    CallRequest {
        id: u64,
        key: String,
        args: Vec<Value>,
    },
}

impl ServerMessage {
    pub fn success(
        id: u64,
        result: Value,
    ) -> Self {
        ServerMessage::Response {
            id: Some(id),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(
        id: Option<u64>,
        error: impl Into<String>,
    ) -> Self {
        ServerMessage::Response {
            id,
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("server messages serialize")
    }
}
