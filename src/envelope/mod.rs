//! JSON envelopes carried over the command WebSocket, in both directions.
//!
//! Every envelope is a JSON object with a `handler` field naming who should
//! process it. Requests carry `device_address`, `control_id` and `value`;
//! results carry `status`, `type` (errors only), `msg` and `opts`, the echo of
//! the request payload.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::{key_from_value, Address};

/// Name of the handler that forwards requests to the router.
pub const COMMAND_HANDLER: &str = "command";

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub handler: String,
    /// The whole object as received, `handler` included.
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new<S: Into<String>>(handler: S, mut payload: Map<String, Value>) -> Envelope {
        let handler = handler.into();
        payload.insert("handler".to_string(), Value::String(handler.clone()));
        Envelope { handler, payload }
    }

    /// Decode a text frame. Anything that isn't an object with a string
    /// `handler` is dropped: there is nothing to correlate a reply with.
    pub fn decode(text: &str) -> Option<Envelope> {
        let payload = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(payload)) => payload,
            Ok(other) => {
                debug!("Dropping non-object envelope: {}", other);
                return None;
            }
            Err(err) => {
                debug!("Dropping malformed envelope: {}", err);
                return None;
            }
        };

        match payload.get("handler") {
            Some(Value::String(handler)) => Some(Envelope {
                handler: handler.clone(),
                payload,
            }),
            _ => {
                debug!("Dropping envelope without a handler");
                None
            }
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.payload)
    }
}

/// "Set this control on this device to this value."
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub handler: String,
    pub device_address: Address,
    pub control_id: String,
    pub value: Value,
    payload: Map<String, Value>,
}

impl CommandRequest {
    pub fn new(handler: &str, device_address: Address, control_id: &str, value: Value) -> Self {
        let mut payload = Map::new();
        payload.insert("handler".to_string(), Value::String(handler.to_string()));
        payload.insert(
            "device_address".to_string(),
            Value::String(device_address.as_str().to_string()),
        );
        payload.insert("control_id".to_string(), Value::String(control_id.to_string()));
        payload.insert("value".to_string(), value.clone());

        CommandRequest {
            handler: handler.to_string(),
            device_address,
            control_id: control_id.to_string(),
            value,
            payload,
        }
    }

    /// Read a request out of an envelope.
    ///
    /// Missing or mistyped fields are left empty so that routing reports them
    /// as an unknown device, unknown control or invalid value.
    pub fn from_envelope(envelope: &Envelope) -> CommandRequest {
        let payload = &envelope.payload;
        CommandRequest {
            handler: envelope.handler.clone(),
            device_address: payload
                .get("device_address")
                .and_then(Address::from_value)
                .unwrap_or_default(),
            control_id: payload
                .get("control_id")
                .and_then(key_from_value)
                .unwrap_or_default(),
            value: payload.get("value").cloned().unwrap_or(Value::Null),
            payload: payload.clone(),
        }
    }

    /// The request exactly as the client sent it.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::new(self.handler.clone(), self.payload.clone())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Stable error identifiers. Clients branch on these.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InterfaceUnavailable,
    MethodNotImplemented,
    UnknownDevice,
    UnknownControl,
    InvalidValue,
    /// The host failed to put the frame on the wire.
    TransmitFailed,
    /// The host didn't confirm the frame in time.
    TransmitTimeout,
    /// The module refused the frame.
    TransmitRejected,
}

/// Outcome of a command, sent back to the client that issued it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub status: Status,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub msg: String,
    /// Device-specific acknowledgement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<Value>,
    /// Echo of the request payload.
    #[serde(default)]
    pub opts: Map<String, Value>,
}

impl CommandResult {
    pub fn ok<S: Into<String>>(request: &CommandRequest, msg: S, ack: Option<Value>) -> Self {
        CommandResult {
            status: Status::Ok,
            kind: None,
            msg: msg.into(),
            ack,
            opts: request.payload().clone(),
        }
    }

    pub fn error<S: Into<String>>(request: &CommandRequest, kind: ErrorKind, msg: S) -> Self {
        CommandResult {
            status: Status::Error,
            kind: Some(kind),
            msg: msg.into(),
            ack: None,
            opts: request.payload().clone(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Wrap the result for the handler that sent the request.
    pub fn to_envelope(&self, handler: &str) -> Envelope {
        let payload = match serde_json::to_value(self) {
            Ok(Value::Object(payload)) => payload,
            _ => Map::new(),
        };
        Envelope::new(handler, payload)
    }

    pub fn from_envelope(envelope: &Envelope) -> Option<CommandResult> {
        serde_json::from_value(Value::Object(envelope.payload.clone())).ok()
    }
}

/// Name -> handler map, used by both the server and the client.
///
/// Populated at startup; registering a name again replaces its handler.
pub struct HandlerRegistry<H> {
    handlers: HashMap<String, H>,
}

impl<H> HandlerRegistry<H> {
    pub fn new() -> HandlerRegistry<H> {
        HandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, returning the one it replaced.
    pub fn register<S: Into<String>>(&mut self, name: S, handler: H) -> Option<H> {
        self.handlers.insert(name.into(), handler)
    }

    pub fn get(&self, name: &str) -> Option<&H> {
        self.handlers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut H> {
        self.handlers.get_mut(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<H> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-side envelope processing.
pub trait ServerHandler: Send + Sync {
    /// Process an envelope, maybe producing a reply for the same connection.
    fn process(&self, envelope: &Envelope) -> Option<Envelope>;
}
