//! The generic wire unit shared by both directions of the protocol.
//!
//! Every line on the wire is one JSON object.  Commands carry their tag under
//! `"cmd"`, responses under `"type"`.  Everything else at the top level is a
//! *field*, except `"payload"`, which is kept apart because it is the one
//! value that may be large or deeply nested (base64 images, directory
//! listings).
//!
//! ```text
//! {"cmd":"popup","title":"T","message":"M","type":"warning"}
//!   kind = Command, tag = "popup", fields = {title, message, type}
//!
//! {"type":"pong","status":"ok"}
//!   kind = Response, tag = "pong", fields = {status}
//! ```

use serde_json::{Map, Value};

/// Which direction a [`Message`] travels, and therefore which key holds its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Server → agent.  Tagged by `"cmd"`.
    Command,
    /// Agent → server.  Tagged by `"type"`.
    Response,
}

impl MessageKind {
    /// The JSON key that carries the tag for this kind.
    pub fn tag_key(self) -> &'static str {
        match self {
            MessageKind::Command => "cmd",
            MessageKind::Response => "type",
        }
    }
}

/// One logical protocol message.
///
/// A value object: constructed, serialized, and discarded.  Equality is
/// structural.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    /// Identifies the specific command or response, e.g. `"ping"`.
    pub tag: String,
    /// Extra top-level values in wire order.
    pub fields: Map<String, Value>,
    /// Optional payload; `None` means the key is absent on the wire.
    pub payload: Option<Value>,
}

impl Message {
    /// Creates a command message with no fields.
    pub fn command(tag: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Command,
            tag: tag.into(),
            fields: Map::new(),
            payload: None,
        }
    }

    /// Creates a response message carrying the given `status` field.
    pub fn response(tag: impl Into<String>, status: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("status".to_string(), Value::String(status.into()));
        Self {
            kind: MessageKind::Response,
            tag: tag.into(),
            fields,
            payload: None,
        }
    }

    /// Appends a top-level field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Returns a field as a string slice, if present and a string.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Returns the `status` field of a response.
    pub fn status(&self) -> Option<&str> {
        self.field_str("status")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
