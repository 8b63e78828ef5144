//! JSON line codec for Tether protocol messages.
//!
//! Wire format:
//! ```text
//! {"cmd":<tag>,<fields...>,"payload":<any>}\n      (command)
//! {"type":<tag>,"status":<s>,"payload":<any>}\n    (response)
//! ```
//! The tag key is always written first, then fields in insertion order, then
//! `payload` when present.  JSON string escaping guarantees that the encoded
//! object never contains a raw `\n`, so the newline is an unambiguous
//! terminator.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::commands::Command;
use crate::protocol::message::{Message, MessageKind};
use crate::protocol::responses::Response;

/// Top-level key holding the optional payload.
pub const PAYLOAD_KEY: &str = "payload";

/// Errors that can occur while encoding a message.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EncodeError {
    /// The message tag is empty.
    #[error("message tag must not be empty")]
    EmptyTag,

    /// A field name collides with the tag key or `payload`.
    #[error("field `{0}` collides with a reserved key")]
    ReservedField(String),

    /// A value could not be represented as JSON.
    #[error("value is not representable as JSON: {0}")]
    Serialize(String),
}

/// Reasons a received line is not delivered as a [`Message`].
///
/// None of these are fatal: the caller logs and keeps reading.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeFailure {
    /// The line is empty or whitespace only.
    #[error("empty line")]
    Empty,

    /// The line is not valid JSON.
    #[error("malformed JSON: {0}")]
    Malformed(String),

    /// The line is valid JSON but not an object.
    #[error("line is not a JSON object")]
    NotAnObject,

    /// Neither `cmd` nor `type` holds a non-empty string.
    #[error("message has no tag")]
    MissingTag,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into one newline-terminated JSON line.
///
/// # Errors
///
/// Returns [`EncodeError`] if the tag is empty, a field uses a reserved key,
/// or serialization fails.
///
/// # Examples
///
/// ```rust
/// use tether_core::{decode_message, encode_message, Message};
///
/// let msg = Message::response("pong", "ok");
/// let bytes = encode_message(&msg).unwrap();
/// assert_eq!(bytes, b"{\"type\":\"pong\",\"status\":\"ok\"}\n");
///
/// let line = std::str::from_utf8(&bytes).unwrap();
/// assert_eq!(decode_message(line).unwrap(), msg);
/// ```
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, EncodeError> {
    if msg.tag.is_empty() {
        return Err(EncodeError::EmptyTag);
    }
    let tag_key = msg.kind.tag_key();
    if let Some(key) = msg
        .fields
        .keys()
        .find(|k| is_reserved(k, tag_key))
    {
        return Err(EncodeError::ReservedField(key.clone()));
    }

    let mut line = serde_json::to_vec(&WireObject(msg))
        .map_err(|e| EncodeError::Serialize(e.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

/// Encodes a typed [`Command`].
///
/// # Errors
///
/// Returns [`EncodeError`] if the command cannot be represented.
pub fn encode_command(cmd: &Command) -> Result<Vec<u8>, EncodeError> {
    encode_message(&cmd.to_message()?)
}

/// Encodes a typed [`Response`].
///
/// # Errors
///
/// Returns [`EncodeError`] if the payload cannot be represented.
pub fn encode_response(resp: &Response) -> Result<Vec<u8>, EncodeError> {
    encode_message(&resp.to_message()?)
}

/// Decodes one line (terminator already stripped) into a [`Message`].
///
/// Surrounding whitespace is ignored.  A non-empty string `cmd` makes the
/// line a command; otherwise a non-empty string `type` makes it a response.
///
/// # Errors
///
/// Returns [`DecodeFailure`] for empty, malformed, non-object, or untagged
/// input.
pub fn decode_message(line: &str) -> Result<Message, DecodeFailure> {
    let line = line.trim();
    if line.is_empty() {
        return Err(DecodeFailure::Empty);
    }

    let value: Value =
        serde_json::from_str(line).map_err(|e| DecodeFailure::Malformed(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(DecodeFailure::NotAnObject);
    };

    let kind = [MessageKind::Command, MessageKind::Response]
        .into_iter()
        .find(|kind| has_tag(&object, kind.tag_key()))
        .ok_or(DecodeFailure::MissingTag)?;
    let tag_key = kind.tag_key();

    let mut tag = String::new();
    let mut fields = Map::new();
    let mut payload = None;
    for (key, value) in object {
        if key == tag_key {
            if let Value::String(s) = value {
                tag = s;
            }
        } else if key == PAYLOAD_KEY {
            payload = Some(value);
        } else {
            fields.insert(key, value);
        }
    }

    Ok(Message {
        kind,
        tag,
        fields,
        payload,
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Serializes a message by reference so large payloads are never cloned.
struct WireObject<'a>(&'a Message);

impl Serialize for WireObject<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let msg = self.0;
        let len = 1 + msg.fields.len() + usize::from(msg.payload.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(msg.kind.tag_key(), &msg.tag)?;
        for (key, value) in &msg.fields {
            map.serialize_entry(key, value)?;
        }
        if let Some(payload) = &msg.payload {
            map.serialize_entry(PAYLOAD_KEY, payload)?;
        }
        map.end()
    }
}

fn has_tag(object: &Map<String, Value>, key: &str) -> bool {
    matches!(object.get(key), Some(Value::String(s)) if !s.is_empty())
}

/// `cmd` is reserved in both directions: a response field named `cmd` would
/// turn the line into a command on decode.
fn is_reserved(key: &str, tag_key: &str) -> bool {
    key == tag_key || key == PAYLOAD_KEY || key == MessageKind::Command.tag_key()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode_str(msg: &Message) -> String {
        String::from_utf8(encode_message(msg).expect("encode")).expect("utf-8")
    }

    #[test]
    fn test_encode_ping_command_is_exact() {
        assert_eq!(encode_str(&Message::command("ping")), "{\"cmd\":\"ping\"}\n");
    }

    #[test]
    fn test_encode_pong_response_is_exact() {
        assert_eq!(
            encode_str(&Message::response("pong", "ok")),
            "{\"type\":\"pong\",\"status\":\"ok\"}\n"
        );
    }

    #[test]
    fn test_encode_error_response_puts_payload_last() {
        let msg = Message::response("error", "ok").with_payload("Unknown command: bogus");
        assert_eq!(
            encode_str(&msg),
            "{\"type\":\"error\",\"status\":\"ok\",\"payload\":\"Unknown command: bogus\"}\n"
        );
    }

    #[test]
    fn test_encode_escapes_embedded_newlines() {
        // Arrange
        let msg = Message::command("popup").with_field("message", "line one\nline two\r\n");

        // Act
        let bytes = encode_message(&msg).unwrap();

        // Assert – exactly one raw newline, and it is the terminator
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(bytes.last(), Some(&b'\n'));
    }

    #[test]
    fn test_encode_rejects_empty_tag() {
        assert_eq!(
            encode_message(&Message::command("")),
            Err(EncodeError::EmptyTag)
        );
    }

    #[test]
    fn test_encode_rejects_reserved_field() {
        let msg = Message::response("pong", "ok").with_field("type", "x");
        assert_eq!(
            encode_message(&msg),
            Err(EncodeError::ReservedField("type".to_string()))
        );
        let msg = Message::command("ping").with_field("payload", 1);
        assert_eq!(
            encode_message(&msg),
            Err(EncodeError::ReservedField("payload".to_string()))
        );
    }

    #[test]
    fn test_command_may_carry_a_type_field() {
        // The popup command uses `type` for the dialog kind.
        let msg = Message::command("popup")
            .with_field("title", "T")
            .with_field("message", "M")
            .with_field("type", "warning");
        let line = encode_str(&msg);
        assert_eq!(
            line,
            "{\"cmd\":\"popup\",\"title\":\"T\",\"message\":\"M\",\"type\":\"warning\"}\n"
        );
        assert_eq!(decode_message(line.trim_end()).unwrap(), msg);
    }

    #[test]
    fn test_decode_response_splits_fields_and_payload() {
        // Act
        let msg =
            decode_message(r#"{"type":"popup","status":"ok","payload":{"button_pressed":"yes"}}"#)
                .unwrap();

        // Assert
        assert_eq!(msg.kind, MessageKind::Response);
        assert_eq!(msg.tag, "popup");
        assert_eq!(msg.status(), Some("ok"));
        assert_eq!(msg.payload, Some(json!({"button_pressed": "yes"})));
    }

    #[test]
    fn test_decode_absent_payload_stays_absent() {
        let msg = decode_message(r#"{"type":"pong","status":"ok"}"#).unwrap();
        assert!(msg.payload.is_none());
    }

    #[test]
    fn test_decode_explicit_null_payload_is_kept() {
        let msg = decode_message(r#"{"type":"pong","status":"ok","payload":null}"#).unwrap();
        assert_eq!(msg.payload, Some(Value::Null));
    }

    #[test]
    fn test_decode_trims_surrounding_whitespace() {
        let msg = decode_message("  \t{\"cmd\":\"ping\"}\r ").unwrap();
        assert_eq!(msg, Message::command("ping"));
    }

    #[test]
    fn test_decode_empty_and_whitespace_lines_fail_with_empty() {
        assert_eq!(decode_message(""), Err(DecodeFailure::Empty));
        assert_eq!(decode_message("   \t "), Err(DecodeFailure::Empty));
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        assert!(matches!(
            decode_message("not json at all"),
            Err(DecodeFailure::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_non_object_is_rejected() {
        assert_eq!(decode_message("[1,2,3]"), Err(DecodeFailure::NotAnObject));
        assert_eq!(decode_message("\"ping\""), Err(DecodeFailure::NotAnObject));
    }

    #[test]
    fn test_decode_missing_or_empty_tag_is_rejected() {
        assert_eq!(decode_message("{}"), Err(DecodeFailure::MissingTag));
        assert_eq!(decode_message(r#"{"cmd":""}"#), Err(DecodeFailure::MissingTag));
        assert_eq!(decode_message(r#"{"cmd":7}"#), Err(DecodeFailure::MissingTag));
        assert_eq!(
            decode_message(r#"{"status":"ok"}"#),
            Err(DecodeFailure::MissingTag)
        );
    }

    #[test]
    fn test_roundtrip_preserves_nested_payload_and_field_order() {
        // Arrange
        let msg = Message::response("file_list", "ok").with_payload(json!({
            "success": true,
            "items": [{"name": "a", "size": 1}],
            "parent_path": null
        }));

        // Act
        let bytes = encode_message(&msg).unwrap();
        let line = std::str::from_utf8(&bytes).unwrap();
        let decoded = decode_message(line.trim_end_matches('\n')).unwrap();

        // Assert
        assert_eq!(decoded, msg);
    }
}
