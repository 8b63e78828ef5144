//! File-system [`CaptureSink`]: decoded captures and downloads land here.
//!
//! ```text
//! <root>/screenshot_10.0.0.7_51514_1718000000.png
//! <root>/photo_10.0.0.7_51514_1718000042.png
//! <root>/downloads/10.0.0.7_51514_report.pdf
//! ```
//!
//! Session ids contain `:`, which Windows does not allow in file names, so
//! it is replaced with `_`.  Downloaded files keep only the final component
//! of the name the agent reported; directory parts are never honoured.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::application::dispatch::{CaptureSink, StoreError};
use crate::application::events::CaptureKind;

/// Writes captures under a root directory, creating it on demand.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    root: PathBuf,
}

impl CaptureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write(&self, path: PathBuf, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, bytes).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}

impl CaptureSink for CaptureStore {
    fn save_capture(
        &self,
        session: &str,
        kind: CaptureKind,
        png: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let name = format!("{kind}_{}_{secs}.png", file_safe(session));
        self.write(self.root.join(name), png)
    }

    fn save_download(
        &self,
        session: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let base = base_name(file_name)
            .ok_or_else(|| StoreError::InvalidName(file_name.to_string()))?;
        let name = format!("{}_{base}", file_safe(session));
        self.write(self.root.join("downloads").join(name), bytes)
    }
}

fn file_safe(session: &str) -> String {
    session.replace(':', "_")
}

/// Last path component, treating both `/` and `\` as separators.
fn base_name(file_name: &str) -> Option<&str> {
    let base = file_name.rsplit(['/', '\\']).next()?.trim();
    match base {
        "" | "." | ".." => None,
        base => Some(base),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
