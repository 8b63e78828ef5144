//! ResponseDispatcher: the server-side handler table.
//!
//! Every response an agent sends is routed here by its tag:
//!
//! | Tag                          | Action                                         |
//! |------------------------------|------------------------------------------------|
//! | `pong`                       | record heartbeat, emit `Heartbeat`             |
//! | `screenshot` / `photo`       | decode base64, persist PNG, emit `CaptureSaved`|
//! | `file_download` (success)    | decode base64, persist file, emit `DownloadSaved` |
//! | `popup`                      | emit `PopupAnswered`                           |
//! | `error`                      | log, emit `PeerError`                          |
//! | anything else                | emit `Data`                                    |
//!
//! Handler failures become `PeerError` events.  They never propagate to the
//! receive loop, so one bad response cannot end a session.

use std::path::PathBuf;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tether_core::protocol::payloads::FsResult;
use tether_core::{Response, ResponseBody};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::events::{CaptureKind, EventHub, ServerEvent};
use crate::application::session_registry::PeerLink;

/// Failures while persisting something an agent sent.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("payload is not valid base64: {0}")]
    Decode(String),

    #[error("file name {0:?} cannot be stored")]
    InvalidName(String),

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage task failed: {0}")]
    Task(String),
}

/// Where decoded captures and downloads are written.
///
/// Implementations do blocking file I/O; the dispatcher calls them from a
/// blocking worker.
#[cfg_attr(test, mockall::automock)]
pub trait CaptureSink: Send + Sync {
    /// Persists a PNG image and returns where it was written.
    fn save_capture(
        &self,
        session: &str,
        kind: CaptureKind,
        png: &[u8],
    ) -> Result<PathBuf, StoreError>;

    /// Persists a downloaded file and returns where it was written.
    fn save_download(
        &self,
        session: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError>;
}

/// Routes decoded responses to their handlers.
pub struct ResponseDispatcher {
    sink: Arc<dyn CaptureSink>,
    events: Arc<EventHub>,
}

impl ResponseDispatcher {
    pub fn new(sink: Arc<dyn CaptureSink>, events: Arc<EventHub>) -> Self {
        Self { sink, events }
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    /// Handles one response from `link`.
    pub async fn dispatch(&self, link: &dyn PeerLink, response: Response) {
        let session = link.id().to_string();
        debug!(session = %session, tag = response.tag(), "dispatching response");

        let event = match response.body {
            ResponseBody::Pong => {
                link.record_heartbeat();
                ServerEvent::Heartbeat { session }
            }
            ResponseBody::Screenshot(data) => {
                self.store_capture(session, CaptureKind::Screenshot, data)
                    .await
            }
            ResponseBody::Photo(data) => self.store_capture(session, CaptureKind::Photo, data).await,
            ResponseBody::FileDownload(FsResult::Ok(content)) => {
                self.store_download(session, content.filename, content.data)
                    .await
            }
            ResponseBody::Popup(answer) => ServerEvent::PopupAnswered {
                session,
                button: answer.button_pressed,
            },
            ResponseBody::Error(message) => {
                warn!(session = %session, "agent reported error: {message}");
                ServerEvent::PeerError { session, message }
            }
            body => ServerEvent::Data {
                session,
                response: Response {
                    status: response.status,
                    body,
                },
            },
        };
        self.events.emit(event);
    }

    async fn store_capture(&self, session: String, kind: CaptureKind, data: String) -> ServerEvent {
        let sink = Arc::clone(&self.sink);
        let id = session.clone();
        let result = run_blocking(move || {
            let png = decode_base64(&data)?;
            sink.save_capture(&id, kind, &png)
        })
        .await;

        match result {
            Ok(path) => {
                info!(session = %session, path = %path.display(), "{kind} saved");
                ServerEvent::CaptureSaved {
                    session,
                    kind,
                    path,
                }
            }
            Err(e) => {
                warn!(session = %session, "failed to save {kind}: {e}");
                ServerEvent::PeerError {
                    session,
                    message: format!("failed to save {kind}: {e}"),
                }
            }
        }
    }

    async fn store_download(&self, session: String, file_name: String, data: String) -> ServerEvent {
        let sink = Arc::clone(&self.sink);
        let id = session.clone();
        let result = run_blocking(move || {
            let bytes = decode_base64(&data)?;
            let path = sink.save_download(&id, &file_name, &bytes)?;
            Ok((path, bytes.len() as u64))
        })
        .await;

        match result {
            Ok((path, size)) => {
                info!(session = %session, path = %path.display(), size, "download saved");
                ServerEvent::DownloadSaved {
                    session,
                    path,
                    size,
                }
            }
            Err(e) => {
                warn!(session = %session, "failed to save download: {e}");
                ServerEvent::PeerError {
                    session,
                    message: format!("failed to save download: {e}"),
                }
            }
        }
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, StoreError> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| StoreError::Decode(e.to_string()))
}

async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

// ── Tests ─────────────────────────────────────────────────────────────────────
