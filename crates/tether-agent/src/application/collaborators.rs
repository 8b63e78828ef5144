//! Host services the dispatcher calls into.
//!
//! Every trait here is synchronous: implementations are free to block (a
//! modal dialog waits for the user, a directory walk hits the disk), and the
//! dispatcher always calls them from `spawn_blocking`.  Keystroke batches
//! are the one streaming case and arrive over a channel instead.

use std::sync::Arc;

use tether_core::protocol::payloads::{DirectoryListing, DriveList, FileContent, FileDetails, FsResult};
use tether_core::DialogKind;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors a collaborator can report.  The dispatcher turns each one into an
/// `error` response; none of them end the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{0} is not available on this host")]
    Unavailable(&'static str),

    #[error("already running")]
    AlreadyRunning,

    #[error("{0}")]
    Failed(String),
}

/// Screen and camera capture.
#[cfg_attr(test, mockall::automock)]
pub trait ScreenCapture: Send + Sync {
    /// Captures the primary display as base64 PNG.  `Ok(None)` means the
    /// capture ran but produced nothing.
    fn capture_screen(&self) -> Result<Option<String>, CollaboratorError>;

    /// Captures one camera frame as base64 PNG.
    fn capture_photo(&self) -> Result<Option<String>, CollaboratorError>;
}

/// Shows a dialog to whoever sits at the host.
#[cfg_attr(test, mockall::automock)]
pub trait DialogPresenter: Send + Sync {
    /// Blocks until the dialog is dismissed and returns the chosen button.
    fn show_dialog(
        &self,
        title: &str,
        message: &str,
        kind: DialogKind,
    ) -> Result<String, CollaboratorError>;
}

/// A source of keystroke batches.
#[cfg_attr(test, mockall::automock)]
pub trait KeystrokeSource: Send + Sync {
    /// Starts collecting.  Each received string is one batch; the channel
    /// closes when collection stops.
    fn start(&self) -> Result<mpsc::Receiver<String>, CollaboratorError>;

    /// Stops collecting and returns whatever was buffered but not yet sent.
    fn stop(&self) -> Option<String>;

    fn is_running(&self) -> bool;
}

/// Read-only view of the host filesystem.
#[cfg_attr(test, mockall::automock)]
pub trait FileBrowser: Send + Sync {
    /// Lists a directory; `None` means the working directory.
    fn list(&self, path: Option<String>) -> FsResult<DirectoryListing>;

    fn info(&self, path: &str) -> FsResult<FileDetails>;

    fn download(&self, path: &str) -> FsResult<FileContent>;

    fn drives(&self) -> FsResult<DriveList>;
}

/// The full set of services handed to the dispatcher.
#[derive(Clone)]
pub struct Collaborators {
    pub screen: Arc<dyn ScreenCapture>,
    pub dialog: Arc<dyn DialogPresenter>,
    pub keystrokes: Arc<dyn KeystrokeSource>,
    pub files: Arc<dyn FileBrowser>,
}
