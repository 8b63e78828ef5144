//! Concrete collaborators backed by the host.
//!
//! | Trait             | Implementation           |
//! |-------------------|--------------------------|
//! | `FileBrowser`     | [`LocalFileBrowser`]     |
//! | `DialogPresenter` | [`ConsoleDialog`]        |
//! | `ScreenCapture`   | [`UnavailableCapture`]   |
//! | `KeystrokeSource` | [`UnavailableKeystrokes`]|

pub mod dialog;
pub mod filesystem;
pub mod unavailable;

use std::sync::Arc;

pub use dialog::ConsoleDialog;
pub use filesystem::LocalFileBrowser;
pub use unavailable::{UnavailableCapture, UnavailableKeystrokes};

use crate::application::collaborators::Collaborators;

/// The collaborator set the `tether-agent` binary runs with.
pub fn host_collaborators() -> Collaborators {
    Collaborators {
        screen: Arc::new(UnavailableCapture),
        dialog: Arc::new(ConsoleDialog),
        keystrokes: Arc::new(UnavailableKeystrokes),
        files: Arc::new(LocalFileBrowser::new()),
    }
}
