//! Dialog presenter for hosts without a desktop: the dialog goes to the log
//! and is acknowledged immediately.

use tether_core::DialogKind;
use tracing::info;

use crate::application::collaborators::{CollaboratorError, DialogPresenter};

/// Button reported for every dialog.
pub const ACKNOWLEDGED: &str = "ok";

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleDialog;

impl DialogPresenter for ConsoleDialog {
    fn show_dialog(
        &self,
        title: &str,
        message: &str,
        kind: DialogKind,
    ) -> Result<String, CollaboratorError> {
        info!("[{}] {title}: {message}", kind.as_str());
        Ok(ACKNOWLEDGED.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_dialog_kind_is_acknowledged() {
        for kind in [
            DialogKind::Info,
            DialogKind::Warning,
            DialogKind::Error,
            DialogKind::Question,
            DialogKind::Plain,
        ] {
            assert_eq!(
                ConsoleDialog.show_dialog("Title", "Body", kind).unwrap(),
                "ok"
            );
        }
    }
}
