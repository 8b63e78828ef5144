//! Capture sources for hosts where the feature is not provided.  Each one
//! answers with [`CollaboratorError::Unavailable`], which the dispatcher
//! turns into an `error` response.

use tokio::sync::mpsc;

use crate::application::collaborators::{CollaboratorError, KeystrokeSource, ScreenCapture};

#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableCapture;

impl ScreenCapture for UnavailableCapture {
    fn capture_screen(&self) -> Result<Option<String>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("screen capture"))
    }

    fn capture_photo(&self) -> Result<Option<String>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("camera capture"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableKeystrokes;

impl KeystrokeSource for UnavailableKeystrokes {
    fn start(&self) -> Result<mpsc::Receiver<String>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("keystroke collection"))
    }

    fn stop(&self) -> Option<String> {
        None
    }

    fn is_running(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_reports_unavailable() {
        assert_eq!(
            UnavailableCapture.capture_screen(),
            Err(CollaboratorError::Unavailable("screen capture"))
        );
        assert_eq!(
            UnavailableCapture.capture_photo().unwrap_err().to_string(),
            "camera capture is not available on this host"
        );
    }

    #[test]
    fn test_keystrokes_never_start() {
        assert!(UnavailableKeystrokes.start().is_err());
        assert!(!UnavailableKeystrokes.is_running());
        assert_eq!(UnavailableKeystrokes.stop(), None);
    }
}
