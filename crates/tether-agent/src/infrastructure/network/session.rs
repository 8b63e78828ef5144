//! The agent's side of one connection.
//!
//! ```text
//! read 4096 bytes → LineReassembler → decode_message → CommandDispatcher
//!                                                         │
//! server ◀── LineWriter (write lock, one full line per send) ◀┘
//! ```
//!
//! Besides answering `ping`, the loop writes an unsolicited `pong` every
//! `heartbeat_interval` so the server sees the agent even when it is idle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tether_core::protocol::DEFAULT_MAX_LINE_BYTES;
use tether_core::{
    decode_message, encode_response, FrameError, LineReassembler, Response, ResponseBody,
    DEFAULT_HEARTBEAT_INTERVAL_SECS, READ_CHUNK_SIZE,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::application::collaborators::Collaborators;
use crate::application::handle_commands::{CommandDispatcher, Flow, ResponseSink, SinkError};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    /// Period of the unsolicited `pong`.
    pub heartbeat_interval: Duration,
    /// Longest accepted command line, excluding the newline.
    pub max_line_bytes: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server sent `quit`.
    Quit,
    /// The server closed the connection.
    ServerClosed,
    /// The server sent a line longer than `max_line_bytes`.
    LineTooLong,
    ReadFailed,
    /// Writing to the server failed.
    WriteFailed,
    /// Local shutdown (Ctrl+C).
    Shutdown,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionEnd::Quit => "server sent quit",
            SessionEnd::ServerClosed => "server closed the connection",
            SessionEnd::LineTooLong => "server sent an overlong line",
            SessionEnd::ReadFailed => "read from server failed",
            SessionEnd::WriteFailed => "write to server failed",
            SessionEnd::Shutdown => "local shutdown",
        };
        f.write_str(text)
    }
}

/// Write half of the connection, shared by every handler.
///
/// The first failed write is latched; [`LineWriter::failed`] observes it.
pub struct LineWriter {
    writer: Mutex<Option<BoxedWriter>>,
    failed: watch::Sender<bool>,
}

impl LineWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: BoxedWriter = Box::new(writer);
        let (failed, _) = watch::channel(false);
        Self {
            writer: Mutex::new(Some(writer)),
            failed,
        }
    }

    /// A receiver that observes `true` once a write has failed.
    pub fn failed(&self) -> watch::Receiver<bool> {
        self.failed.subscribe()
    }

    /// Shuts the write half down.  Later sends fail with
    /// [`SinkError::Closed`].
    pub async fn close(&self) {
        let taken = self.writer.lock().await.take();
        if let Some(mut writer) = taken {
            if let Err(e) = writer.shutdown().await {
                debug!("write half shutdown failed: {e}");
            }
        }
    }
}

#[async_trait]
impl ResponseSink for LineWriter {
    async fn send_response(&self, response: &Response) -> Result<(), SinkError> {
        let line = encode_response(response)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SinkError::Closed)?;
        let written = match writer.write_all(&line).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.failed.send_replace(true);
            return Err(SinkError::Io(e));
        }
        Ok(())
    }
}

/// Runs one session until it ends and reports why.
///
/// `shutdown` flipping to `true` ends the session from outside; a failed
/// write (a reply or the heartbeat `pong`) ends it with
/// [`SessionEnd::WriteFailed`].  On return
/// the write half has been shut down and keystroke collection stopped.
pub async fn run_session<R, W>(
    mut reader: R,
    writer: W,
    collaborators: Collaborators,
    settings: AgentSettings,
    mut shutdown: watch::Receiver<bool>,
) -> SessionEnd
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let writer = Arc::new(LineWriter::new(writer));
    let sink: Arc<dyn ResponseSink> = writer.clone();
    let dispatcher = CommandDispatcher::new(collaborators, sink);
    let mut write_failed = writer.failed();

    let period = settings.heartbeat_interval.max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // Skip the immediate first tick.

    let mut reassembler = LineReassembler::with_max_line_bytes(settings.max_line_bytes);
    let mut read_tmp = vec![0u8; READ_CHUNK_SIZE];

    let end = 'read: loop {
        if *shutdown.borrow() {
            break SessionEnd::Shutdown;
        }

        let n = tokio::select! {
            true = async { write_failed.wait_for(|failed| *failed).await.is_ok() } => {
                warn!("write to server failed; disconnecting");
                break SessionEnd::WriteFailed;
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break SessionEnd::Shutdown;
                }
                continue;
            }
            _ = ticker.tick() => {
                if let Err(e) = writer.send_response(&Response::ok(ResponseBody::Pong)).await {
                    debug!("heartbeat pong not delivered: {e}");
                }
                continue;
            }
            read = reader.read(&mut read_tmp) => match read {
                Ok(0) => {
                    debug!("connection closed by server (EOF)");
                    break SessionEnd::ServerClosed;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("read failed: {e}");
                    break SessionEnd::ReadFailed;
                }
            },
        };

        for line in reassembler.push(&read_tmp[..n]) {
            let line = match line {
                Ok(line) => line,
                Err(FrameError::InvalidUtf8) => {
                    debug!("skipped a line that is not UTF-8");
                    continue;
                }
                Err(e @ FrameError::LineTooLong { .. }) => {
                    warn!("{e}; disconnecting");
                    break 'read SessionEnd::LineTooLong;
                }
            };

            match decode_message(&line) {
                Ok(msg) => {
                    if dispatcher.handle_message(msg).await == Flow::Quit {
                        break 'read SessionEnd::Quit;
                    }
                }
                Err(e) => debug!("dropped undecodable line: {e}"),
            }
        }
    };

    let discarded = reassembler.finish();
    if discarded > 0 {
        debug!("discarded {discarded} bytes of unterminated input");
    }
    dispatcher.shutdown();
    writer.close().await;
    info!("session ended: {end}");
    end
}

// ── Tests ─────────────────────────────────────────────────────────────────────
