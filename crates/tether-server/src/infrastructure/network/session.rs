//! One agent connection.
//!
//! A [`Session`] owns the write side of a connection and implements
//! [`PeerLink`] for the rest of the server.  [`run_session`] owns the read
//! side and drives the receive loop:
//!
//! ```text
//! read 4096 bytes → LineReassembler → decode_message → Response → dispatcher
//! ```
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! Connecting ──add+activate──▶ Active ──close()──▶ Closing ──▶ Closed
//! ```
//!
//! `close()` may be called from several places at once: the receive loop on
//! end-of-stream, a failed `send`, the heartbeat task on eviction, or the
//! operator's `kick`.  Only the first caller wins the compare-and-swap into
//! `Closing`; everyone else returns immediately.  The winner unregisters the
//! session, flips the `watch` channel that the receive loop and heartbeat
//! select on, shuts down the write half, and finally emits
//! `SessionDisconnected`.
//!
//! # Write serialisation
//!
//! Each `send` encodes the full line first and then writes it while holding
//! the session's async write lock, so two concurrent sends can never
//! interleave their bytes on the wire.  The write is bounded: it gives up
//! with [`SendError::Closed`] as soon as teardown begins, and a write that
//! outlasts `write_timeout` counts as a write failure.  An agent that stops
//! reading therefore cannot keep `close()` from taking the writer.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tether_core::protocol::DEFAULT_MAX_LINE_BYTES;
use tether_core::{
    decode_message, encode_message, FrameError, LineReassembler, Message, Response,
    ResponseError, READ_CHUNK_SIZE,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::application::dispatch::ResponseDispatcher;
use crate::application::events::{EventHub, ServerEvent};
use crate::application::session_registry::{PeerLink, SendError, SessionId, SessionRegistry};
use crate::infrastructure::network::heartbeat::{spawn_heartbeat, HeartbeatSettings};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Default bound on writing one outbound line.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub heartbeat: HeartbeatSettings,
    /// Longest accepted line, terminator excluded.
    pub max_line_bytes: usize,
    /// Consecutive undecodable lines tolerated; `0` tolerates any number.
    pub max_decode_failures: u32,
    /// Longest one outbound line may take to write.
    pub write_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatSettings::default(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            max_decode_failures: 0,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Everything a session task needs from the server.
pub struct SessionContext {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<ResponseDispatcher>,
    pub settings: SessionSettings,
}

/// One live agent connection.
pub struct Session {
    id: SessionId,
    state: AtomicU8,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    write_timeout: Duration,
    last_heartbeat: Mutex<Instant>,
    shutdown_tx: watch::Sender<bool>,
    registry: Arc<SessionRegistry>,
    events: Arc<EventHub>,
}

impl Session {
    /// Creates a session in the `Connecting` state.
    ///
    /// The session is not registered yet; [`run_session`] does that.
    pub fn new<W>(
        id: impl Into<SessionId>,
        writer: W,
        registry: Arc<SessionRegistry>,
        events: Arc<EventHub>,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_write_timeout(id, writer, registry, events, DEFAULT_WRITE_TIMEOUT)
    }

    /// Like [`Session::new`] with an explicit bound on each line write.
    pub fn with_write_timeout<W>(
        id: impl Into<SessionId>,
        writer: W,
        registry: Arc<SessionRegistry>,
        events: Arc<EventHub>,
        write_timeout: Duration,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (shutdown_tx, _) = watch::channel(false);
        let writer: BoxedWriter = Box::new(writer);
        Arc::new(Self {
            id: id.into(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            writer: tokio::sync::Mutex::new(Some(writer)),
            write_timeout,
            last_heartbeat: Mutex::new(Instant::now()),
            shutdown_tx,
            registry,
            events,
        })
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves `Connecting → Active`.  Returns `false` if the session already
    /// left `Connecting`.
    pub fn activate(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Active)
    }

    /// A receiver that observes `true` once teardown has begun.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[async_trait]
impl PeerLink for Session {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_alive(&self) -> bool {
        self.state() == SessionState::Active
    }

    async fn send(&self, msg: &Message) -> Result<(), SendError> {
        let bytes = encode_message(msg)?;
        let mut closing = self.shutdown_tx.subscribe();

        let mut guard = self.writer.lock().await;
        if !self.is_alive() {
            return Err(SendError::Closed(self.id.clone()));
        }
        let Some(writer) = guard.as_mut() else {
            return Err(SendError::Closed(self.id.clone()));
        };

        let written = tokio::select! {
            written = timeout(self.write_timeout, write_line(writer, &bytes)) => written,
            _ = closing.wait_for(|closing| *closing) => {
                debug!("session {}: send abandoned by teardown", self.id);
                return Err(SendError::Closed(self.id.clone()));
            }
        };
        let result = written.unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write did not finish within {:?}", self.write_timeout),
            ))
        });
        match result {
            Ok(()) => Ok(()),
            Err(source) => {
                // Release the write lock before teardown takes the writer.
                drop(guard);
                warn!("session {}: write failed: {source}", self.id);
                self.close().await;
                Err(SendError::Io {
                    id: self.id.clone(),
                    source,
                })
            }
        }
    }

    async fn close(&self) {
        let won = self.transition(SessionState::Active, SessionState::Closing)
            || self.transition(SessionState::Connecting, SessionState::Closing);
        if !won {
            return;
        }

        self.registry.remove_link(self);
        self.shutdown_tx.send_replace(true);

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("session {}: write shutdown failed: {e}", self.id);
            }
        }

        self.state.store(SessionState::Closed as u8, Ordering::Release);
        info!("session {}: closed", self.id);
        self.events.emit(ServerEvent::SessionDisconnected {
            session: self.id.clone(),
        });
    }

    fn record_heartbeat(&self) {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn last_heartbeat(&self) -> Instant {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn write_line(writer: &mut BoxedWriter, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

// ── Receive loop ──────────────────────────────────────────────────────────────

/// Entry point for each accepted TCP connection.
pub async fn serve_connection(stream: TcpStream, peer_addr: SocketAddr, ctx: Arc<SessionContext>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("session {peer_addr}: could not set TCP_NODELAY: {e}");
    }
    let (read_half, write_half) = stream.into_split();
    run_session(peer_addr.to_string(), read_half, write_half, ctx).await;
}

/// Runs one session from registration to teardown.
///
/// Returns once the session is `Closed`.
pub async fn run_session<R, W>(id: SessionId, mut reader: R, writer: W, ctx: Arc<SessionContext>)
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let events = Arc::clone(ctx.dispatcher.events());
    let session = Session::with_write_timeout(
        id.clone(),
        writer,
        Arc::clone(&ctx.registry),
        Arc::clone(&events),
        ctx.settings.write_timeout,
    );

    let displaced = ctx.registry.add(session.clone());
    session.activate();
    if let Some(displaced) = displaced {
        warn!("session {id}: replacing an existing session with the same id");
        displaced.close().await;
    }
    info!("session {id}: connected");
    events.emit(ServerEvent::SessionConnected {
        session: id.clone(),
    });

    let mut shutdown = session.subscribe_shutdown();
    let heartbeat = spawn_heartbeat(
        session.clone(),
        session.subscribe_shutdown(),
        ctx.settings.heartbeat,
    );

    let mut reassembler = LineReassembler::with_max_line_bytes(ctx.settings.max_line_bytes);
    let mut read_tmp = vec![0u8; READ_CHUNK_SIZE];
    let mut decode_failures: u32 = 0;

    'read: loop {
        if *shutdown.borrow() {
            break;
        }

        let n = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            read = reader.read(&mut read_tmp) => match read {
                Ok(0) => {
                    debug!("session {id}: connection closed by agent (EOF)");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("session {id}: read failed: {e}");
                    break;
                }
            },
        };

        for line in reassembler.push(&read_tmp[..n]) {
            let line = match line {
                Ok(line) => line,
                Err(FrameError::InvalidUtf8) => {
                    debug!("session {id}: skipped a line that is not UTF-8");
                    continue;
                }
                Err(e @ FrameError::LineTooLong { .. }) => {
                    warn!("session {id}: {e}; closing");
                    break 'read;
                }
            };

            match decode_message(&line) {
                Ok(msg) => {
                    decode_failures = 0;
                    handle_message(&session, &ctx.dispatcher, msg).await;
                }
                Err(e) => {
                    debug!("session {id}: dropped undecodable line: {e}");
                    decode_failures += 1;
                    let limit = ctx.settings.max_decode_failures;
                    if limit > 0 && decode_failures > limit {
                        warn!("session {id}: {decode_failures} undecodable lines in a row; closing");
                        break 'read;
                    }
                }
            }
        }
    }

    let discarded = reassembler.finish();
    if discarded > 0 {
        debug!("session {id}: discarded {discarded} bytes of unterminated input");
    }
    session.close().await;
    if let Err(e) = heartbeat.await {
        debug!("session {id}: heartbeat task ended abnormally: {e}");
    }
}

async fn handle_message(session: &Arc<Session>, dispatcher: &ResponseDispatcher, msg: Message) {
    match Response::from_message(msg) {
        Ok(response) => dispatcher.dispatch(&**session, response).await,
        Err(ResponseError::NotAResponse) => {
            debug!("session {}: ignoring a command sent by the agent", session.id);
        }
        Err(e) => {
            warn!("session {}: unusable response: {e}", session.id);
            dispatcher.events().emit(ServerEvent::PeerError {
                session: session.id.clone(),
                message: e.to_string(),
            });
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
