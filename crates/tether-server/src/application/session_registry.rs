//! SessionRegistry: the server's table of live agent connections.
//!
//! Every accepted connection is registered under its [`SessionId`] (the
//! peer's `ip:port`) before the first byte from it is processed, and removed
//! by its own teardown.  The console, heartbeat, and shutdown code reach
//! sessions only through this table.
//!
//! # Locking
//!
//! The map sits behind one `std::sync::RwLock`.  The lock is never held
//! across an `.await`: [`SessionRegistry::broadcast`] copies the handles out,
//! releases the lock, and only then starts sending.  A session that tears
//! itself down mid-broadcast therefore just reports [`SendError::Closed`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::Instant;

use async_trait::async_trait;
use tether_core::{Command, EncodeError, Message};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::warn;

/// Identifies a session: the peer address text, e.g. `"10.0.0.7:51514"`.
pub type SessionId = String;

/// Why a message could not be delivered to a session.
#[derive(Debug, Error)]
pub enum SendError {
    /// The message could not be encoded.  The session is unaffected.
    #[error("failed to encode message: {0}")]
    Encode(#[from] EncodeError),

    /// The session is closing or closed.
    #[error("session {0} is closed")]
    Closed(SessionId),

    /// No session is registered under this id.
    #[error("no session with id {0}")]
    UnknownSession(SessionId),

    /// Writing to the transport failed.  The session has been torn down.
    #[error("write to session {id} failed: {source}")]
    Io {
        id: SessionId,
        #[source]
        source: std::io::Error,
    },
}

/// A live connection to one agent, as seen by the application layer.
///
/// The network layer's `Session` is the real implementation; tests use
/// recording fakes.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// The registry key of this link.
    fn id(&self) -> &str;

    /// `true` while the link is active and accepting sends.
    fn is_alive(&self) -> bool;

    /// Writes one whole message.  Concurrent sends never interleave.
    async fn send(&self, msg: &Message) -> Result<(), SendError>;

    /// Tears the link down.  Idempotent.
    async fn close(&self);

    /// Notes that a `pong` just arrived.
    fn record_heartbeat(&self);

    /// When the most recent `pong` arrived (or the connection was accepted).
    fn last_heartbeat(&self) -> Instant;

    /// Encodes and sends a typed command.
    async fn send_command(&self, cmd: &Command) -> Result<(), SendError> {
        let msg = cmd.to_message()?;
        self.send(&msg).await
    }
}

/// Process-wide mapping from [`SessionId`] to live link.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<dyn PeerLink>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `link` under its id, returning any link it displaced.
    pub fn add(&self, link: Arc<dyn PeerLink>) -> Option<Arc<dyn PeerLink>> {
        let id = link.id().to_string();
        self.write().insert(id, link)
    }

    /// Unregisters `link`, but only while its id still maps to that same
    /// link.  A session displaced by a newer one with the same id leaves the
    /// newer entry in place.
    pub fn remove_link(&self, link: &dyn PeerLink) -> bool {
        let mut sessions = self.write();
        let current = sessions
            .get(link.id())
            .is_some_and(|existing| same_link(existing, link));
        if current {
            sessions.remove(link.id());
        }
        current
    }

    /// Point lookup.
    pub fn get(&self, id: &str) -> Option<Arc<dyn PeerLink>> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copies out every registered link.  The lock is released on return.
    pub fn snapshot(&self) -> Vec<Arc<dyn PeerLink>> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Sends `cmd` to the session registered under `id`.
    ///
    /// # Errors
    ///
    /// [`SendError::UnknownSession`] if no such session exists, otherwise
    /// whatever the link's send reports.
    pub async fn send_to(&self, id: &str, cmd: &Command) -> Result<(), SendError> {
        let link = self
            .get(id)
            .ok_or_else(|| SendError::UnknownSession(id.to_string()))?;
        link.send_command(cmd).await
    }

    /// Sends `cmd` to every registered session concurrently.
    ///
    /// Returns each session's outcome in completion order; one slow or
    /// failing session does not hold up the rest.
    pub async fn broadcast(&self, cmd: &Command) -> Vec<(SessionId, Result<(), SendError>)> {
        let msg = match cmd.to_message() {
            Ok(msg) => msg,
            Err(e) => {
                return self
                    .ids()
                    .into_iter()
                    .map(|id| (id, Err(SendError::Encode(e.clone()))))
                    .collect()
            }
        };

        let mut tasks = JoinSet::new();
        for link in self.snapshot() {
            let msg = msg.clone();
            tasks.spawn(async move {
                let result = link.send(&msg).await;
                (link.id().to_string(), result)
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("broadcast task failed: {e}"),
            }
        }
        outcomes
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, Arc<dyn PeerLink>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, Arc<dyn PeerLink>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same_link(existing: &Arc<dyn PeerLink>, link: &dyn PeerLink) -> bool {
    Arc::as_ptr(existing) as *const () == link as *const dyn PeerLink as *const ()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
