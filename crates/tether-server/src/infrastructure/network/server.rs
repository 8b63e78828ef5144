//! TCP acceptor.
//!
//! [`TetherServer::bind`] opens the listener; [`TetherServer::run`] accepts
//! connections until the shared `running` flag is cleared.  Each accepted
//! connection is handed to its own Tokio task, so one slow agent never holds
//! up the others.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tether_core::{Command, DEFAULT_PORT};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::dispatch::ResponseDispatcher;
use crate::application::session_registry::SessionRegistry;
use crate::infrastructure::network::session::{serve_connection, SessionContext, SessionSettings};

/// How often the accept loop wakes up to check the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// How long shutdown waits for `quit` to reach an agent before closing it.
const QUIT_GRACE: Duration = Duration::from_secs(2);

/// Errors from the acceptor.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The listener could not be bound.  Fatal to the process.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read the listener's local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Listener address plus the limits every session gets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
    pub session: SessionSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            session: SessionSettings::default(),
        }
    }
}

/// A bound listener ready to accept agents.
pub struct TetherServer {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
}

impl TetherServer {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Bind`] if the address is in use or not
    /// permitted.
    pub async fn bind(
        settings: ServerSettings,
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<ResponseDispatcher>,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(settings.bind_addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: settings.bind_addr,
                source,
            })?;
        let ctx = SessionContext {
            registry,
            dispatcher,
            settings: settings.session,
        };
        Ok(Self {
            listener,
            ctx: Arc::new(ctx),
        })
    }

    /// The bound address (useful when binding port 0).
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::LocalAddr`] if the OS cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener.local_addr().map_err(NetworkError::LocalAddr)
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    /// Accepts connections until `running` becomes `false`, then shuts every
    /// session down.
    pub async fn run(self, running: Arc<AtomicBool>) {
        match self.listener.local_addr() {
            Ok(addr) => info!("tether server listening on {addr}"),
            Err(e) => debug!("listening (local address unavailable: {e})"),
        }

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    info!("new agent connection from {peer_addr}");
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        serve_connection(stream, peer_addr, ctx).await;
                    });
                }
                Ok(Err(e)) => {
                    error!("accept error: {e}");
                }
                Err(_) => {
                    // Timeout; loop back to check the `running` flag.
                }
            }
        }

        shutdown_sessions(&self.ctx.registry).await;
    }
}

/// Sends `quit` to every session and closes it.
///
/// Sessions are shut down concurrently; an agent that stops reading gets
/// [`QUIT_GRACE`] before it is closed anyway.
pub async fn shutdown_sessions(registry: &SessionRegistry) {
    let links = registry.snapshot();
    if links.is_empty() {
        return;
    }
    info!("closing {} session(s)", links.len());

    let mut tasks = JoinSet::new();
    for link in links {
        tasks.spawn(async move {
            match timeout(QUIT_GRACE, link.send_command(&Command::Quit)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("session {}: quit not delivered: {e}", link.id()),
                Err(_) => debug!("session {}: quit not delivered in time", link.id()),
            }
            link.close().await;
        });
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("session shutdown task failed: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
