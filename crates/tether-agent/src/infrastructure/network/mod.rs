//! Network infrastructure for the agent.
//!
//! The agent makes exactly one outbound TCP connection.  When the session
//! ends, for whatever reason, the process exits; there is no reconnect loop.
//!
//! - [`connect`] opens the connection.
//! - [`session::run_session`] drives it until `quit`, end-of-stream, a read
//!   error, an overlong line, or local shutdown.

pub mod session;

pub use session::{run_session, AgentSettings, LineWriter, SessionEnd};

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Errors that can occur before a session exists.
#[derive(Debug, Error)]
pub enum AgentNetworkError {
    /// TCP connection to the server failed.
    #[error("failed to connect to server at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Connects to `host:port`.  `host` may be an IP address or a name.
///
/// # Errors
///
/// Returns [`AgentNetworkError::ConnectFailed`] if resolution or the TCP
/// handshake fails.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream, AgentNetworkError> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|source| AgentNetworkError::ConnectFailed {
            addr: format!("{host}:{port}"),
            source,
        })?;
    // Responses are small and latency-sensitive.
    if let Err(e) = stream.set_nodelay(true) {
        debug!("could not disable Nagle: {e}");
    }
    info!("connected to server at {host}:{port}");
    Ok(stream)
}
