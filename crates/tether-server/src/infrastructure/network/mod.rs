//! Network infrastructure for the server.
//!
//! # Sub-modules
//!
//! - **`server`** – Binds the TCP listener and runs the accept loop.  Each
//!   accepted connection gets its own Tokio task.
//!
//! - **`session`** – One agent connection: the receive loop (read, reassemble,
//!   decode, dispatch), the serialised `send`, and idempotent teardown.
//!
//! - **`heartbeat`** – Per-session timer that probes the agent with `ping`
//!   and, when configured, evicts agents that stopped answering.

pub mod heartbeat;
pub mod server;
pub mod session;

pub use heartbeat::HeartbeatSettings;
pub use server::{NetworkError, ServerSettings, TetherServer};
pub use session::{Session, SessionSettings, SessionState, DEFAULT_WRITE_TIMEOUT};
