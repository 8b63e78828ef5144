//! Tether agent: entry point.
//!
//! Connects to a Tether server once, answers its commands until the session
//! ends, then exits.
//!
//! # Usage
//!
//! ```text
//! tether-agent [OPTIONS]
//!
//! Options:
//!   --host <HOST>             Server address [default: 127.0.0.1]
//!   --port <PORT>             Server port [default: 4444]
//!   --heartbeat-secs <SECS>   Unsolicited pong interval [default: 30]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                | Description              |
//! |-------------------------|--------------------------|
//! | `TETHER_HOST`           | Server address           |
//! | `TETHER_PORT`           | Server port              |
//! | `TETHER_HEARTBEAT_SECS` | Unsolicited pong interval|
//! | `RUST_LOG`              | Log filter               |

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tether_agent::infrastructure::collaborators::host_collaborators;
use tether_agent::infrastructure::network::{self, AgentSettings, SessionEnd};
use tether_core::{DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_PORT};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Tether agent.
#[derive(Debug, Parser)]
#[command(
    name = "tether-agent",
    about = "Connects to a Tether server and answers its commands",
    version
)]
struct Cli {
    /// Server host name or IP address.
    #[arg(long, env = "TETHER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server TCP port.
    #[arg(long, env = "TETHER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds between unsolicited `pong` messages.
    #[arg(
        long,
        env = "TETHER_HEARTBEAT_SECS",
        default_value_t = DEFAULT_HEARTBEAT_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    heartbeat_secs: u64,
}

impl Cli {
    fn settings(&self) -> AgentSettings {
        AgentSettings {
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            ..AgentSettings::default()
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("tether agent starting, server={}:{}", cli.host, cli.port);

    let stream = network::connect(&cli.host, cli.port)
        .await
        .context("could not reach the server")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, disconnecting");
                shutdown_tx.send_replace(true);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let (reader, writer) = stream.into_split();
    let end = network::run_session(reader, writer, host_collaborators(), cli.settings(), shutdown_rx)
        .await;

    match end {
        SessionEnd::Quit | SessionEnd::Shutdown | SessionEnd::ServerClosed => {
            info!("tether agent stopped ({end})");
        }
        SessionEnd::LineTooLong | SessionEnd::ReadFailed | SessionEnd::WriteFailed => {
            warn!("tether agent stopped ({end})");
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_target_local_server() {
        // Arrange / Act
        let cli = Cli::parse_from(["tether-agent"]);

        // Assert
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 4444);
        assert_eq!(cli.settings().heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "tether-agent",
            "--host",
            "10.0.0.5",
            "--port",
            "5000",
            "--heartbeat-secs",
            "5",
        ]);

        assert_eq!(cli.host, "10.0.0.5");
        assert_eq!(cli.port, 5000);
        assert_eq!(cli.settings().heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_cli_rejects_zero_heartbeat() {
        assert!(Cli::try_parse_from(["tether-agent", "--heartbeat-secs", "0"]).is_err());
    }

    #[test]
    fn test_cli_rejects_non_numeric_port() {
        assert!(Cli::try_parse_from(["tether-agent", "--port", "http"]).is_err());
    }
}
