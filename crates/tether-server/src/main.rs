//! Tether server: entry point.
//!
//! Accepts agent connections, prints what they report, and reads operator
//! commands from stdin.
//!
//! # Usage
//!
//! ```text
//! tether-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>        Config file [default: platform config dir]
//!   --host <IP>            Bind address (overrides the config file)
//!   --port <PORT>          Listen port (overrides the config file)
//!   --capture-dir <DIR>    Where captures and downloads are written
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable             | Description                     |
//! |----------------------|---------------------------------|
//! | `TETHER_CONFIG`      | Config file path                |
//! | `TETHER_HOST`        | Bind address                    |
//! | `TETHER_PORT`        | Listen port                     |
//! | `TETHER_CAPTURE_DIR` | Capture directory               |
//! | `RUST_LOG`           | Log filter (overrides log_level)|
//!
//! # Architecture overview
//!
//! ```text
//! stdin ──▶ console ──▶ SessionRegistry ──▶ Session ──▶ agent
//!                                              │
//! agent ──▶ Session (receive loop) ──▶ ResponseDispatcher ──▶ EventHub ──▶ stdout
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tether_server::application::console::{
    execute, parse_console_line, ConsoleError, ConsoleOutcome,
};
use tether_server::application::dispatch::ResponseDispatcher;
use tether_server::application::events::{EventHub, ServerEvent};
use tether_server::application::session_registry::SessionRegistry;
use tether_server::infrastructure::network::TetherServer;
use tether_server::infrastructure::storage::config::{self, ServerConfig};
use tether_server::infrastructure::storage::CaptureStore;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Tether server.
#[derive(Debug, Parser)]
#[command(
    name = "tether-server",
    about = "Accepts Tether agents and drives them from an operator console",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    ///
    /// Defaults to `server.toml` in the platform config directory.  A missing
    /// file means "use the defaults".
    #[arg(long, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind, e.g. `0.0.0.0` or `127.0.0.1`.
    #[arg(long, env = "TETHER_HOST")]
    host: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "TETHER_PORT")]
    port: Option<u16>,

    /// Directory for screenshots, photos, and downloads.
    #[arg(long, env = "TETHER_CAPTURE_DIR")]
    capture_dir: Option<PathBuf>,
}

impl Cli {
    /// Loads the config file and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed.
    fn load_config(&self) -> anyhow::Result<ServerConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => config::load_config().context("failed to load config")?,
        };
        self.apply_overrides(&mut cfg);
        Ok(cfg)
    }

    fn apply_overrides(&self, cfg: &mut ServerConfig) {
        if let Some(host) = &self.host {
            cfg.server.bind_address = host.clone();
        }
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(dir) = &self.capture_dir {
            cfg.storage.capture_dir = dir.clone();
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = cli.load_config()?;

    // `RUST_LOG` wins; otherwise the config file's log level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.server.log_level)),
        )
        .init();

    let settings = cfg
        .to_server_settings()
        .context("invalid [server] configuration")?;
    info!(
        "tether server starting, bind={}, captures={}",
        settings.bind_addr,
        cfg.storage.capture_dir.display()
    );

    let registry = Arc::new(SessionRegistry::new());
    let (hub, events) = EventHub::new();
    let store = CaptureStore::new(cfg.storage.capture_dir.clone());
    let dispatcher = Arc::new(ResponseDispatcher::new(Arc::new(store), Arc::new(hub)));

    let server = TetherServer::bind(settings, Arc::clone(&registry), dispatcher)
        .await
        .context("failed to start listener")?;

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_signal = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_signal.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    tokio::spawn(print_events(events));
    tokio::spawn(run_console(
        spawn_stdin_reader(),
        Arc::clone(&registry),
        Arc::clone(&running),
    ));

    server.run(running).await;

    info!("tether server stopped");
    Ok(())
}

// ── Front end ─────────────────────────────────────────────────────────────────

async fn print_events(mut events: mpsc::UnboundedReceiver<ServerEvent>) {
    while let Some(event) = events.recv().await {
        if matches!(event, ServerEvent::Heartbeat { .. }) {
            continue;
        }
        println!("{event}");
    }
}

/// Reads stdin on a plain thread; a blocked read never holds up runtime
/// shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

async fn run_console(
    mut lines: mpsc::UnboundedReceiver<String>,
    registry: Arc<SessionRegistry>,
    running: Arc<AtomicBool>,
) {
    println!("type `help` for commands");
    while let Some(line) = lines.recv().await {
        let cmd = match parse_console_line(&line) {
            Ok(cmd) => cmd,
            Err(ConsoleError::Empty) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match execute(cmd, &registry).await {
            ConsoleOutcome::Continue(text) => {
                if !text.is_empty() {
                    println!("{text}");
                }
            }
            ConsoleOutcome::Exit => {
                running.store(false, Ordering::Relaxed);
                return;
            }
        }
    }
    warn!("stdin closed; console disabled (Ctrl+C stops the server)");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
