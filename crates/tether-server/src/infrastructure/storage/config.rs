//! TOML-based configuration for the server.
//!
//! Reads `ServerConfig` from an explicit path or from the platform config
//! file:
//! - Windows:  `%APPDATA%\Tether\server.toml`
//! - Linux:    `~/.config/tether/server.toml`
//! - macOS:    `~/Library/Application Support/Tether/server.toml`
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 4444
//! log_level = "info"
//!
//! [session]
//! heartbeat_interval_secs = 30
//! max_missed_heartbeats = 0      # 0 = never evict a silent agent
//! max_line_bytes = 33554432
//! max_decode_failures = 0        # 0 = tolerate any number
//! write_timeout_secs = 30
//!
//! [storage]
//! capture_dir = "captures"
//! ```
//!
//! # Serde default values
//!
//! Every field has a `#[serde(default = "...")]` helper and every section is
//! `#[serde(default)]`, so a missing file, a missing section, or a missing
//! field all fall back to the values above.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tether_core::protocol::DEFAULT_MAX_LINE_BYTES;
use tether_core::{DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_PORT};
use thiserror::Error;

use crate::infrastructure::network::{
    HeartbeatSettings, ServerSettings, SessionSettings, DEFAULT_WRITE_TIMEOUT,
};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `bind_address` is not an IP address.
    #[error("invalid bind address {0:?}")]
    BindAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Listener and logging settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ListenConfig {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Per-session limits.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Missed heartbeats before eviction; `0` disables eviction.
    #[serde(default)]
    pub max_missed_heartbeats: u32,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Consecutive undecodable lines before the session is closed; `0`
    /// disables the limit.
    #[serde(default)]
    pub max_decode_failures: u32,
    /// Seconds one outbound line may take to write before the session is
    /// torn down.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
}

/// Where captures and downloads are written.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_capture_dir")]
    pub capture_dir: PathBuf,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}
fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}
fn default_write_timeout_secs() -> u64 {
    DEFAULT_WRITE_TIMEOUT.as_secs()
}
fn default_capture_dir() -> PathBuf {
    PathBuf::from("captures")
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            max_missed_heartbeats: 0,
            max_line_bytes: default_max_line_bytes(),
            max_decode_failures: 0,
            write_timeout_secs: default_write_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capture_dir: default_capture_dir(),
        }
    }
}

impl ServerConfig {
    /// Converts the on-disk schema into runtime settings.
    ///
    /// A zero heartbeat interval or write timeout is raised to one second.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BindAddress`] if `bind_address` is not an IP.
    pub fn to_server_settings(&self) -> Result<ServerSettings, ConfigError> {
        let ip: IpAddr = self
            .server
            .bind_address
            .trim()
            .parse()
            .map_err(|_| ConfigError::BindAddress(self.server.bind_address.clone()))?;
        Ok(ServerSettings {
            bind_addr: SocketAddr::new(ip, self.server.port),
            session: SessionSettings {
                heartbeat: HeartbeatSettings {
                    interval: Duration::from_secs(self.session.heartbeat_interval_secs.max(1)),
                    max_missed: self.session.max_missed_heartbeats,
                },
                max_line_bytes: self.session.max_line_bytes,
                max_decode_failures: self.session.max_decode_failures,
                write_timeout: Duration::from_secs(self.session.write_timeout_secs.max(1)),
            },
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("server.toml"))
}

/// Loads `ServerConfig` from the platform config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<ServerConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `ServerConfig` from `path`, returning `ServerConfig::default()` if
/// the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Resolves the platform config directory including the `Tether` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Tether"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("tether"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Tether")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
