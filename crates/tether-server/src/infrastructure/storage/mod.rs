//! Storage infrastructure: configuration and capture persistence.
//!
//! - **`config`** – Reads the TOML configuration file from the platform
//!   config directory (or an explicit path), falling back to defaults when
//!   the file does not exist yet.
//!
//! - **`captures`** – Writes decoded screenshots, photos, and downloaded
//!   files under the capture directory.

pub mod captures;
pub mod config;

pub use captures::CaptureStore;
