//! Infrastructure layer for the server.
//!
//! Contains OS-facing adapters: the TCP acceptor and per-connection sessions,
//! and file-system storage for captures, downloads, and configuration.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `tether_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
