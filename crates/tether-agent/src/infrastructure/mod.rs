//! Infrastructure layer: the TCP session and the host-backed collaborators.

pub mod collaborators;
pub mod network;
