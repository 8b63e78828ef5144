//! Application layer: what the agent does with each command.
//!
//! Depends only on `tether-core` and the collaborator traits defined here,
//! so the dispatcher can be tested with mocks and an in-memory sink.

pub mod collaborators;
pub mod handle_commands;
