//! # tether-agent
//!
//! The agent side of Tether: connects to a server, decodes the commands it
//! sends, runs them against local collaborators, and writes one response
//! line per command.
//!
//! - **`application`** – The command dispatcher and the collaborator traits
//!   it depends on.  No sockets here.
//! - **`infrastructure`** – The TCP session loop and the concrete
//!   collaborators (filesystem browser, console dialog, unavailable
//!   capture sources).

pub mod application;
pub mod infrastructure;
