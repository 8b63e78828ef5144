//! Application layer for the server.
//!
//! # What lives here? (for beginners)
//!
//! The application layer decides *what happens* when something arrives, but
//! never touches a socket or the file system itself.  Everything it needs
//! from the outside world is expressed as a trait:
//!
//! - [`session_registry::PeerLink`] is "a connected agent I can send to".
//! - [`dispatch::CaptureSink`] is "somewhere to put decoded images and files".
//!
//! The infrastructure layer provides the real implementations; the unit
//! tests in this layer provide fakes.
//!
//! # Sub-modules
//!
//! - **`session_registry`** – Process-wide map from session id to live
//!   connection.  Used by the acceptor, the console, and shutdown.
//!
//! - **`dispatch`** – Server-side handler table: one arm per response tag.
//!
//! - **`events`** – What the server tells its front end (connections,
//!   captures, answers, errors), routed per session.
//!
//! - **`console`** – Parses and executes operator console lines.

pub mod console;
pub mod dispatch;
pub mod events;
pub mod session_registry;
