//! # tether-core
//!
//! Shared library for Tether containing the wire protocol: the JSON line
//! codec, the stream reassembler, and the typed command/response messages.
//!
//! This crate is used by both the server and the agent.
//! It has zero dependencies on OS APIs, async runtimes, or network sockets.
//!
//! # Architecture overview
//!
//! Tether is a remote administration fabric: a server accepts many agent
//! connections and exchanges newline-delimited JSON messages with each one.
//! The server sends *commands* (`{"cmd":"ping"}`) and the agent answers with
//! *responses* (`{"type":"pong","status":"ok"}`).
//!
//! - **`protocol::message`** – The generic wire unit, [`Message`]: a kind, a
//!   tag, a map of extra fields, and an optional payload.
//!
//! - **`protocol::codec`** – Turns one [`Message`] into one JSON line and
//!   back again.
//!
//! - **`protocol::framing`** – TCP delivers an unbounded byte stream, not
//!   lines.  [`LineReassembler`] buffers chunks and hands out complete lines.
//!
//! - **`protocol::commands`** / **`protocol::responses`** – Typed views with
//!   one enum variant per tag, so handlers never poke at untyped maps.
//!
//! - **`protocol::payloads`** – Structured payload shapes (filesystem
//!   results, keystroke batches, dialog answers).

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `tether_core::Message` instead of `tether_core::protocol::message::Message`.
pub use protocol::codec::{
    decode_message, encode_command, encode_message, encode_response, DecodeFailure, EncodeError,
};
pub use protocol::commands::{Command, CommandError, DialogKind};
pub use protocol::framing::{FrameError, LineReassembler};
pub use protocol::message::{Message, MessageKind};
pub use protocol::responses::{Response, ResponseBody, ResponseError};

/// Default TCP port shared by the server bind address and the agent target.
pub const DEFAULT_PORT: u16 = 4444;

/// Size of each transport read, in bytes.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Default interval between liveness probes, in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
