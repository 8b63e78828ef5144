//! Protocol module containing the wire unit, the JSON line codec, stream
//! reassembly, and the typed command/response views.

pub mod codec;
pub mod commands;
pub mod framing;
pub mod message;
pub mod payloads;
pub mod responses;

pub use codec::{decode_message, encode_command, encode_message, encode_response};
pub use codec::{DecodeFailure, EncodeError};
pub use commands::{Command, CommandError, DialogKind};
pub use framing::{FrameError, LineReassembler, DEFAULT_MAX_LINE_BYTES};
pub use message::{Message, MessageKind};
pub use responses::{Response, ResponseBody, ResponseError, STATUS_OK};
