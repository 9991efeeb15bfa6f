//! Protocol module: the format-string codec, message tag/format tables,
//! version negotiation, and typed client-message parsing.

pub mod codec;
pub mod msgs;
pub mod parse;
pub mod version;

pub use codec::{encoded_len, readf, writef, CodecError, Item, Value};
pub use parse::{parse_client_message, ClientMessage, ParseError};
pub use version::ProtocolVersion;
