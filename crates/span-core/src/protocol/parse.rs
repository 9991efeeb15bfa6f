//! Typed parsing of client-to-server messages.
//!
//! The transport layer delivers whole frames; this module turns a frame
//! into a [`ClientMessage`] by dispatching on the four-byte tag and
//! decoding the payload with [`crate::protocol::codec::readf`]. Messages a
//! well-behaved client never sends (server-to-client tags) come back as
//! [`ParseError::UnexpectedMessage`], which the coordinator answers with
//! `EBAD`.

use thiserror::Error;

use crate::domain::clipboard::ClipboardId;
use crate::domain::topology::ScreenShape;
use crate::protocol::codec::{self, CodecError};
use crate::protocol::msgs;

/// Errors turning a frame into a [`ClientMessage`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// Frame shorter than a tag.
    #[error("frame of {0} bytes is too short to carry a message tag")]
    TooShort(usize),

    /// A tag this server does not recognise at all.
    #[error("unknown message tag {0:?}")]
    UnknownTag(String),

    /// A known tag that a client must not send to the server.
    #[error("client sent server-to-client message {0:?}")]
    UnexpectedMessage(String),

    /// The payload did not decode under the tag's format.
    #[error("malformed {tag:?} payload")]
    Malformed {
        tag: String,
        #[source]
        source: CodecError,
    },

    /// A clipboard id outside the shared set.
    #[error("clipboard id {0} is out of range")]
    BadClipboardId(u8),

    /// Payload decoded but left unconsumed trailing bytes.
    #[error("{tag:?} payload has {extra} trailing bytes")]
    TrailingBytes { tag: String, extra: usize },
}

/// A decoded client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `DINF`: the client's screen shape, jump-zone size, and cursor
    /// position.
    Info {
        shape: ScreenShape,
        jump_zone: i16,
        cursor_x: i16,
        cursor_y: i16,
    },
    /// `CCLP`: the client grabbed a clipboard locally.
    ClipboardGrab { id: ClipboardId, sequence: u32 },
    /// `DCLP`: clipboard contents.
    ClipboardData {
        id: ClipboardId,
        sequence: u32,
        data: Vec<u8>,
    },
    /// `CALV` echoed back by a v1.3+ client.
    KeepAlive,
    /// `CNOP`.
    Noop,
    /// `CBYE`: the client is going away on purpose.
    Close,
}

fn tag_str(tag: [u8; 4]) -> String {
    String::from_utf8_lossy(&tag).into_owned()
}

fn decode(frame: &[u8], tag: [u8; 4], fmt: &str) -> Result<Vec<codec::Value>, ParseError> {
    let mut cursor = frame;
    let values = codec::readf(&mut cursor, fmt).map_err(|source| ParseError::Malformed {
        tag: tag_str(tag),
        source,
    })?;
    if !cursor.is_empty() {
        return Err(ParseError::TrailingBytes {
            tag: tag_str(tag),
            extra: cursor.len(),
        });
    }
    Ok(values)
}

fn malformed(tag: [u8; 4]) -> ParseError {
    ParseError::Malformed {
        tag: tag_str(tag),
        source: CodecError::Eof,
    }
}

fn clipboard_id(raw: u8) -> Result<ClipboardId, ParseError> {
    ClipboardId::from_wire(raw).ok_or(ParseError::BadClipboardId(raw))
}

/// Parses one complete frame into a [`ClientMessage`].
///
/// # Errors
///
/// See [`ParseError`]. `Malformed` and `TrailingBytes` indicate a peer
/// that is not speaking the protocol correctly and warrant disconnection.
pub fn parse_client_message(frame: &[u8]) -> Result<ClientMessage, ParseError> {
    let tag = msgs::tag_of(frame).ok_or(ParseError::TooShort(frame.len()))?;
    match &tag {
        b"DINF" => {
            let v = decode(frame, tag, msgs::D_INFO)?;
            let get = |i: usize| v.get(i).and_then(codec::Value::as_i16).ok_or(malformed(tag));
            let (x, y) = (get(0)?, get(1)?);
            let (w, h) = (get(2)?, get(3)?);
            Ok(ClientMessage::Info {
                shape: ScreenShape::new(i32::from(x), i32::from(y), i32::from(w), i32::from(h)),
                jump_zone: get(4)?,
                cursor_x: get(5)?,
                cursor_y: get(6)?,
            })
        }
        b"CCLP" => {
            let v = decode(frame, tag, msgs::C_CLIPBOARD)?;
            let raw = v.first().and_then(codec::Value::as_u8).ok_or(malformed(tag))?;
            let sequence = v.get(1).and_then(codec::Value::as_u32).ok_or(malformed(tag))?;
            Ok(ClientMessage::ClipboardGrab {
                id: clipboard_id(raw)?,
                sequence,
            })
        }
        b"DCLP" => {
            let mut v = decode(frame, tag, msgs::D_CLIPBOARD)?;
            let data = v
                .pop()
                .and_then(codec::Value::into_bytes)
                .ok_or(malformed(tag))?;
            let raw = v.first().and_then(codec::Value::as_u8).ok_or(malformed(tag))?;
            let sequence = v.get(1).and_then(codec::Value::as_u32).ok_or(malformed(tag))?;
            Ok(ClientMessage::ClipboardData {
                id: clipboard_id(raw)?,
                sequence,
                data,
            })
        }
        b"CALV" => {
            decode(frame, tag, msgs::C_KEEP_ALIVE)?;
            Ok(ClientMessage::KeepAlive)
        }
        b"CNOP" => {
            decode(frame, tag, msgs::C_NOOP)?;
            Ok(ClientMessage::Noop)
        }
        b"CBYE" => {
            decode(frame, tag, msgs::C_CLOSE)?;
            Ok(ClientMessage::Close)
        }
        // Tags the server sends but must never receive.
        b"CINN" | b"COUT" | b"CSEC" | b"CROP" | b"CIAK" | b"QINF" | b"DKDN" | b"DKRP"
        | b"DKUP" | b"DMDN" | b"DMUP" | b"DMMV" | b"DMRM" | b"DMWM" | b"DSOP" | b"EICV"
        | b"EBSY" | b"EUNK" | b"EBAD" => Err(ParseError::UnexpectedMessage(tag_str(tag))),
        _ => Err(ParseError::UnknownTag(tag_str(tag))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
