//! Format-string binary codec for screenspan protocol messages.
//!
//! Every message is described by a small template string, e.g. the enter
//! message is `"CINN%2i%2i%4i%2i"`: the literal four-byte tag `CINN`
//! followed by two 2-byte integers, one 4-byte integer, and another 2-byte
//! integer. Directives:
//!
//! ```text
//! %1i / %2i / %4i   fixed-width big-endian unsigned integer
//! %1I / %2I / %4I   integer list: 4-byte count, then count integers
//! %s                byte string: 4-byte length, then raw bytes
//! %%                literal percent sign
//! ```
//!
//! Characters outside a directive are literals: written verbatim by
//! [`writef`] and matched byte-for-byte by [`readf`] (a mismatch is a
//! framing error, not a silent skip).
//!
//! [`writef`] computes the exact encoded size first, serialises into a
//! single buffer, and writes it in one `write_all` call. [`readf`] consumes
//! the stream strictly left-to-right, so on error the stream position is
//! exactly at the offending byte.

use std::io::{Read, Write};

use thiserror::Error;

/// Longest permitted `%s` field (and integer-list element count).
///
/// Prevents a malformed length prefix from allocating gigabytes.
pub const MAX_FIELD_LENGTH: u32 = 4 * 1024 * 1024;

/// Errors produced while encoding or decoding a message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The peer closed the stream before the format string was satisfied.
    #[error("unexpected end of stream")]
    Eof,

    /// A stream byte did not match a literal character of the format string.
    #[error("framing mismatch: expected byte 0x{expected:02x}, got 0x{actual:02x}")]
    LiteralMismatch { expected: u8, actual: u8 },

    /// The format string itself is malformed (unknown directive).
    #[error("invalid format directive '%{0}'")]
    BadDirective(char),

    /// The format string ended in the middle of a `%...` directive.
    #[error("format string truncated inside a directive")]
    TruncatedFormat,

    /// An argument's type does not match its directive.
    #[error("argument {index} does not match directive %{size}{kind}")]
    ArgumentMismatch { index: usize, size: u8, kind: char },

    /// Fewer arguments were supplied than the format string requires.
    #[error("missing argument for directive %{size}{kind}")]
    MissingArgument { size: u8, kind: char },

    /// A length prefix exceeded [`MAX_FIELD_LENGTH`].
    #[error("field of {len} bytes exceeds the {max}-byte limit")]
    FieldTooLarge { len: u32, max: u32 },

    /// Underlying I/O failure other than a clean end-of-stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One value to encode, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub enum Item<'a> {
    U8(u8),
    U16(u16),
    U32(u32),
    Bytes(&'a [u8]),
    List(&'a [u32]),
}

impl<'a> Item<'a> {
    fn as_int(&self) -> Option<u32> {
        match *self {
            Item::U8(v) => Some(u32::from(v)),
            Item::U16(v) => Some(u32::from(v)),
            Item::U32(v) => Some(v),
            _ => None,
        }
    }
}

/// One decoded value, typed by the directive that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    Bytes(Vec<u8>),
    List(Vec<u32>),
}

impl Value {
    pub fn as_u8(&self) -> Option<u8> {
        match *self {
            Value::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match *self {
            Value::U16(v) => Some(v),
            _ => None,
        }
    }

    /// Signed view of a 2-byte integer (coordinates and deltas are i16 on
    /// the wire).
    pub fn as_i16(&self) -> Option<i16> {
        self.as_u16().map(|v| v as i16)
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Value::U32(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// A parsed `%` directive: integer, integer list, or byte string.
enum Directive {
    Int(u8),
    List(u8),
    Str,
}

/// Iterates a format string yielding literal bytes and directives.
///
/// `%%` is reported as a literal `%` byte.
enum Token {
    Literal(u8),
    Directive(Directive),
}

struct FormatScanner<'f> {
    rest: std::slice::Iter<'f, u8>,
}

impl<'f> FormatScanner<'f> {
    fn new(fmt: &'f str) -> Self {
        Self {
            rest: fmt.as_bytes().iter(),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, CodecError> {
        let Some(&byte) = self.rest.next() else {
            return Ok(None);
        };
        if byte != b'%' {
            return Ok(Some(Token::Literal(byte)));
        }
        let &selector = self.rest.next().ok_or(CodecError::TruncatedFormat)?;
        match selector {
            b'%' => Ok(Some(Token::Literal(b'%'))),
            b's' => Ok(Some(Token::Directive(Directive::Str))),
            b'1' | b'2' | b'4' => {
                let size = selector - b'0';
                let &kind = self.rest.next().ok_or(CodecError::TruncatedFormat)?;
                match kind {
                    b'i' => Ok(Some(Token::Directive(Directive::Int(size)))),
                    b'I' => Ok(Some(Token::Directive(Directive::List(size)))),
                    other => Err(CodecError::BadDirective(char::from(other))),
                }
            }
            other => Err(CodecError::BadDirective(char::from(other))),
        }
    }
}

fn push_int(buf: &mut Vec<u8>, value: u32, size: u8) {
    match size {
        1 => buf.push((value & 0xff) as u8),
        2 => buf.extend_from_slice(&((value & 0xffff) as u16).to_be_bytes()),
        _ => buf.extend_from_slice(&value.to_be_bytes()),
    }
}

/// Returns the exact number of bytes [`writef`] will produce.
///
/// # Errors
///
/// Fails on a malformed format string or an argument/directive mismatch,
/// without writing anything.
pub fn encoded_len(fmt: &str, args: &[Item<'_>]) -> Result<usize, CodecError> {
    let mut scanner = FormatScanner::new(fmt);
    let mut len = 0usize;
    let mut index = 0usize;
    while let Some(token) = scanner.next_token()? {
        match token {
            Token::Literal(_) => len += 1,
            Token::Directive(directive) => {
                let item = next_arg(args, index, &directive)?;
                index += 1;
                match directive {
                    Directive::Int(size) => len += usize::from(size),
                    Directive::List(size) => {
                        let Item::List(list) = item else {
                            return Err(mismatch(index - 1, &directive));
                        };
                        len += 4 + list.len() * usize::from(size);
                    }
                    Directive::Str => {
                        let Item::Bytes(bytes) = item else {
                            return Err(mismatch(index - 1, &directive));
                        };
                        len += 4 + bytes.len();
                    }
                }
            }
        }
    }
    Ok(len)
}

fn directive_desc(directive: &Directive) -> (u8, char) {
    match directive {
        Directive::Int(size) => (*size, 'i'),
        Directive::List(size) => (*size, 'I'),
        Directive::Str => (0, 's'),
    }
}

fn mismatch(index: usize, directive: &Directive) -> CodecError {
    let (size, kind) = directive_desc(directive);
    CodecError::ArgumentMismatch { index, size, kind }
}

fn next_arg<'a, 'b>(
    args: &'a [Item<'b>],
    index: usize,
    directive: &Directive,
) -> Result<&'a Item<'b>, CodecError> {
    args.get(index).ok_or_else(|| {
        let (size, kind) = directive_desc(directive);
        CodecError::MissingArgument { size, kind }
    })
}

/// Encodes `args` per `fmt` and writes the result in one blocking
/// write-until-complete call.
///
/// # Errors
///
/// Returns [`CodecError`] on a malformed format string, mismatched
/// arguments, an oversized `%s` field, or an I/O failure. Nothing is
/// written unless encoding succeeded in full.
pub fn writef<W: Write>(out: &mut W, fmt: &str, args: &[Item<'_>]) -> Result<(), CodecError> {
    let size = encoded_len(fmt, args)?;
    let mut buf = Vec::with_capacity(size);

    let mut scanner = FormatScanner::new(fmt);
    let mut index = 0usize;
    while let Some(token) = scanner.next_token()? {
        match token {
            Token::Literal(byte) => buf.push(byte),
            Token::Directive(directive) => {
                let item = next_arg(args, index, &directive)?;
                index += 1;
                match directive {
                    Directive::Int(size) => {
                        let value = item.as_int().ok_or_else(|| mismatch(index - 1, &directive))?;
                        push_int(&mut buf, value, size);
                    }
                    Directive::List(size) => {
                        let Item::List(list) = item else {
                            return Err(mismatch(index - 1, &directive));
                        };
                        push_int(&mut buf, list.len() as u32, 4);
                        for &value in *list {
                            push_int(&mut buf, value, size);
                        }
                    }
                    Directive::Str => {
                        let Item::Bytes(bytes) = item else {
                            return Err(mismatch(index - 1, &directive));
                        };
                        let len = bytes.len() as u32;
                        if len > MAX_FIELD_LENGTH {
                            return Err(CodecError::FieldTooLarge {
                                len,
                                max: MAX_FIELD_LENGTH,
                            });
                        }
                        push_int(&mut buf, len, 4);
                        buf.extend_from_slice(bytes);
                    }
                }
            }
        }
    }

    debug_assert_eq!(buf.len(), size);
    out.write_all(&buf)?;
    Ok(())
}

fn read_bytes<R: Read>(input: &mut R, n: usize) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![0u8; n];
    input.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CodecError::Eof
        } else {
            CodecError::Io(e)
        }
    })?;
    Ok(buf)
}

fn read_int<R: Read>(input: &mut R, size: u8) -> Result<u32, CodecError> {
    let bytes = read_bytes(input, usize::from(size))?;
    let mut value = 0u32;
    for byte in bytes {
        value = (value << 8) | u32::from(byte);
    }
    Ok(value)
}

/// Decodes values from `input` per `fmt`, matching literals exactly.
///
/// Returns one [`Value`] per directive, in format-string order.
///
/// # Errors
///
/// [`CodecError::LiteralMismatch`] if a stream byte differs from a format
/// literal, [`CodecError::Eof`] if the stream ends early, or
/// [`CodecError::FieldTooLarge`] on an oversized length prefix.
pub fn readf<R: Read>(input: &mut R, fmt: &str) -> Result<Vec<Value>, CodecError> {
    let mut scanner = FormatScanner::new(fmt);
    let mut values = Vec::new();
    while let Some(token) = scanner.next_token()? {
        match token {
            Token::Literal(expected) => {
                let actual = read_bytes(input, 1)?[0];
                if actual != expected {
                    return Err(CodecError::LiteralMismatch { expected, actual });
                }
            }
            Token::Directive(Directive::Int(size)) => {
                let value = read_int(input, size)?;
                values.push(match size {
                    1 => Value::U8(value as u8),
                    2 => Value::U16(value as u16),
                    _ => Value::U32(value),
                });
            }
            Token::Directive(Directive::List(size)) => {
                let count = read_int(input, 4)?;
                if count > MAX_FIELD_LENGTH {
                    return Err(CodecError::FieldTooLarge {
                        len: count,
                        max: MAX_FIELD_LENGTH,
                    });
                }
                let mut list = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    list.push(read_int(input, size)?);
                }
                values.push(Value::List(list));
            }
            Token::Directive(Directive::Str) => {
                let len = read_int(input, 4)?;
                if len > MAX_FIELD_LENGTH {
                    return Err(CodecError::FieldTooLarge {
                        len,
                        max: MAX_FIELD_LENGTH,
                    });
                }
                values.push(Value::Bytes(read_bytes(input, len as usize)?));
            }
        }
    }
    Ok(values)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(fmt: &str, args: &[Item<'_>]) -> Vec<Value> {
        let mut buf = Vec::new();
        writef(&mut buf, fmt, args).expect("writef must succeed");
        assert_eq!(buf.len(), encoded_len(fmt, args).unwrap());
        let mut cursor = buf.as_slice();
        let values = readf(&mut cursor, fmt).expect("readf must succeed");
        assert!(cursor.is_empty(), "readf must consume the whole message");
        values
    }

    #[test]
    fn test_roundtrip_every_integer_width() {
        let values = roundtrip(
            "TEST%1i%2i%4i",
            &[Item::U8(0xab), Item::U16(0xbeef), Item::U32(0xdead_beef)],
        );
        assert_eq!(
            values,
            vec![Value::U8(0xab), Value::U16(0xbeef), Value::U32(0xdead_beef)]
        );
    }

    #[test]
    fn test_roundtrip_byte_string() {
        let values = roundtrip("DCLP%1i%4i%s", &[
            Item::U8(0),
            Item::U32(7),
            Item::Bytes(b"hello\x00!"),
        ]);
        assert_eq!(values[2], Value::Bytes(b"hello\x00!".to_vec()));
    }

    #[test]
    fn test_roundtrip_zero_length_byte_string() {
        let values = roundtrip("DCLP%1i%4i%s", &[Item::U8(1), Item::U32(0), Item::Bytes(b"")]);
        assert_eq!(values[2], Value::Bytes(Vec::new()));
    }

    #[test]
    fn test_roundtrip_integer_list() {
        let options = [0x1234u32, 5, 0];
        let values = roundtrip("DSOP%4I", &[Item::List(&options)]);
        assert_eq!(values, vec![Value::List(vec![0x1234, 5, 0])]);
    }

    #[test]
    fn test_roundtrip_empty_integer_list() {
        let values = roundtrip("DSOP%4I", &[Item::List(&[])]);
        assert_eq!(values, vec![Value::List(Vec::new())]);
    }

    #[test]
    fn test_percent_escape_is_a_literal() {
        let values = roundtrip("AB%%%1i", &[Item::U8(9)]);
        assert_eq!(values, vec![Value::U8(9)]);

        let mut buf = Vec::new();
        writef(&mut buf, "AB%%%1i", &[Item::U8(9)]).unwrap();
        assert_eq!(buf, b"AB%\x09");
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut buf = Vec::new();
        writef(&mut buf, "%2i%4i", &[Item::U16(0x0102), Item::U32(0x0304_0506)]).unwrap();
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn test_literal_mismatch_is_a_framing_error() {
        let mut stream: &[u8] = b"COUX";
        let err = readf(&mut stream, "COUT").unwrap_err();
        assert!(matches!(
            err,
            CodecError::LiteralMismatch {
                expected: b'T',
                actual: b'X'
            }
        ));
    }

    #[test]
    fn test_truncated_stream_is_an_eof_error() {
        // Arrange: a CINN message missing its last two bytes.
        let mut full = Vec::new();
        writef(
            &mut full,
            "CINN%2i%2i%4i%2i",
            &[Item::U16(1), Item::U16(2), Item::U32(3), Item::U16(4)],
        )
        .unwrap();
        full.truncate(full.len() - 2);

        // Act / Assert
        let mut stream = full.as_slice();
        assert!(matches!(
            readf(&mut stream, "CINN%2i%2i%4i%2i").unwrap_err(),
            CodecError::Eof
        ));
    }

    #[test]
    fn test_eof_mid_string_body() {
        let mut buf = Vec::new();
        writef(&mut buf, "%s", &[Item::Bytes(b"abcdef")]).unwrap();
        buf.truncate(buf.len() - 3);
        let mut stream = buf.as_slice();
        assert!(matches!(readf(&mut stream, "%s").unwrap_err(), CodecError::Eof));
    }

    #[test]
    fn test_unknown_directive_rejected() {
        let mut buf = Vec::new();
        assert!(matches!(
            writef(&mut buf, "%2x", &[Item::U16(0)]).unwrap_err(),
            CodecError::BadDirective('x')
        ));
        assert!(buf.is_empty(), "nothing may be written on a format error");
    }

    #[test]
    fn test_truncated_format_rejected() {
        let mut buf = Vec::new();
        assert!(matches!(
            writef(&mut buf, "AB%2", &[Item::U16(0)]).unwrap_err(),
            CodecError::TruncatedFormat
        ));
    }

    #[test]
    fn test_missing_argument_rejected_before_write() {
        let mut buf = Vec::new();
        assert!(matches!(
            writef(&mut buf, "%2i%2i", &[Item::U16(1)]).unwrap_err(),
            CodecError::MissingArgument { size: 2, kind: 'i' }
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_length_prefix_rejected_on_read() {
        let mut stream: &[u8] = &[0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            readf(&mut stream, "%s").unwrap_err(),
            CodecError::FieldTooLarge { .. }
        ));
    }

    #[test]
    fn test_signed_coordinate_view() {
        let mut buf = Vec::new();
        writef(&mut buf, "%2i", &[Item::U16(-5i16 as u16)]).unwrap();
        let values = readf(&mut buf.as_slice(), "%2i").unwrap();
        assert_eq!(values[0].as_i16(), Some(-5));
    }
}
