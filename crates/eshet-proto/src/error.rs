//! Protocol error type.

use core::fmt;

/// A violation of the ESHET wire protocol.
///
/// Any of these observed on a live connection means the connection can no
/// longer be trusted and must be discarded; the session treats them like a
/// transport failure and reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A frame did not start with the magic byte.
    BadMagic(u8),
    /// A decode would read past the end of the frame.
    Truncated,
    /// Bytes were left over where the frame should have ended.
    TrailingBytes,
    /// An encoded body would not fit the 16-bit length field.
    BodyTooLong(usize),
    /// A path field was not NUL-terminated within the frame.
    UnterminatedPath,
    /// A path field was not valid UTF-8.
    InvalidPath,
    /// A MessagePack value failed to decode.
    ValueDecode(String),
    /// An opcode the client has no mapping for.
    UnknownOpcode(u8),
    /// A reply frame carried a correlation id with no waiter.
    UnknownId(u16),
    /// A reply variant did not match what the waiter expects.
    ReplyKindMismatch {
        id: u16,
        expected: &'static str,
        got: &'static str,
    },
    /// An unsolicited delivery for a path with no registration.
    UnknownPath(String),
    /// A structurally valid message arrived where it makes no sense.
    UnexpectedMessage(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic(byte) => write!(f, "bad frame magic: {byte:#04x}"),
            Self::Truncated => write!(f, "frame truncated"),
            Self::TrailingBytes => write!(f, "trailing bytes after message"),
            Self::BodyTooLong(len) => {
                write!(f, "frame body of {len} bytes exceeds the 16-bit length")
            }
            Self::UnterminatedPath => write!(f, "path not NUL-terminated"),
            Self::InvalidPath => write!(f, "path not valid UTF-8"),
            Self::ValueDecode(msg) => write!(f, "bad msgpack value: {msg}"),
            Self::UnknownOpcode(op) => write!(f, "unknown opcode {op:#04x}"),
            Self::UnknownId(id) => write!(f, "reply for unknown id {id}"),
            Self::ReplyKindMismatch { id, expected, got } => {
                write!(f, "reply for id {id}: expected {expected}, got {got}")
            }
            Self::UnknownPath(path) => write!(f, "no registration for path {path}"),
            Self::UnexpectedMessage(what) => write!(f, "unexpected message: {what}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
