//! Decode-time failure taxonomy.
//!
//! `NeedMore` is not an error in the sense of a broken connection: the
//! decoder distinguishes it from the others so the caller knows to keep
//! accumulating bytes rather than tear down the transport.

use thiserror::Error;

use crate::packet::Type;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DecodeError {
    /// The remaining-length varint used more than 4 continuation bytes.
    #[error("malformed remaining-length varint")]
    MalformedVarint,

    /// A reserved flag bit was set when the spec requires it to be zero,
    /// an unknown packet type was seen, or a structural rule was violated
    /// (e.g. Subscribe with zero topic filters).
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Remaining-length exceeded the configured maximum frame size.
    #[error("packet of {0} bytes exceeds the configured maximum of {1} bytes")]
    TooLarge(usize, usize),

    /// Not enough bytes buffered yet to parse a full packet; not fatal.
    #[error("need more bytes")]
    NeedMore,
}

impl DecodeError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DecodeError::NeedMore)
    }

    pub(crate) fn unexpected_type(raw: u8) -> Self {
        DecodeError::ProtocolViolation(match raw {
            0 | 15 => "reserved packet type",
            _ => "unknown packet type",
        })
    }

    pub(crate) fn reserved_flags(ty: Type) -> Self {
        let _ = ty;
        DecodeError::ProtocolViolation("reserved flag bits must be zero")
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum EncodeError {
    /// The caller-provided buffer was not exactly `totalSize` bytes.
    #[error("buffer size {0} does not match the estimated size {1}")]
    BufferSizeMismatch(usize, usize),

    /// A string or binary field is longer than the 16-bit wire length prefix
    /// can represent (65535 bytes).
    #[error("{0} is {1} bytes, which exceeds the 65535-byte wire length limit")]
    FieldTooLong(&'static str, usize),
}
