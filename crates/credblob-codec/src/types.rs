// Author: Lukas Bower
// Purpose: Define wire types, tags and codec errors for credential blob records.

//! Wire-level types shared by the field codec.

use thiserror::Error;

/// Errors produced while decoding blob records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Buffer ended while a varint still had its continuation bit set.
    #[error("truncated varint at offset {offset}")]
    TruncatedVarint {
        /// Offset at which the varint started.
        offset: usize,
    },
    /// Tag carried a wire type outside {0, 1, 2, 5}.
    #[error("unknown wire type {0}")]
    UnknownWireType(u8),
    /// Tag decoded to field number zero.
    #[error("field number zero at offset {offset}")]
    ZeroFieldNumber {
        /// Offset of the offending tag.
        offset: usize,
    },
    /// Field number does not fit the 29-bit tag space.
    #[error("field number {0} out of range")]
    FieldOutOfRange(u64),
    /// Record payload extends past the end of the buffer.
    #[error("truncated record: needs {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the record declares.
        needed: usize,
        /// Bytes remaining in the buffer.
        available: usize,
    },
    /// A string sub-field was not valid UTF-8.
    #[error("invalid utf8 in field {0}")]
    InvalidUtf8(u32),
    /// A required sub-field was absent.
    #[error("missing field {0}")]
    MissingField(u32),
}

/// Largest field number representable in a tag.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// Payload encoding carried in the low three bits of a tag.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    /// Base-128 varint.
    Varint = 0,
    /// Eight little-endian bytes.
    Fixed64 = 1,
    /// Varint length followed by that many bytes.
    LengthDelimited = 2,
    /// Four little-endian bytes.
    Fixed32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => WireType::Varint,
            1 => WireType::Fixed64,
            2 => WireType::LengthDelimited,
            5 => WireType::Fixed32,
            other => return Err(CodecError::UnknownWireType(other)),
        })
    }
}

impl From<WireType> for u8 {
    fn from(value: WireType) -> Self {
        value as u8
    }
}

/// Decoded record tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    /// Field number, always non-zero.
    pub field: u32,
    /// Payload wire type.
    pub wire: WireType,
}

impl Tag {
    /// Build a tag for `field` carrying `wire`.
    #[must_use]
    pub const fn new(field: u32, wire: WireType) -> Self {
        Self { field, wire }
    }

    /// Raw tag value `(field << 3) | wire`.
    #[must_use]
    pub fn raw(self) -> u64 {
        (u64::from(self.field) << 3) | u64::from(u8::from(self.wire))
    }
}
