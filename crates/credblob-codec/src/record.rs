// Author: Lukas Bower
// Purpose: Iterate top-level records of a credential blob without decoding payloads.

//! Zero-copy record iteration.

use crate::codec::{read_tag, skip_record};
use crate::{CodecError, Tag};

/// A single top-level record borrowed from the scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    buffer: &'a [u8],
    tag: Tag,
    start: usize,
    payload_start: usize,
    end: usize,
}

impl<'a> Record<'a> {
    /// Decoded tag of the record.
    #[must_use]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Offset of the first tag byte within the scanned buffer.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.start
    }

    /// Full record bytes, tag included, exactly as they appear in the buffer.
    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        &self.buffer[self.start..self.end]
    }

    /// Payload bytes after the tag. For length-delimited records the length
    /// prefix is stripped.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.payload_start..self.end]
    }
}

/// Iterator over the top-level records of a buffer.
///
/// Yields at most one error, after which iteration ends.
#[derive(Debug, Clone)]
pub struct RecordIter<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> RecordIter<'a> {
    /// Start scanning `buffer` from offset zero.
    #[must_use]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    /// Offset of the next record to be decoded.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn decode_next(&self) -> Result<Record<'a>, CodecError> {
        let start = self.offset;
        let (tag, after_tag) = read_tag(self.buffer, start)?;
        let end = skip_record(self.buffer, after_tag, tag.wire.into())?;
        let payload_start = match tag.wire {
            crate::WireType::LengthDelimited => end - payload_len(self.buffer, after_tag)?,
            _ => after_tag,
        };
        Ok(Record {
            buffer: self.buffer,
            tag,
            start,
            payload_start,
            end,
        })
    }
}

fn payload_len(buffer: &[u8], offset: usize) -> Result<usize, CodecError> {
    let (len, _) = crate::codec::read_varint(buffer, offset)?;
    usize::try_from(len).map_err(|_| CodecError::Truncated {
        needed: usize::MAX,
        available: buffer.len().saturating_sub(offset),
    })
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<Record<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.buffer.len() {
            return None;
        }
        match self.decode_next() {
            Ok(record) => {
                self.offset = record.end;
                Some(Ok(record))
            }
            Err(err) => {
                self.offset = self.buffer.len();
                Some(Err(err))
            }
        }
    }
}
