// Author: Lukas Bower
// Purpose: Read, skip, find, remove and insert top-level records in opaque blobs.

//! Varint/tag primitives and surgical field edits.
//!
//! Scans are permissive: a malformed record ends the scan instead of failing
//! the caller. Edits never re-encode records they leave in place.

use alloc::vec::Vec;

use crate::record::RecordIter;
use crate::{CodecError, Tag, WireType, MAX_FIELD_NUMBER};

/// Decode a base-128 varint starting at `offset`.
///
/// Groups are consumed until a byte without the continuation bit; bits past
/// the 64th are discarded. Returns the value and the offset after the varint.
pub fn read_varint(buf: &[u8], offset: usize) -> Result<(u64, usize), CodecError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut pos = offset;
    while let Some(&byte) = buf.get(pos) {
        pos += 1;
        if shift < 64 {
            value |= u64::from(byte & 0x7f) << shift;
        }
        if byte & 0x80 == 0 {
            return Ok((value, pos));
        }
        shift = shift.saturating_add(7);
    }
    Err(CodecError::TruncatedVarint { offset })
}

/// Decode a record tag at `offset`.
pub fn read_tag(buf: &[u8], offset: usize) -> Result<(Tag, usize), CodecError> {
    let (raw, next) = read_varint(buf, offset)?;
    let wire = WireType::try_from((raw & 0x07) as u8)?;
    let field = raw >> 3;
    if field == 0 {
        return Err(CodecError::ZeroFieldNumber { offset });
    }
    if field > u64::from(MAX_FIELD_NUMBER) {
        return Err(CodecError::FieldOutOfRange(field));
    }
    Ok((Tag::new(field as u32, wire), next))
}

/// Advance past one record payload of wire type `wire` starting at `offset`.
pub fn skip_record(buf: &[u8], offset: usize, wire: u8) -> Result<usize, CodecError> {
    let (start, len) = match WireType::try_from(wire)? {
        WireType::Varint => return read_varint(buf, offset).map(|(_, next)| next),
        WireType::Fixed64 => (offset, 8usize),
        WireType::Fixed32 => (offset, 4usize),
        WireType::LengthDelimited => {
            let (len, next) = read_varint(buf, offset)?;
            let len = usize::try_from(len).unwrap_or(usize::MAX);
            (next, len)
        }
    };
    let available = buf.len().saturating_sub(start);
    if len > available {
        return Err(CodecError::Truncated {
            needed: len,
            available,
        });
    }
    Ok(start + len)
}

/// Return the payload of the first length-delimited record numbered `field`.
///
/// Decode failures end the scan and read as "not found".
#[must_use]
pub fn find_field(buf: &[u8], field: u32) -> Option<&[u8]> {
    RecordIter::new(buf)
        .map_while(Result::ok)
        .find(|record| record.tag().field == field && record.tag().wire == WireType::LengthDelimited)
        .map(|record| record.payload())
}

/// Return the value of the first varint record numbered `field`.
#[must_use]
pub fn find_varint_field(buf: &[u8], field: u32) -> Option<u64> {
    RecordIter::new(buf)
        .map_while(Result::ok)
        .find(|record| record.tag().field == field && record.tag().wire == WireType::Varint)
        .and_then(|record| read_varint(record.payload(), 0).ok())
        .map(|(value, _)| value)
}

/// Copy `buf` without any record numbered `field`.
///
/// Kept records are copied verbatim. If a record fails to decode, the rest of
/// the buffer from that point is carried over untouched and the scan stops.
#[must_use]
pub fn remove_field(buf: &[u8], field: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len());
    let mut records = RecordIter::new(buf);
    loop {
        let resume = records.offset();
        match records.next() {
            None => break,
            Some(Ok(record)) => {
                if record.tag().field != field {
                    out.extend_from_slice(record.bytes());
                }
            }
            Some(Err(_)) => {
                out.extend_from_slice(&buf[resume..]);
                break;
            }
        }
    }
    out
}

/// Append a length-delimited record numbered `field` to a copy of `buf`.
#[must_use]
pub fn insert_field(buf: &[u8], field: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() + payload.len() + 10);
    out.extend_from_slice(buf);
    out.extend_from_slice(&encode_length_delimited(field, payload));
    out
}

/// Remove every record numbered `field` and append a fresh one carrying `payload`.
#[must_use]
pub fn replace_field(buf: &[u8], field: u32, payload: &[u8]) -> Vec<u8> {
    insert_field(&remove_field(buf, field), field, payload)
}

/// Append `value` as a base-128 varint.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Append the tag for `field`/`wire`.
pub fn encode_tag(field: u32, wire: WireType, out: &mut Vec<u8>) {
    debug_assert!(field != 0 && field <= MAX_FIELD_NUMBER);
    encode_varint(Tag::new(field, wire).raw(), out);
}

/// Encode `tag(field, 2) + varint(len) + inner`.
#[must_use]
pub fn encode_length_delimited(field: u32, inner: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(inner.len() + 10);
    encode_tag(field, WireType::LengthDelimited, &mut out);
    encode_varint(inner.len() as u64, &mut out);
    out.extend_from_slice(inner);
    out
}

/// Encode `tag(field, 0) + varint(value)`.
#[must_use]
pub fn encode_varint_field(field: u32, value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(11);
    encode_tag(field, WireType::Varint, &mut out);
    encode_varint(value, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn sample() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode_varint_field(1, 150));
        buf.extend_from_slice(&encode_length_delimited(6, b"old-credential"));
        // field 3, fixed32
        buf.extend_from_slice(&[0x1d, 0xde, 0xad, 0xbe, 0xef]);
        // field 4, fixed64
        buf.extend_from_slice(&[0x21, 1, 2, 3, 4, 5, 6, 7, 8]);
        buf.extend_from_slice(&encode_length_delimited(9, b"opaque sibling"));
        buf
    }

    #[test]
    fn varint_multi_byte() {
        let mut out = Vec::new();
        encode_varint(300, &mut out);
        assert_eq!(out, vec![0xac, 0x02]);
        assert_eq!(read_varint(&out, 0), Ok((300, 2)));
    }

    #[test]
    fn varint_truncated() {
        assert_eq!(
            read_varint(&[0x80, 0x80], 0),
            Err(CodecError::TruncatedVarint { offset: 0 })
        );
        assert_eq!(
            read_varint(&[], 0),
            Err(CodecError::TruncatedVarint { offset: 0 })
        );
    }

    #[test]
    fn varint_overlong_groups_consumed() {
        let mut buf = vec![0xff; 12];
        buf.push(0x01);
        let (_, next) = read_varint(&buf, 0).expect("overlong varint");
        assert_eq!(next, 13);
    }

    #[test]
    fn skip_rejects_unknown_wire_type() {
        assert_eq!(skip_record(&[0, 0], 0, 3), Err(CodecError::UnknownWireType(3)));
        assert_eq!(skip_record(&[0, 0], 0, 7), Err(CodecError::UnknownWireType(7)));
    }

    #[test]
    fn skip_each_wire_type() {
        assert_eq!(skip_record(&[0x96, 0x01], 0, 0), Ok(2));
        assert_eq!(skip_record(&[0; 8], 0, 1), Ok(8));
        assert_eq!(skip_record(&[3, b'a', b'b', b'c'], 0, 2), Ok(4));
        assert_eq!(skip_record(&[0; 4], 0, 5), Ok(4));
        assert!(matches!(
            skip_record(&[0; 3], 0, 5),
            Err(CodecError::Truncated { needed: 4, available: 3 })
        ));
    }

    #[test]
    fn find_returns_first_length_delimited_match() {
        let buf = sample();
        assert_eq!(find_field(&buf, 6), Some(&b"old-credential"[..]));
        assert_eq!(find_field(&buf, 9), Some(&b"opaque sibling"[..]));
        // field 1 is a varint, not length-delimited
        assert_eq!(find_field(&buf, 1), None);
        assert_eq!(find_varint_field(&buf, 1), Some(150));
    }

    #[test]
    fn empty_buffer_has_no_fields() {
        assert_eq!(find_field(&[], 6), None);
        assert!(remove_field(&[], 6).is_empty());
    }

    #[test]
    fn remove_preserves_siblings_verbatim() {
        let buf = sample();
        let removed = remove_field(&buf, 6);
        let mut expected = Vec::new();
        expected.extend_from_slice(&encode_varint_field(1, 150));
        expected.extend_from_slice(&[0x1d, 0xde, 0xad, 0xbe, 0xef]);
        expected.extend_from_slice(&[0x21, 1, 2, 3, 4, 5, 6, 7, 8]);
        expected.extend_from_slice(&encode_length_delimited(9, b"opaque sibling"));
        assert_eq!(removed, expected);
    }

    #[test]
    fn remove_absent_field_is_identity() {
        let buf = sample();
        assert_eq!(remove_field(&buf, 42), buf);
    }

    #[test]
    fn remove_drops_every_occurrence() {
        let mut buf = sample();
        buf.extend_from_slice(&encode_length_delimited(6, b"duplicate"));
        let removed = remove_field(&buf, 6);
        assert_eq!(find_field(&removed, 6), None);
    }

    #[test]
    fn zero_field_number_ends_scan() {
        let mut buf = encode_length_delimited(2, b"ok");
        buf.extend_from_slice(&[0x02, 0x01, b'x']);
        buf.extend_from_slice(&encode_length_delimited(6, b"hidden"));
        assert_eq!(find_field(&buf, 2), Some(&b"ok"[..]));
        assert_eq!(find_field(&buf, 6), None);
        // the malformed tail is carried over untouched
        assert_eq!(remove_field(&buf, 2), buf[4..].to_vec());
    }

    #[test]
    fn malformed_trailing_byte_is_end_of_records() {
        let mut buf = encode_length_delimited(6, b"cred");
        buf.push(0x80);
        assert_eq!(find_field(&buf, 6), Some(&b"cred"[..]));
        assert_eq!(find_field(&buf, 7), None);
        assert_eq!(remove_field(&buf, 6), vec![0x80]);
    }

    #[test]
    fn replace_moves_field_to_end() {
        let buf = sample();
        let replaced = replace_field(&buf, 6, b"new");
        assert_eq!(find_field(&replaced, 6), Some(&b"new"[..]));
        assert!(replaced.ends_with(&encode_length_delimited(6, b"new")));
        assert_eq!(remove_field(&replaced, 6), remove_field(&buf, 6));
    }
}
