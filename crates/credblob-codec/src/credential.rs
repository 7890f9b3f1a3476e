// Author: Lukas Bower
// Purpose: Encode and decode the credential container field of the host state blob.

//! The credential container is the only composite field this crate owns.
//!
//! Layout of field [`CREDENTIAL_FIELD`]:
//!
//! | sub-field | wire | contents                                  |
//! |-----------|------|-------------------------------------------|
//! | 1         | 2    | access secret (UTF-8)                     |
//! | 2         | 2    | token type literal, `"Bearer"`            |
//! | 3         | 2    | refresh secret (UTF-8)                    |
//! | 4         | 2    | timestamp message, sub-field 1 = seconds  |

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::str;

use crate::codec::{encode_length_delimited, encode_varint_field, find_field, find_varint_field, replace_field};
use crate::CodecError;

/// Top-level field number of the credential container.
pub const CREDENTIAL_FIELD: u32 = 6;
/// Sub-field holding the access secret.
pub const ACCESS_SECRET_FIELD: u32 = 1;
/// Sub-field holding the token type literal.
pub const TOKEN_TYPE_FIELD: u32 = 2;
/// Sub-field holding the refresh secret.
pub const REFRESH_SECRET_FIELD: u32 = 3;
/// Sub-field holding the nested expiry timestamp.
pub const EXPIRY_FIELD: u32 = 4;
/// Seconds sub-field inside the expiry timestamp message.
pub const TIMESTAMP_SECONDS_FIELD: u32 = 1;
/// Token type written into every encoded record.
pub const BEARER: &str = "Bearer";

/// Credential material carried in the container field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Short-lived access secret.
    pub access_secret: String,
    /// Token type literal.
    pub token_type: String,
    /// Long-lived refresh secret.
    pub refresh_secret: String,
    /// Expiry as seconds since the Unix epoch.
    pub expires_at: u64,
}

impl CredentialRecord {
    /// Build a bearer credential.
    #[must_use]
    pub fn bearer(access_secret: &str, refresh_secret: &str, expires_at: u64) -> Self {
        Self {
            access_secret: access_secret.to_string(),
            token_type: BEARER.to_string(),
            refresh_secret: refresh_secret.to_string(),
            expires_at,
        }
    }

    /// Encode the container payload (sub-fields only, no outer tag).
    #[must_use]
    pub fn encode_payload(&self) -> Vec<u8> {
        let timestamp = encode_varint_field(TIMESTAMP_SECONDS_FIELD, self.expires_at);
        let mut payload = Vec::new();
        payload.extend_from_slice(&encode_length_delimited(
            ACCESS_SECRET_FIELD,
            self.access_secret.as_bytes(),
        ));
        payload.extend_from_slice(&encode_length_delimited(
            TOKEN_TYPE_FIELD,
            self.token_type.as_bytes(),
        ));
        payload.extend_from_slice(&encode_length_delimited(
            REFRESH_SECRET_FIELD,
            self.refresh_secret.as_bytes(),
        ));
        payload.extend_from_slice(&encode_length_delimited(EXPIRY_FIELD, &timestamp));
        payload
    }

    /// Encode the complete container record, outer tag included.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        encode_length_delimited(CREDENTIAL_FIELD, &self.encode_payload())
    }

    /// Decode a container payload.
    ///
    /// The access and refresh secrets are required; a missing token type reads
    /// as [`BEARER`] and a missing expiry as zero.
    pub fn decode_payload(payload: &[u8]) -> Result<Self, CodecError> {
        let access_secret = utf8_field(payload, ACCESS_SECRET_FIELD)?
            .ok_or(CodecError::MissingField(ACCESS_SECRET_FIELD))?;
        let refresh_secret = utf8_field(payload, REFRESH_SECRET_FIELD)?
            .ok_or(CodecError::MissingField(REFRESH_SECRET_FIELD))?;
        let token_type =
            utf8_field(payload, TOKEN_TYPE_FIELD)?.unwrap_or_else(|| BEARER.to_string());
        let expires_at = find_field(payload, EXPIRY_FIELD)
            .and_then(|timestamp| find_varint_field(timestamp, TIMESTAMP_SECONDS_FIELD))
            .unwrap_or(0);
        Ok(Self {
            access_secret,
            token_type,
            refresh_secret,
            expires_at,
        })
    }

    /// Locate and decode the credential container inside a full blob.
    ///
    /// Returns `Ok(None)` when the blob has no container field.
    pub fn extract(blob: &[u8]) -> Result<Option<Self>, CodecError> {
        find_field(blob, CREDENTIAL_FIELD)
            .map(Self::decode_payload)
            .transpose()
    }

    /// Return `blob` with its credential container swapped for this record.
    /// Every other record is carried over byte-for-byte.
    #[must_use]
    pub fn splice_into(&self, blob: &[u8]) -> Vec<u8> {
        replace_field(blob, CREDENTIAL_FIELD, &self.encode_payload())
    }
}

fn utf8_field(payload: &[u8], field: u32) -> Result<Option<String>, CodecError> {
    match find_field(payload, field) {
        Some(bytes) => str::from_utf8(bytes)
            .map(|text| Some(text.to_string()))
            .map_err(|_| CodecError::InvalidUtf8(field)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::remove_field;

    #[test]
    fn encode_matches_reference_layout() {
        let record = CredentialRecord::bearer("ya29", "1//r", 300);
        let expected: &[u8] = &[
            0x32, 0x19, // field 6, len 25
            0x0a, 0x04, b'y', b'a', b'2', b'9', // 1: access
            0x12, 0x06, b'B', b'e', b'a', b'r', b'e', b'r', // 2: token type
            0x1a, 0x04, b'1', b'/', b'/', b'r', // 3: refresh
            0x22, 0x03, 0x08, 0xac, 0x02, // 4: { 1: 300 }
        ];
        assert_eq!(record.encode(), expected);
    }

    #[test]
    fn splice_then_extract() {
        let mut blob = encode_length_delimited(2, b"workspace");
        blob.extend_from_slice(&CredentialRecord::bearer("old", "1//old", 1).encode());
        blob.extend_from_slice(&encode_varint_field(11, 7));
        let next = CredentialRecord::bearer("fresh", "1//fresh", 1_900_000_000);
        let spliced = next.splice_into(&blob);
        assert_eq!(CredentialRecord::extract(&spliced), Ok(Some(next)));
        assert_eq!(remove_field(&spliced, CREDENTIAL_FIELD), remove_field(&blob, CREDENTIAL_FIELD));
    }

    #[test]
    fn extract_without_container() {
        let blob = encode_length_delimited(2, b"workspace");
        assert_eq!(CredentialRecord::extract(&blob), Ok(None));
    }

    #[test]
    fn decode_requires_secrets() {
        let payload = encode_length_delimited(ACCESS_SECRET_FIELD, b"only-access");
        assert_eq!(
            CredentialRecord::decode_payload(&payload),
            Err(CodecError::MissingField(REFRESH_SECRET_FIELD))
        );
    }

    #[test]
    fn decode_rejects_bad_utf8() {
        let mut payload = encode_length_delimited(ACCESS_SECRET_FIELD, &[0xff, 0xfe]);
        payload.extend_from_slice(&encode_length_delimited(REFRESH_SECRET_FIELD, b"r"));
        assert_eq!(
            CredentialRecord::decode_payload(&payload),
            Err(CodecError::InvalidUtf8(ACCESS_SECRET_FIELD))
        );
    }
}
