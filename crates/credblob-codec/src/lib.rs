// Author: Lukas Bower
// Purpose: Provide tag/wire-type field editing primitives for opaque credential blobs.
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![no_std]

//! Field-level codec for opaque, length-delimited state blobs.
//!
//! Blobs are treated as a flat sequence of `(tag, payload)` records. Only the
//! field numbers listed in [`credential`] are ever decoded; every other record
//! is carried through edits byte-for-byte.

extern crate alloc;

#[cfg(test)]
extern crate std;

mod codec;
pub mod credential;
mod record;
mod types;

pub use codec::{
    encode_length_delimited, encode_tag, encode_varint, encode_varint_field, find_field,
    find_varint_field, insert_field, read_tag, read_varint, remove_field, replace_field,
    skip_record,
};
pub use credential::CredentialRecord;
pub use record::{Record, RecordIter};
pub use types::*;
