// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

//! Wire framing for the encrypted relay's request header and chunked
//! payload stream: the destination tagged union, header parse/encode, chunk
//! reassembly, and the growable connection buffer.
//!
//! This crate deliberately carries no cryptographic dependency -- HMAC tags
//! pass through as raw bytes; verifying them against a cipher context is
//! `relay-net`'s job, since only that crate has both this crate and
//! `relay-crypto` in scope.

mod address;
mod buffer;
mod chunk;
mod error;

pub use address::{
    encode_header, parse_header, Destination, ParsedHeader, ATYP_AUTH_FLAG, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6,
};
pub use buffer::Buffer;
pub use chunk::{encode_chunk, parse_chunk, RawChunk, AUTH_TAG_LEN, MAX_CHUNK_LEN};
pub use error::Error;
