// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

//! Cryptographic stream layer for the encrypted relay: cipher registry, key
//! derivation, per-connection cipher contexts, the frame codec, one-time
//! authentication, the substitution-table cipher and the IV replay cache.
//!
//! This crate knows nothing about sockets, addresses, or connection state --
//! that lives in `relay-protocol` and `relay-net`.

mod auth;
mod codec;
mod context;
mod error;
mod ivcache;
mod kdf;
mod registry;
mod streampos;
mod table;

pub use auth::{
    chunk_auth_key, chunk_auth_tag, constant_time_eq, header_auth_key, header_auth_tag, hmac_sha1_truncated,
    verify_chunk_auth, verify_header_auth, AUTH_TAG_LEN,
};
pub use codec::{decrypt_all, encrypt_all};
pub use context::{CipherContext, CipherProfile};
pub use error::Error;
pub use kdf::evp_bytes_to_key;
pub use registry::{lookup as lookup_cipher, table_descriptor, CipherDescriptor, CipherFamily, CIPHERS};
