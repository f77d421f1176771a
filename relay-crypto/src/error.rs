// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use thiserror::Error;

/// Errors surfaced by the cryptographic stream layer.
///
/// These map onto the `DecryptFail` / `DuplicateIV` rows of the error table: a
/// connection that receives one of these from `decrypt()` must be torn down,
/// never retried.
#[derive(Error, Debug)]
pub enum Error {
    #[error("duplicate IV rejected by replay cache")]
    DuplicateIv,

    #[error("underlying cipher primitive failed: {0}")]
    Primitive(#[from] openssl::error::ErrorStack),

    #[error("header or chunk authentication failed")]
    AuthFailed,

    #[error("chunk length {0} exceeds maximum allowed chunk size")]
    ChunkTooLarge(usize),

    #[error("unsupported cipher name: {0}")]
    UnknownCipher(String),

    #[error("cipher {0} is not available in the linked OpenSSL build")]
    CipherUnavailable(String),
}
