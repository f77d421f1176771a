// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use thiserror::Error;

/// Errors from parsing the request header or the authenticated chunk
/// framing.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid or unrecognized ATYP byte: {0:#x}")]
    InvalidAtyp(u8),

    #[error("domain name length prefix of {0} exceeds the 255-byte limit")]
    DomainTooLong(usize),

    #[error("domain name is not valid UTF-8")]
    InvalidDomainEncoding,

    #[error("chunk length {0} exceeds the maximum allowed chunk size of {1}")]
    ChunkTooLarge(usize, usize),
}
