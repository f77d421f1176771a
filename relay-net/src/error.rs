// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use thiserror::Error;

/// Failure kinds for a single connection. None of these propagate across
/// connections -- each connection's failure is self-contained and only ever
/// causes that connection to close.
#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol framing error: {0}")]
    BadHeader(#[from] relay_protocol::Error),

    #[error("one-time authentication failed")]
    AuthFail,

    #[error("replayed IV rejected")]
    DuplicateIv,

    #[error("cipher primitive failed: {0}")]
    DecryptFail(#[from] relay_crypto::Error),

    #[error("DNS resolution returned no usable address")]
    ResolveFail,

    #[error("connect to upstream failed: {0}")]
    ConnectFail(#[source] std::io::Error),

    #[error("connection idle timeout")]
    IdleTimeout,

    #[error("peer closed the connection")]
    PeerClose,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this failure should be reported to the ACL for potential
    /// auto-ban (a structurally bad header or a failed authentication check
    /// only -- everything else is a quiet close).
    pub fn reportable_to_acl(&self) -> bool {
        matches!(self, Error::BadHeader(_) | Error::AuthFail)
    }

    /// Map a cipher-layer error onto the connection error space, pulling
    /// `DuplicateIv` out into its own variant rather than burying it inside
    /// `DecryptFail` -- an IV replay closes silently, while a genuine
    /// primitive failure logs as a likely bad password or cipher mismatch.
    pub(crate) fn from_decrypt(e: relay_crypto::Error) -> Error {
        match e {
            relay_crypto::Error::DuplicateIv => Error::DuplicateIv,
            other => Error::DecryptFail(other),
        }
    }
}
