// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use crate::context::CipherProfile;
use crate::error::Error;
use std::sync::Arc;

/// Stateless, all-at-once encrypt: generates a fresh IV on every call and
/// never advances a counter. Suited to datagram-oriented callers where each
/// message is its own independent ciphertext -- the TCP connection state
/// machine in `relay-net` always uses the stateful `CipherContext` instead.
pub fn encrypt_all(profile: &Arc<CipherProfile>, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let mut ctx = crate::context::CipherContext::new(profile.clone(), true);
    ctx.encrypt(plaintext)
}

/// Stateless, all-at-once decrypt counterpart to [`encrypt_all`]. Bypasses
/// the IV replay cache entirely (see `CipherContext::decrypt_stateless`) --
/// that cache is scoped to connection-lifetime streams, not one-shot
/// datagrams.
pub fn decrypt_all(profile: &Arc<CipherProfile>, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    let mut ctx = crate::context::CipherContext::new(profile.clone(), false);
    ctx.decrypt_stateless(ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stateless_roundtrip() {
        let profile = CipherProfile::new("chacha20-ietf", "test");
        let ct = encrypt_all(&profile, b"datagram payload").unwrap();
        let pt = decrypt_all(&profile, &ct).unwrap();
        assert_eq!(pt, b"datagram payload");
    }
}
