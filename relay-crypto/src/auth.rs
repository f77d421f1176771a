// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;

/// Truncated length of every HMAC-SHA1 tag used by one-time auth, both for
/// the header and for payload chunks.
pub const AUTH_TAG_LEN: usize = 10;

/// `HMAC-SHA1(key, msg)[0..10]`.
pub fn hmac_sha1_truncated(key: &[u8], msg: &[u8]) -> [u8; AUTH_TAG_LEN] {
    let pkey = PKey::hmac(key).expect("HMAC key construction cannot fail for arbitrary-length keys");
    let mut signer = Signer::new(MessageDigest::sha1(), &pkey).expect("sha1 is always available");
    signer.update(msg).expect("signing into memory cannot fail");
    let full = signer.sign_to_vec().expect("signing into memory cannot fail");
    let mut out = [0u8; AUTH_TAG_LEN];
    out.copy_from_slice(&full[..AUTH_TAG_LEN]);
    out
}

/// Constant-time equality check.
///
/// Returns a plain `bool` (`true` iff equal) since this is used only as an
/// equality check, never an ordering.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Key material for the header HMAC: `IV || master_key`.
pub fn header_auth_key(iv: &[u8], master_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(iv.len() + master_key.len());
    key.extend_from_slice(iv);
    key.extend_from_slice(master_key);
    key
}

/// Key material for a payload chunk's HMAC: `IV || chunk_counter_be32`.
pub fn chunk_auth_key(iv: &[u8], chunk_counter: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(iv.len() + 4);
    key.extend_from_slice(iv);
    key.extend_from_slice(&chunk_counter.to_be_bytes());
    key
}

/// Compute the header HMAC tag for `header_bytes` (everything preceding the
/// tag itself: `ATYP || addr || port`).
pub fn header_auth_tag(iv: &[u8], master_key: &[u8], header_bytes: &[u8]) -> [u8; AUTH_TAG_LEN] {
    hmac_sha1_truncated(&header_auth_key(iv, master_key), header_bytes)
}

/// Verify a header HMAC tag in constant time.
pub fn verify_header_auth(iv: &[u8], master_key: &[u8], header_bytes: &[u8], tag: &[u8]) -> bool {
    constant_time_eq(&header_auth_tag(iv, master_key, header_bytes), tag)
}

/// Compute the HMAC tag for one authenticated payload chunk.
pub fn chunk_auth_tag(iv: &[u8], chunk_counter: u32, payload: &[u8]) -> [u8; AUTH_TAG_LEN] {
    hmac_sha1_truncated(&chunk_auth_key(iv, chunk_counter), payload)
}

/// Verify a chunk HMAC tag in constant time.
pub fn verify_chunk_auth(iv: &[u8], chunk_counter: u32, payload: &[u8], tag: &[u8]) -> bool {
    constant_time_eq(&chunk_auth_tag(iv, chunk_counter, payload), tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_and_mismatches() {
        assert!(constant_time_eq(b"abcdef", b"abcdef"));
        assert!(!constant_time_eq(b"abcdef", b"abcdeg"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn flipping_any_header_bit_breaks_verification() {
        let iv = [1u8; 16];
        let master_key = [2u8; 32];
        let key = header_auth_key(&iv, &master_key);
        let header = [0x01u8, 127, 0, 0, 1, 0, 80];
        let tag = hmac_sha1_truncated(&key, &header);

        for bit in 0..header.len() * 8 {
            let mut flipped = header;
            flipped[bit / 8] ^= 1 << (bit % 8);
            let other_tag = hmac_sha1_truncated(&key, &flipped);
            assert!(!constant_time_eq(&tag, &other_tag), "bit {} flip was not detected", bit);
        }
    }

    #[test]
    fn chunk_keys_differ_per_counter() {
        let iv = [9u8; 8];
        assert_ne!(chunk_auth_key(&iv, 0), chunk_auth_key(&iv, 1));
    }

    #[test]
    fn reordered_chunks_fail_verification() {
        let iv = [3u8; 8];
        let chunk_a = b"first chunk payload";
        let chunk_b = b"second chunk payload";

        let tag_a = chunk_auth_tag(&iv, 0, chunk_a);
        let tag_b = chunk_auth_tag(&iv, 1, chunk_b);

        // Verifying in order succeeds.
        assert!(verify_chunk_auth(&iv, 0, chunk_a, &tag_a));
        assert!(verify_chunk_auth(&iv, 1, chunk_b, &tag_b));

        // Swapping the counters (as if the chunks arrived reordered) fails.
        assert!(!verify_chunk_auth(&iv, 1, chunk_a, &tag_a));
        assert!(!verify_chunk_auth(&iv, 0, chunk_b, &tag_b));
    }
}
