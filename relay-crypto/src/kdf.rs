// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use openssl::hash::{Hasher, MessageDigest};

/// OpenSSL-compatible `EVP_BytesToKey(MD5, passphrase, salt=NULL, iterations=1)`.
///
/// Repeatedly hashes `MD5(previous_digest || passphrase)`, with an empty
/// `previous_digest` on the first round, concatenating digests until at least
/// `key_len` bytes have been produced, then truncates to exactly `key_len`.
/// This must be byte-exact with the reference OpenSSL behavior -- wire
/// interoperability with any other Shadowsocks-compatible peer depends on it.
pub fn evp_bytes_to_key(passphrase: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + MessageDigest::md5().size());
    let mut prev: Vec<u8> = Vec::new();
    while key.len() < key_len {
        let mut hasher = Hasher::new(MessageDigest::md5()).expect("md5 is always available");
        hasher.update(&prev).expect("hashing into memory cannot fail");
        hasher.update(passphrase).expect("hashing into memory cannot fail");
        let digest = hasher.finish().expect("hashing into memory cannot fail");
        key.extend_from_slice(&digest);
        prev = digest.to_vec();
    }
    key.truncate(key_len);
    key
}
