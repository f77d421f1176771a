// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use openssl::hash::{hash, MessageDigest};

/// The legacy "table" cipher: a fixed permutation of `0..=255` derived from
/// the passphrase. No IV, no per-connection context, no authentication --
/// kept only for interoperability with older peers.
pub struct TableCipher {
    encrypt_table: [u8; 256],
    decrypt_table: [u8; 256],
}

impl TableCipher {
    /// Derive the encryption table (and its inverse) from a passphrase.
    ///
    /// `key` is the first 8 bytes of `MD5(passphrase)` read as a little-endian
    /// `u64`. Starting from the identity permutation, for `salt` in `1..=1023`
    /// the table is stable-sorted by the comparator
    /// `(x, y) -> key mod (x + salt) - key mod (y + salt)`.
    pub fn new(passphrase: &[u8]) -> Self {
        let digest = hash(MessageDigest::md5(), passphrase).expect("md5 is always available");
        let key = u64::from_le_bytes(digest[0..8].try_into().unwrap());

        let mut table: [u8; 256] = {
            let mut t = [0u8; 256];
            for (i, slot) in t.iter_mut().enumerate() {
                *slot = i as u8;
            }
            t
        };

        for salt in 1..=1023u64 {
            table.sort_by(|&x, &y| {
                let kx = key % (x as u64 + salt);
                let ky = key % (y as u64 + salt);
                kx.cmp(&ky)
            });
        }

        let mut decrypt_table = [0u8; 256];
        for (i, &t) in table.iter().enumerate() {
            decrypt_table[t as usize] = i as u8;
        }

        Self { encrypt_table: table, decrypt_table }
    }

    #[inline]
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|&b| self.encrypt_table[b as usize]).collect()
    }

    #[inline]
    pub fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|&b| self.decrypt_table[b as usize]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn table_is_a_bijection_and_its_own_inverse_roundtrips() {
        let c = TableCipher::new(b"barfoo");

        let seen: HashSet<u8> = c.encrypt_table.iter().copied().collect();
        assert_eq!(seen.len(), 256, "encryption table must be a permutation of 0..=255");

        let all_bytes: Vec<u8> = (0u32..256).map(|b| b as u8).collect();
        let ciphertext = c.encrypt(&all_bytes);
        let plaintext = c.decrypt(&ciphertext);
        assert_eq!(plaintext, all_bytes);
    }

    #[test]
    fn different_passphrases_produce_different_tables() {
        let a = TableCipher::new(b"barfoo");
        let b = TableCipher::new(b"foobar");
        assert_ne!(a.encrypt_table, b.encrypt_table);
    }

    #[test]
    fn empty_message_roundtrips() {
        let c = TableCipher::new(b"barfoo");
        assert_eq!(c.decrypt(&c.encrypt(&[])), Vec::<u8>::new());
    }
}
