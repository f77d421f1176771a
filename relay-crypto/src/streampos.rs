// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use chacha20::{ChaCha20, ChaCha20Legacy};
use cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use salsa20::Salsa20;

/// Block size shared by salsa20/chacha20's internal counter arithmetic.
///
/// All three ciphers here operate on 64-byte blocks internally, which is
/// what lets a stream be split across arbitrarily many `encrypt`/`decrypt`
/// calls while producing the exact same keystream as one call over the
/// concatenated bytes.
pub const BLOCK_SIZE: u64 = 64;

/// A stream-position cipher: salsa20, chacha20 (legacy 8-byte nonce, 64-bit
/// counter) or chacha20-ietf (12-byte nonce, 32-bit counter). Each variant
/// wraps a RustCrypto stream cipher that exposes exact seeking, which is used
/// to reproduce the C implementation's block-aligned XOR scheme exactly.
pub enum StreamPosPrimitive {
    Salsa20(Salsa20),
    ChaCha20(ChaCha20Legacy),
    ChaCha20Ietf(ChaCha20),
}

impl StreamPosPrimitive {
    pub fn new_salsa20(key: &[u8], nonce: &[u8]) -> Self {
        Self::Salsa20(Salsa20::new(key.into(), nonce.into()))
    }

    pub fn new_chacha20(key: &[u8], nonce: &[u8]) -> Self {
        Self::ChaCha20(ChaCha20Legacy::new(key.into(), nonce.into()))
    }

    pub fn new_chacha20_ietf(key: &[u8], nonce: &[u8]) -> Self {
        Self::ChaCha20Ietf(ChaCha20::new(key.into(), nonce.into()))
    }

    fn seek(&mut self, byte_pos: u64) {
        match self {
            Self::Salsa20(c) => c.seek(byte_pos),
            Self::ChaCha20(c) => c.seek(byte_pos),
            Self::ChaCha20Ietf(c) => c.seek(byte_pos as u32),
        }
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) {
        match self {
            Self::Salsa20(c) => c.apply_keystream(buf),
            Self::ChaCha20(c) => c.apply_keystream(buf),
            Self::ChaCha20Ietf(c) => c.apply_keystream(buf),
        }
    }

    /// XOR `data` against the keystream starting at `counter` bytes into the
    /// stream, using a left-pad-to-block-boundary trick so arbitrary byte
    /// offsets reproduce the same keystream as seeking to the block start.
    ///
    /// `counter` is the number of plaintext/ciphertext bytes already
    /// processed in this direction; it advances by `data.len()` after every
    /// call, in the same units regardless of direction (the operation is
    /// its own inverse).
    pub fn xor_at_counter(&mut self, counter: u64, data: &mut [u8]) {
        let padding = (counter % BLOCK_SIZE) as usize;
        let block_start = counter - padding as u64;
        self.seek(block_start);

        if padding == 0 {
            self.apply_keystream(data);
            return;
        }

        let mut scratch = vec![0u8; padding + data.len()];
        scratch[padding..].copy_from_slice(data);
        self.apply_keystream(&mut scratch);
        data.copy_from_slice(&scratch[padding..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salsa20_chunked_matches_single_call() {
        let key = [0x42u8; 32];
        let nonce = [0x24u8; 8];

        let mut one_shot = (0u32..66).map(|b| b as u8).collect::<Vec<u8>>();
        let mut c = StreamPosPrimitive::new_salsa20(&key, &nonce);
        c.xor_at_counter(0, &mut one_shot);

        let mut chunked = (0u32..66).map(|b| b as u8).collect::<Vec<u8>>();
        let mut c2 = StreamPosPrimitive::new_salsa20(&key, &nonce);
        let (first, second) = chunked.split_at_mut(65);
        c2.xor_at_counter(0, first);
        c2.xor_at_counter(65, second);

        assert_eq!(one_shot, chunked);
    }

    #[test]
    fn chacha20_ietf_chunked_matches_single_call() {
        let key = [0x11u8; 32];
        let nonce = [0x22u8; 12];

        let mut one_shot = (0u32..120).map(|b| b as u8).collect::<Vec<u8>>();
        let mut c = StreamPosPrimitive::new_chacha20_ietf(&key, &nonce);
        c.xor_at_counter(0, &mut one_shot);

        let mut chunked = (0u32..120).map(|b| b as u8).collect::<Vec<u8>>();
        let mut c2 = StreamPosPrimitive::new_chacha20_ietf(&key, &nonce);
        let (a, rest) = chunked.split_at_mut(10);
        let (b, c3) = rest.split_at_mut(100);
        c2.xor_at_counter(0, a);
        c2.xor_at_counter(10, b);
        c2.xor_at_counter(110, c3);

        assert_eq!(one_shot, chunked);
    }
}
