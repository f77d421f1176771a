// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use crate::error::Error;

/// Length of the one-time auth tag trailing each authenticated chunk and the
/// request header. Kept here rather than imported from `relay-crypto` since
/// this crate is deliberately crypto-agnostic; `relay-net` is responsible
/// for checking that this matches `relay_crypto::AUTH_TAG_LEN`.
pub const AUTH_TAG_LEN: usize = 10;

/// Ceiling on a single chunk's payload length. Matches the frame codec's
/// read buffer size so a chunk can always be decrypted in one pass.
pub const MAX_CHUNK_LEN: usize = 8192;

/// One reassembled chunk from an authenticated stream: the raw ciphertext
/// payload and its trailing HMAC tag, not yet verified. `relay-net` combines
/// this with the connection's IV and running counter to verify and decrypt.
pub struct RawChunk<'a> {
    pub payload: &'a [u8],
    pub tag: [u8; AUTH_TAG_LEN],
}

/// Parse one `LEN(2, big-endian) || TAG(10) || payload(LEN)` frame from the
/// front of `buf`.
///
/// Returns `Ok(None)` when `buf` doesn't yet hold a complete frame (wait for
/// more bytes); `Ok(Some((chunk, consumed)))` on success; `Err` if the
/// advertised length exceeds [`MAX_CHUNK_LEN`].
pub fn parse_chunk(buf: &[u8]) -> Result<Option<(RawChunk<'_>, usize)>, Error> {
    const LEN_LEN: usize = 2;
    if buf.len() < LEN_LEN {
        return Ok(None);
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if len > MAX_CHUNK_LEN {
        return Err(Error::ChunkTooLarge(len, MAX_CHUNK_LEN));
    }

    let total = LEN_LEN + AUTH_TAG_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }

    let mut tag = [0u8; AUTH_TAG_LEN];
    tag.copy_from_slice(&buf[LEN_LEN..LEN_LEN + AUTH_TAG_LEN]);
    let payload = &buf[LEN_LEN + AUTH_TAG_LEN..total];

    Ok(Some((RawChunk { payload, tag }, total)))
}

/// Frame a chunk for the wire: `LEN || TAG || payload`. The caller computes
/// `tag` over `(iv, counter, payload)` using `relay-crypto`'s chunk auth
/// functions before calling this.
pub fn encode_chunk(payload: &[u8], tag: &[u8; AUTH_TAG_LEN]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + AUTH_TAG_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(tag);
    out.extend_from_slice(payload);
    out
}
