// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_crypto::CipherContext;
use relay_protocol::Buffer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::error::Error;
use crate::stats::Stats;

/// Single socket read into a growable buffer's spare capacity, mirrored
/// here by [`relay_protocol::Buffer`]'s internal bookkeeping.
pub const READ_BUF_SIZE: usize = relay_protocol::MAX_CHUNK_LEN;

/// Shared idle-timer state for one connection: any activity on either
/// splicing direction re-arms it. A single `watch` task sleeps until the
/// deadline computed from the last touch and fails the connection if
/// nothing touched it in the meantime.
#[derive(Clone)]
pub struct Activity {
    last: Arc<Mutex<Instant>>,
}

impl Activity {
    pub fn new() -> Self {
        Self { last: Arc::new(Mutex::new(Instant::now())) }
    }

    pub fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    /// Runs until `idle` has elapsed with no intervening [`Self::touch`],
    /// then resolves to `Error::IdleTimeout`. Intended to be raced against
    /// the splicing futures with `tokio::select!`.
    pub async fn watch(&self, idle: Duration) -> Error {
        loop {
            let deadline = *self.last.lock() + idle;
            tokio::time::sleep_until(deadline).await;
            if Instant::now() >= *self.last.lock() + idle {
                return Error::IdleTimeout;
            }
        }
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Running state for the chunk-auth side of one direction: the IV needed to
/// key each chunk's HMAC (`IV || chunk_counter`, no master key -- unlike the
/// header tag) plus the monotonic counter.
struct ChunkAuthKey {
    iv: Vec<u8>,
    counter: u32,
}

impl ChunkAuthKey {
    fn from_context(ctx: &CipherContext) -> Option<Self> {
        ctx.iv().map(|iv| ChunkAuthKey { iv: iv.to_vec(), counter: 0 })
    }

    fn next_tag(&mut self, payload: &[u8]) -> [u8; relay_crypto::AUTH_TAG_LEN] {
        let tag = relay_crypto::chunk_auth_tag(&self.iv, self.counter, payload);
        self.counter += 1;
        tag
    }

    fn verify_and_advance(&mut self, payload: &[u8], tag: &[u8]) -> bool {
        let ok = relay_crypto::verify_chunk_auth(&self.iv, self.counter, payload, tag);
        if ok {
            self.counter += 1;
        }
        ok
    }
}

/// Read from `reader` into `raw`, accumulating raw bytes until at least
/// `dec.min_first_call_len()` are available, then decrypt the whole buffered
/// tail in one call. A single socket `read()` can return fewer bytes than an
/// IV's length -- a client is free to split its IV across two writes -- so
/// every first call into a `CipherContext::decrypt` must go through this
/// instead of handing a bare read straight through. Returns `None` on a
/// clean EOF reached before `dec` could make progress.
async fn recv_decrypted<R>(
    reader: &mut R,
    raw: &mut Buffer,
    scratch: &mut [u8],
    dec: &mut CipherContext,
) -> Result<Option<Vec<u8>>, Error>
where
    R: AsyncRead + Unpin,
{
    let need = dec.min_first_call_len().max(1);
    while raw.len() < need {
        let n = reader.read(scratch).await?;
        if n == 0 {
            return Ok(None);
        }
        raw.extend(&scratch[..n]);
    }
    let plain = dec.decrypt(raw.unread()).map_err(Error::from_decrypt)?;
    let consumed = raw.len();
    raw.advance(consumed);
    Ok(Some(plain))
}

/// Pump raw ciphertext from `reader`, decrypt it, and forward the resulting
/// plaintext to `writer` unmodified. Used for the response direction, which
/// is never chunk-authenticated (only the request direction carries chunk
/// auth).
pub async fn pump_decrypt_plain<R, W>(
    mut reader: R,
    mut writer: W,
    mut dec: CipherContext,
    stats: &Stats,
    activity: &Activity,
    count_bytes: impl Fn(&Stats, u64),
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut raw = Buffer::new();
    let mut scratch = vec![0u8; READ_BUF_SIZE];
    loop {
        let plain = match recv_decrypted(&mut reader, &mut raw, &mut scratch, &mut dec).await? {
            None => {
                writer.shutdown().await.ok();
                return Ok(());
            }
            Some(plain) => plain,
        };
        activity.touch();
        if !plain.is_empty() {
            writer.write_all(&plain).await?;
            count_bytes(stats, plain.len() as u64);
        }
    }
}

/// Pump plaintext from `reader`, encrypt it, and forward the ciphertext to
/// `writer`. Counterpart to [`pump_decrypt_plain`] for the unauthenticated
/// direction.
pub async fn pump_encrypt_plain<R, W>(
    mut reader: R,
    mut writer: W,
    mut enc: CipherContext,
    stats: &Stats,
    activity: &Activity,
    count_bytes: impl Fn(&Stats, u64),
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut plain = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = reader.read(&mut plain).await?;
        if n == 0 {
            writer.shutdown().await.ok();
            return Ok(());
        }
        activity.touch();
        let wire = enc.encrypt(&plain[..n])?;
        writer.write_all(&wire).await?;
        count_bytes(stats, n as u64);
    }
}

/// Pump raw ciphertext from `reader`, decrypt, reassemble chunk-authenticated
/// frames (`len || hmac || payload`), verify each one, and forward the
/// verified payload to `writer`. This is the request-direction
/// path when header auth was negotiated on a connection (server decrypting
/// client traffic).
pub async fn pump_decrypt_chunked<R, W>(
    mut reader: R,
    mut writer: W,
    mut dec: CipherContext,
    stats: &Stats,
    activity: &Activity,
    count_bytes: impl Fn(&Stats, u64),
    initial_plaintext: Vec<u8>,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut raw = Buffer::new();
    let mut scratch = vec![0u8; READ_BUF_SIZE];
    let mut decrypted = Buffer::new();
    let mut auth_key: Option<ChunkAuthKey> =
        if initial_plaintext.is_empty() { None } else { ChunkAuthKey::from_context(&dec) };
    decrypted.extend(&initial_plaintext);

    loop {
        match relay_protocol::parse_chunk(decrypted.unread())? {
            None => break,
            Some((chunk, consumed)) => {
                let key = auth_key.as_mut().expect("IV established before any chunk can be parsed");
                if !key.verify_and_advance(chunk.payload, &chunk.tag) {
                    return Err(Error::AuthFail);
                }
                if !chunk.payload.is_empty() {
                    writer.write_all(chunk.payload).await?;
                    count_bytes(stats, chunk.payload.len() as u64);
                }
                decrypted.advance(consumed);
            }
        }
    }

    loop {
        let plain = match recv_decrypted(&mut reader, &mut raw, &mut scratch, &mut dec).await? {
            None => {
                writer.shutdown().await.ok();
                return Ok(());
            }
            Some(plain) => plain,
        };
        activity.touch();
        if auth_key.is_none() {
            auth_key = ChunkAuthKey::from_context(&dec);
        }
        decrypted.extend(&plain);

        loop {
            match relay_protocol::parse_chunk(decrypted.unread())? {
                None => break,
                Some((chunk, consumed)) => {
                    let key = auth_key.as_mut().expect("IV established before any chunk can be parsed");
                    if !key.verify_and_advance(chunk.payload, &chunk.tag) {
                        return Err(Error::AuthFail);
                    }
                    if !chunk.payload.is_empty() {
                        writer.write_all(chunk.payload).await?;
                        count_bytes(stats, chunk.payload.len() as u64);
                    }
                    decrypted.advance(consumed);
                }
            }
        }
    }
}

/// Pump plaintext from `reader`, frame each read as a chunk-authenticated
/// frame (computing the HMAC over the payload), encrypt the framed bytes,
/// and forward to `writer`. Request-direction counterpart to
/// [`pump_decrypt_chunked`] for the tunnel side, which originates
/// chunk-authenticated traffic.
pub async fn pump_encrypt_chunked<R, W>(
    mut reader: R,
    mut writer: W,
    mut enc: CipherContext,
    stats: &Stats,
    activity: &Activity,
    count_bytes: impl Fn(&Stats, u64),
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // The IV must exist before the first chunk's HMAC key can be built.
    let iv = enc.ensure_encrypt_init()?;
    let mut wire_prefix = Vec::new();
    if let Some(iv) = &iv {
        wire_prefix.extend_from_slice(iv);
    }
    let mut auth_key = enc.iv().map(|iv| ChunkAuthKey { iv: iv.to_vec(), counter: 0 });

    if !wire_prefix.is_empty() {
        writer.write_all(&wire_prefix).await?;
    }

    let mut plain = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = reader.read(&mut plain).await?;
        if n == 0 {
            writer.shutdown().await.ok();
            return Ok(());
        }
        activity.touch();
        let payload = &plain[..n];
        let framed = if let Some(key) = auth_key.as_mut() {
            let tag = key.next_tag(payload);
            relay_protocol::encode_chunk(payload, &tag)
        } else {
            payload.to_vec()
        };
        let wire = enc.encrypt(&framed)?;
        writer.write_all(&wire).await?;
        count_bytes(stats, n as u64);
    }
}

/// Send a request header (with optional header one-time-auth) as the first
/// bytes of an encrypted stream, used by the tunnel side to open a
/// connection to the remote server.
pub async fn send_header<W>(
    mut writer: W,
    enc: &mut CipherContext,
    dest: &relay_protocol::Destination,
    port: u16,
    auth: bool,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let iv = enc.ensure_encrypt_init()?;
    if let Some(iv) = &iv {
        writer.write_all(iv).await?;
    }

    let header_bytes = relay_protocol::encode_header(dest, port, auth);
    let mut plaintext = header_bytes.clone();
    if auth {
        // A table cipher has no IV to key the tag with; header auth and the
        // table cipher are mutually exclusive configurations.
        let iv = match enc.iv() {
            Some(iv) => iv.to_vec(),
            None => return Err(Error::AuthFail),
        };
        let tag = relay_crypto::header_auth_tag(&iv, enc.master_key(), &header_bytes);
        plaintext.extend_from_slice(&tag);
    }
    let wire = enc.encrypt(&plaintext)?;
    writer.write_all(&wire).await?;
    Ok(())
}

/// Read and fully validate a request header (with header auth, if present)
/// from the front of a decrypting reader, returning the parsed header and
/// the decrypting context for continued use. Any residual decrypted bytes
/// beyond the header become the first bytes of the request-direction
/// payload and are returned alongside.
pub async fn read_header<R>(
    mut reader: R,
    mut dec: CipherContext,
) -> Result<(relay_protocol::ParsedHeader, CipherContext, R, Vec<u8>), Error>
where
    R: AsyncRead + Unpin,
{
    let mut raw = Buffer::new();
    let mut scratch = vec![0u8; READ_BUF_SIZE];
    let mut decrypted = Buffer::new();

    loop {
        let plain = match recv_decrypted(&mut reader, &mut raw, &mut scratch, &mut dec).await? {
            None => return Err(Error::PeerClose),
            Some(plain) => plain,
        };
        decrypted.extend(&plain);

        if let Some(parsed) = relay_protocol::parse_header(decrypted.unread())? {
            if parsed.auth {
                // Table ciphers never carry an IV; auth on a table-keyed
                // connection has no key material to check against, so treat
                // it as a failed auth rather than panicking.
                let iv = match dec.iv() {
                    Some(iv) => iv.to_vec(),
                    None => return Err(Error::AuthFail),
                };
                let header_bytes = &decrypted.unread()[..parsed.header_bytes_len];
                let tag = &decrypted.unread()[parsed.header_bytes_len..parsed.total_len];
                if !relay_crypto::verify_header_auth(&iv, dec.master_key(), header_bytes, tag) {
                    return Err(Error::AuthFail);
                }
            }
            let total_len = parsed.total_len;
            let residual = decrypted.unread()[total_len..].to_vec();
            return Ok((parsed, dec, reader, residual));
        }
    }
}

/// Shared per-connection bookkeeping threaded through the splicing tasks:
/// the stats handle and a cheap clone of whichever cipher profile this
/// connection was built from (kept for future extension; not yet read).
#[derive(Clone)]
pub struct ConnectionContext {
    pub stats: Arc<Stats>,
}
