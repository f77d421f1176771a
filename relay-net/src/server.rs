// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_crypto::{CipherContext, CipherProfile};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::collaborators::{peer_ip, Acl, Resolver};
use crate::connection::{self, ConnectionContext};
use crate::error::Error;
use crate::stats::Stats;

/// Server-side configuration: everything the per-connection state machine
/// needs that isn't per-connection state.
pub struct ServerConfig {
    pub profile: Arc<CipherProfile>,
    pub auth: bool,
    pub idle_timeout: Duration,
}

/// Accept loop: binds `listen_addr` and spawns one task per inbound
/// connection, a task-per-connection model built on `tokio::spawn` per
/// accepted socket.
pub async fn run_server<R, A>(
    listen_addr: SocketAddr,
    config: Arc<ServerConfig>,
    resolver: Arc<R>,
    acl: Arc<A>,
    stats: Arc<Stats>,
    shutdown: Arc<tokio::sync::Notify>,
) -> std::io::Result<()>
where
    R: Resolver,
    A: Acl,
{
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, "server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                if !acl.allows(peer_ip(peer)) {
                    tracing::debug!(%peer, "connection rejected by ACL");
                    continue;
                }
                let config = config.clone();
                let resolver = resolver.clone();
                let acl = acl.clone();
                let ctx = ConnectionContext { stats: stats.clone() };
                ctx.stats.on_connection_open();
                tokio::spawn(async move {
                    let result = handle_connection(socket, peer, config, resolver.as_ref(), &ctx).await;
                    ctx.stats.on_connection_close();
                    if let Err(e) = result {
                        tracing::debug!(%peer, error = %e, "connection closed");
                        if e.reportable_to_acl() {
                            acl.add(peer_ip(peer));
                        }
                    }
                });
            }
            _ = shutdown.notified() => {
                tracing::info!("server shutting down, draining accept loop");
                return Ok(());
            }
        }
    }
}

/// Drive one accepted connection through `WAIT_HEADER -> RESOLVING ->
/// CONNECTING -> SPLICING`.
async fn handle_connection<R: Resolver>(
    client: TcpStream,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    resolver: &R,
    ctx: &ConnectionContext,
) -> Result<(), Error> {
    client.set_nodelay(true).ok();
    let (client_read, client_write) = client.into_split();

    let dec = CipherContext::new(config.profile.clone(), false);
    let enc = CipherContext::new(config.profile.clone(), true);

    // WAIT_HEADER: accumulate and decrypt until a full header is available,
    // verifying header auth if the ATYP flag (or global auth mode) requires
    // it.
    let header_read = timeout(config.idle_timeout, connection::read_header(client_read, dec));
    let (header, dec, client_read, residual) = header_read.await.map_err(|_| Error::IdleTimeout)??;

    if config.auth && !header.auth {
        return Err(Error::AuthFail);
    }

    tracing::debug!(%peer, dest = %header.dest, port = header.port, "header accepted");

    // RESOLVING (skipped for literal IPs) then CONNECTING.
    let target = match header.socket_addr() {
        Some(addr) => addr,
        None => {
            let ip = resolver.resolve(&header.dest.to_string()).await.ok_or(Error::ResolveFail)?;
            SocketAddr::new(ip, header.port)
        }
    };

    let upstream = timeout(config.idle_timeout, TcpStream::connect(target))
        .await
        .map_err(|_| Error::IdleTimeout)?
        .map_err(Error::ConnectFail)?;
    upstream.set_nodelay(true).ok();
    let (upstream_read, mut upstream_write) = upstream.into_split();

    // SPLICING: two independent directions. client->upstream carries chunk
    // auth when header auth was negotiated; upstream->client never does
    // (request direction only). Activity on either direction re-arms the
    // shared idle timer. Residual plaintext left over from the header read
    // becomes the first outbound payload; when chunk auth is on it must
    // still pass verification as part of that payload.
    let activity = connection::Activity::new();
    let c2u = async {
        if header.auth {
            connection::pump_decrypt_chunked(
                client_read,
                upstream_write,
                dec,
                &ctx.stats,
                &activity,
                Stats::add_client_to_upstream,
                residual,
            )
            .await
        } else {
            if !residual.is_empty() {
                use tokio::io::AsyncWriteExt;
                upstream_write.write_all(&residual).await?;
            }
            connection::pump_decrypt_plain(client_read, upstream_write, dec, &ctx.stats, &activity, Stats::add_client_to_upstream).await
        }
    };
    let u2c =
        connection::pump_encrypt_plain(upstream_read, client_write, enc, &ctx.stats, &activity, Stats::add_upstream_to_client);
    let idle = activity.watch(config.idle_timeout);

    tokio::select! {
        r = c2u => r,
        r = u2c => r,
        e = idle => Err(e),
    }
}
