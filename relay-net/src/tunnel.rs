// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_crypto::{CipherContext, CipherProfile};
use relay_protocol::Destination;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::connection::{self, ConnectionContext};
use crate::error::Error;
use crate::stats::Stats;

/// Tunnel-side configuration: a fixed destination prepended as the header
/// on every new connection to the remote server.
pub struct TunnelConfig {
    pub profile: Arc<CipherProfile>,
    pub remote_addr: SocketAddr,
    pub fixed_dest: Destination,
    pub fixed_port: u16,
    pub auth: bool,
    pub idle_timeout: Duration,
}

/// Accept loop for the tunnel's local plaintext listener: every accepted
/// connection dials the configured remote server, sends the synthesized
/// header, then splices.
pub async fn run_tunnel(
    listen_addr: SocketAddr,
    config: Arc<TunnelConfig>,
    stats: Arc<Stats>,
    shutdown: Arc<tokio::sync::Notify>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, remote = %config.remote_addr, "tunnel listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                let config = config.clone();
                let ctx = ConnectionContext { stats: stats.clone() };
                ctx.stats.on_connection_open();
                tokio::spawn(async move {
                    let result = handle_connection(socket, config, &ctx).await;
                    ctx.stats.on_connection_close();
                    if let Err(e) = result {
                        tracing::debug!(%peer, error = %e, "tunnel connection closed");
                    }
                });
            }
            _ = shutdown.notified() => {
                tracing::info!("tunnel shutting down, draining accept loop");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(local: TcpStream, config: Arc<TunnelConfig>, ctx: &ConnectionContext) -> Result<(), Error> {
    local.set_nodelay(true).ok();
    let (local_read, local_write) = local.into_split();

    // CONNECTING: dial the remote encrypted server.
    let remote = timeout(config.idle_timeout, TcpStream::connect(config.remote_addr))
        .await
        .map_err(|_| Error::IdleTimeout)?
        .map_err(Error::ConnectFail)?;
    remote.set_nodelay(true).ok();
    let (remote_read, mut remote_write) = remote.into_split();

    let mut enc = CipherContext::new(config.profile.clone(), true);
    let dec = CipherContext::new(config.profile.clone(), false);

    // Synthesize and send the fixed destination header before any data
    // splicing begins.
    connection::send_header(&mut remote_write, &mut enc, &config.fixed_dest, config.fixed_port, config.auth).await?;

    // SPLICING: local->remote is the request direction and carries chunk
    // auth when negotiated; remote->local never does.
    let activity = connection::Activity::new();
    let l2r = async {
        if config.auth {
            connection::pump_encrypt_chunked(local_read, remote_write, enc, &ctx.stats, &activity, Stats::add_client_to_upstream)
                .await
        } else {
            connection::pump_encrypt_plain(local_read, remote_write, enc, &ctx.stats, &activity, Stats::add_client_to_upstream).await
        }
    };
    let r2l =
        connection::pump_decrypt_plain(remote_read, local_write, dec, &ctx.stats, &activity, Stats::add_upstream_to_client);
    let idle = activity.watch(config.idle_timeout);

    tokio::select! {
        r = l2r => r,
        r = r2l => r,
        e = idle => Err(e),
    }
}
