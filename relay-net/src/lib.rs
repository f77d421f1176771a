// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

//! Per-connection protocol state machine and tokio reactor: splices an
//! encrypted TCP stream against a plaintext one, either decrypting inbound
//! client traffic and dialing the named upstream (server mode) or prepending
//! a fixed header and encrypting outbound traffic to a remote server
//! (tunnel mode).
//!
//! One tokio task per connection, racing the two splicing directions
//! against a shared idle timer with `tokio::select!`.

mod collaborators;
mod connection;
mod error;
mod server;
mod stats;
mod tunnel;

pub use collaborators::{Acl, AclMode, MemoryAcl, Resolver, SystemResolver};
pub use connection::{Activity, ConnectionContext};
pub use error::Error;
pub use server::{run_server, ServerConfig};
pub use stats::{Stats, StatsSnapshot};
pub use tunnel::{run_tunnel, TunnelConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use relay_crypto::CipherProfile;
    use relay_protocol::Destination;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Client connects, sends an encrypted header for
    /// `127.0.0.1:<echo port>` followed by a payload, and the server splices
    /// the payload through to a real upstream listener.
    #[tokio::test]
    async fn server_dials_and_splices_literal_ip_destination() {
        // A trivial upstream echo listener standing in for "real 127.0.0.1:80".
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_port = upstream_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = upstream_listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(&buf[..n]).await.unwrap();
        });

        let profile = CipherProfile::new("aes-256-cfb", "test");
        let config = Arc::new(ServerConfig { profile: profile.clone(), auth: false, idle_timeout: Duration::from_secs(5) });
        let resolver = Arc::new(SystemResolver);
        let acl = Arc::new(MemoryAcl::new(AclMode::Black));
        let stats = Arc::new(Stats::default());
        let shutdown = Arc::new(tokio::sync::Notify::new());

        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_listener.local_addr().unwrap();
        drop(server_listener);

        let server_shutdown = shutdown.clone();
        tokio::spawn(run_server(server_addr, config, resolver, acl, stats.clone(), server_shutdown));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(server_addr).await.unwrap();
        let mut enc = relay_crypto::CipherContext::new(profile, true);
        let dest = Destination::V4([127, 0, 0, 1]);
        let mut header = relay_protocol::encode_header(&dest, upstream_port, false);
        header.extend_from_slice(b"GET / HTTP/1.0\r\n\r\n");
        let wire = enc.encrypt(&header).unwrap();
        client.write_all(&wire).await.unwrap();

        let mut reply = vec![0u8; 1024];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut reply)).await.unwrap().unwrap();
        assert_eq!(&reply[..n], b"GET / HTTP/1.0\r\n\r\n");

        shutdown.notify_one();
    }

    /// Replaying a recorded ciphertext stream (same
    /// IV) against a second connection must be rejected silently, with no
    /// upstream dial.
    #[tokio::test]
    async fn replayed_iv_is_rejected_without_dialing_upstream() {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_port = upstream_listener.local_addr().unwrap().port();
        let dialed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let dialed_task = dialed.clone();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = upstream_listener.accept().await.unwrap();
                dialed_task.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let mut buf = vec![0u8; 64];
                let _ = sock.read(&mut buf).await;
            }
        });

        let profile = CipherProfile::new("aes-128-cfb", "test");
        let config = Arc::new(ServerConfig { profile: profile.clone(), auth: false, idle_timeout: Duration::from_secs(5) });
        let resolver = Arc::new(SystemResolver);
        let acl = Arc::new(MemoryAcl::new(AclMode::Black));
        let stats = Arc::new(Stats::default());
        let shutdown = Arc::new(tokio::sync::Notify::new());

        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_listener.local_addr().unwrap();
        drop(server_listener);
        tokio::spawn(run_server(server_addr, config, resolver, acl, stats.clone(), shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut enc = relay_crypto::CipherContext::new(profile, true);
        let dest = Destination::V4([127, 0, 0, 1]);
        let header = relay_protocol::encode_header(&dest, upstream_port, false);
        let wire = enc.encrypt(&header).unwrap();

        let mut first = TcpStream::connect(server_addr).await.unwrap();
        first.write_all(&wire).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dialed.load(std::sync::atomic::Ordering::SeqCst), 1);

        let mut second = TcpStream::connect(server_addr).await.unwrap();
        second.write_all(&wire).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dialed.load(std::sync::atomic::Ordering::SeqCst), 1, "replayed IV must not cause a second upstream dial");

        shutdown.notify_one();
    }

    /// Server configured with `auth: true`: a correctly-authenticated
    /// header is accepted and spliced through as usual, a flipped last byte
    /// of the header HMAC is rejected, and the offending peer gets
    /// auto-banned in Black mode.
    #[tokio::test]
    async fn header_auth_accepts_valid_and_bans_peer_on_tampered_hmac() {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_port = upstream_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = upstream_listener.accept().await.unwrap();
                let mut buf = vec![0u8; 64];
                let n = sock.read(&mut buf).await.unwrap_or(0);
                if n > 0 {
                    sock.write_all(&buf[..n]).await.ok();
                }
            }
        });

        let profile = CipherProfile::new("aes-128-cfb", "test");
        let config = Arc::new(ServerConfig { profile: profile.clone(), auth: true, idle_timeout: Duration::from_secs(5) });
        let resolver = Arc::new(SystemResolver);
        let acl = Arc::new(MemoryAcl::new(AclMode::Black));
        let stats = Arc::new(Stats::default());
        let shutdown = Arc::new(tokio::sync::Notify::new());

        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_listener.local_addr().unwrap();
        drop(server_listener);
        tokio::spawn(run_server(server_addr, config, resolver, acl.clone(), stats.clone(), shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // First connection: valid header auth, must splice through.
        let good_peer = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let mut enc = relay_crypto::CipherContext::new(profile.clone(), true);
        let dest = Destination::V4([127, 0, 0, 1]);
        let header_bytes = relay_protocol::encode_header(&dest, upstream_port, true);
        let iv = enc.ensure_encrypt_init().unwrap().unwrap();
        let tag = relay_crypto::header_auth_tag(&iv, enc.master_key(), &header_bytes);
        let mut plaintext = header_bytes.clone();
        plaintext.extend_from_slice(&tag);
        let wire = enc.encrypt(&plaintext).unwrap();

        let mut good = TcpStream::connect(server_addr).await.unwrap();
        good.write_all(&wire).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(acl.allows(good_peer), "a connection with a valid header HMAC must not be banned");

        // Second connection, same peer: tamper with the last tag byte.
        let mut enc2 = relay_crypto::CipherContext::new(profile, true);
        let iv2 = enc2.ensure_encrypt_init().unwrap().unwrap();
        let mut tag2 = relay_crypto::header_auth_tag(&iv2, enc2.master_key(), &header_bytes);
        *tag2.last_mut().unwrap() ^= 0xff;
        let mut tampered = header_bytes.clone();
        tampered.extend_from_slice(&tag2);
        let wire2 = enc2.encrypt(&tampered).unwrap();

        let mut bad = TcpStream::connect(server_addr).await.unwrap();
        bad.write_all(&wire2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!acl.allows(good_peer), "a tampered header HMAC must close the connection and auto-ban the peer");

        shutdown.notify_one();
    }

    /// A client that writes its connection IV split across two separate
    /// `write()` calls -- the first shorter than the cipher's IV -- must
    /// still be decrypted correctly rather than panicking on the partial
    /// first read.
    #[tokio::test]
    async fn split_iv_write_is_still_decrypted_correctly() {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_port = upstream_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = upstream_listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(&buf[..n]).await.unwrap();
        });

        let profile = CipherProfile::new("aes-256-cfb", "test");
        let config = Arc::new(ServerConfig { profile: profile.clone(), auth: false, idle_timeout: Duration::from_secs(5) });
        let resolver = Arc::new(SystemResolver);
        let acl = Arc::new(MemoryAcl::new(AclMode::Black));
        let stats = Arc::new(Stats::default());
        let shutdown = Arc::new(tokio::sync::Notify::new());

        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_listener.local_addr().unwrap();
        drop(server_listener);
        tokio::spawn(run_server(server_addr, config, resolver, acl, stats.clone(), shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(server_addr).await.unwrap();
        let mut enc = relay_crypto::CipherContext::new(profile, true);
        let dest = Destination::V4([127, 0, 0, 1]);
        let mut header = relay_protocol::encode_header(&dest, upstream_port, false);
        header.extend_from_slice(b"split payload");
        let wire = enc.encrypt(&header).unwrap();

        // aes-256-cfb carries a 16-byte IV; split the wire write so the
        // first chunk hands the server only 3 IV bytes.
        assert!(wire.len() > 16);
        client.write_all(&wire[..3]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(&wire[3..]).await.unwrap();

        let mut reply = vec![0u8; 1024];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut reply)).await.unwrap().unwrap();
        assert_eq!(&reply[..n], b"split payload");

        shutdown.notify_one();
    }

    #[test]
    fn acl_black_mode_denies_listed_peers_only() {
        let acl = MemoryAcl::new(AclMode::Black);
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert!(acl.allows(peer));
        acl.add(peer);
        assert!(!acl.allows(peer));
    }

    #[test]
    fn acl_white_mode_allows_listed_peers_only() {
        let acl = MemoryAcl::new(AclMode::White);
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert!(!acl.allows(peer));
        acl.add(peer);
        assert!(acl.allows(peer));
    }

    #[tokio::test]
    async fn idle_timer_fires_when_no_activity() {
        let activity = Activity::new();
        let err = tokio::time::timeout(Duration::from_millis(200), activity.watch(Duration::from_millis(20))).await;
        assert!(matches!(err, Ok(Error::IdleTimeout)));
    }

    #[tokio::test]
    async fn idle_timer_does_not_fire_while_touched() {
        let activity = Activity::new();
        let toucher = activity.clone();
        tokio::spawn(async move {
            for _ in 0..8 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                toucher.touch();
            }
        });

        // The idle timeout (100ms) never finds a 100ms gap because the
        // spawned task keeps touching every 20ms, so the overall window
        // (220ms) elapses first and `watch` never resolves.
        let result = tokio::time::timeout(Duration::from_millis(220), activity.watch(Duration::from_millis(100))).await;
        assert!(result.is_err(), "idle timer fired despite ongoing activity");
    }
}
