// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

/// External DNS resolver collaborator. The state machine only needs "name
/// in, address or failure out" -- cancellation is implicit in dropping the
/// future, so there is no separate `cancel(handle)` entry point.
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    async fn resolve(&self, host: &str) -> Option<IpAddr>;
}

/// Resolver backed by the system's asynchronous getaddrinfo, via
/// `tokio::net::lookup_host`. This is the default collaborator a binary
/// wires up.
#[derive(Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Option<IpAddr> {
        let lookup = format!("{}:0", host);
        tokio::net::lookup_host(lookup).await.ok()?.next().map(|a| a.ip())
    }
}

/// Access-control list collaborator.
pub trait Acl: Send + Sync + 'static {
    fn matches(&self, peer: IpAddr) -> bool;
    fn add(&self, peer: IpAddr);
    fn mode(&self) -> AclMode;

    /// Whether `peer` should be allowed to proceed under this ACL's current
    /// mode.
    fn allows(&self, peer: IpAddr) -> bool {
        match self.mode() {
            AclMode::Black => !self.matches(peer),
            AclMode::White => self.matches(peer),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AclMode {
    /// `matches` entries are denied; everything else is allowed.
    Black,
    /// Only `matches` entries are allowed.
    White,
}

/// In-memory ACL with no persistence, suitable as the default collaborator
/// -- the minimal concrete implementation the binaries need to be runnable.
pub struct MemoryAcl {
    mode: AclMode,
    entries: parking_lot::RwLock<std::collections::HashSet<IpAddr>>,
}

impl MemoryAcl {
    pub fn new(mode: AclMode) -> Self {
        Self { mode, entries: parking_lot::RwLock::new(std::collections::HashSet::new()) }
    }
}

impl Acl for MemoryAcl {
    fn matches(&self, peer: IpAddr) -> bool {
        self.entries.read().contains(&peer)
    }

    fn add(&self, peer: IpAddr) {
        tracing::warn!(%peer, "adding peer to ACL after auth/header failure");
        self.entries.write().insert(peer);
    }

    fn mode(&self) -> AclMode {
        self.mode
    }
}

/// Resolve a socket address's peer IP purely as a free function so callers
/// don't need to pattern-match `SocketAddr` themselves at call sites.
pub fn peer_ip(addr: SocketAddr) -> IpAddr {
    addr.ip()
}
