// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide connection counters. Not a manager/UDP statistics protocol
/// -- just an in-process accessor a caller can poll.
#[derive(Default)]
pub struct Stats {
    active_connections: AtomicU64,
    total_connections: AtomicU64,
    bytes_client_to_upstream: AtomicU64,
    bytes_upstream_to_client: AtomicU64,
}

impl Stats {
    pub fn on_connection_open(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_connection_close(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_client_to_upstream(&self, n: u64) {
        self.bytes_client_to_upstream.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_upstream_to_client(&self, n: u64) {
        self.bytes_upstream_to_client.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            bytes_client_to_upstream: self.bytes_client_to_upstream.load(Ordering::Relaxed),
            bytes_upstream_to_client: self.bytes_upstream_to_client.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active_connections: u64,
    pub total_connections: u64,
    pub bytes_client_to_upstream: u64,
    pub bytes_upstream_to_client: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_open_close_and_byte_counts() {
        let stats = Stats::default();
        stats.on_connection_open();
        stats.on_connection_open();
        stats.add_client_to_upstream(100);
        stats.add_upstream_to_client(40);
        stats.on_connection_close();

        let snap = stats.snapshot();
        assert_eq!(snap.active_connections, 1);
        assert_eq!(snap.total_connections, 2);
        assert_eq!(snap.bytes_client_to_upstream, 100);
        assert_eq!(snap.bytes_upstream_to_client, 40);
    }
}
