// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Process-wide configuration, deserialized from an optional JSON file and
/// then overridable by CLI flags: a JSON file with field-for-field defaults
/// when absent.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Settings {
    /// The encrypted endpoint: where `ssrelay-server` listens, or where
    /// `ssrelay-tunnel` dials out to.
    pub server_addr: SocketAddr,
    /// The plaintext endpoint: unused by `ssrelay-server`; where
    /// `ssrelay-tunnel` accepts local application connections.
    pub local_addr: SocketAddr,
    /// Destination the tunnel synthesizes a header for on every connection.
    pub fixed_dest: String,
    pub fixed_port: u16,
    pub password: String,
    pub cipher: String,
    pub one_time_auth: bool,
    pub idle_timeout_secs: u64,
    /// Target for `RLIMIT_NOFILE`; `0` leaves the inherited limit alone.
    pub nofile_limit: u64,
    /// ACL mode for `ssrelay-server`: `"black"` or `"white"`.
    pub acl_mode: String,
    /// Accepted for config-file compatibility with upstream Shadowsocks
    /// deployments; both are no-ops here.
    pub fast_open: bool,
    pub bind_interface: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:8388".parse().unwrap(),
            local_addr: "127.0.0.1:1080".parse().unwrap(),
            fixed_dest: String::new(),
            fixed_port: 0,
            password: String::new(),
            cipher: "aes-256-cfb".to_string(),
            one_time_auth: false,
            idle_timeout_secs: 300,
            nofile_limit: 0,
            acl_mode: "black".to_string(),
            fast_open: false,
            bind_interface: String::new(),
        }
    }
}

impl Settings {
    /// Load settings from `path` if given, falling back to defaults when the
    /// file doesn't exist; an existing-but-unparseable file is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p,
            None => return Ok(Self::default()),
        };
        match std::fs::read(path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn acl_mode(&self) -> relay_net::AclMode {
        if self.acl_mode.eq_ignore_ascii_case("white") {
            relay_net::AclMode::White
        } else {
            relay_net::AclMode::Black
        }
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn warn_on_noop_fields(&self) {
        if self.fast_open {
            tracing::warn!("fast_open is accepted for config compatibility but is not implemented");
        }
        if !self.bind_interface.is_empty() {
            tracing::warn!(interface = %self.bind_interface, "bind_interface is accepted for config compatibility but is not implemented");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/ssrelay.json"))).unwrap();
        assert_eq!(settings.cipher, "aes-256-cfb");
    }

    #[test]
    fn parses_partial_json_with_field_defaults() {
        let dir = std::env::temp_dir().join(format!("ssrelay-test-{}", std::process::id()));
        std::fs::write(&dir, br#"{"password":"hunter2","cipher":"chacha20-ietf"}"#).unwrap();
        let settings = Settings::load(Some(&dir)).unwrap();
        std::fs::remove_file(&dir).ok();
        assert_eq!(settings.password, "hunter2");
        assert_eq!(settings.cipher, "chacha20-ietf");
        assert_eq!(settings.idle_timeout_secs, 300);
    }

    #[test]
    fn acl_mode_defaults_to_black() {
        let settings = Settings::default();
        assert_eq!(settings.acl_mode(), relay_net::AclMode::Black);
    }
}
