use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sealrpc_common::{Result, SealRpcError};

use crate::pool::WorkerPool;

/// Server settings.
///
/// Every field has a default, so a TOML file only needs the keys it
/// changes:
///
/// ```toml
/// bind = "0.0.0.0:5555"
/// server-key = "/etc/sealrpc/server.key_secret"
/// authorized-keys = "/etc/sealrpc/authorized"
/// workers = 4
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Front-door address clients connect to
    pub bind: String,
    /// Certificate holding the server's secret key
    pub server_key: PathBuf,
    /// Directory of client public keys allowed to connect
    pub authorized_keys: PathBuf,
    /// Worker count; `None` means one per CPU
    pub workers: Option<usize>,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Time a client gets to complete the handshake
    pub handshake_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5555".to_string(),
            server_key: PathBuf::from("certificates/server.key_secret"),
            authorized_keys: PathBuf::from("certificates/authorized"),
            workers: None,
            log_level: "info".to_string(),
            handshake_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SealRpcError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| SealRpcError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn with_server_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_key = path.into();
        self
    }

    pub fn with_authorized_keys(mut self, dir: impl Into<PathBuf>) -> Self {
        self.authorized_keys = dir.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(WorkerPool::default_size)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "127.0.0.1:5555");
        assert_eq!(config.workers, None);
        assert!(config.worker_count() >= 1);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_builders() {
        let config = ServerConfig::new()
            .with_bind("0.0.0.0:6000")
            .with_workers(3)
            .with_log_level("debug")
            .with_handshake_timeout(Duration::from_millis(250));
        assert_eq!(config.bind, "0.0.0.0:6000");
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.handshake_timeout_ms, 250);
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "bind = \"0.0.0.0:7000\"\nworkers = 2\nserver-key = \"/keys/s.key_secret\"\n").unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.bind, "0.0.0.0:7000");
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.server_key, PathBuf::from("/keys/s.key_secret"));
        assert_eq!(config.authorized_keys, PathBuf::from("certificates/authorized"));
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ServerConfig::from_file(&dir.path().join("missing.toml")),
            Err(SealRpcError::Config(_))
        ));

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "workers = \"many\"").unwrap();
        assert!(matches!(ServerConfig::from_file(&path), Err(SealRpcError::Config(_))));
    }
}
