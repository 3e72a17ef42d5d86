//! Backend endpoint naming and cleanup.
//!
//! The device binds its worker-facing socket on a per-process IPC path when
//! the platform supports it, otherwise on an ephemeral loopback TCP port.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

const IPC_SCHEME: &str = "ipc://";
const TCP_SCHEME: &str = "tcp://";

/// Loopback TCP endpoint with an OS-assigned port.
pub const LOOPBACK_TCP: &str = "tcp://127.0.0.1:0";

/// Prefix of the IPC socket file name.
pub const IPC_FILE_PREFIX: &str = "sealrpc-";

/// Address of the in-host channel between the queue device and its workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEndpoint {
    Ipc(PathBuf),
    Tcp(String),
}

impl BackendEndpoint {
    /// A fresh IPC endpoint under the temp dir, or `None` where IPC sockets
    /// are not available.
    pub fn ipc_candidate() -> Option<Self> {
        if cfg!(unix) {
            let short_id = uuid::Uuid::new_v4().simple().to_string();
            let name = format!("{}{}.ipc", IPC_FILE_PREFIX, &short_id[..12]);
            Some(BackendEndpoint::Ipc(std::env::temp_dir().join(name)))
        } else {
            None
        }
    }

    pub fn loopback_tcp() -> Self {
        BackendEndpoint::Tcp(LOOPBACK_TCP.to_string())
    }

    /// Parse an endpoint string as printed by the socket layer.
    pub fn parse(endpoint: &str) -> Option<Self> {
        if let Some(path) = endpoint.strip_prefix(IPC_SCHEME) {
            Some(BackendEndpoint::Ipc(PathBuf::from(path)))
        } else if endpoint.starts_with(TCP_SCHEME) {
            Some(BackendEndpoint::Tcp(endpoint.to_string()))
        } else {
            None
        }
    }

    /// Endpoint string in `scheme://address` form.
    pub fn address(&self) -> String {
        match self {
            BackendEndpoint::Ipc(path) => format!("{}{}", IPC_SCHEME, path.display()),
            BackendEndpoint::Tcp(addr) => addr.clone(),
        }
    }

    pub fn ipc_path(&self) -> Option<&Path> {
        match self {
            BackendEndpoint::Ipc(path) => Some(path),
            BackendEndpoint::Tcp(_) => None,
        }
    }

    pub fn is_ipc(&self) -> bool {
        matches!(self, BackendEndpoint::Ipc(_))
    }

    /// Remove the IPC socket file, if any. Missing files are ignored.
    pub fn cleanup(&self) {
        let Some(path) = self.ipc_path() else {
            return;
        };
        if path.exists() {
            match std::fs::remove_file(path) {
                Ok(()) => info!("Cleaned up IPC socket: {}", path.display()),
                Err(e) => warn!("Failed to remove IPC socket {}: {}", path.display(), e),
            }
        }
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_ipc_candidates_are_unique() {
        let first = BackendEndpoint::ipc_candidate().unwrap();
        let second = BackendEndpoint::ipc_candidate().unwrap();
        assert_ne!(first, second);
        assert!(first.address().starts_with("ipc://"));
        assert!(first.address().ends_with(".ipc"));
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            BackendEndpoint::parse("ipc:///tmp/test.ipc"),
            Some(BackendEndpoint::Ipc(PathBuf::from("/tmp/test.ipc")))
        );
        assert_eq!(
            BackendEndpoint::parse("tcp://127.0.0.1:4000"),
            Some(BackendEndpoint::Tcp("tcp://127.0.0.1:4000".to_string()))
        );
        assert_eq!(BackendEndpoint::parse("inproc://x"), None);
    }

    #[test]
    fn test_cleanup_removes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sealrpc-test.ipc");
        std::fs::write(&path, b"").unwrap();

        let endpoint = BackendEndpoint::Ipc(path.clone());
        endpoint.cleanup();
        assert!(!path.exists());

        // second cleanup is a no-op
        endpoint.cleanup();
    }

    #[test]
    fn test_tcp_has_no_path() {
        let endpoint = BackendEndpoint::loopback_tcp();
        assert!(!endpoint.is_ipc());
        assert!(endpoint.ipc_path().is_none());
        assert_eq!(endpoint.to_string(), LOOPBACK_TCP);
    }
}
