use std::path::Path;
use std::time::Duration;

use sealrpc_common::auth::{load_key_pair, load_public_key, KeyPair, PublicKey};
use sealrpc_common::transport::tcp::MIN_TIMEOUT;
use sealrpc_common::Result;

/// How long a call waits for its reply before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Where and how a client connects.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server front-door address, `host:port`
    pub address: String,
    /// Public key the server must prove it holds
    pub server_key: PublicKey,
    /// Key pair identifying this client; its public half must be authorized
    pub keys: KeyPair,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>, server_key: PublicKey, keys: KeyPair) -> Self {
        Self {
            address: address.into(),
            server_key,
            keys,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Loads the server's public certificate and the client's secret one.
    pub fn from_files(address: impl Into<String>, server_public: &Path, client_secret: &Path) -> Result<Self> {
        let server_key = load_public_key(server_public)?;
        let keys = load_key_pair(client_secret)?;
        Ok(Self::new(address, server_key, keys))
    }

    /// Sets the reply timeout, raised to at least [`MIN_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(MIN_TIMEOUT);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealrpc_common::auth::generate_certificates;

    #[test]
    fn test_default_timeout() {
        let config = ClientConfig::new(
            "127.0.0.1:5555",
            KeyPair::generate().unwrap().public,
            KeyPair::generate().unwrap(),
        );
        assert_eq!(config.timeout, Duration::from_millis(2000));
        assert_eq!(config.with_timeout(Duration::from_secs(1)).timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_zero_timeout_is_raised_to_minimum() {
        let config = ClientConfig::new(
            "127.0.0.1:5555",
            KeyPair::generate().unwrap().public,
            KeyPair::generate().unwrap(),
        )
        .with_timeout(Duration::ZERO);
        assert_eq!(config.timeout, MIN_TIMEOUT);
    }

    #[test]
    fn test_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let (server_public, _) = generate_certificates(dir.path(), "server").unwrap();
        let (_, client_secret) = generate_certificates(dir.path(), "client").unwrap();

        let config = ClientConfig::from_files("127.0.0.1:5555", &server_public, &client_secret).unwrap();
        assert_eq!(config.server_key, load_public_key(&server_public).unwrap());
        assert_eq!(config.keys.public, load_public_key(&client_secret).unwrap());
    }

    #[test]
    fn test_from_files_requires_secret() {
        let dir = tempfile::tempdir().unwrap();
        let (server_public, _) = generate_certificates(dir.path(), "server").unwrap();
        let (client_public, _) = generate_certificates(dir.path(), "client").unwrap();

        assert!(ClientConfig::from_files("127.0.0.1:5555", &server_public, &client_public).is_err());
    }
}
