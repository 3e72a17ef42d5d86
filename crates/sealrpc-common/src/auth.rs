//! Authentication Layer for SealRPC
//!
//! Servers and clients authenticate each other with static X25519 key pairs
//! during the Noise handshake (see [`crate::transport::noise`]). This module
//! owns the key material on disk and the server's allow-list of client keys.
//!
//! # Certificate Files
//!
//! A certificate is a small TOML file. The public half lives in
//! `<name>.key`, the full pair in `<name>.key_secret`:
//!
//! ```text
//! [metadata]
//! name = "client"
//!
//! [curve]
//! public-key = "3b6a27bcceb6a42d62a3a8d02a6f0d73653215771de243a63ac048a18b59da29"
//! secret-key = "..."   # only in .key_secret
//! ```
//!
//! # Security Model
//!
//! - The server only completes handshakes with clients whose public key is in
//!   its [`AllowList`], loaded from a directory of `.key` files
//! - The client only accepts a server whose public key it was configured with
//! - Key comparison is constant-time
//! - Secret keys never appear in `Debug` or `Display` output
//!
//! # Example
//!
//! ```no_run
//! use sealrpc_common::auth::{generate_certificates, load_key_pair, AllowList};
//!
//! let dir = std::path::Path::new("certificates");
//! let (public_file, secret_file) = generate_certificates(dir, "client").unwrap();
//!
//! let keys = load_key_pair(&secret_file).unwrap();
//! let allow_list = AllowList::from_dir(dir).unwrap();
//! assert!(allow_list.contains(&keys.public));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::protocol::error::{Result, SealRpcError};
use crate::transport::noise::noise_params;

pub const KEY_LEN: usize = 32;
pub const PUBLIC_KEY_EXTENSION: &str = "key";
pub const SECRET_KEY_EXTENSION: &str = "key_secret";

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            SealRpcError::KeyFile(format!(
                "public key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(PublicKey(key))
    }

    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| SealRpcError::KeyFile(format!("invalid public key hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Constant-time equality.
    pub fn ct_eq(&self, other: &PublicKey) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Clone)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| SealRpcError::KeyFile(format!("secret key must be {} bytes", KEY_LEN)))?;
        Ok(SecretKey(key))
    }

    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|_| SealRpcError::KeyFile("invalid secret key hex".to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(*****)")
    }
}

/// A static X25519 key pair identifying a server or a client.
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    /// Generates a fresh key pair.
    pub fn generate() -> Result<Self> {
        let keypair = snow::Builder::new(noise_params()?).generate_keypair()?;
        Ok(Self {
            public: PublicKey::from_bytes(&keypair.public)?,
            secret: SecretKey::from_bytes(&keypair.private)?,
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CertificateFile {
    #[serde(default)]
    metadata: CertificateMetadata,
    curve: CurveSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CertificateMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CurveSection {
    public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret_key: Option<String>,
}

fn read_certificate(path: &Path) -> Result<CertificateFile> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        SealRpcError::KeyFile(format!("cannot read {}: {}", path.display(), e))
    })?;
    toml::from_str(&contents)
        .map_err(|e| SealRpcError::KeyFile(format!("invalid certificate {}: {}", path.display(), e)))
}

fn write_certificate(path: &Path, certificate: &CertificateFile) -> Result<()> {
    let contents = toml::to_string(certificate)?;
    std::fs::write(path, contents).map_err(|e| {
        SealRpcError::KeyFile(format!("cannot write {}: {}", path.display(), e))
    })
}

/// Writes a new key pair as `<dir>/<name>.key` and `<dir>/<name>.key_secret`.
///
/// The directory is created if needed. Returns `(public_path, secret_path)`.
pub fn generate_certificates(dir: &Path, name: &str) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir).map_err(|e| {
        SealRpcError::KeyFile(format!("cannot create {}: {}", dir.display(), e))
    })?;

    let keys = KeyPair::generate()?;
    let public_path = dir.join(format!("{}.{}", name, PUBLIC_KEY_EXTENSION));
    let secret_path = dir.join(format!("{}.{}", name, SECRET_KEY_EXTENSION));

    let mut certificate = CertificateFile {
        metadata: CertificateMetadata {
            name: Some(name.to_string()),
        },
        curve: CurveSection {
            public_key: keys.public.to_hex(),
            secret_key: None,
        },
    };
    write_certificate(&public_path, &certificate)?;

    certificate.curve.secret_key = Some(keys.secret.to_hex());
    write_certificate(&secret_path, &certificate)?;

    tracing::info!("Wrote certificate pair {} / {}", public_path.display(), secret_path.display());
    Ok((public_path, secret_path))
}

/// Loads the public key from either half of a certificate pair.
pub fn load_public_key(path: &Path) -> Result<PublicKey> {
    PublicKey::from_hex(&read_certificate(path)?.curve.public_key)
}

/// Loads a full key pair; the file must contain `secret-key`.
pub fn load_key_pair(path: &Path) -> Result<KeyPair> {
    let certificate = read_certificate(path)?;
    let secret_hex = certificate.curve.secret_key.ok_or_else(|| {
        SealRpcError::KeyFile(format!("{} has no secret key", path.display()))
    })?;
    Ok(KeyPair {
        public: PublicKey::from_hex(&certificate.curve.public_key)?,
        secret: SecretKey::from_hex(&secret_hex)?,
    })
}

/// Public keys of the clients a server accepts.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    keys: Vec<PublicKey>,
}

impl AllowList {
    pub fn from_keys(keys: impl IntoIterator<Item = PublicKey>) -> Self {
        let mut list = Self::default();
        for key in keys {
            list.insert(key);
        }
        list
    }

    /// Loads every `*.key` certificate in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be read, a certificate is malformed, or
    /// no certificate is found. A server never runs with an empty allow-list.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            SealRpcError::KeyFile(format!(
                "cannot read authorized keys directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut list = Self::default();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(PUBLIC_KEY_EXTENSION) {
                let key = load_public_key(&path)?;
                tracing::debug!("Authorized client key {} from {}", key, path.display());
                list.insert(key);
            }
        }

        if list.is_empty() {
            return Err(SealRpcError::KeyFile(format!(
                "no .{} certificates in {}",
                PUBLIC_KEY_EXTENSION,
                dir.display()
            )));
        }
        Ok(list)
    }

    pub fn insert(&mut self, key: PublicKey) {
        if !self.contains(&key) {
            self.keys.push(key);
        }
    }

    /// Checks membership without short-circuiting on the first match.
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.keys
            .iter()
            .fold(false, |found, candidate| candidate.ct_eq(key) | found)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Performs constant-time comparison to prevent timing attacks.
///
/// Always iterates through the entire input regardless of where the first
/// difference occurs.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.iter().zip(b.iter()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}
