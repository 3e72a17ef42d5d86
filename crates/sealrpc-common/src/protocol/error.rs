use thiserror::Error;

use super::response::FaultKind;

#[derive(Error, Debug)]
pub enum SealRpcError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown type tag: {0}")]
    UnknownTypeTag(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Key file error: {0}")]
    KeyFile(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registration error: {0}")]
    Registration(String),

    /// A member lookup that failed on the client, before any request was sent.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote {kind} fault: {message}")]
    Remote { kind: FaultKind, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl SealRpcError {
    /// Builds the client-side error for a fault envelope.
    pub fn remote(kind: FaultKind, message: impl Into<String>) -> Self {
        SealRpcError::Remote {
            kind,
            message: message.into(),
        }
    }

    /// Returns true for failures below the protocol layer.
    ///
    /// Clients drop and reopen their connection after any of these, since
    /// the stream may still hold a late reply or half a frame.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SealRpcError::Transport(_)
                | SealRpcError::Timeout(_)
                | SealRpcError::Handshake(_)
                | SealRpcError::Io(_)
                | SealRpcError::Connection(_)
        )
    }

    /// The fault kind reported by the server, if this error came from one.
    /// Local member lookups count as `NotFound`.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            SealRpcError::Remote { kind, .. } => Some(*kind),
            SealRpcError::NotFound(_) => Some(FaultKind::NotFound),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.fault_kind() == Some(FaultKind::NotFound)
    }
}

impl From<rmp_serde::encode::Error> for SealRpcError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        SealRpcError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SealRpcError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        SealRpcError::Serialization(err.to_string())
    }
}

impl From<snow::Error> for SealRpcError {
    fn from(err: snow::Error) -> Self {
        SealRpcError::Handshake(err.to_string())
    }
}

impl From<toml::de::Error> for SealRpcError {
    fn from(err: toml::de::Error) -> Self {
        SealRpcError::KeyFile(err.to_string())
    }
}

impl From<toml::ser::Error> for SealRpcError {
    fn from(err: toml::ser::Error) -> Self {
        SealRpcError::KeyFile(err.to_string())
    }
}

impl From<std::net::AddrParseError> for SealRpcError {
    fn from(err: std::net::AddrParseError) -> Self {
        SealRpcError::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SealRpcError>;
