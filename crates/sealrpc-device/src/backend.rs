//! Worker-facing side of the queue device.
//!
//! The backend is a single DEALER socket that every worker connects to.
//! Outgoing frames are distributed round-robin by the socket itself; the
//! device adds no scheduling of its own.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use sealrpc_common::transport::endpoint::{BackendEndpoint, LOOPBACK_TCP};
use sealrpc_common::{Result, SealRpcError};
use tracing::{debug, info, warn};
use zeromq::{DealerSocket, Socket, SocketSend, ZmqError, ZmqMessage};

/// Connection identity assigned by the front door.
pub type Identity = u64;

/// Configuration for retry logic with exponential backoff.
///
/// Used when a frame cannot be handed to any worker, typically because none
/// has connected yet. After `max_retries` the frame is dropped and the
/// client eventually times out.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (excluding initial attempt)
    ///
    /// Default: 3
    pub max_retries: usize,
    /// Initial backoff in milliseconds
    ///
    /// Default: 50ms
    pub initial_backoff_ms: u64,
    /// Maximum backoff in milliseconds
    ///
    /// Default: 5000ms (5 seconds)
    pub max_backoff_ms: u64,
    /// Exponential backoff multiplier
    ///
    /// Default: 2.0 (doubles each time)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Wait before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let mut backoff_ms = self.initial_backoff_ms;
        for _ in 0..attempt {
            backoff_ms = std::cmp::min(
                (backoff_ms as f64 * self.backoff_multiplier) as u64,
                self.max_backoff_ms,
            );
        }
        Duration::from_millis(backoff_ms.min(self.max_backoff_ms))
    }
}

/// Binds the backend socket, preferring IPC and falling back to loopback TCP.
///
/// The choice is made once; the returned endpoint is the resolved address
/// workers must connect to (for TCP, with the OS-assigned port).
pub async fn bind_backend() -> Result<(DealerSocket, BackendEndpoint)> {
    if let Some(candidate) = BackendEndpoint::ipc_candidate() {
        let mut socket = DealerSocket::new();
        match socket.bind(&candidate.address()).await {
            Ok(bound) => {
                let endpoint = BackendEndpoint::parse(&bound.to_string()).unwrap_or(candidate);
                info!("Backend bound to {}", endpoint);
                return Ok((socket, endpoint));
            }
            Err(e) => {
                warn!(
                    "IPC backend unavailable at {} ({}), falling back to loopback TCP",
                    candidate, e
                );
            }
        }
    }

    let mut socket = DealerSocket::new();
    let bound = socket
        .bind(LOOPBACK_TCP)
        .await
        .map_err(|e| SealRpcError::Transport(format!("Failed to bind backend to {}: {}", LOOPBACK_TCP, e)))?;
    let endpoint = BackendEndpoint::parse(&bound.to_string()).ok_or_else(|| {
        SealRpcError::Transport(format!("Unexpected backend endpoint {}", bound))
    })?;
    info!("Backend bound to {}", endpoint);
    Ok((socket, endpoint))
}

/// Builds the `[identity, empty, payload]` frame set sent to workers.
pub fn envelope(identity: Identity, payload: Vec<u8>) -> Result<ZmqMessage> {
    let frames: VecDeque<Bytes> = VecDeque::from(vec![
        Bytes::copy_from_slice(&identity.to_be_bytes()),
        Bytes::new(),
        Bytes::from(payload),
    ]);
    ZmqMessage::try_from(frames)
        .map_err(|e| SealRpcError::Transport(format!("Failed to build frame: {:?}", e)))
}

/// Splits a worker reply into its identity and payload.
pub fn open_envelope(message: ZmqMessage) -> Result<(Identity, Vec<u8>)> {
    let mut frames = message.into_vecdeque();
    if frames.len() != 3 {
        return Err(SealRpcError::Transport(format!(
            "expected 3 frames, got {}",
            frames.len()
        )));
    }
    let identity_frame = frames.pop_front().unwrap_or_default();
    let identity: [u8; 8] = identity_frame
        .as_ref()
        .try_into()
        .map_err(|_| SealRpcError::Transport("malformed identity frame".to_string()))?;
    let payload = frames.pop_back().unwrap_or_default();
    Ok((Identity::from_be_bytes(identity), payload.to_vec()))
}

/// Hands a frame set to the next worker, backing off while no worker is
/// connected.
pub async fn send_with_retry(socket: &mut DealerSocket, message: ZmqMessage, retry: &RetryConfig) -> Result<()> {
    let mut message = message;
    let mut attempt = 0;
    loop {
        match socket.send(message).await {
            Ok(()) => return Ok(()),
            Err(ZmqError::ReturnToSender { reason, message: returned }) => {
                if attempt >= retry.max_retries {
                    return Err(SealRpcError::Transport(format!(
                        "no worker accepted the request after {} retries: {}",
                        retry.max_retries, reason
                    )));
                }
                let backoff = retry.backoff(attempt);
                debug!("Backend send returned ({}), retrying in {:?}", reason, backoff);
                tokio::time::sleep(backoff).await;
                message = returned;
                attempt += 1;
            }
            Err(e) => return Err(SealRpcError::Transport(format!("Backend send failed: {}", e))),
        }
    }
}
