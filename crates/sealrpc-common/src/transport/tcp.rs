use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;

use crate::auth::{KeyPair, PublicKey};
use crate::protocol::error::{Result, SealRpcError};
use crate::transport::noise::{client_handshake, client_handshake_async, SecureChannel};

/// Default timeout for connecting and completing the handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shortest reply timeout; socket timeouts reject zero.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Authenticated, encrypted client connection (synchronous).
///
/// Wraps a blocking [`TcpStream`] that has completed the Noise handshake.
/// One request is in flight at a time: [`SecureStream::round_trip`] sends a
/// message and blocks for the reply up to the given timeout.
///
/// # Example
///
/// ```no_run
/// use sealrpc_common::auth::{load_key_pair, load_public_key};
/// use sealrpc_common::transport::SecureStream;
/// use std::path::Path;
/// use std::time::Duration;
///
/// let keys = load_key_pair(Path::new("certificates/client.key_secret")).unwrap();
/// let server = load_public_key(Path::new("certificates/server.key")).unwrap();
///
/// let mut stream = SecureStream::connect("127.0.0.1:5555", &keys, &server).unwrap();
/// let reply = stream.round_trip(b"\x00...", Duration::from_secs(2)).unwrap();
/// ```
pub struct SecureStream {
    stream: TcpStream,
    channel: SecureChannel,
}

impl SecureStream {
    /// Connects to a server and runs the client side of the handshake.
    ///
    /// The address may resolve to multiple addresses; each is tried until
    /// one accepts the TCP connection.
    ///
    /// # Errors
    ///
    /// - `Connection` if the address cannot be resolved or no address accepts
    /// - `Handshake` if the server is not the expected one or refuses our key
    pub fn connect(addr: &str, keys: &KeyPair, server_key: &PublicKey) -> Result<Self> {
        let socket_addrs = addr
            .to_socket_addrs()
            .map_err(|e| SealRpcError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect_timeout(&socket_addr, DEFAULT_CONNECT_TIMEOUT) {
                Ok(mut stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(DEFAULT_CONNECT_TIMEOUT))?;
                    stream.set_write_timeout(Some(DEFAULT_CONNECT_TIMEOUT))?;
                    let channel = client_handshake(&mut stream, keys, server_key)?;
                    return Ok(Self { stream, channel });
                }
                Err(e) => {
                    last_err = Some(e);
                }
            }
        }

        Err(SealRpcError::Connection(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "Unknown error".to_string())
        )))
    }

    /// Sends one message and waits for the reply.
    ///
    /// The timeout bounds the whole wait, not each read. On any error the
    /// stream must be discarded; a late reply may still arrive on it.
    pub fn round_trip(&mut self, data: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let timeout = timeout.max(MIN_TIMEOUT);
        let timeout_ms = timeout.as_millis() as u64;
        self.stream.set_write_timeout(Some(timeout))?;
        self.channel
            .send(&mut self.stream, data)
            .map_err(|e| map_transport_error(e, "sending request", timeout_ms))?;

        let deadline = Instant::now() + timeout;
        let mut reader = DeadlineReader {
            stream: &self.stream,
            deadline,
        };
        self.channel
            .recv(&mut reader)
            .map_err(|e| map_transport_error(e, "reading response", timeout_ms))
    }

    pub fn peer_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

/// Shrinks the socket read timeout as the deadline approaches.
struct DeadlineReader<'a> {
    stream: &'a TcpStream,
    deadline: Instant,
}

impl std::io::Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(std::io::Error::from(std::io::ErrorKind::TimedOut));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        let mut stream = self.stream;
        std::io::Read::read(&mut stream, buf)
    }
}

/// Authenticated, encrypted client connection (async).
pub struct AsyncSecureStream {
    stream: tokio::net::TcpStream,
    channel: SecureChannel,
}

impl AsyncSecureStream {
    pub async fn connect(addr: &str, keys: &KeyPair, server_key: &PublicKey) -> Result<Self> {
        let connect = tokio::net::TcpStream::connect(addr);
        let mut stream = tokio::time::timeout(DEFAULT_CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| SealRpcError::Timeout(DEFAULT_CONNECT_TIMEOUT.as_millis() as u64))?
            .map_err(|e| SealRpcError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        let handshake = client_handshake_async(&mut stream, keys, server_key);
        let channel = tokio::time::timeout(DEFAULT_CONNECT_TIMEOUT, handshake)
            .await
            .map_err(|_| SealRpcError::Handshake("handshake timed out".to_string()))??;
        Ok(Self { stream, channel })
    }

    /// Sends one message and waits for the reply, bounded by `timeout`.
    pub async fn round_trip(&mut self, data: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let timeout = timeout.max(MIN_TIMEOUT);
        let timeout_ms = timeout.as_millis() as u64;
        let exchange = async {
            self.channel.send_async(&mut self.stream, data).await?;
            self.channel.recv_async(&mut self.stream).await
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| SealRpcError::Timeout(timeout_ms))?
            .map_err(|e| map_transport_error(e, "exchanging messages", timeout_ms))
    }

    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Map IO errors to appropriate SealRpcError variants
///
/// - Timeouts/would block -> `Timeout`
/// - Connection errors -> `Connection`
/// - Other errors pass through unchanged
pub fn map_transport_error(err: SealRpcError, context: &str, timeout_ms: u64) -> SealRpcError {
    let SealRpcError::Io(io_err) = err else {
        return err;
    };
    match io_err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => SealRpcError::Timeout(timeout_ms),
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof => {
            SealRpcError::Connection(format!("{}: Connection lost", context))
        }
        _ => SealRpcError::Io(io_err),
    }
}
