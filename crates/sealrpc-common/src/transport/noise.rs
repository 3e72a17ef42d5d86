//! Noise-based secure channel.
//!
//! Every client connection runs a `Noise_XX_25519_ChaChaPoly_BLAKE2s`
//! handshake before any protocol message is exchanged. XX transmits both
//! static keys, so each side can check the other's identity: the server
//! against its [`AllowList`], the client against the server key it expects.
//! A rejected peer never gets past the handshake.
//!
//! # Framing
//!
//! Handshake and transport frames share one shape:
//!
//! ```text
//! [2-byte length as u16 big-endian] [noise message]
//! ```
//!
//! An application message is an encrypted 4-byte length header followed by
//! as many encrypted chunks as its size requires:
//!
//! ```text
//! frame(enc(len: u32)) frame(enc(chunk 0)) ... frame(enc(chunk n))
//! ```
//!
//! After a successful handshake the server sends a one-byte encrypted ACK so
//! the client knows it was admitted before it sends its first request.

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::auth::{AllowList, KeyPair, PublicKey};
use crate::protocol::error::{Result, SealRpcError};

pub const NOISE_PARAMS: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";

/// Largest single Noise message.
pub const MAX_NOISE_MESSAGE_SIZE: usize = 65535;

/// AEAD tag added to every transport message.
pub const NOISE_OVERHEAD: usize = 16;

/// Largest plaintext carried by one transport frame.
pub const MAX_CHUNK_SIZE: usize = MAX_NOISE_MESSAGE_SIZE - NOISE_OVERHEAD;

/// Largest application message (100 MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

const LENGTH_HEADER_SIZE: usize = 4;
const HANDSHAKE_ACK: &[u8] = &[0x01];

pub fn noise_params() -> Result<snow::params::NoiseParams> {
    Ok(NOISE_PARAMS.parse()?)
}

fn prefix_frame(message: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(message.len() as u16).to_be_bytes());
    out.extend_from_slice(message);
}

/// Reads one length-prefixed frame.
pub fn read_frame<R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf)?;
    let mut frame = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    reader.read_exact(&mut frame)?;
    Ok(frame)
}

/// Reads one length-prefixed frame (async).
pub async fn read_frame_async<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf).await?;
    let mut frame = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    reader.read_exact(&mut frame).await?;
    Ok(frame)
}

/// In-progress XX handshake.
pub struct Handshake {
    state: snow::HandshakeState,
    buf: Vec<u8>,
}

impl Handshake {
    pub fn initiator(keys: &KeyPair) -> Result<Self> {
        let state = snow::Builder::new(noise_params()?)
            .local_private_key(keys.secret.as_bytes())
            .build_initiator()?;
        Ok(Self::with_state(state))
    }

    pub fn responder(keys: &KeyPair) -> Result<Self> {
        let state = snow::Builder::new(noise_params()?)
            .local_private_key(keys.secret.as_bytes())
            .build_responder()?;
        Ok(Self::with_state(state))
    }

    fn with_state(state: snow::HandshakeState) -> Self {
        Self {
            state,
            buf: vec![0u8; MAX_NOISE_MESSAGE_SIZE],
        }
    }

    /// Produces the next outgoing handshake frame, length prefix included.
    pub fn write_frame(&mut self) -> Result<Vec<u8>> {
        let len = self.state.write_message(&[], &mut self.buf)?;
        let mut out = Vec::with_capacity(len + 2);
        prefix_frame(&self.buf[..len], &mut out);
        Ok(out)
    }

    /// Consumes an incoming handshake frame (without its length prefix).
    pub fn read_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.state.read_message(frame, &mut self.buf)?;
        Ok(())
    }

    /// The peer's static key, known once its `s` token has been read.
    pub fn remote_key(&self) -> Option<PublicKey> {
        self.state
            .get_remote_static()
            .and_then(|key| PublicKey::from_bytes(key).ok())
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_handshake_finished()
    }

    pub fn finish(self) -> Result<SecureChannel> {
        let remote_key = self
            .remote_key()
            .ok_or_else(|| SealRpcError::Handshake("peer sent no static key".to_string()))?;
        Ok(SecureChannel {
            transport: self.state.into_transport_mode()?,
            remote_key,
            pending: None,
        })
    }
}

struct PendingMessage {
    expected: usize,
    buf: Vec<u8>,
}

/// Established channel: encrypts outgoing messages and reassembles
/// incoming ones from transport frames.
pub struct SecureChannel {
    transport: snow::TransportState,
    remote_key: PublicKey,
    pending: Option<PendingMessage>,
}

impl SecureChannel {
    /// The authenticated static key of the peer.
    pub fn remote_key(&self) -> &PublicKey {
        &self.remote_key
    }

    /// Encrypts `data` into ready-to-write framed bytes.
    pub fn encrypt_message(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(SealRpcError::Transport(format!(
                "Message too large: {} bytes (max {} bytes)",
                data.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        let frames = 1 + data.len().div_ceil(MAX_CHUNK_SIZE);
        let mut out = Vec::with_capacity(data.len() + frames * (NOISE_OVERHEAD + 2));
        let mut cipher = vec![0u8; MAX_NOISE_MESSAGE_SIZE];

        let header = (data.len() as u32).to_be_bytes();
        let len = self.transport.write_message(&header, &mut cipher)?;
        prefix_frame(&cipher[..len], &mut out);

        for chunk in data.chunks(MAX_CHUNK_SIZE) {
            let len = self.transport.write_message(chunk, &mut cipher)?;
            prefix_frame(&cipher[..len], &mut out);
        }
        Ok(out)
    }

    /// Decrypts one transport frame. Returns the message once its last
    /// chunk has arrived.
    pub fn feed_frame(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut plain = vec![0u8; frame.len()];
        let len = self.transport.read_message(frame, &mut plain)?;
        plain.truncate(len);

        let Some(mut pending) = self.pending.take() else {
            let header: [u8; LENGTH_HEADER_SIZE] = plain.as_slice().try_into().map_err(|_| {
                SealRpcError::Transport(format!("bad message header of {} bytes", plain.len()))
            })?;
            let expected = u32::from_be_bytes(header) as usize;
            if expected > MAX_MESSAGE_SIZE {
                return Err(SealRpcError::Transport(format!(
                    "Message too large: {} bytes (max {} bytes)",
                    expected, MAX_MESSAGE_SIZE
                )));
            }
            if expected == 0 {
                return Ok(Some(Vec::new()));
            }
            self.pending = Some(PendingMessage {
                expected,
                buf: Vec::with_capacity(expected.min(MAX_CHUNK_SIZE * 16)),
            });
            return Ok(None);
        };

        pending.buf.extend_from_slice(&plain);
        if pending.buf.len() > pending.expected {
            return Err(SealRpcError::Transport(
                "message body longer than its header".to_string(),
            ));
        }
        if pending.buf.len() == pending.expected {
            return Ok(Some(pending.buf));
        }
        self.pending = Some(pending);
        Ok(None)
    }

    pub fn send<W: Write>(&mut self, writer: &mut W, data: &[u8]) -> Result<()> {
        let bytes = self.encrypt_message(data)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    pub fn recv<R: Read>(&mut self, reader: &mut R) -> Result<Vec<u8>> {
        loop {
            let frame = read_frame(reader)?;
            if let Some(message) = self.feed_frame(&frame)? {
                return Ok(message);
            }
        }
    }

    pub async fn send_async<W: AsyncWrite + Unpin>(&mut self, writer: &mut W, data: &[u8]) -> Result<()> {
        let bytes = self.encrypt_message(data)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn recv_async<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<Vec<u8>> {
        loop {
            let frame = read_frame_async(reader).await?;
            if let Some(message) = self.feed_frame(&frame)? {
                return Ok(message);
            }
        }
    }

    fn check_ack(message: &[u8]) -> Result<()> {
        if message == HANDSHAKE_ACK {
            Ok(())
        } else {
            Err(SealRpcError::Handshake("unexpected handshake acknowledgement".to_string()))
        }
    }
}

fn verify_server(handshake: &Handshake, expected: &PublicKey) -> Result<()> {
    match handshake.remote_key() {
        Some(key) if key.ct_eq(expected) => Ok(()),
        Some(key) => Err(SealRpcError::Handshake(format!(
            "server presented unexpected key {}",
            key
        ))),
        None => Err(SealRpcError::Handshake("server sent no static key".to_string())),
    }
}

fn as_handshake_error(err: SealRpcError) -> SealRpcError {
    match err {
        SealRpcError::Io(e) => SealRpcError::Handshake(format!("connection closed during handshake: {}", e)),
        other => other,
    }
}

/// Client side of the handshake over a blocking stream.
pub fn client_handshake<S: Read + Write>(
    stream: &mut S,
    keys: &KeyPair,
    server_key: &PublicKey,
) -> Result<SecureChannel> {
    let run = |stream: &mut S| -> Result<SecureChannel> {
        let mut handshake = Handshake::initiator(keys)?;
        stream.write_all(&handshake.write_frame()?)?;
        handshake.read_frame(&read_frame(stream)?)?;
        verify_server(&handshake, server_key)?;
        stream.write_all(&handshake.write_frame()?)?;
        stream.flush()?;

        let mut channel = handshake.finish()?;
        let ack = channel.recv(stream)?;
        SecureChannel::check_ack(&ack)?;
        Ok(channel)
    };
    run(stream).map_err(as_handshake_error)
}

/// Client side of the handshake (async).
pub async fn client_handshake_async<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    keys: &KeyPair,
    server_key: &PublicKey,
) -> Result<SecureChannel> {
    async fn run<S: AsyncRead + AsyncWrite + Unpin>(
        stream: &mut S,
        keys: &KeyPair,
        server_key: &PublicKey,
    ) -> Result<SecureChannel> {
        let mut handshake = Handshake::initiator(keys)?;
        stream.write_all(&handshake.write_frame()?).await?;
        handshake.read_frame(&read_frame_async(stream).await?)?;
        verify_server(&handshake, server_key)?;
        stream.write_all(&handshake.write_frame()?).await?;
        stream.flush().await?;

        let mut channel = handshake.finish()?;
        let ack = channel.recv_async(stream).await?;
        SecureChannel::check_ack(&ack)?;
        Ok(channel)
    }
    run(stream, keys, server_key).await.map_err(as_handshake_error)
}

/// Server side of the handshake. Clients outside `allow_list` are refused
/// before the ACK, so they never reach the message layer.
pub async fn server_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    keys: &KeyPair,
    allow_list: &AllowList,
) -> Result<SecureChannel> {
    async fn run<S: AsyncRead + AsyncWrite + Unpin>(
        stream: &mut S,
        keys: &KeyPair,
        allow_list: &AllowList,
    ) -> Result<SecureChannel> {
        let mut handshake = Handshake::responder(keys)?;
        handshake.read_frame(&read_frame_async(stream).await?)?;
        stream.write_all(&handshake.write_frame()?).await?;
        stream.flush().await?;
        handshake.read_frame(&read_frame_async(stream).await?)?;

        let mut channel = handshake.finish()?;
        if !allow_list.contains(channel.remote_key()) {
            return Err(SealRpcError::Handshake(format!(
                "client key {} is not authorized",
                channel.remote_key()
            )));
        }
        channel.send_async(stream, HANDSHAKE_ACK).await?;
        Ok(channel)
    }
    run(stream, keys, allow_list).await.map_err(as_handshake_error)
}
