//! SealRPC Transport Layer
//!
//! This module provides the encrypted client connection, the wire codec and
//! the backend endpoint helpers shared by the device and the workers.
//!
//! # Architecture
//!
//! - **Front door**: TCP carrying a Noise `XX` session. Both sides prove a
//!   Curve25519 static key; the server only accepts keys on its allow-list.
//! - **Codec**: MessagePack. Requests are `[kind byte][named-field body]`.
//! - **Backend**: in-host ZeroMQ endpoint (IPC, falling back to loopback TCP)
//!   between the queue device and the worker threads.
//!
//! # Message Size Limits
//!
//! Encrypted messages are capped at 100 MB to prevent memory exhaustion.

pub mod codec;
pub mod endpoint;
pub mod noise;
pub mod tcp;

pub use codec::MsgPackCodec;
pub use endpoint::BackendEndpoint;
pub use noise::{client_handshake, server_handshake, SecureChannel, MAX_MESSAGE_SIZE};
pub use tcp::{AsyncSecureStream, SecureStream};
