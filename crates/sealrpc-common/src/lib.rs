//! SealRPC Common Types and Transport
//!
//! This crate provides the wire protocol, the secure channel and the key
//! handling shared by every SealRPC component.
//!
//! # Overview
//!
//! SealRPC lets a client invoke functions and manipulate objects that live
//! inside a server process while keeping values marked as secret inside the
//! server's address space. Only opaque handles ever cross the wire for them.
//!
//! - **Protocol Layer**: [`Value`], [`Request`], [`Response`] envelopes and the
//!   error taxonomy
//! - **Transport Layer**: MessagePack codec, Noise-encrypted framing and the
//!   backend endpoint selection used between the queue device and workers
//! - **Serialization Registry**: tag-indexed encoders for values that are not
//!   protocol-native
//! - **Auth**: key pairs, certificate files and the client allow-list
//!
//! # Wire Format
//!
//! - **Request**: `[1-byte message kind] + [MessagePack body]`
//! - **Response**: `[MessagePack envelope]`
//! - **Transport**: Noise XX handshake, then encrypted frames with a 2-byte
//!   length prefix; messages larger than 100 MB are rejected
//!
//! # Example
//!
//! ```
//! use sealrpc_common::{Request, Response, Value};
//! use sealrpc_common::transport::MsgPackCodec;
//!
//! let request = Request::function_call("add", vec![Value::from(2), Value::from(3)]);
//! let frame = MsgPackCodec::encode_request(&request).unwrap();
//! assert_eq!(MsgPackCodec::decode_request(&frame).unwrap(), request);
//!
//! let response = Response::Value(Value::from(5));
//! let encoded = MsgPackCodec::encode_response(&response).unwrap();
//! assert_eq!(MsgPackCodec::decode_response(&encoded).unwrap(), response);
//! ```

pub mod auth;
pub mod protocol;
pub mod serializers;
pub mod transport;

pub use protocol::*;
pub use serializers::SerializerRegistry;
