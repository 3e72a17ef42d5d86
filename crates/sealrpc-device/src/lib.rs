//! SealRPC Queue Device
//!
//! The device sits between clients and the worker pool. Its front door
//! accepts authenticated client connections; its backend is a DEALER socket
//! the workers connect to. Requests go out round-robin, replies come back to
//! the connection that sent the request. The device never decodes a message.
//!
//! ```text
//! client ──Noise/TCP──▶ front door ──[id, "", payload]──▶ DEALER ──▶ worker 1..N
//! ```

pub mod backend;
pub mod device;
mod frontend;

pub use backend::{Identity, RetryConfig};
pub use device::{DeviceHandle, QueueDevice, DEFAULT_HANDSHAKE_TIMEOUT};
