//! SealRPC Client
//!
//! Two clients share one [`ClientConfig`]:
//!
//! - [`Client`]: synchronous. Calls functions, constructs classes and drives
//!   the resulting objects through [`Proxy`] handles. Secret results come
//!   back as [`SecretHandle`]s that can only be passed back to the server.
//! - [`AsyncClient`]: asynchronous, function calls only.
//!
//! Both authenticate with a client key pair the server must have on its
//! allow-list, and both discard a connection after a timeout or transport
//! failure so a late reply is never mistaken for the next one.

pub mod async_client;
pub mod client;
pub mod config;
pub mod proxy;

pub use async_client::{AsyncClient, RemoteValue};
pub use client::{Client, Reply};
pub use config::{ClientConfig, DEFAULT_TIMEOUT};
pub use proxy::{BoundMethod, Proxy, SecretHandle};
