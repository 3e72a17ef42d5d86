//! SealRPC Server
//!
//! Hosts registered functions and classes behind an authenticated queue
//! device. Requests are executed by a fixed pool of worker threads that
//! share one route table and one object cache; objects returned as Secret
//! or Proxy stay in the cache and are reached by id.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod object;
pub mod pool;
pub mod routes;
pub mod server;
mod worker;

pub use cache::{CachedObject, ObjectCache};
pub use config::ServerConfig;
pub use dispatch::{Dispatcher, StateCell, WorkerState};
pub use object::{RemoteObject, SecretValue};
pub use pool::WorkerPool;
pub use routes::{Arg, CallArgs, CallError, RegistrationError, RemoteClass, Returned, RouteTable, RpcModule};
pub use server::{RunningServer, Server, ShutdownOutcome};
