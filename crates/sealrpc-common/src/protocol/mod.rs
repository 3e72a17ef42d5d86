pub mod error;
pub mod request;
pub mod response;
pub mod value;

#[cfg(test)]
mod tests;

pub use error::{Result, SealRpcError};
pub use request::{Kwargs, MessageKind, Request};
pub use response::{FaultKind, Response};
pub use value::{ObjectId, ObjectRef, RefKind, Value};

/// Built-in function answering with the registered function and class names.
pub const CONTRACT_FUNCTION: &str = "_contract";

/// Method name used by proxies to read a remote attribute.
pub const GETATTR_METHOD: &str = "__getattr__";
