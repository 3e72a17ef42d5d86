//! SealRPC Response Envelopes
//!
//! Every request gets exactly one envelope back. Errors the worker can
//! describe travel as [`Response::Fault`] over the same channel, so a
//! client only ever waits out its timeout for transport-level failures.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::{ObjectRef, RefKind, Value};

/// Category of a fault, so callers can tell "not found" from other
/// failures when deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Unknown function, class, method, attribute or object id
    NotFound,
    /// Malformed frame, unknown message kind or unreadable body
    Protocol,
    /// Unknown type tag or failed registry encode/decode
    Serialization,
    /// The registered callable failed
    Application,
    /// The server is shutting down and took no new work
    Unavailable,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::NotFound => "not-found",
            FaultKind::Protocol => "protocol",
            FaultKind::Serialization => "serialization",
            FaultKind::Application => "application",
            FaultKind::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// A response envelope returned from a worker to the client.
///
/// # Variants
///
/// - `Value`: an ordinary result
/// - `Secret`: the result stays in the server's object cache; the client
///   only learns its id and type tag
/// - `Proxy`: as `Secret`, and the client builds a live proxy handle
/// - `Tuple`: a tuple result, classified element by element
/// - `Fault`: the call failed; the message is surfaced, never retried
///
/// # Example
///
/// ```
/// use sealrpc_common::{FaultKind, Response, Value};
///
/// let ok = Response::Value(Value::from(5));
/// assert!(!ok.is_fault());
///
/// let missing = Response::fault(FaultKind::NotFound, "function 'nope' not found");
/// assert!(missing.is_fault());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Value(Value),
    Secret(ObjectRef),
    Proxy(ObjectRef),
    Tuple(Vec<Response>),
    Fault { kind: FaultKind, message: String },
}

impl Response {
    pub fn fault(kind: FaultKind, message: impl Into<String>) -> Self {
        Response::Fault {
            kind,
            message: message.into(),
        }
    }

    pub fn nil() -> Self {
        Response::Value(Value::Nil)
    }

    pub fn object(kind: RefKind, object: ObjectRef) -> Self {
        match kind {
            RefKind::Secret => Response::Secret(object),
            RefKind::Proxy => Response::Proxy(object),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Response::Fault { .. })
    }

    /// Every object reference in this envelope, tuples flattened.
    pub fn object_refs(&self) -> Vec<(RefKind, &ObjectRef)> {
        match self {
            Response::Secret(object) => vec![(RefKind::Secret, object)],
            Response::Proxy(object) => vec![(RefKind::Proxy, object)],
            Response::Tuple(items) => items.iter().flat_map(Response::object_refs).collect(),
            Response::Value(_) | Response::Fault { .. } => Vec::new(),
        }
    }
}
