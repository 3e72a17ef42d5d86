//! Asynchronous client.
//!
//! The async client only makes function calls. It has no proxy support:
//! constructing a class, reading attributes or calling methods needs the
//! synchronous [`Client`](crate::Client). Object references in replies come
//! back as [`RemoteValue::Secret`] or [`RemoteValue::Proxy`] carrying the bare
//! [`ObjectRef`]; they can be passed back as arguments and must be released
//! with [`AsyncClient::release`].
//!
//! Concurrent calls each take a connection from a small pool, so they run in
//! parallel on the server instead of queueing behind one socket.

use parking_lot::Mutex;
use sealrpc_common::transport::{AsyncSecureStream, MsgPackCodec};
use sealrpc_common::{Kwargs, ObjectRef, RefKind, Request, Response, Result, SealRpcError, Value};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::ClientConfig;

/// Connections kept per client unless configured otherwise.
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// Result of an async call. Object references are not wrapped in handles.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteValue {
    Value(Value),
    Secret(ObjectRef),
    Proxy(ObjectRef),
    Tuple(Vec<RemoteValue>),
}

impl RemoteValue {
    fn from_response(response: Response) -> Result<Self> {
        match response {
            Response::Value(value) => Ok(RemoteValue::Value(value)),
            Response::Secret(object) => Ok(RemoteValue::Secret(object)),
            Response::Proxy(object) => Ok(RemoteValue::Proxy(object)),
            Response::Tuple(items) => items
                .into_iter()
                .map(RemoteValue::from_response)
                .collect::<Result<Vec<_>>>()
                .map(RemoteValue::Tuple),
            Response::Fault { kind, message } => Err(SealRpcError::remote(kind, message)),
        }
    }

    pub fn into_value(self) -> Result<Value> {
        match self {
            RemoteValue::Value(value) => Ok(value),
            other => Err(SealRpcError::InvalidResponse(format!(
                "expected a value, got {:?}",
                other
            ))),
        }
    }

    /// The reference to pass back as an argument, for object replies.
    pub fn as_arg(&self) -> Option<Value> {
        match self {
            RemoteValue::Secret(object) => Some(Value::reference(RefKind::Secret, object.clone())),
            RemoteValue::Proxy(object) => Some(Value::reference(RefKind::Proxy, object.clone())),
            RemoteValue::Value(_) | RemoteValue::Tuple(_) => None,
        }
    }
}

/// Asynchronous SealRPC client for function calls.
///
/// # Example
///
/// ```no_run
/// use sealrpc_client::{AsyncClient, ClientConfig};
/// use sealrpc_common::Value;
///
/// # async fn demo(config: ClientConfig) -> sealrpc_common::Result<()> {
/// let client = AsyncClient::new(config);
/// let sum = client.call("add", vec![Value::from(2), Value::from(3)]).await?;
/// assert_eq!(sum.into_value()?, Value::from(5));
/// # Ok(())
/// # }
/// ```
pub struct AsyncClient {
    config: ClientConfig,
    idle: Mutex<Vec<AsyncSecureStream>>,
    permits: Semaphore,
    max_connections: usize,
}

impl AsyncClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_max_connections(config, DEFAULT_MAX_CONNECTIONS)
    }

    /// A client that opens at most `max_connections` connections (minimum 1).
    pub fn with_max_connections(config: ClientConfig, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            config,
            idle: Mutex::new(Vec::new()),
            permits: Semaphore::new(max_connections),
            max_connections,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Connections currently open and not in use.
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    /// Calls a registered function.
    ///
    /// # Errors
    ///
    /// - `Remote` if the server answered with a fault
    /// - `Timeout` if no connection freed up, or no reply arrived, in time
    /// - `Connection`/`Handshake` if the server could not be reached
    pub async fn call(&self, function: &str, args: Vec<Value>) -> Result<RemoteValue> {
        self.call_with_kwargs(function, args, Kwargs::new()).await
    }

    pub async fn call_with_kwargs(&self, function: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<RemoteValue> {
        let request = Request::function_call(function, args).with_kwargs(kwargs);
        let response = self.request(&request).await?;
        RemoteValue::from_response(response)
    }

    /// Releases an object a previous call returned.
    pub async fn release(&self, object: &ObjectRef) -> Result<()> {
        match self.request(&Request::destructor(object.id.clone())).await? {
            Response::Fault { kind, message } => Err(SealRpcError::remote(kind, message)),
            _ => Ok(()),
        }
    }

    /// Sends a raw request and returns the raw envelope, faults included.
    ///
    /// A connection that fails at the transport level is discarded; the
    /// next call opens a fresh one.
    pub async fn request(&self, request: &Request) -> Result<Response> {
        let frame = MsgPackCodec::encode_request(request)?;
        let timeout = self.config.timeout;

        let _permit = tokio::time::timeout(timeout, self.permits.acquire())
            .await
            .map_err(|_| SealRpcError::Timeout(timeout.as_millis() as u64))?
            .map_err(|_| SealRpcError::Connection("client is closed".to_string()))?;

        let idle = self.idle.lock().pop();
        let mut stream = match idle {
            Some(stream) => stream,
            None => {
                let stream =
                    AsyncSecureStream::connect(&self.config.address, &self.config.keys, &self.config.server_key)
                        .await?;
                debug!("Opened connection to {}", self.config.address);
                stream
            }
        };

        match stream.round_trip(&frame, timeout).await {
            Ok(reply) => {
                self.idle.lock().push(stream);
                MsgPackCodec::decode_response(&reply)
            }
            Err(e) => {
                if e.is_transport() {
                    warn!("Dropping connection to {} after {}", self.config.address, e);
                    stream.close().await;
                } else {
                    self.idle.lock().push(stream);
                }
                Err(e)
            }
        }
    }

    /// Closes every idle connection.
    pub async fn close(&self) {
        let streams: Vec<_> = std::mem::take(&mut *self.idle.lock());
        for stream in streams {
            stream.close().await;
        }
    }
}

impl std::fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClient")
            .field("address", &self.config.address)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealrpc_common::auth::KeyPair;
    use sealrpc_common::{FaultKind, ObjectId};
    use std::time::Duration;

    fn offline_config() -> ClientConfig {
        ClientConfig::new(
            "127.0.0.1:1",
            KeyPair::generate().unwrap().public,
            KeyPair::generate().unwrap(),
        )
        .with_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_remote_value_from_tuple() {
        let object = ObjectRef::new(ObjectId::from("abc"), "Blob");
        let value = RemoteValue::from_response(Response::Tuple(vec![
            Response::Value(Value::from(1)),
            Response::Secret(object.clone()),
        ]))
        .unwrap();
        let RemoteValue::Tuple(items) = value else {
            panic!("expected a tuple");
        };
        assert_eq!(items[0], RemoteValue::Value(Value::from(1)));
        assert_eq!(items[1].as_arg(), Some(Value::reference(RefKind::Secret, object)));
    }

    #[test]
    fn test_fault_is_remote_error() {
        let err = RemoteValue::from_response(Response::fault(FaultKind::Application, "boom")).unwrap_err();
        assert_eq!(err.fault_kind(), Some(FaultKind::Application));
    }

    #[test]
    fn test_max_connections_at_least_one() {
        let client = AsyncClient::with_max_connections(offline_config(), 0);
        assert_eq!(client.max_connections(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_leaves_no_connection() {
        let client = AsyncClient::new(offline_config());
        let err = client.call("add", vec![]).await.unwrap_err();
        assert!(err.is_transport(), "unexpected error {:?}", err);
        assert_eq!(client.idle_connections(), 0);
    }
}
