use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use sealrpc_common::transport::{MsgPackCodec, SecureStream};
use sealrpc_common::{
    Kwargs, ObjectRef, Request, Response, Result, SealRpcError, SerializerRegistry, Value, CONTRACT_FUNCTION,
};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::proxy::{Proxy, SecretHandle};

/// Connection state shared by a client and every handle it produced.
pub(crate) struct Inner {
    config: ClientConfig,
    serializers: SerializerRegistry,
    stream: Mutex<Option<SecureStream>>,
}

impl Inner {
    /// Sends one request and waits for its envelope.
    ///
    /// Requests are serialized on the single connection. After any
    /// transport failure the connection is dropped, so a late reply to a
    /// timed-out call can never be read as the answer to the next one.
    pub(crate) fn request(&self, request: &Request) -> Result<Response> {
        let frame = MsgPackCodec::encode_request(request)?;
        let mut slot = self.stream.lock();

        if slot.is_none() {
            let stream = SecureStream::connect(&self.config.address, &self.config.keys, &self.config.server_key)?;
            debug!("Connected to {}", self.config.address);
            *slot = Some(stream);
        }
        let Some(stream) = slot.as_mut() else {
            return Err(SealRpcError::Connection("no connection".to_string()));
        };

        match stream.round_trip(&frame, self.config.timeout) {
            Ok(reply) => MsgPackCodec::decode_response(&reply),
            Err(e) => {
                if e.is_transport() {
                    warn!("Dropping connection to {} after {}", self.config.address, e);
                    *slot = None;
                }
                Err(e)
            }
        }
    }
}

/// Synchronous SealRPC client.
///
/// Connects lazily on the first call and keeps one connection open.
/// Cloning is cheap; clones share the connection and take turns on it.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sealrpc_client::{Client, ClientConfig};
/// use sealrpc_common::Value;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig::from_files(
///     "127.0.0.1:5555",
///     Path::new("certificates/server.key"),
///     Path::new("certificates/client.key_secret"),
/// )?;
/// let client = Client::new(config);
///
/// let sum = client.call("add", vec![Value::from(2), Value::from(3)])?.into_value()?;
/// assert_eq!(sum, Value::from(5));
///
/// let counter = client.construct("Counter", vec![])?;
/// counter.call_method("increment", vec![])?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_serializers(config, SerializerRegistry::new())
    }

    /// A client that can encode and decode registered custom types.
    pub fn with_serializers(config: ClientConfig, serializers: SerializerRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                serializers,
                stream: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn serializers(&self) -> &SerializerRegistry {
        &self.inner.serializers
    }

    /// Calls a registered function.
    ///
    /// # Errors
    ///
    /// - `Remote` if the server answered with a fault
    /// - `Timeout` if no reply arrived in time
    /// - `Connection`/`Handshake` if the server could not be reached
    pub fn call(&self, function: &str, args: Vec<Value>) -> Result<Reply> {
        self.call_with_kwargs(function, args, Kwargs::new())
    }

    pub fn call_with_kwargs(&self, function: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Reply> {
        let request = Request::function_call(function, args).with_kwargs(kwargs);
        self.reply(&request)
    }

    /// Constructs a registered class and returns a proxy for the new object.
    pub fn construct(&self, class: &str, args: Vec<Value>) -> Result<Proxy> {
        self.construct_with_kwargs(class, args, Kwargs::new())
    }

    pub fn construct_with_kwargs(&self, class: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Proxy> {
        let request = Request::constructor_call(class, args).with_kwargs(kwargs);
        self.reply(&request)?.into_proxy()
    }

    /// Names of the functions and classes the server exposes.
    pub fn contract(&self) -> Result<Value> {
        self.call(CONTRACT_FUNCTION, Vec::new())?.into_value()
    }

    /// Encodes a custom value for use as an argument.
    pub fn encode(&self, tag: &str, value: &dyn Any) -> Result<Value> {
        self.inner.serializers.encode(tag, value)
    }

    /// Decodes a custom value returned by the server.
    pub fn decode_as<T: Any>(&self, value: &Value) -> Result<T> {
        self.inner.serializers.decode_as::<T>(value)
    }

    /// Sends a raw request and returns the raw envelope, faults included.
    pub fn request(&self, request: &Request) -> Result<Response> {
        self.inner.request(request)
    }

    fn reply(&self, request: &Request) -> Result<Reply> {
        let response = self.inner.request(request)?;
        Reply::from_response(response, &self.inner)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.inner.config.address)
            .field("timeout", &self.inner.config.timeout)
            .finish()
    }
}

/// Result of a call, with object references turned into live handles.
#[derive(Debug)]
pub enum Reply {
    Value(Value),
    Secret(SecretHandle),
    Proxy(Proxy),
    Tuple(Vec<Reply>),
}

impl Reply {
    pub(crate) fn from_response(response: Response, client: &Arc<Inner>) -> Result<Self> {
        match response {
            Response::Value(value) => Ok(Reply::Value(value)),
            Response::Secret(object) => Ok(Reply::Secret(SecretHandle::new(object, client.clone()))),
            Response::Proxy(object) => Ok(Reply::Proxy(Proxy::new(object, client.clone()))),
            Response::Tuple(items) => items
                .into_iter()
                .map(|item| Reply::from_response(item, client))
                .collect::<Result<Vec<_>>>()
                .map(Reply::Tuple),
            Response::Fault { kind, message } => Err(SealRpcError::remote(kind, message)),
        }
    }

    pub fn into_value(self) -> Result<Value> {
        match self {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected("a value", &other)),
        }
    }

    pub fn into_proxy(self) -> Result<Proxy> {
        match self {
            Reply::Proxy(proxy) => Ok(proxy),
            other => Err(unexpected("a proxy", &other)),
        }
    }

    pub fn into_secret(self) -> Result<SecretHandle> {
        match self {
            Reply::Secret(secret) => Ok(secret),
            other => Err(unexpected("a secret", &other)),
        }
    }

    pub fn into_tuple(self) -> Result<Vec<Reply>> {
        match self {
            Reply::Tuple(items) => Ok(items),
            other => Err(unexpected("a tuple", &other)),
        }
    }

    /// The object this reply refers to, if it is a handle.
    pub fn object(&self) -> Option<&ObjectRef> {
        match self {
            Reply::Secret(secret) => Some(secret.object()),
            Reply::Proxy(proxy) => Some(proxy.object()),
            Reply::Value(_) | Reply::Tuple(_) => None,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Reply::Value(_) => "a value",
            Reply::Secret(_) => "a secret",
            Reply::Proxy(_) => "a proxy",
            Reply::Tuple(_) => "a tuple",
        }
    }
}

fn unexpected(expected: &str, got: &Reply) -> SealRpcError {
    SealRpcError::InvalidResponse(format!("expected {}, got {}", expected, got.shape()))
}
