//! Registration table: the functions and classes a server exposes.
//!
//! The table is built once before the server starts and then frozen behind
//! an `Arc`; workers read it without locking.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sealrpc_common::{FaultKind, SealRpcError, SerializerRegistry, Value, CONTRACT_FUNCTION};
use thiserror::Error;

use crate::cache::CachedObject;
use crate::object::{RemoteObject, SecretValue};

/// A registered function.
pub type FunctionHandler = Arc<dyn Fn(CallArgs) -> Result<Returned, CallError> + Send + Sync>;

/// A registered class: builds a fresh object per constructor call.
pub type RemoteClass = Arc<dyn Fn(CallArgs) -> Result<Box<dyn RemoteObject>, CallError> + Send + Sync>;

/// Failure of a registered callable, reported to the client as a fault.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("{0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Serialization(String),

    #[error("{0}")]
    Failed(String),
}

impl CallError {
    pub fn failed(message: impl Into<String>) -> Self {
        CallError::Failed(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        CallError::InvalidArgument(message.into())
    }

    pub fn no_method(type_tag: &str, method: &str) -> Self {
        CallError::NotFound(format!("'{}' object has no method '{}'", type_tag, method))
    }

    pub fn no_attribute(type_tag: &str, attribute: &str) -> Self {
        CallError::NotFound(format!("'{}' object has no attribute '{}'", type_tag, attribute))
    }

    pub fn fault_kind(&self) -> FaultKind {
        match self {
            CallError::NotFound(_) => FaultKind::NotFound,
            CallError::Serialization(_) => FaultKind::Serialization,
            CallError::InvalidArgument(_) | CallError::Failed(_) => FaultKind::Application,
        }
    }
}

impl From<SealRpcError> for CallError {
    fn from(err: SealRpcError) -> Self {
        match err {
            SealRpcError::Serialization(_) | SealRpcError::UnknownTypeTag(_) => {
                CallError::Serialization(err.to_string())
            }
            other => CallError::Failed(other.to_string()),
        }
    }
}

/// Rejected registration. Raised while the table is built, never at call time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("function '{0}' is already registered")]
    DuplicateFunction(String),

    #[error("class '{0}' is already registered")]
    DuplicateClass(String),

    #[error("'{0}' is reserved")]
    Reserved(String),

    #[error("class name '{0}' must not start with '_'")]
    PrivateClass(String),

    #[error("empty name")]
    EmptyName,

    #[error("{0}")]
    Serializer(String),
}

impl From<RegistrationError> for SealRpcError {
    fn from(err: RegistrationError) -> Self {
        SealRpcError::Registration(err.to_string())
    }
}

/// A resolved call argument.
pub enum Arg {
    /// A protocol-native value
    Value(Value),
    /// An object from the cache, passed by handle
    Object(CachedObject),
    /// A value decoded through the serialization registry
    Custom {
        tag: String,
        value: Box<dyn Any + Send>,
    },
}

impl Arg {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&CachedObject> {
        match self {
            Arg::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Arg::Custom { value, .. } => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Arg::Value(value) => value.type_name().to_string(),
            Arg::Object(object) => format!("object '{}'", object.object().type_tag),
            Arg::Custom { tag, .. } => format!("'{}'", tag),
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Arg::Object(object) => f.debug_tuple("Object").field(object.object()).finish(),
            Arg::Custom { tag, .. } => f.debug_struct("Custom").field("tag", tag).finish_non_exhaustive(),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

/// Positional and keyword arguments of a call, already resolved.
///
/// Resolution applies to top-level arguments only. A Secret or Proxy
/// reference, or a registry-tagged value, nested inside a list or map
/// reaches the callable unchanged as its wire-shaped [`Value`] map.
#[derive(Debug, Default)]
pub struct CallArgs {
    pub args: Vec<Arg>,
    pub kwargs: BTreeMap<String, Arg>,
}

impl CallArgs {
    pub fn new(args: Vec<Arg>, kwargs: BTreeMap<String, Arg>) -> Self {
        Self { args, kwargs }
    }

    /// Plain values only; handy for calling handlers directly.
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            args: values.into_iter().map(Arg::Value).collect(),
            kwargs: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn arg(&self, index: usize) -> Result<&Arg, CallError> {
        self.args.get(index).ok_or_else(|| {
            CallError::invalid_argument(format!(
                "missing positional argument {} (got {})",
                index,
                self.args.len()
            ))
        })
    }

    pub fn kwarg(&self, name: &str) -> Option<&Arg> {
        self.kwargs.get(name)
    }

    pub fn value(&self, index: usize) -> Result<&Value, CallError> {
        let arg = self.arg(index)?;
        arg.as_value().ok_or_else(|| {
            CallError::invalid_argument(format!("argument {} is {}, expected a value", index, arg.describe()))
        })
    }

    pub fn i64(&self, index: usize) -> Result<i64, CallError> {
        let value = self.value(index)?;
        value.as_i64().ok_or_else(|| {
            CallError::invalid_argument(format!("argument {} is {}, expected int", index, value.type_name()))
        })
    }

    pub fn f64(&self, index: usize) -> Result<f64, CallError> {
        let value = self.value(index)?;
        value.as_f64().ok_or_else(|| {
            CallError::invalid_argument(format!("argument {} is {}, expected float", index, value.type_name()))
        })
    }

    pub fn str(&self, index: usize) -> Result<&str, CallError> {
        let value = self.value(index)?;
        value.as_str().ok_or_else(|| {
            CallError::invalid_argument(format!("argument {} is {}, expected str", index, value.type_name()))
        })
    }

    pub fn object(&self, index: usize) -> Result<&CachedObject, CallError> {
        let arg = self.arg(index)?;
        arg.as_object().ok_or_else(|| {
            CallError::invalid_argument(format!("argument {} is {}, expected an object", index, arg.describe()))
        })
    }

    pub fn custom<T: Any>(&self, index: usize) -> Result<&T, CallError> {
        let arg = self.arg(index)?;
        arg.downcast_ref::<T>().ok_or_else(|| {
            CallError::invalid_argument(format!(
                "argument {} is {}, expected {}",
                index,
                arg.describe(),
                std::any::type_name::<T>()
            ))
        })
    }
}

/// What a registered callable hands back. The dispatcher classifies it
/// into a response envelope.
pub enum Returned {
    Value(Value),
    /// Encoded through the serialization registry under `tag`
    Custom {
        tag: String,
        value: Box<dyn Any + Send>,
    },
    /// Kept in the object cache; the client only sees its id
    Secret(Box<dyn RemoteObject>),
    /// Kept in the object cache and driven through a proxy handle
    Proxy(Box<dyn RemoteObject>),
    Tuple(Vec<Returned>),
}

impl Returned {
    pub fn value(value: impl Into<Value>) -> Self {
        Returned::Value(value.into())
    }

    pub fn nil() -> Self {
        Returned::Value(Value::Nil)
    }

    pub fn custom<T: Any + Send>(tag: impl Into<String>, value: T) -> Self {
        Returned::Custom {
            tag: tag.into(),
            value: Box::new(value),
        }
    }

    pub fn secret(object: impl RemoteObject) -> Self {
        Returned::Secret(Box::new(object))
    }

    /// Keeps an arbitrary value server-side under `tag`.
    pub fn secret_value<T: Send + 'static>(tag: impl Into<String>, value: T) -> Self {
        Returned::Secret(Box::new(SecretValue::new(tag, value)))
    }

    pub fn proxy(object: impl RemoteObject) -> Self {
        Returned::Proxy(Box::new(object))
    }

    pub fn tuple(items: Vec<Returned>) -> Self {
        Returned::Tuple(items)
    }
}

impl fmt::Debug for Returned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Returned::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Returned::Custom { tag, .. } => f.debug_struct("Custom").field("tag", tag).finish_non_exhaustive(),
            Returned::Secret(object) => f.debug_tuple("Secret").field(&object.type_tag()).finish(),
            Returned::Proxy(object) => f.debug_tuple("Proxy").field(&object.type_tag()).finish(),
            Returned::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
        }
    }
}

enum ModuleEntry {
    Function(String, FunctionHandler),
    Class(String, RemoteClass),
}

/// A named bundle of functions and classes, registered in one go.
///
/// # Example
///
/// ```
/// use sealrpc_server::{Returned, RouteTable, RpcModule};
///
/// let math = RpcModule::new("math")
///     .function("add", |args| Ok(Returned::value(args.i64(0)? + args.i64(1)?)))
///     .function("neg", |args| Ok(Returned::value(-args.i64(0)?)));
///
/// let mut routes = RouteTable::new();
/// routes.register_module(math).unwrap();
/// assert_eq!(routes.function_names(), vec!["add", "neg"]);
/// ```
pub struct RpcModule {
    name: String,
    entries: Vec<ModuleEntry>,
}

impl RpcModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a function to the module.
    ///
    /// Workers are threads of the server process. An error or an unwinding
    /// panic in `handler` becomes a fault for that call only, but an abort,
    /// a stack overflow or running out of memory takes down the whole
    /// server, cached objects included.
    pub fn function<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CallArgs) -> Result<Returned, CallError> + Send + Sync + 'static,
    {
        self.entries.push(ModuleEntry::Function(name.into(), Arc::new(handler)));
        self
    }

    pub fn class<T, F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        T: RemoteObject,
        F: Fn(CallArgs) -> Result<T, CallError> + Send + Sync + 'static,
    {
        self.entries.push(ModuleEntry::Class(name.into(), boxed_class(constructor)));
        self
    }
}

fn boxed_class<T, F>(constructor: F) -> RemoteClass
where
    T: RemoteObject,
    F: Fn(CallArgs) -> Result<T, CallError> + Send + Sync + 'static,
{
    Arc::new(move |args| constructor(args).map(|object| Box::new(object) as Box<dyn RemoteObject>))
}

/// Function and class tables plus the serialization registry.
#[derive(Default)]
pub struct RouteTable {
    functions: HashMap<String, FunctionHandler>,
    classes: HashMap<String, RemoteClass>,
    serializers: SerializerRegistry,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function under `name`.
    ///
    /// Panics in `handler` are caught per call; process-level failures are
    /// not (see [`RpcModule::function`]).
    ///
    /// # Errors
    ///
    /// Fails for an empty name, for `_contract` and for a name that is
    /// already taken.
    pub fn register_function<F>(&mut self, name: impl Into<String>, handler: F) -> Result<(), RegistrationError>
    where
        F: Fn(CallArgs) -> Result<Returned, CallError> + Send + Sync + 'static,
    {
        self.insert_function(name.into(), Arc::new(handler))
    }

    /// Registers a class under `name`.
    ///
    /// # Errors
    ///
    /// Fails for an empty name, a name starting with `_` and a name that
    /// is already taken.
    pub fn register_class<T, F>(&mut self, name: impl Into<String>, constructor: F) -> Result<(), RegistrationError>
    where
        T: RemoteObject,
        F: Fn(CallArgs) -> Result<T, CallError> + Send + Sync + 'static,
    {
        self.insert_class(name.into(), boxed_class(constructor))
    }

    /// Registers every entry of `module`, stopping at the first conflict.
    pub fn register_module(&mut self, module: RpcModule) -> Result<(), RegistrationError> {
        let count = module.entries.len();
        for entry in module.entries {
            match entry {
                ModuleEntry::Function(name, handler) => self.insert_function(name, handler)?,
                ModuleEntry::Class(name, class) => self.insert_class(name, class)?,
            }
        }
        tracing::debug!("Registered module '{}' ({} entries)", module.name, count);
        Ok(())
    }

    /// Registers a serde type with the serialization registry.
    pub fn register_serde<T>(&mut self, tag: impl Into<String>) -> Result<(), RegistrationError>
    where
        T: Serialize + DeserializeOwned + Any + Send,
    {
        self.serializers
            .register_serde::<T>(tag)
            .map_err(|e| RegistrationError::Serializer(e.to_string()))
    }

    /// Direct access for custom encoder/decoder pairs.
    pub fn serializers_mut(&mut self) -> &mut SerializerRegistry {
        &mut self.serializers
    }

    pub fn serializers(&self) -> &SerializerRegistry {
        &self.serializers
    }

    pub fn function(&self, name: &str) -> Option<&FunctionHandler> {
        self.functions.get(name)
    }

    pub fn class(&self, name: &str) -> Option<&RemoteClass> {
        self.classes.get(name)
    }

    pub fn function_names(&self) -> Vec<&str> {
        sorted_names(&self.functions)
    }

    pub fn class_names(&self) -> Vec<&str> {
        sorted_names(&self.classes)
    }

    /// Answer of the built-in `_contract` function.
    pub fn contract(&self) -> Value {
        let names = |names: Vec<&str>| Value::List(names.into_iter().map(Value::from).collect());
        let mut contract = BTreeMap::new();
        contract.insert("functions".to_string(), names(self.function_names()));
        contract.insert("classes".to_string(), names(self.class_names()));
        Value::Map(contract)
    }

    fn insert_function(&mut self, name: String, handler: FunctionHandler) -> Result<(), RegistrationError> {
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if name == CONTRACT_FUNCTION {
            return Err(RegistrationError::Reserved(name));
        }
        if self.functions.contains_key(&name) {
            return Err(RegistrationError::DuplicateFunction(name));
        }
        self.functions.insert(name, handler);
        Ok(())
    }

    fn insert_class(&mut self, name: String, class: RemoteClass) -> Result<(), RegistrationError> {
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if name.starts_with('_') {
            return Err(RegistrationError::PrivateClass(name));
        }
        if self.classes.contains_key(&name) {
            return Err(RegistrationError::DuplicateClass(name));
        }
        self.classes.insert(name, class);
        Ok(())
    }
}

fn sorted_names<V>(table: &HashMap<String, V>) -> Vec<&str> {
    let mut names: Vec<&str> = table.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("functions", &self.function_names())
            .field("classes", &self.class_names())
            .field("serializers", &self.serializers)
            .finish()
    }
}
