//! Client-side handles for objects that live in the server's cache.
//!
//! Both handle types release their object when dropped. The release is a
//! Destructor message sent at most once per handle; [`Proxy::close`] and
//! [`SecretHandle::release`] do the same eagerly and report failures.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use sealrpc_common::{
    Kwargs, MessageKind, ObjectId, ObjectRef, RefKind, Request, Response, Result, SealRpcError, Value,
    GETATTR_METHOD,
};
use tracing::debug;

use crate::client::{Inner, Reply};

/// Sends the Destructor for `object` unless `released` is already set.
fn release(client: &Inner, object: &ObjectRef, released: &AtomicBool) -> Result<()> {
    if released.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    match client.request(&Request::destructor(object.id.clone()))? {
        Response::Fault { kind, message } => Err(SealRpcError::remote(kind, message)),
        _ => Ok(()),
    }
}

fn release_on_drop(client: &Inner, object: &ObjectRef, released: &AtomicBool) {
    if let Err(e) = release(client, object, released) {
        debug!("Failed to release {} '{}': {}", object.id, object.type_tag, e);
    }
}

/// Handle to an object the client may only pass back, never inspect.
pub struct SecretHandle {
    object: ObjectRef,
    client: Arc<Inner>,
    released: AtomicBool,
}

impl SecretHandle {
    pub(crate) fn new(object: ObjectRef, client: Arc<Inner>) -> Self {
        Self {
            object,
            client,
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.object.id
    }

    pub fn type_tag(&self) -> &str {
        &self.object.type_tag
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// The reference to pass as a call argument.
    pub fn as_arg(&self) -> Value {
        Value::reference(RefKind::Secret, self.object.clone())
    }

    /// Releases the server-side object now.
    pub fn release(self) -> Result<()> {
        release(&self.client, &self.object, &self.released)
    }

    /// Gives up the handle without releasing the object, which then stays
    /// cached until someone sends a Destructor for the returned id.
    pub fn leak(self) -> ObjectRef {
        self.released.store(true, Ordering::Release);
        self.object.clone()
    }
}

impl Drop for SecretHandle {
    fn drop(&mut self) {
        release_on_drop(&self.client, &self.object, &self.released);
    }
}

impl fmt::Debug for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretHandle").field("object", &self.object).finish()
    }
}

#[derive(Debug, Default)]
struct Members {
    methods: BTreeSet<String>,
    attributes: BTreeSet<String>,
}

impl Members {
    fn from_value(value: Value) -> Result<Self> {
        let Value::Map(mut map) = value else {
            return Err(SealRpcError::InvalidResponse(format!(
                "attribute query answered with {}",
                value.type_name()
            )));
        };
        let mut names = |key: &str| -> Result<BTreeSet<String>> {
            match map.remove(key) {
                Some(Value::List(items)) => items
                    .into_iter()
                    .map(|item| match item {
                        Value::Str(name) => Ok(name),
                        other => Err(SealRpcError::InvalidResponse(format!(
                            "member name is {}",
                            other.type_name()
                        ))),
                    })
                    .collect(),
                None => Ok(BTreeSet::new()),
                Some(other) => Err(SealRpcError::InvalidResponse(format!(
                    "'{}' is {}, expected a list",
                    key,
                    other.type_name()
                ))),
            }
        };
        Ok(Self {
            methods: names("methods")?,
            attributes: names("attributes")?,
        })
    }
}

/// Live handle to a remote object.
///
/// Member names are fetched with one attribute query the first time they
/// are needed and cached for the life of the handle. Method calls and
/// attribute reads go to the server every time.
///
/// # Example
///
/// ```no_run
/// # use sealrpc_client::Client;
/// # use sealrpc_common::Value;
/// # fn demo(client: &Client) -> sealrpc_common::Result<()> {
/// let model = client.construct("Model", vec![])?;
/// model.call_method("train", vec![Value::from(10)])?;
/// let loss = model.getattr("loss")?;
/// model.method("stats")?.attr("reset").call(vec![])?;
/// model.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Proxy {
    object: ObjectRef,
    client: Arc<Inner>,
    members: OnceLock<Members>,
    released: AtomicBool,
}

impl Proxy {
    pub(crate) fn new(object: ObjectRef, client: Arc<Inner>) -> Self {
        Self {
            object,
            client,
            members: OnceLock::new(),
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.object.id
    }

    pub fn type_tag(&self) -> &str {
        &self.object.type_tag
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// Remote method names, sorted.
    pub fn methods(&self) -> Result<Vec<String>> {
        Ok(self.members()?.methods.iter().cloned().collect())
    }

    /// Remote attribute names, sorted.
    pub fn attributes(&self) -> Result<Vec<String>> {
        Ok(self.members()?.attributes.iter().cloned().collect())
    }

    pub fn has_method(&self, name: &str) -> Result<bool> {
        Ok(self.members()?.methods.contains(name))
    }

    /// Reads a remote attribute.
    ///
    /// # Errors
    ///
    /// `NotFound`, without a round trip, if the object does not list
    /// `name` among its attributes.
    pub fn getattr(&self, name: &str) -> Result<Value> {
        if !self.members()?.attributes.contains(name) {
            return Err(SealRpcError::NotFound(format!(
                "'{}' object has no attribute '{}'",
                self.object.type_tag, name
            )));
        }
        self.send_method(GETATTR_METHOD, vec![Value::from(name)], Kwargs::new())?
            .into_value()
    }

    /// Looks up a member to call, or to descend into with
    /// [`BoundMethod::attr`].
    pub fn method(&self, name: &str) -> Result<BoundMethod<'_>> {
        let members = self.members()?;
        if !members.methods.contains(name) && !members.attributes.contains(name) {
            return Err(SealRpcError::NotFound(format!(
                "'{}' object has no method '{}'",
                self.object.type_tag, name
            )));
        }
        Ok(BoundMethod {
            proxy: self,
            path: name.to_string(),
        })
    }

    pub fn call_method(&self, name: &str, args: Vec<Value>) -> Result<Reply> {
        self.method(name)?.call(args)
    }

    pub fn call_method_with_kwargs(&self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Reply> {
        self.method(name)?.call_with_kwargs(args, kwargs)
    }

    /// The reference to pass as a call argument.
    pub fn as_arg(&self) -> Value {
        Value::reference(RefKind::Proxy, self.object.clone())
    }

    /// Releases the server-side object now.
    pub fn close(self) -> Result<()> {
        release(&self.client, &self.object, &self.released)
    }

    fn members(&self) -> Result<&Members> {
        if let Some(members) = self.members.get() {
            return Ok(members);
        }
        let response = self.client.request(&Request::attribute_query(self.object.id.clone()))?;
        let value = Reply::from_response(response, &self.client)?.into_value()?;
        let members = Members::from_value(value)?;
        debug!(
            "'{}' {} has {} methods, {} attributes",
            self.object.type_tag,
            self.object.id,
            members.methods.len(),
            members.attributes.len()
        );
        Ok(self.members.get_or_init(|| members))
    }

    fn send_method(&self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Reply> {
        let request = Request::method_call(self.object.id.clone(), method, args).with_kwargs(kwargs);
        debug_assert_eq!(request.kind(), MessageKind::MethodCall);
        let response = self.client.request(&request)?;
        Reply::from_response(response, &self.client)
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        release_on_drop(&self.client, &self.object, &self.released);
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy").field("object", &self.object).finish()
    }
}

/// A member of a proxied object, possibly nested (`stats.reset`).
#[derive(Debug)]
pub struct BoundMethod<'a> {
    proxy: &'a Proxy,
    path: String,
}

impl<'a> BoundMethod<'a> {
    /// Descends into a nested member. Checked by the server on call.
    pub fn attr(mut self, name: &str) -> Self {
        self.path.push('.');
        self.path.push_str(name);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn call(self, args: Vec<Value>) -> Result<Reply> {
        self.call_with_kwargs(args, Kwargs::new())
    }

    pub fn call_with_kwargs(self, args: Vec<Value>, kwargs: Kwargs) -> Result<Reply> {
        self.proxy.send_method(&self.path, args, kwargs)
    }

    /// Reads an attribute of the nested member.
    pub fn getattr(self, name: &str) -> Result<Value> {
        let method = format!("{}.{}", self.path, GETATTR_METHOD);
        self.proxy
            .send_method(&method, vec![Value::from(name)], Kwargs::new())?
            .into_value()
    }
}
