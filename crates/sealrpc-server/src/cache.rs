//! Server-side object cache.
//!
//! Holds every object handed out as a Secret or Proxy, keyed by its id.
//! The map lock only guards insert/lookup/remove; calls on an object lock
//! that object alone, so long-running methods on one object never block
//! access to the others.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use sealrpc_common::{ObjectId, ObjectRef, RefKind};
use tracing::debug;

use crate::object::{RemoteObject, SecretValue};
use crate::routes::CallError;

/// A shared handle to one cached object.
#[derive(Clone)]
pub struct CachedObject {
    object: ObjectRef,
    kind: RefKind,
    inner: Arc<Mutex<Box<dyn RemoteObject>>>,
}

impl CachedObject {
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    /// Locks the object for exclusive use.
    ///
    /// Not reentrant: locking an object while already holding its guard
    /// deadlocks the worker.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn RemoteObject>> {
        self.inner.lock()
    }

    /// Runs `f` on the concrete object, if it is a `T` or a
    /// [`SecretValue<T>`].
    pub fn with<T: Send + 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, CallError> {
        let guard = self.inner.lock();
        let object: &dyn RemoteObject = &**guard;
        let any = object.as_any();
        if let Some(value) = any.downcast_ref::<T>() {
            return Ok(f(value));
        }
        if let Some(secret) = any.downcast_ref::<SecretValue<T>>() {
            return Ok(f(secret.get()));
        }
        Err(CallError::invalid_argument(format!(
            "object '{}' is a {}, expected {}",
            self.object.id,
            object.type_tag(),
            std::any::type_name::<T>()
        )))
    }

    /// True if both handles name the same cached object.
    pub fn same_object(&self, other: &CachedObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CachedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedObject")
            .field("object", &self.object)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Id-indexed store of live objects, shared by all workers.
///
/// There is no eviction: an object lives until a client destructs it or the
/// server stops.
#[derive(Default)]
pub struct ObjectCache {
    entries: Mutex<HashMap<ObjectId, CachedObject>>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `object` under a fresh id.
    pub fn insert(&self, kind: RefKind, object: Box<dyn RemoteObject>) -> ObjectRef {
        let object_ref = ObjectRef::new(ObjectId::generate(), object.type_tag());
        let entry = CachedObject {
            object: object_ref.clone(),
            kind,
            inner: Arc::new(Mutex::new(object)),
        };
        self.entries.lock().insert(object_ref.id.clone(), entry);
        debug!("Cached {} '{}' as {}", kind.as_str(), object_ref.type_tag, object_ref.id);
        object_ref
    }

    pub fn get(&self, id: &ObjectId) -> Result<CachedObject, CallError> {
        self.entries
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| CallError::NotFound(format!("unknown object id '{}'", id)))
    }

    /// Removes an object and tears it down.
    ///
    /// Returns `false` for an unknown id. Teardown runs after the map lock
    /// is released, and waits for any call still running on the object.
    pub fn remove(&self, id: &ObjectId) -> bool {
        let Some(entry) = self.entries.lock().remove(id) else {
            return false;
        };
        entry.lock().teardown();
        debug!("Released '{}' {}", entry.object.type_tag, id);
        true
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Ids and type tags of everything cached, in no particular order.
    pub fn objects(&self) -> Vec<ObjectRef> {
        self.entries
            .lock()
            .values()
            .map(|entry| entry.object.clone())
            .collect()
    }
}

impl fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache").field("len", &self.len()).finish()
    }
}
