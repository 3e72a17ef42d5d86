//! Request dispatch: decode a frame, run the target, classify the result.
//!
//! Every frame produces exactly one encoded envelope. Anything that goes
//! wrong after the frame arrives, including a panic in a registered
//! callable, becomes a `Fault` envelope rather than a missing reply.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sealrpc_common::transport::MsgPackCodec;
use sealrpc_common::{
    FaultKind, Kwargs, ObjectId, RefKind, Request, Response, Value, CONTRACT_FUNCTION, GETATTR_METHOD,
};
use tracing::{debug, error, warn};

use crate::cache::{CachedObject, ObjectCache};
use crate::object::resolve_member;
use crate::routes::{Arg, CallArgs, CallError, Returned, RouteTable};

/// Where a worker is in handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Decoding = 1,
    Dispatching = 2,
    Executing = 3,
    Encoding = 4,
    Faulted = 5,
}

impl WorkerState {
    fn from_u8(byte: u8) -> Self {
        match byte {
            1 => WorkerState::Decoding,
            2 => WorkerState::Dispatching,
            3 => WorkerState::Executing,
            4 => WorkerState::Encoding,
            5 => WorkerState::Faulted,
            _ => WorkerState::Idle,
        }
    }

    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Idle, Decoding)
                | (Decoding, Dispatching)
                | (Decoding, Faulted)
                | (Dispatching, Executing)
                | (Dispatching, Faulted)
                | (Executing, Encoding)
                | (Executing, Faulted)
                | (Faulted, Encoding)
                | (Encoding, Idle)
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Decoding => "decoding",
            WorkerState::Dispatching => "dispatching",
            WorkerState::Executing => "executing",
            WorkerState::Encoding => "encoding",
            WorkerState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Current state of one worker, readable from other threads.
#[derive(Debug, Default)]
pub struct StateCell {
    state: AtomicU8,
    history: Option<Mutex<Vec<WorkerState>>>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cell that also keeps every state it passes through.
    pub fn recording() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Idle as u8),
            history: Some(Mutex::new(vec![WorkerState::Idle])),
        }
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn history(&self) -> Vec<WorkerState> {
        self.history
            .as_ref()
            .map(|history| history.lock().clone())
            .unwrap_or_default()
    }

    fn set(&self, next: WorkerState) {
        let previous = WorkerState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        debug_assert!(
            previous.can_transition_to(next),
            "invalid worker transition {} -> {}",
            previous,
            next
        );
        if let Some(history) = &self.history {
            history.lock().push(next);
        }
    }
}

/// Executes requests against a route table and an object cache.
///
/// Shared by all workers; holds no per-request state.
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    cache: Arc<ObjectCache>,
}

impl Dispatcher {
    pub fn new(routes: Arc<RouteTable>, cache: Arc<ObjectCache>) -> Self {
        Self { routes, cache }
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    /// Handles one request frame and returns the encoded response.
    pub fn handle(&self, frame: &[u8]) -> Vec<u8> {
        self.process(frame, &StateCell::new())
    }

    /// As [`handle`](Self::handle), reporting progress through `state`.
    pub fn process(&self, frame: &[u8], state: &StateCell) -> Vec<u8> {
        state.set(WorkerState::Decoding);
        let response = match MsgPackCodec::decode_request(frame) {
            Ok(request) => {
                debug!("Dispatching {:?} {}", request.kind(), request.target());
                self.dispatch(request, state)
            }
            Err(e) => {
                warn!("Rejecting undecodable request: {}", e);
                state.set(WorkerState::Faulted);
                Response::fault(FaultKind::Protocol, e.to_string())
            }
        };

        state.set(WorkerState::Encoding);
        let encoded = encode(&response);
        state.set(WorkerState::Idle);
        encoded
    }

    fn dispatch(&self, request: Request, state: &StateCell) -> Response {
        state.set(WorkerState::Dispatching);
        let target = request.target();
        let result = match request {
            Request::FunctionCall {
                function_name,
                args,
                kwargs,
            } => self.call_function(&function_name, args, kwargs, state),
            Request::ConstructorCall {
                class_name,
                args,
                kwargs,
            } => self.construct(&class_name, args, kwargs, state),
            Request::AttributeQuery { object_id } => self.describe(&object_id, state),
            Request::MethodCall {
                object_id,
                method_name,
                args,
                kwargs,
            } => self.call_method(&object_id, &method_name, args, kwargs, state),
            Request::Destructor { object_id } => {
                state.set(WorkerState::Executing);
                self.destruct(&object_id);
                Ok(Response::nil())
            }
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                debug!("Call to '{}' failed: {}", target, e);
                state.set(WorkerState::Faulted);
                Response::fault(e.fault_kind(), e.to_string())
            }
        }
    }

    fn call_function(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        state: &StateCell,
    ) -> Result<Response, CallError> {
        if name == CONTRACT_FUNCTION {
            state.set(WorkerState::Executing);
            return Ok(Response::Value(self.routes.contract()));
        }

        let handler = self
            .routes
            .function(name)
            .ok_or_else(|| CallError::NotFound(format!("function '{}' not found", name)))?;
        let call_args = self.resolve_args(args, kwargs)?;

        state.set(WorkerState::Executing);
        let returned = guarded(name, || handler(call_args))?;
        self.classify_top(returned)
    }

    fn construct(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        state: &StateCell,
    ) -> Result<Response, CallError> {
        let class = self
            .routes
            .class(name)
            .ok_or_else(|| CallError::NotFound(format!("class '{}' not found", name)))?;
        let call_args = self.resolve_args(args, kwargs)?;

        state.set(WorkerState::Executing);
        let object = guarded(name, || class(call_args))?;
        Ok(Response::Proxy(self.cache.insert(RefKind::Proxy, object)))
    }

    fn describe(&self, object_id: &ObjectId, state: &StateCell) -> Result<Response, CallError> {
        let entry = self.cache.get(object_id)?;

        state.set(WorkerState::Executing);
        let guard = entry.lock();
        let names = |names: Vec<String>| Value::List(names.into_iter().map(Value::from).collect());
        let mut members = BTreeMap::new();
        members.insert("methods".to_string(), names(guard.methods()));
        members.insert("attributes".to_string(), names(guard.attributes()));
        Ok(Response::Value(Value::Map(members)))
    }

    fn call_method(
        &self,
        object_id: &ObjectId,
        method_name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        state: &StateCell,
    ) -> Result<Response, CallError> {
        let entry = self.cache.get(object_id)?;
        let call_args = self.resolve_args(args, kwargs)?;
        if passes_itself(&entry, &call_args) {
            return Err(CallError::invalid_argument(format!(
                "object '{}' cannot be passed to its own method",
                object_id
            )));
        }

        let segments: Vec<&str> = method_name.split('.').collect();
        let Some((method, path)) = segments.split_last() else {
            return Err(CallError::no_method(&entry.object().type_tag, method_name));
        };

        state.set(WorkerState::Executing);
        let mut guard = entry.lock();
        let returned = guarded(method_name, || {
            let target = resolve_member(&mut **guard, path)?;
            if *method == GETATTR_METHOD {
                let attribute = call_args.str(0)?;
                target.get_attribute(attribute).map(Returned::Value)
            } else {
                target.call_method(method, call_args)
            }
        });
        drop(guard);
        self.classify_top(returned?)
    }

    fn destruct(&self, object_id: &ObjectId) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.cache.remove(object_id))) {
            Ok(true) => {}
            Ok(false) => debug!("Destructor for unknown object {}", object_id),
            Err(payload) => warn!(
                "Teardown of {} panicked: {}",
                object_id,
                panic_message(payload.as_ref())
            ),
        }
    }

    fn resolve_args(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<CallArgs, CallError> {
        let args = args
            .into_iter()
            .map(|value| self.resolve(value))
            .collect::<Result<Vec<_>, _>>()?;
        let kwargs = kwargs
            .into_iter()
            .map(|(name, value)| Ok((name, self.resolve(value)?)))
            .collect::<Result<BTreeMap<_, _>, CallError>>()?;
        Ok(CallArgs::new(args, kwargs))
    }

    /// Only top-level arguments are resolved; references nested inside
    /// lists or maps arrive as plain values.
    fn resolve(&self, value: Value) -> Result<Arg, CallError> {
        match value {
            Value::Ref { object, .. } => Ok(Arg::Object(self.cache.get(&object.id)?)),
            Value::Typed { ref tag, .. } => {
                let tag = tag.clone();
                let decoded = self.routes.serializers().decode(&value)?;
                Ok(Arg::Custom { tag, value: decoded })
            }
            other => Ok(Arg::Value(other)),
        }
    }

    /// Classifies a result, undoing cache inserts if any part fails.
    fn classify_top(&self, returned: Returned) -> Result<Response, CallError> {
        let mut inserted = Vec::new();
        let result = self.classify(returned, &mut inserted);
        if result.is_err() {
            for id in &inserted {
                self.cache.remove(id);
            }
        }
        result
    }

    fn classify(&self, returned: Returned, inserted: &mut Vec<ObjectId>) -> Result<Response, CallError> {
        match returned {
            Returned::Value(value) => Ok(Response::Value(value)),
            Returned::Custom { tag, value } => {
                let any: &dyn Any = &*value;
                Ok(Response::Value(self.routes.serializers().encode(&tag, any)?))
            }
            Returned::Secret(object) => {
                let object = self.cache.insert(RefKind::Secret, object);
                inserted.push(object.id.clone());
                Ok(Response::Secret(object))
            }
            Returned::Proxy(object) => {
                let object = self.cache.insert(RefKind::Proxy, object);
                inserted.push(object.id.clone());
                Ok(Response::Proxy(object))
            }
            Returned::Tuple(items) => items
                .into_iter()
                .map(|item| self.classify(item, inserted))
                .collect::<Result<Vec<_>, _>>()
                .map(Response::Tuple),
        }
    }
}

fn passes_itself(target: &CachedObject, args: &CallArgs) -> bool {
    args.args
        .iter()
        .chain(args.kwargs.values())
        .filter_map(Arg::as_object)
        .any(|object| object.same_object(target))
}

/// Runs a registered callable, turning a panic into an application fault.
fn guarded<T>(target: &str, call: impl FnOnce() -> Result<T, CallError>) -> Result<T, CallError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("'{}' panicked: {}", target, message);
            Err(CallError::Failed(format!("'{}' panicked: {}", target, message)))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn encode(response: &Response) -> Vec<u8> {
    match MsgPackCodec::encode_response(response) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to encode response: {}", e);
            let fault = Response::fault(FaultKind::Serialization, format!("failed to encode response: {}", e));
            MsgPackCodec::encode_response(&fault).unwrap_or_default()
        }
    }
}
