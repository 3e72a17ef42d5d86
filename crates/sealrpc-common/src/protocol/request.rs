//! SealRPC Request Types
//!
//! A request is a message kind plus a kind-specific body. On the wire the
//! kind travels as a single leading byte so a worker can reject an unknown
//! kind before touching the body.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::{Result, SealRpcError};
use super::value::{ObjectId, Value};

/// Keyword arguments, ordered by name.
pub type Kwargs = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    FunctionCall = 0,
    ConstructorCall = 1,
    AttributeQuery = 2,
    MethodCall = 3,
    Destructor = 4,
}

impl MessageKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = SealRpcError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(MessageKind::FunctionCall),
            1 => Ok(MessageKind::ConstructorCall),
            2 => Ok(MessageKind::AttributeQuery),
            3 => Ok(MessageKind::MethodCall),
            4 => Ok(MessageKind::Destructor),
            other => Err(SealRpcError::InvalidRequest(format!(
                "unknown message kind {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    FunctionCall {
        function_name: String,
        args: Vec<Value>,
        kwargs: Kwargs,
    },
    ConstructorCall {
        class_name: String,
        args: Vec<Value>,
        kwargs: Kwargs,
    },
    AttributeQuery {
        object_id: ObjectId,
    },
    MethodCall {
        object_id: ObjectId,
        method_name: String,
        args: Vec<Value>,
        kwargs: Kwargs,
    },
    Destructor {
        object_id: ObjectId,
    },
}

impl Request {
    pub fn function_call(name: impl Into<String>, args: Vec<Value>) -> Self {
        Request::FunctionCall {
            function_name: name.into(),
            args,
            kwargs: Kwargs::new(),
        }
    }

    pub fn constructor_call(name: impl Into<String>, args: Vec<Value>) -> Self {
        Request::ConstructorCall {
            class_name: name.into(),
            args,
            kwargs: Kwargs::new(),
        }
    }

    pub fn method_call(object_id: ObjectId, method: impl Into<String>, args: Vec<Value>) -> Self {
        Request::MethodCall {
            object_id,
            method_name: method.into(),
            args,
            kwargs: Kwargs::new(),
        }
    }

    pub fn attribute_query(object_id: ObjectId) -> Self {
        Request::AttributeQuery { object_id }
    }

    pub fn destructor(object_id: ObjectId) -> Self {
        Request::Destructor { object_id }
    }

    /// Replaces the keyword arguments. No effect on kinds without arguments.
    pub fn with_kwargs(mut self, new_kwargs: Kwargs) -> Self {
        match &mut self {
            Request::FunctionCall { kwargs, .. }
            | Request::ConstructorCall { kwargs, .. }
            | Request::MethodCall { kwargs, .. } => *kwargs = new_kwargs,
            Request::AttributeQuery { .. } | Request::Destructor { .. } => {}
        }
        self
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Request::FunctionCall { .. } => MessageKind::FunctionCall,
            Request::ConstructorCall { .. } => MessageKind::ConstructorCall,
            Request::AttributeQuery { .. } => MessageKind::AttributeQuery,
            Request::MethodCall { .. } => MessageKind::MethodCall,
            Request::Destructor { .. } => MessageKind::Destructor,
        }
    }

    /// Target name for logging: function, class or `object.method`.
    pub fn target(&self) -> String {
        match self {
            Request::FunctionCall { function_name, .. } => function_name.clone(),
            Request::ConstructorCall { class_name, .. } => class_name.clone(),
            Request::AttributeQuery { object_id } | Request::Destructor { object_id } => {
                object_id.to_string()
            }
            Request::MethodCall {
                object_id,
                method_name,
                ..
            } => format!("{}.{}", object_id, method_name),
        }
    }
}

/// Body of function and constructor calls.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CallBody {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Kwargs,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MethodBody {
    pub object_id: ObjectId,
    pub method_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Kwargs,
}

/// Body of attribute queries and destructors.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ObjectBody {
    pub object_id: ObjectId,
}
