//! SealRPC Value Model
//!
//! [`Value`] is the protocol-native data model carried in request arguments
//! and response payloads. Besides plain scalars and containers it has two
//! shaped variants that travel as ordinary MessagePack maps and are recognised
//! on decode purely by their key set:
//!
//! - [`Value::Typed`]: `{"__type__": tag, "__data__": data}`, a value encoded
//!   through the serialization registry
//! - [`Value::Ref`]: `{"__object_id__": id, "__type__": tag, "__kind__": kind}`,
//!   a reference to an object held in the server's object cache

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub const TYPE_KEY: &str = "__type__";
pub const DATA_KEY: &str = "__data__";
pub const OBJECT_ID_KEY: &str = "__object_id__";
pub const KIND_KEY: &str = "__kind__";

/// Server-generated identifier of a cached object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Generates a fresh, globally unique id.
    pub fn generate() -> Self {
        ObjectId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        ObjectId(id)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        ObjectId(id.to_string())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a cached object is only referenced (secret) or also driven
/// remotely through a proxy handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Secret,
    Proxy,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Secret => "secret",
            RefKind::Proxy => "proxy",
        }
    }

    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "secret" => Some(RefKind::Secret),
            "proxy" => Some(RefKind::Proxy),
            _ => None,
        }
    }
}

/// An id plus the type tag of the object it names. Never carries content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: ObjectId,
    pub type_tag: String,
}

impl ObjectRef {
    pub fn new(id: ObjectId, type_tag: impl Into<String>) -> Self {
        Self {
            id,
            type_tag: type_tag.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Typed { tag: String, data: Box<Value> },
    Ref { kind: RefKind, object: ObjectRef },
}

impl Value {
    pub fn typed(tag: impl Into<String>, data: Value) -> Self {
        Value::Typed {
            tag: tag.into(),
            data: Box::new(data),
        }
    }

    pub fn reference(kind: RefKind, object: ObjectRef) -> Self {
        Value::Ref { kind, object }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers are widened, so `Int(2)` reads as `2.0`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_ref_object(&self) -> Option<(RefKind, &ObjectRef)> {
        match self {
            Value::Ref { kind, object } => Some((*kind, object)),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Typed { .. } => "typed",
            Value::Ref { .. } => "ref",
        }
    }

    /// Converts to JSON for display. Bytes become arrays of integers and
    /// shaped variants keep their wire keys.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Nil => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Typed { tag, data } => {
                let mut object = serde_json::Map::new();
                object.insert(TYPE_KEY.to_string(), Json::String(tag.clone()));
                object.insert(DATA_KEY.to_string(), data.to_json());
                Json::Object(object)
            }
            Value::Ref { kind, object } => {
                let mut map = serde_json::Map::new();
                map.insert(OBJECT_ID_KEY.to_string(), Json::String(object.id.to_string()));
                map.insert(TYPE_KEY.to_string(), Json::String(object.type_tag.clone()));
                map.insert(KIND_KEY.to_string(), Json::String(kind.as_str().to_string()));
                Json::Object(map)
            }
        }
    }

    /// Recognises the shaped variants in a decoded map.
    fn from_map(mut map: BTreeMap<String, Value>) -> Value {
        if map.len() == 2 && map.contains_key(DATA_KEY) {
            if let Some(Value::Str(_)) = map.get(TYPE_KEY) {
                if let (Some(Value::Str(tag)), Some(data)) = (map.remove(TYPE_KEY), map.remove(DATA_KEY)) {
                    return Value::Typed {
                        tag,
                        data: Box::new(data),
                    };
                }
            }
        }

        if map.len() == 3 {
            let kind = map.get(KIND_KEY).and_then(Value::as_str).and_then(RefKind::parse);
            let id = map.get(OBJECT_ID_KEY).and_then(Value::as_str);
            let tag = map.get(TYPE_KEY).and_then(Value::as_str);
            if let (Some(kind), Some(id), Some(tag)) = (kind, id, tag) {
                return Value::Ref {
                    kind,
                    object: ObjectRef::new(ObjectId::from(id), tag),
                };
            }
        }

        Value::Map(map)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Value::Typed { tag, data } => {
                let mut out = serializer.serialize_map(Some(2))?;
                out.serialize_entry(TYPE_KEY, tag)?;
                out.serialize_entry(DATA_KEY, data.as_ref())?;
                out.end()
            }
            Value::Ref { kind, object } => {
                let mut out = serializer.serialize_map(Some(3))?;
                out.serialize_entry(OBJECT_ID_KEY, object.id.as_str())?;
                out.serialize_entry(TYPE_KEY, &object.type_tag)?;
                out.serialize_entry(KIND_KEY, kind.as_str())?;
                out.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a protocol-native value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer {} does not fit in i64", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Str(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Bytes(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            map.insert(key, value);
        }
        Ok(Value::from_map(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Nil)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Nil,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(object) => {
                Value::from_map(object.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
