//! Serialization Registry
//!
//! Maps a type tag to an encoder/decoder pair for values that are not
//! protocol-native. Encoded values travel as [`Value::Typed`], so the far
//! end can pick the decoder by tag. A tag nobody registered is an error on
//! both sides; payloads are never passed through undecoded.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::protocol::error::{Result, SealRpcError};
use crate::protocol::Value;

type SerializeFn = Arc<dyn Fn(&dyn Any) -> Result<Value> + Send + Sync>;
type DeserializeFn = Arc<dyn Fn(&Value) -> Result<Box<dyn Any + Send>> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    type_name: &'static str,
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

/// Tag-indexed table of encoders and decoders.
///
/// Cloning is cheap; the functions are shared.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use sealrpc_common::SerializerRegistry;
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Point { x: i32, y: i32 }
///
/// let mut registry = SerializerRegistry::new();
/// registry.register_serde::<Point>("point").unwrap();
///
/// let encoded = registry.encode("point", &Point { x: 1, y: 2 }).unwrap();
/// let decoded: Point = registry.decode_as(&encoded).unwrap();
/// assert_eq!(decoded, Point { x: 1, y: 2 });
/// ```
#[derive(Clone, Default)]
pub struct SerializerRegistry {
    entries: HashMap<String, Entry>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an encoder/decoder pair for `T` under `tag`.
    ///
    /// # Errors
    ///
    /// Returns `Registration` if the tag is already taken.
    pub fn register<T, S, D>(&mut self, tag: impl Into<String>, serialize: S, deserialize: D) -> Result<()>
    where
        T: Any + Send,
        S: Fn(&T) -> Result<Value> + Send + Sync + 'static,
        D: Fn(&Value) -> Result<T> + Send + Sync + 'static,
    {
        let tag = tag.into();
        if self.entries.contains_key(&tag) {
            return Err(SealRpcError::Registration(format!(
                "serializer for tag '{}' already registered",
                tag
            )));
        }

        let serialize_tag = tag.clone();
        let entry = Entry {
            type_name: type_name::<T>(),
            serialize: Arc::new(move |value: &dyn Any| {
                let value = value.downcast_ref::<T>().ok_or_else(|| {
                    SealRpcError::Serialization(format!(
                        "value is not a {} (tag '{}')",
                        type_name::<T>(),
                        serialize_tag
                    ))
                })?;
                serialize(value)
            }),
            deserialize: Arc::new(move |data: &Value| {
                deserialize(data).map(|value| Box::new(value) as Box<dyn Any + Send>)
            }),
        };
        self.entries.insert(tag, entry);
        Ok(())
    }

    /// Register any serde type, carried as MessagePack bytes.
    pub fn register_serde<T>(&mut self, tag: impl Into<String>) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Any + Send,
    {
        self.register::<T, _, _>(
            tag,
            |value| Ok(Value::Bytes(rmp_serde::to_vec_named(value)?)),
            |data| {
                let bytes = data.as_bytes().ok_or_else(|| {
                    SealRpcError::Serialization(format!("expected bytes, got {}", data.type_name()))
                })?;
                Ok(rmp_serde::from_slice(bytes)?)
            },
        )
    }

    /// Encode `value` with the serializer registered for `tag`.
    pub fn encode(&self, tag: &str, value: &dyn Any) -> Result<Value> {
        let entry = self.entry(tag)?;
        let data = (entry.serialize)(value)?;
        Ok(Value::typed(tag, data))
    }

    /// Decode a [`Value::Typed`] with the deserializer registered for its tag.
    pub fn decode(&self, value: &Value) -> Result<Box<dyn Any + Send>> {
        let Value::Typed { tag, data } = value else {
            return Err(SealRpcError::Serialization(format!(
                "expected a typed value, got {}",
                value.type_name()
            )));
        };
        let entry = self.entry(tag)?;
        (entry.deserialize)(data)
    }

    /// Decode and downcast in one step.
    pub fn decode_as<T: Any>(&self, value: &Value) -> Result<T> {
        self.decode(value)?
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| SealRpcError::Serialization(format!("decoded value is not a {}", type_name::<T>())))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, tag: &str) -> Result<&Entry> {
        self.entries
            .get(tag)
            .ok_or_else(|| SealRpcError::UnknownTypeTag(tag.to_string()))
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(tag, entry)| (tag, entry.type_name)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Matrix {
        rows: u32,
        cols: u32,
        data: Vec<f64>,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Celsius(f64);

    fn registry() -> SerializerRegistry {
        let mut registry = SerializerRegistry::new();
        registry.register_serde::<Matrix>("matrix").unwrap();
        registry
            .register::<Celsius, _, _>(
                "celsius",
                |c| Ok(Value::Float(c.0)),
                |v| {
                    v.as_f64()
                        .map(Celsius)
                        .ok_or_else(|| SealRpcError::Serialization("expected float".to_string()))
                },
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let mut registry = registry();
        let err = registry.register_serde::<Matrix>("matrix").unwrap_err();
        assert!(matches!(err, SealRpcError::Registration(_)));
    }

    #[test]
    fn test_encode_produces_typed_value() {
        let encoded = registry().encode("celsius", &Celsius(21.5)).unwrap();
        assert_eq!(encoded, Value::typed("celsius", Value::Float(21.5)));
    }

    #[test]
    fn test_unknown_tag_on_encode_and_decode() {
        let registry = registry();
        assert!(matches!(
            registry.encode("nope", &1i32),
            Err(SealRpcError::UnknownTypeTag(tag)) if tag == "nope"
        ));
        assert!(matches!(
            registry.decode(&Value::typed("nope", Value::Nil)),
            Err(SealRpcError::UnknownTypeTag(_))
        ));
    }

    #[test]
    fn test_wrong_type_for_tag() {
        let err = registry().encode("celsius", &"hot").unwrap_err();
        assert!(matches!(err, SealRpcError::Serialization(_)));
    }

    #[test]
    fn test_decode_untyped_value() {
        let err = registry().decode(&Value::from(3)).unwrap_err();
        assert!(matches!(err, SealRpcError::Serialization(_)));
    }

    #[test]
    fn test_decode_as_wrong_type() {
        let registry = registry();
        let encoded = registry.encode("celsius", &Celsius(1.0)).unwrap();
        assert!(registry.decode_as::<Matrix>(&encoded).is_err());
    }

    #[test]
    fn test_survives_wire_encoding() {
        let registry = registry();
        let matrix = Matrix {
            rows: 1,
            cols: 2,
            data: vec![0.5, -1.0],
        };
        let encoded = registry.encode("matrix", &matrix).unwrap();
        let wire = rmp_serde::to_vec_named(&encoded).unwrap();
        let received: Value = rmp_serde::from_slice(&wire).unwrap();
        assert_eq!(registry.decode_as::<Matrix>(&received).unwrap(), matrix);
    }

    #[test]
    fn test_tags_sorted() {
        assert_eq!(registry().tags(), vec!["celsius", "matrix"]);
    }

    proptest! {
        #[test]
        fn prop_registered_round_trip(
            rows in 0u32..8,
            cols in 0u32..8,
            data in proptest::collection::vec(-1e9f64..1e9, 0..16),
        ) {
            let registry = registry();
            let matrix = Matrix { rows, cols, data };
            let encoded = registry.encode("matrix", &matrix).unwrap();
            prop_assert_eq!(registry.decode_as::<Matrix>(&encoded).unwrap(), matrix);
        }
    }
}
