//! Integration tests for the protocol module
//!
//! These tests verify value shapes, request/response wire encoding and
//! error classification.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::transport::MsgPackCodec;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::{BTreeMap, HashSet};

    fn wire_round_trip(value: &Value) -> Value {
        let bytes = rmp_serde::to_vec_named(value).unwrap();
        rmp_serde::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_object_id_uniqueness() {
        let ids: HashSet<_> = (0..1000).map(|_| ObjectId::generate()).collect();
        assert_eq!(ids.len(), 1000, "All object IDs should be unique");
    }

    #[test]
    fn test_typed_value_shape() {
        let value = Value::typed("matrix", Value::Bytes(vec![1, 2, 3]));
        let json = value.to_json();
        assert_eq!(json, json!({"__type__": "matrix", "__data__": [1, 2, 3]}));
        assert_eq!(wire_round_trip(&value), value);
    }

    #[test]
    fn test_ref_value_shape() {
        let object = ObjectRef::new(ObjectId::from("abc"), "Counter");
        let value = Value::reference(RefKind::Proxy, object.clone());
        assert_eq!(
            value.to_json(),
            json!({"__object_id__": "abc", "__type__": "Counter", "__kind__": "proxy"})
        );

        let decoded = wire_round_trip(&value);
        assert_eq!(decoded.as_ref_object(), Some((RefKind::Proxy, &object)));
    }

    #[test]
    fn test_map_with_extra_keys_stays_a_map() {
        let mut map = BTreeMap::new();
        map.insert("__type__".to_string(), Value::from("matrix"));
        map.insert("__data__".to_string(), Value::Nil);
        map.insert("other".to_string(), Value::from(1));
        let value = Value::Map(map);

        assert_eq!(wire_round_trip(&value), value);
    }

    #[test]
    fn test_ref_with_unknown_kind_stays_a_map() {
        let mut map = BTreeMap::new();
        map.insert("__object_id__".to_string(), Value::from("abc"));
        map.insert("__type__".to_string(), Value::from("Counter"));
        map.insert("__kind__".to_string(), Value::from("other"));
        let value = Value::Map(map);

        assert_eq!(wire_round_trip(&value), value);
    }

    #[test]
    fn test_value_from_json() {
        let value = Value::from(json!({"a": [1, 2.5, "x", null, true]}));
        let list = value.as_map().unwrap()["a"].as_list().unwrap();
        assert_eq!(list[0].as_i64(), Some(1));
        assert_eq!(list[1].as_f64(), Some(2.5));
        assert_eq!(list[2].as_str(), Some("x"));
        assert!(list[3].is_nil());
        assert_eq!(list[4].as_bool(), Some(true));
    }

    #[test]
    fn test_int_widens_to_float() {
        assert_eq!(Value::from(3).as_f64(), Some(3.0));
        assert_eq!(Value::from(3.5).as_i64(), None);
    }

    #[test]
    fn test_large_unsigned_rejected() {
        let bytes = rmp_serde::to_vec(&u64::MAX).unwrap();
        assert!(rmp_serde::from_slice::<Value>(&bytes).is_err());
    }

    #[test]
    fn test_message_kind_bytes() {
        for byte in 0u8..5 {
            assert_eq!(MessageKind::try_from(byte).unwrap().as_u8(), byte);
        }
        assert!(matches!(
            MessageKind::try_from(5),
            Err(SealRpcError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_request_round_trip_all_kinds() {
        let id = ObjectId::generate();
        let mut kwargs = Kwargs::new();
        kwargs.insert("scale".to_string(), Value::from(2.0));

        let requests = vec![
            Request::function_call("add", vec![Value::from(2), Value::from(3)]),
            Request::constructor_call("Counter", vec![]).with_kwargs(kwargs.clone()),
            Request::attribute_query(id.clone()),
            Request::method_call(id.clone(), "increment", vec![Value::from(1)]).with_kwargs(kwargs),
            Request::destructor(id),
        ];

        for request in requests {
            let frame = MsgPackCodec::encode_request(&request).unwrap();
            assert_eq!(frame[0], request.kind().as_u8());
            assert_eq!(MsgPackCodec::decode_request(&frame).unwrap(), request);
        }
    }

    #[test]
    fn test_request_body_defaults() {
        #[derive(serde::Serialize)]
        struct Bare<'a> {
            name: &'a str,
        }
        let mut frame = vec![MessageKind::FunctionCall.as_u8()];
        frame.extend(rmp_serde::to_vec_named(&Bare { name: "ping" }).unwrap());

        let request = MsgPackCodec::decode_request(&frame).unwrap();
        assert_eq!(request, Request::function_call("ping", vec![]));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut frame = MsgPackCodec::encode_request(&Request::function_call("x", vec![])).unwrap();
        frame[0] = 9;
        let err = MsgPackCodec::decode_request(&frame).unwrap_err();
        assert!(err.to_string().contains("unknown message kind 9"));
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert!(matches!(
            MsgPackCodec::decode_request(&[]),
            Err(SealRpcError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_mismatched_body_rejected() {
        let call = MsgPackCodec::encode_request(&Request::function_call("x", vec![])).unwrap();
        let mut frame = call.clone();
        frame[0] = MessageKind::MethodCall.as_u8();
        assert!(matches!(
            MsgPackCodec::decode_request(&frame),
            Err(SealRpcError::Serialization(_))
        ));
    }

    #[test]
    fn test_response_round_trip() {
        let object = ObjectRef::new(ObjectId::generate(), "Matrix");
        let responses = vec![
            Response::Value(Value::from(5)),
            Response::nil(),
            Response::Secret(object.clone()),
            Response::Proxy(object.clone()),
            Response::Tuple(vec![Response::Value(Value::from("a")), Response::Secret(object)]),
            Response::fault(FaultKind::NotFound, "function 'missing_fn' not found"),
        ];

        for response in responses {
            let encoded = MsgPackCodec::encode_response(&response).unwrap();
            assert_eq!(MsgPackCodec::decode_response(&encoded).unwrap(), response);
        }
    }

    #[test]
    fn test_object_refs_flatten_tuples() {
        let a = ObjectRef::new(ObjectId::from("a"), "A");
        let b = ObjectRef::new(ObjectId::from("b"), "B");
        let response = Response::Tuple(vec![
            Response::Proxy(a.clone()),
            Response::Value(Value::Nil),
            Response::Tuple(vec![Response::Secret(b.clone())]),
        ]);

        let refs = response.object_refs();
        assert_eq!(refs, vec![(RefKind::Proxy, &a), (RefKind::Secret, &b)]);
    }

    #[test]
    fn test_garbage_response_rejected() {
        assert!(matches!(
            MsgPackCodec::decode_response(&[0xc1]),
            Err(SealRpcError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_error_classification() {
        assert!(SealRpcError::Timeout(2000).is_transport());
        assert!(SealRpcError::Connection("reset".into()).is_transport());
        assert!(!SealRpcError::remote(FaultKind::Application, "boom").is_transport());

        let not_found = SealRpcError::remote(FaultKind::NotFound, "function 'x' not found");
        assert!(not_found.is_not_found());
        assert_eq!(
            not_found.to_string(),
            "Remote not-found fault: function 'x' not found"
        );
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Nil),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1e12f64..1e12).prop_map(Value::Float),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Str),
            proptest::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        ]
    }

    fn value() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::List),
                proptest::collection::btree_map("[a-z]{1,8}", inner, 0..6).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_value_round_trip(v in value()) {
            prop_assert_eq!(wire_round_trip(&v), v);
        }
    }
}
