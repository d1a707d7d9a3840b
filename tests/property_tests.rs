//! Property-based tests using proptest
//!
//! These tests check that arbitrary input never panics the reader and that
//! generated graphs survive an encode and decode unchanged.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use object_wire::core::graph::{Array, ArrayData};
use object_wire::core::security::CapabilityContext;
use object_wire::core::types::TypeRegistry;
use object_wire::{decode_one, encode_one, Graph, Object, Value, WireReader};
use proptest::prelude::*;
use std::sync::Arc;

fn registry() -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::with_builtins())
}

// Property: Arbitrary bytes after a valid header never panic the reader
proptest! {
    #[test]
    fn prop_arbitrary_body_never_panics(body in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut bytes = vec![0xAC, 0xED, 0x00, 0x05];
        bytes.extend_from_slice(&body);

        let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
        let ctx = CapabilityContext::trusted();
        for _ in 0..8 {
            if reader.read_value(&ctx).is_err() && reader.is_closed() {
                break;
            }
        }
    }
}

// Property: Arbitrary byte strings are rejected or decoded, never panic
proptest! {
    #[test]
    fn prop_arbitrary_stream_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode_one(&bytes, registry(), &CapabilityContext::untrusted());
    }
}

// Property: Strings round-trip, including supplementary and NUL characters
proptest! {
    #[test]
    fn prop_string_roundtrip(text in any::<String>()) {
        let graph = Graph::new();
        let bytes = encode_one(&graph, &Value::str(&text), registry()).unwrap();
        let (_, value) = decode_one(&bytes, registry(), &CapabilityContext::untrusted()).unwrap();

        prop_assert_eq!(value, Value::str(&text));
    }
}

// Property: Primitive int arrays round-trip element for element
proptest! {
    #[test]
    fn prop_int_array_roundtrip(values in prop::collection::vec(any::<i32>(), 0..2000)) {
        let mut graph = Graph::new();
        let array = graph.insert(Object::Array(Array::new(ArrayData::Int(values.clone()))));
        let bytes = encode_one(&graph, &Value::Ref(array), registry()).unwrap();
        let (decoded, root) = decode_one(&bytes, registry(), &CapabilityContext::untrusted()).unwrap();

        match decoded.array(&root).map(Array::data) {
            Some(ArrayData::Int(read)) => prop_assert_eq!(read, &values),
            other => prop_assert!(false, "expected int array, got {:?}", other),
        }
    }
}

// Property: Lists of strings keep their shape, shared entries included
proptest! {
    #[test]
    fn prop_string_list_roundtrip(items in prop::collection::vec("[a-c]{0,3}", 0..64)) {
        let mut graph = Graph::new();
        let list = graph.insert(Object::List(items.iter().map(|s| Value::str(s)).collect()));
        let bytes = encode_one(&graph, &Value::Ref(list), registry()).unwrap();
        let (decoded, root) = decode_one(&bytes, registry(), &CapabilityContext::trusted()).unwrap();

        prop_assert!(graph.shape_eq(&Value::Ref(list), &decoded, &root));
    }
}

// Property: Encoding is deterministic for the same graph
proptest! {
    #[test]
    fn prop_encoding_deterministic(values in prop::collection::vec(any::<i64>(), 0..100)) {
        let mut graph = Graph::new();
        let array = graph.insert(Object::Array(Array::new(ArrayData::Long(values))));

        let first = encode_one(&graph, &Value::Ref(array), registry()).unwrap();
        let second = encode_one(&graph, &Value::Ref(array), registry()).unwrap();
        prop_assert_eq!(first, second);
    }
}
