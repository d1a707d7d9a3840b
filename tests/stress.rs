#![allow(clippy::unwrap_used)]

use bytes::Bytes;
use object_wire::core::graph::{Array, ArrayData};
use object_wire::core::security::CapabilityContext;
use object_wire::core::types::TypeRegistry;
use object_wire::{Graph, Object, Value, WireReader, WireWriter};
use std::sync::Arc;

#[test]
fn stress_long_stream_with_periodic_resets() {
    // Many values on one stream; resets keep the handle table bounded
    let registry = Arc::new(TypeRegistry::with_builtins());
    let mut writer = WireWriter::with_defaults(Vec::new(), registry.clone()).unwrap();

    let mut graph = Graph::new();
    for round in 0..2_000usize {
        if round > 0 && round % 100 == 0 {
            writer.reset().unwrap();
            graph = Graph::new();
        }
        let items = (0..8).map(|i| Value::str(&format!("r{}-{i}", round % 7))).collect();
        let list = graph.insert(Object::List(items));
        writer.write_value(&graph, &Value::Ref(list)).unwrap();
    }
    let bytes = writer.into_inner().unwrap();

    let ctx = CapabilityContext::trusted();
    let mut reader = WireReader::with_defaults(&bytes[..], registry).unwrap();
    for _ in 0..2_000 {
        let value = reader.read_value(&ctx).unwrap();
        assert!(matches!(reader.graph().deref(&value), Some(Object::List(items)) if items.len() == 8));
        assert!(reader.handle_count() < 2_000);
    }
}

#[test]
fn stress_large_primitive_arrays() {
    let registry = Arc::new(TypeRegistry::with_builtins());
    let ctx = CapabilityContext::untrusted();

    for size in [0usize, 1, 64, 4096, 1_048_576] {
        let mut graph = Graph::new();
        let data = Bytes::from(vec![0xA5u8; size]);
        let array = graph.insert(Object::Array(Array::new(ArrayData::Byte(data.clone()))));

        let mut writer = WireWriter::with_defaults(Vec::new(), registry.clone()).unwrap();
        writer.write_value(&graph, &Value::Ref(array)).unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reader = WireReader::with_defaults(&bytes[..], registry.clone()).unwrap();
        let value = reader.read_value(&ctx).unwrap();
        match reader.graph().array(&value).map(Array::data) {
            Some(ArrayData::Byte(read)) => assert_eq!(read, &data),
            other => panic!("expected byte array, got {other:?}"),
        }
    }
}
