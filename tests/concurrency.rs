#![allow(clippy::unwrap_used)]
//! Readers and writers on separate threads share one registry and the
//! process-wide descriptor cache.

use object_wire::core::field::FieldSpec;
use object_wire::core::graph::Record;
use object_wire::core::security::CapabilityContext;
use object_wire::core::types::{RecordType, TypeRegistry};
use object_wire::{Graph, Object, Value, WireReader, WireWriter};
use std::sync::Arc;
use std::thread;

fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::with_builtins();
    registry.register(
        RecordType::atomic("demo.Cell", 4)
            .field(FieldSpec::long("id"))
            .field(FieldSpec::any("payload"))
            .finish(),
    );
    Arc::new(registry)
}

#[test]
fn concurrent_encode_decode_heavy() {
    let registry = registry();
    let iterations = 500usize;

    thread::scope(|scope| {
        for worker in 0..8i64 {
            let registry = registry.clone();
            scope.spawn(move || {
                let ctx = CapabilityContext::trusted();
                for i in 0..iterations {
                    let mut graph = Graph::new();
                    let items = (0..(i % 16)).map(|n| Value::str(&format!("n{n}"))).collect();
                    let list = graph.insert(Object::List(items));
                    let cell = graph.insert(Object::Record(
                        Record::new("demo.Cell")
                            .with("id", worker * 1_000_000 + i as i64)
                            .with("payload", list),
                    ));

                    let mut writer = WireWriter::with_defaults(Vec::new(), registry.clone()).unwrap();
                    writer.write_value(&graph, &Value::Ref(cell)).unwrap();
                    let bytes = writer.into_inner().unwrap();

                    let mut reader = WireReader::with_defaults(&bytes[..], registry.clone()).unwrap();
                    let value = reader.read_value(&ctx).unwrap();
                    assert!(graph.shape_eq(&Value::Ref(cell), reader.graph(), &value));
                }
            });
        }
    });
}

#[test]
fn readers_share_one_stream_image() {
    let registry = registry();
    let mut graph = Graph::new();
    let cell = graph.insert(Object::Record(
        Record::new("demo.Cell").with("id", 7i64).with("payload", "shared"),
    ));
    let mut writer = WireWriter::with_defaults(Vec::new(), registry.clone()).unwrap();
    for _ in 0..32 {
        writer.write_value(&graph, &Value::Ref(cell)).unwrap();
    }
    let bytes = Arc::new(writer.into_inner().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let bytes = bytes.clone();
            let registry = registry.clone();
            thread::spawn(move || {
                let ctx = CapabilityContext::untrusted().with_exempt_types(["demo.Cell"]);
                let mut reader = WireReader::with_defaults(&bytes[..], registry).unwrap();
                let first = reader.read_value(&ctx).unwrap();
                for _ in 1..32 {
                    assert_eq!(reader.read_value(&ctx).unwrap(), first);
                }
                reader.handle_count()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap() > 0);
    }
}
