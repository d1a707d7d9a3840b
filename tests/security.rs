#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Security gate tests
//! Denied objects are consumed and replaced by null so the stream stays aligned

use object_wire::config::SecurityConfig;
use object_wire::core::field::FieldSpec;
use object_wire::core::graph::{EnumValue, Proxy, Record};
use object_wire::core::security::{CapabilityContext, Category, Grants};
use object_wire::core::types::{EnumType, RecordType, TypeRegistry};
use object_wire::{CodecError, Graph, Object, Value, WireReader, WireWriter};
use std::sync::Arc;

fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::with_builtins();
    registry
        .register(
            RecordType::atomic("demo.Node", 1)
                .field(FieldSpec::int("value"))
                .field(FieldSpec::object("next", "demo.Node"))
                .finish(),
        )
        .register(
            RecordType::atomic("demo.Point", 1)
                .field(FieldSpec::int("x"))
                .field(FieldSpec::int("y"))
                .finish(),
        )
        .register(EnumType::new("demo.Color", ["RED", "GREEN"]))
        .allow_proxy_interface("demo.Greeter");
    Arc::new(registry)
}

/// Encodes each value in order and returns the stream
fn encode(graph: &Graph, values: &[Value]) -> Vec<u8> {
    let mut writer = WireWriter::with_defaults(Vec::new(), registry()).unwrap();
    for value in values {
        writer.write_value(graph, value).unwrap();
    }
    writer.into_inner().unwrap()
}

fn node_pair(graph: &mut Graph) -> Value {
    let tail = graph.insert(Object::Record(
        Record::new("demo.Node").with("value", 2).with("next", Value::Null),
    ));
    Value::Ref(graph.insert(Object::Record(
        Record::new("demo.Node").with("value", 1).with("next", tail),
    )))
}

fn point(graph: &mut Graph) -> Value {
    Value::Ref(graph.insert(Object::Record(
        Record::new("demo.Point").with("x", 3).with("y", 4),
    )))
}

#[test]
fn test_denied_object_reads_as_null() {
    let mut graph = Graph::new();
    let root = node_pair(&mut graph);
    let bytes = encode(&graph, &[root.clone(), Value::str("after"), root]);

    let ctx = CapabilityContext::untrusted();
    let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
    assert_eq!(reader.read_value(&ctx).unwrap(), Value::Null);
    assert_eq!(reader.read_value(&ctx).unwrap(), Value::str("after"));
    // back-reference to the refused object stays null
    assert_eq!(reader.read_value(&ctx).unwrap(), Value::Null);
    assert!(!reader.is_closed());
}

#[test]
fn test_primitive_only_type_is_implicitly_exempt() {
    let mut graph = Graph::new();
    let p = point(&mut graph);
    let bytes = encode(&graph, &[p.clone()]);

    let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
    let value = reader.read_value(&CapabilityContext::untrusted()).unwrap();
    assert!(graph.shape_eq(&p, reader.graph(), &value));

    let strict = CapabilityContext::untrusted().with_implicit_exemption(false);
    let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
    assert_eq!(reader.read_value(&strict).unwrap(), Value::Null);
}

#[test]
fn test_exempt_types_from_config() {
    let mut graph = Graph::new();
    let root = node_pair(&mut graph);
    let bytes = encode(&graph, &[root.clone()]);

    let config = SecurityConfig {
        implicit_exemption: false,
        exempt_types: vec!["demo.Node".to_string()],
    };
    let ctx = CapabilityContext::from_config(&config, Arc::new(Grants::new()));
    let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
    let value = reader.read_value(&ctx).unwrap();
    assert!(graph.shape_eq(&root, reader.graph(), &value));
}

#[test]
fn test_grant_names_a_single_type() {
    let mut graph = Graph::new();
    let root = node_pair(&mut graph);
    let bytes = encode(&graph, &[root]);

    let ctx = CapabilityContext::new(Arc::new(
        Grants::new().allow(Category::Atomic, "demo.Other"),
    ));
    let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
    assert_eq!(reader.read_value(&ctx).unwrap(), Value::Null);
}

#[test]
fn test_enums_and_strings_need_no_grant() {
    let mut graph = Graph::new();
    let color = graph.insert(Object::Enum(EnumValue {
        class_name: "demo.Color".into(),
        constant: "GREEN".into(),
    }));
    let bytes = encode(&graph, &[Value::Ref(color), Value::str("plain")]);

    let ctx = CapabilityContext::untrusted();
    let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
    let value = reader.read_value(&ctx).unwrap();
    match reader.graph().deref(&value) {
        Some(Object::Enum(e)) => assert_eq!(&*e.constant, "GREEN"),
        other => panic!("expected enum, got {other:?}"),
    }
    assert_eq!(reader.read_value(&ctx).unwrap(), Value::str("plain"));
}

#[test]
fn test_surrogates_require_a_grant() {
    let mut graph = Graph::new();
    let list = graph.insert(Object::List(vec![Value::str("a"), Value::str("b")]));
    let bytes = encode(&graph, &[Value::Ref(list)]);

    let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
    assert_eq!(
        reader.read_value(&CapabilityContext::untrusted()).unwrap(),
        Value::Null
    );

    let ctx = CapabilityContext::new(Arc::new(Grants::new().with_surrogates()));
    let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
    let value = reader.read_value(&ctx).unwrap();
    assert!(graph.shape_eq(&Value::Ref(list), reader.graph(), &value));
}

#[test]
fn test_duplicate_set_elements_are_rejected() {
    let mut graph = Graph::new();
    let set = graph.insert(Object::Set(vec![Value::str("dup"), Value::str("dup")]));
    let bytes = encode(&graph, &[Value::Ref(set), Value::str("after")]);

    let ctx = CapabilityContext::new(Arc::new(Grants::new().with_surrogates()));
    let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
    assert!(matches!(
        reader.read_value(&ctx),
        Err(CodecError::InvariantViolation(m)) if m.contains("duplicate")
    ));
    assert!(!reader.is_closed());
    assert_eq!(reader.read_value(&ctx).unwrap(), Value::str("after"));
}

#[test]
fn test_proxy_denied_without_grant() {
    let mut graph = Graph::new();
    let proxy = graph.insert(Object::Proxy(Proxy {
        interfaces: vec!["demo.Greeter".into()],
        handler: Value::str("handler"),
    }));
    let bytes = encode(&graph, &[Value::Ref(proxy), Value::str("after")]);

    // implicit exemption never covers proxies
    let ctx = CapabilityContext::new(Arc::new(Grants::new().allow_category(Category::Atomic)));
    let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
    assert_eq!(reader.read_value(&ctx).unwrap(), Value::Null);
    assert_eq!(reader.read_value(&ctx).unwrap(), Value::str("after"));

    let ctx = CapabilityContext::new(Arc::new(Grants::new().allow_category(Category::Proxy)));
    let mut reader = WireReader::with_defaults(&bytes[..], registry()).unwrap();
    let value = reader.read_value(&ctx).unwrap();
    assert!(graph.shape_eq(&Value::Ref(proxy), reader.graph(), &value));
}
