//! # object-wire
//!
//! Hardened binary codec for cyclic object graphs read from untrusted byte
//! streams.
//!
//! The wire format is a token stream: a fixed header followed by top-level
//! values. Class descriptors travel inline and every string, descriptor and
//! object is assigned a handle so later occurrences are back-references.
//!
//! ## Safety properties
//! - **Budgeted allocation**: every length prefix is claimed from a per-value
//!   byte budget before anything is allocated
//! - **Atomic construction**: objects are built from their complete field set
//!   and become reachable only after their invariants are checked
//! - **Capability gate**: a type is constructed only when the caller's
//!   context grants its construction category
//! - **Alignment**: refused or failed objects are still consumed, so the
//!   stream stays readable after an object-level failure
//!
//! ## Example
//! ```rust
//! use object_wire::core::graph::{Graph, Object, Value};
//! use object_wire::core::security::CapabilityContext;
//! use object_wire::core::types::TypeRegistry;
//! use object_wire::{decode_one, encode_one};
//! use std::sync::Arc;
//!
//! let mut graph = Graph::new();
//! let list = graph.insert(Object::List(vec![Value::str("a"), Value::str("b")]));
//! let registry = Arc::new(TypeRegistry::with_builtins());
//!
//! let bytes = encode_one(&graph, &Value::Ref(list), registry.clone()).unwrap();
//! let (decoded, root) = decode_one(&bytes, registry, &CapabilityContext::trusted()).unwrap();
//! assert!(graph.shape_eq(&Value::Ref(list), &decoded, &root));
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod utils;

pub use crate::config::CodecConfig;
pub use crate::core::graph::{Graph, ObjRef, Object, Value};
pub use crate::core::reader::WireReader;
pub use crate::core::security::CapabilityContext;
pub use crate::core::types::{RecordType, RuntimeType, SerialType, TypeRegistry, TypeResolver};
pub use crate::core::writer::WireWriter;
pub use crate::error::{CodecError, Result};

use std::sync::Arc;

/// Decode a single top-level value from a complete byte stream
pub fn decode_one(
    bytes: &[u8],
    resolver: Arc<dyn TypeResolver>,
    ctx: &CapabilityContext,
) -> Result<(Graph, Value)> {
    let mut reader = WireReader::with_defaults(bytes, resolver)?;
    let value = reader.read_value(ctx)?;
    Ok((reader.into_graph(), value))
}

/// Encode a single top-level value into a fresh byte stream
pub fn encode_one(graph: &Graph, value: &Value, registry: Arc<dyn TypeResolver>) -> Result<Vec<u8>> {
    let mut writer = WireWriter::with_defaults(Vec::new(), registry)?;
    writer.write_value(graph, value)?;
    writer.into_inner()
}
