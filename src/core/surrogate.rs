//! # Surrogates
//!
//! Collections, maps, failures and permissions never travel as their own
//! internal layout. The writer substitutes a surrogate record whose fields
//! hold the logical content, typically as synthetic `object_wire.Any[]`
//! arrays, and the reader rebuilds the value atomically from those fields.
//! The rebuild validates the logical invariants (no duplicate set elements,
//! matching key and value counts) before the object becomes reachable.

use crate::core::field::FieldSpec;
use crate::core::field_source::AtomicFields;
use crate::core::graph::{Failure, ObjRef, Object, Permission, Value, ANY_CLASS, STRING_CLASS};
use crate::core::types::{RecordType, RuntimeType};
use crate::error::{CodecError, Result};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Arc;

/// Which logical value a surrogate stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurrogateKind {
    List,
    Set,
    Collection,
    Map,
    Failure,
    Permission,
}

/// Wire identity of one surrogate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurrogateSpec {
    pub kind: SurrogateKind,
    pub class_name: &'static str,
    pub version_id: i64,
}

/// Every surrogate the codec knows
pub static SURROGATES: [SurrogateSpec; 6] = [
    SurrogateSpec {
        kind: SurrogateKind::List,
        class_name: "object_wire.List",
        version_id: 1,
    },
    SurrogateSpec {
        kind: SurrogateKind::Set,
        class_name: "object_wire.Set",
        version_id: 1,
    },
    SurrogateSpec {
        kind: SurrogateKind::Collection,
        class_name: "object_wire.Collection",
        version_id: 1,
    },
    SurrogateSpec {
        kind: SurrogateKind::Map,
        class_name: "object_wire.Map",
        version_id: 1,
    },
    SurrogateSpec {
        kind: SurrogateKind::Failure,
        class_name: "object_wire.Failure",
        version_id: 1,
    },
    SurrogateSpec {
        kind: SurrogateKind::Permission,
        class_name: "object_wire.Permission",
        version_id: 1,
    },
];

static ANY_ARRAY: Lazy<String> = Lazy::new(|| format!("[L{ANY_CLASS};"));

static BUILTINS: Lazy<Vec<RuntimeType>> = Lazy::new(|| {
    SURROGATES.iter().map(surrogate_type).collect()
});

/// Surrogate types, in [`SURROGATES`] order
pub fn builtin_types() -> Vec<RuntimeType> {
    BUILTINS.clone()
}

/// Local type of a surrogate
pub fn builtin_type(kind: SurrogateKind) -> Option<RuntimeType> {
    SURROGATES
        .iter()
        .position(|s| s.kind == kind)
        .and_then(|i| BUILTINS.get(i).cloned())
}

/// Surrogate that replaces `object` on the wire, if any
pub fn surrogate_for(object: &Object) -> Option<&'static SurrogateSpec> {
    let kind = match object {
        Object::List(_) => SurrogateKind::List,
        Object::Set(_) => SurrogateKind::Set,
        Object::Collection(_) => SurrogateKind::Collection,
        Object::Map(_) => SurrogateKind::Map,
        Object::Failure(_) => SurrogateKind::Failure,
        Object::Permission(_) => SurrogateKind::Permission,
        _ => return None,
    };
    SURROGATES.iter().find(|s| s.kind == kind)
}

/// Field content of a surrogate record.
#[derive(Debug, Clone, PartialEq)]
pub enum SurrogateValue {
    Value(Value),
    /// Synthetic `object_wire.Any[]` emitted inline and never shared
    Array(Vec<Value>),
}

/// Field values the writer emits for `object`, by field name
pub fn surrogate_fields(object: &Object) -> Option<Vec<(&'static str, SurrogateValue)>> {
    let text = |s: &str| SurrogateValue::Value(Value::str(s));
    let opt_text = |s: &Option<String>| {
        SurrogateValue::Value(s.as_deref().map(Value::str).unwrap_or(Value::Null))
    };
    Some(match object {
        Object::List(v) | Object::Set(v) | Object::Collection(v) => {
            vec![("elements", SurrogateValue::Array(v.clone()))]
        }
        Object::Map(entries) => vec![
            (
                "keys",
                SurrogateValue::Array(entries.iter().map(|(k, _)| k.clone()).collect()),
            ),
            (
                "values",
                SurrogateValue::Array(entries.iter().map(|(_, v)| v.clone()).collect()),
            ),
        ],
        Object::Failure(f) => vec![
            ("kind", text(&f.kind)),
            ("message", opt_text(&f.message)),
            ("cause", SurrogateValue::Value(f.cause.clone())),
        ],
        Object::Permission(p) => vec![
            ("kind", text(&p.kind)),
            ("name", text(&p.name)),
            ("actions", opt_text(&p.actions)),
        ],
        _ => return None,
    })
}

fn surrogate_type(spec: &SurrogateSpec) -> RuntimeType {
    let builder = RecordType::atomic(spec.class_name, spec.version_id);
    match spec.kind {
        SurrogateKind::List => builder
            .field(FieldSpec::object("elements", &ANY_ARRAY))
            .build_with(|f| Ok(Object::List(elements(f, "elements")?)))
            .finish(),
        SurrogateKind::Collection => builder
            .field(FieldSpec::object("elements", &ANY_ARRAY))
            .build_with(|f| Ok(Object::Collection(elements(f, "elements")?)))
            .finish(),
        SurrogateKind::Set => builder
            .field(FieldSpec::object("elements", &ANY_ARRAY))
            .build_with(|f| {
                let values = elements(f, "elements")?;
                ensure_distinct(&values, "set element")?;
                Ok(Object::Set(values))
            })
            .finish(),
        SurrogateKind::Map => builder
            .field(FieldSpec::object("keys", &ANY_ARRAY))
            .field(FieldSpec::object("values", &ANY_ARRAY))
            .build_with(|f| {
                let keys = elements(f, "keys")?;
                let values = elements(f, "values")?;
                if keys.len() != values.len() {
                    return Err(CodecError::InvariantViolation(format!(
                        "map has {} keys but {} values",
                        keys.len(),
                        values.len()
                    )));
                }
                ensure_distinct(&keys, "map key")?;
                Ok(Object::Map(keys.into_iter().zip(values).collect()))
            })
            .finish(),
        SurrogateKind::Failure => builder
            .field(FieldSpec::object("kind", STRING_CLASS))
            .field(FieldSpec::object("message", STRING_CLASS))
            .field(FieldSpec::any("cause"))
            .build_with(|f| {
                Ok(Object::Failure(Failure {
                    kind: required(f, "kind")?,
                    message: f.get_str("message")?.map(|s| s.to_string()),
                    cause: f.get_object("cause", Value::Null)?,
                }))
            })
            .finish(),
        SurrogateKind::Permission => builder
            .field(FieldSpec::object("kind", STRING_CLASS))
            .field(FieldSpec::object("name", STRING_CLASS))
            .field(FieldSpec::object("actions", STRING_CLASS))
            .build_with(|f| {
                Ok(Object::Permission(Permission {
                    kind: required(f, "kind")?,
                    name: required(f, "name")?,
                    actions: f.get_str("actions")?.map(|s| s.to_string()),
                }))
            })
            .finish(),
    }
}

fn required(f: &AtomicFields<'_>, name: &str) -> Result<String> {
    f.get_str(name)?
        .map(|s| s.to_string())
        .ok_or_else(|| CodecError::InvariantViolation(format!("{}.{name} is null", f.class_name())))
}

fn elements(f: &AtomicFields<'_>, name: &str) -> Result<Vec<Value>> {
    let value = f.get_object(name, Value::Null)?;
    match f.deref(&value).and_then(|o| o.as_array()).and_then(|a| a.refs()) {
        Some(values) => Ok(values.to_vec()),
        None => Err(CodecError::InvariantViolation(format!(
            "{}.{name} is not an object array",
            f.class_name()
        ))),
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum ElementKey {
    Null,
    Bits(u8, u64),
    Str(Arc<str>),
    Ref(ObjRef),
}

fn element_key(value: &Value) -> ElementKey {
    match value {
        Value::Null => ElementKey::Null,
        Value::Bool(v) => ElementKey::Bits(0, u64::from(*v)),
        Value::Byte(v) => ElementKey::Bits(1, *v as u64),
        Value::Char(v) => ElementKey::Bits(2, u64::from(*v)),
        Value::Short(v) => ElementKey::Bits(3, *v as u64),
        Value::Int(v) => ElementKey::Bits(4, *v as u64),
        Value::Long(v) => ElementKey::Bits(5, *v as u64),
        Value::Float(v) => ElementKey::Bits(6, u64::from(v.to_bits())),
        Value::Double(v) => ElementKey::Bits(7, v.to_bits()),
        Value::Str(s) => ElementKey::Str(s.clone()),
        Value::Ref(r) => ElementKey::Ref(*r),
    }
}

fn ensure_distinct(values: &[Value], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(values.len());
    for value in values {
        if !seen.insert(element_key(value)) {
            return Err(CodecError::InvariantViolation(format!("duplicate {what}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::FieldSchema;
    use crate::core::field_source::FieldSource;
    use crate::core::graph::{Array, Graph};

    fn build(kind: SurrogateKind, graph: &Graph, values: &[Value]) -> Result<Object> {
        let ty = builtin_type(kind).ok_or_else(|| CodecError::TypeResolution("missing".into()))?;
        let schema = FieldSchema::sorted(ty.fields())?;
        let source = FieldSource::reconcile(Arc::from(ty.name()), &schema, &schema, values)?;
        let levels = vec![source];
        ty.build(&AtomicFields::new(ty.name(), &levels, graph))
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_set_rejects_duplicates() {
        let mut graph = Graph::new();
        let ok = graph.insert(Object::Array(Array::new(crate::core::graph::ArrayData::Ref(
            vec![Value::str("a"), Value::str("b")],
        ))));
        let dup = graph.insert(Object::Array(Array::new(crate::core::graph::ArrayData::Ref(
            vec![Value::str("a"), Value::str("a")],
        ))));
        assert!(matches!(
            build(SurrogateKind::Set, &graph, &[Value::Ref(ok)]).unwrap(),
            Object::Set(v) if v.len() == 2
        ));
        assert!(matches!(
            build(SurrogateKind::Set, &graph, &[Value::Ref(dup)]),
            Err(CodecError::InvariantViolation(_))
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_map_requires_matching_lengths() {
        let mut graph = Graph::new();
        let keys = graph.insert(Object::Array(Array::new(crate::core::graph::ArrayData::Ref(
            vec![Value::str("k")],
        ))));
        let values = graph.insert(Object::Array(Array::new(
            crate::core::graph::ArrayData::Ref(vec![]),
        )));
        // schema order is keys, values
        let err = build(SurrogateKind::Map, &graph, &[Value::Ref(keys), Value::Ref(values)]);
        assert!(matches!(err, Err(CodecError::InvariantViolation(_))));
    }

    #[test]
    fn test_list_requires_elements() {
        let graph = Graph::new();
        assert!(build(SurrogateKind::List, &graph, &[Value::Null]).is_err());
    }

    #[test]
    fn test_surrogate_fields_for_map() {
        let map = Object::Map(vec![(Value::str("k"), Value::Int(1))]);
        let fields = surrogate_fields(&map).unwrap_or_default();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].1, SurrogateValue::Array(vec![Value::str("k")]));
        assert_eq!(surrogate_for(&map).map(|s| s.class_name), Some("object_wire.Map"));
    }

    #[test]
    fn test_builtins_cover_every_surrogate() {
        let types = builtin_types();
        assert_eq!(types.len(), SURROGATES.len());
        for (ty, spec) in types.iter().zip(SURROGATES.iter()) {
            assert_eq!(ty.name(), spec.class_name);
        }
    }
}
