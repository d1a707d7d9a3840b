//! # Field Source
//!
//! Read-only view over the reconciled field values of one hierarchy level.
//!
//! Constructors never see the raw stream layout. Each local field is paired
//! with the stream field of the same name; fields the stream does not carry
//! are reported as defaulted and return the caller-supplied default. Fields
//! the stream carries but the local type does not declare are dropped here.

use crate::core::field::{FieldSchema, TypeTag};
use crate::core::graph::{Graph, Object, Record, Value};
use crate::error::{CodecError, Result};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct FieldSlot {
    name: Arc<str>,
    tag: TypeTag,
    /// `None` when the stream did not supply the field
    value: Option<Value>,
}

/// Reconciled fields of one hierarchy level.
#[derive(Debug, Clone)]
pub struct FieldSource {
    class_name: Arc<str>,
    slots: Vec<FieldSlot>,
}

impl FieldSource {
    /// Pair local fields with stream values.
    ///
    /// `stream_values` holds one value per stream field, in stream schema order.
    pub fn reconcile(
        class_name: Arc<str>,
        local: &FieldSchema,
        stream: &FieldSchema,
        stream_values: &[Value],
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(local.len());
        for field in local.fields() {
            let spec = &field.spec;
            let value = match stream
                .fields()
                .iter()
                .position(|s| s.spec.name == spec.name)
            {
                Some(index) => {
                    let remote = &stream.fields()[index].spec;
                    if !compatible(remote.tag, spec.tag) {
                        return Err(CodecError::IncompatibleClass(format!(
                            "{}.{}: stream type {} does not match local type {}",
                            class_name,
                            spec.name,
                            remote.tag.code() as char,
                            spec.tag.code() as char
                        )));
                    }
                    stream_values.get(index).cloned()
                }
                None => None,
            };
            slots.push(FieldSlot {
                name: spec.name.clone(),
                tag: spec.tag,
                value,
            });
        }
        Ok(Self { class_name, slots })
    }

    /// Every local field defaulted; used for levels absent from the stream
    pub fn defaults(class_name: Arc<str>, local: &FieldSchema) -> Self {
        let slots = local
            .fields()
            .iter()
            .map(|f| FieldSlot {
                name: f.spec.name.clone(),
                tag: f.spec.tag,
                value: None,
            })
            .collect();
        Self { class_name, slots }
    }

    /// Class that declares these fields
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.slot(name).is_ok()
    }

    fn slot(&self, name: &str) -> Result<&FieldSlot> {
        self.slots
            .iter()
            .find(|s| &*s.name == name)
            .ok_or_else(|| {
                CodecError::InvariantViolation(format!(
                    "no field {} in {}",
                    name, self.class_name
                ))
            })
    }

    fn typed(&self, name: &str, tag: TypeTag) -> Result<Option<&Value>> {
        let slot = self.slot(name)?;
        let matches = slot.tag == tag || (!slot.tag.is_primitive() && !tag.is_primitive());
        if !matches {
            return Err(CodecError::InvariantViolation(format!(
                "field {}.{} has type {}, requested {}",
                self.class_name,
                name,
                slot.tag.code() as char,
                tag.code() as char
            )));
        }
        Ok(slot.value.as_ref())
    }

    /// Whether the stream did not supply `name`
    pub fn defaulted(&self, name: &str) -> Result<bool> {
        Ok(self.slot(name)?.value.is_none())
    }

    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool> {
        Ok(match self.typed(name, TypeTag::Boolean)? {
            Some(Value::Bool(v)) => *v,
            _ => default,
        })
    }

    pub fn get_i8(&self, name: &str, default: i8) -> Result<i8> {
        Ok(match self.typed(name, TypeTag::Byte)? {
            Some(Value::Byte(v)) => *v,
            _ => default,
        })
    }

    pub fn get_char(&self, name: &str, default: u16) -> Result<u16> {
        Ok(match self.typed(name, TypeTag::Char)? {
            Some(Value::Char(v)) => *v,
            _ => default,
        })
    }

    pub fn get_i16(&self, name: &str, default: i16) -> Result<i16> {
        Ok(match self.typed(name, TypeTag::Short)? {
            Some(Value::Short(v)) => *v,
            _ => default,
        })
    }

    pub fn get_i32(&self, name: &str, default: i32) -> Result<i32> {
        Ok(match self.typed(name, TypeTag::Int)? {
            Some(Value::Int(v)) => *v,
            _ => default,
        })
    }

    pub fn get_i64(&self, name: &str, default: i64) -> Result<i64> {
        Ok(match self.typed(name, TypeTag::Long)? {
            Some(Value::Long(v)) => *v,
            _ => default,
        })
    }

    pub fn get_f32(&self, name: &str, default: f32) -> Result<f32> {
        Ok(match self.typed(name, TypeTag::Float)? {
            Some(Value::Float(v)) => *v,
            _ => default,
        })
    }

    pub fn get_f64(&self, name: &str, default: f64) -> Result<f64> {
        Ok(match self.typed(name, TypeTag::Double)? {
            Some(Value::Double(v)) => *v,
            _ => default,
        })
    }

    /// Reference field value
    pub fn get_object(&self, name: &str, default: Value) -> Result<Value> {
        Ok(match self.typed(name, TypeTag::Object)? {
            Some(v) => v.clone(),
            None => default,
        })
    }

    /// Copy every field into `record` under this level's class name
    pub fn copy_into(&self, record: &mut Record) {
        for slot in &self.slots {
            let value = slot
                .value
                .clone()
                .unwrap_or_else(|| slot.tag.default_value());
            record.set_in(&self.class_name, &slot.name, value);
        }
    }
}

fn compatible(stream: TypeTag, local: TypeTag) -> bool {
    if stream.is_primitive() || local.is_primitive() {
        stream == local
    } else {
        true
    }
}

/// Field Sources of every level of an object under atomic construction.
///
/// Levels are ordered from the root ancestor down to the object's own class.
/// Lookups by bare name resolve to the most derived level that declares it.
pub struct AtomicFields<'a> {
    class_name: &'a str,
    levels: &'a [FieldSource],
    graph: &'a Graph,
}

impl<'a> AtomicFields<'a> {
    pub fn new(class_name: &'a str, levels: &'a [FieldSource], graph: &'a Graph) -> Self {
        Self {
            class_name,
            levels,
            graph,
        }
    }

    pub fn class_name(&self) -> &str {
        self.class_name
    }

    pub fn levels(&self) -> &[FieldSource] {
        self.levels
    }

    /// Fields declared by hierarchy level `class_name`
    pub fn level(&self, class_name: &str) -> Option<&FieldSource> {
        self.levels.iter().find(|l| l.class_name() == class_name)
    }

    fn owner(&self, name: &str) -> Result<&FieldSource> {
        self.levels
            .iter()
            .rev()
            .find(|l| l.has_field(name))
            .ok_or_else(|| {
                CodecError::InvariantViolation(format!(
                    "no field {} in {}",
                    name, self.class_name
                ))
            })
    }

    pub fn defaulted(&self, name: &str) -> Result<bool> {
        self.owner(name)?.defaulted(name)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool> {
        self.owner(name)?.get_bool(name, default)
    }

    pub fn get_i8(&self, name: &str, default: i8) -> Result<i8> {
        self.owner(name)?.get_i8(name, default)
    }

    pub fn get_char(&self, name: &str, default: u16) -> Result<u16> {
        self.owner(name)?.get_char(name, default)
    }

    pub fn get_i16(&self, name: &str, default: i16) -> Result<i16> {
        self.owner(name)?.get_i16(name, default)
    }

    pub fn get_i32(&self, name: &str, default: i32) -> Result<i32> {
        self.owner(name)?.get_i32(name, default)
    }

    pub fn get_i64(&self, name: &str, default: i64) -> Result<i64> {
        self.owner(name)?.get_i64(name, default)
    }

    pub fn get_f32(&self, name: &str, default: f32) -> Result<f32> {
        self.owner(name)?.get_f32(name, default)
    }

    pub fn get_f64(&self, name: &str, default: f64) -> Result<f64> {
        self.owner(name)?.get_f64(name, default)
    }

    pub fn get_object(&self, name: &str, default: Value) -> Result<Value> {
        self.owner(name)?.get_object(name, default)
    }

    /// Reference field value that must be `Null` or an instance of `class_name`
    pub fn get_object_as(&self, name: &str, class_name: &str, default: Value) -> Result<Value> {
        let value = self.get_object(name, default)?;
        if self.graph.is_instance(&value, class_name) {
            Ok(value)
        } else {
            Err(CodecError::InvariantViolation(format!(
                "field {}.{} holds a {} where {} is required",
                self.class_name,
                name,
                value.kind_name(),
                class_name
            )))
        }
    }

    /// String field value
    pub fn get_str(&self, name: &str) -> Result<Option<Arc<str>>> {
        match self.get_object(name, Value::Null)? {
            Value::Null => Ok(None),
            Value::Str(s) => Ok(Some(s)),
            other => Err(CodecError::InvariantViolation(format!(
                "field {}.{} holds a {} where a string is required",
                self.class_name,
                name,
                other.kind_name()
            ))),
        }
    }

    /// Finished object behind a reference; `None` for null, pending or discarded targets
    pub fn deref(&self, value: &Value) -> Option<&Object> {
        self.graph.deref(value)
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Record holding every field, each tagged with its declaring level
    pub fn to_record(&self) -> Record {
        let mut record = Record::new(self.class_name);
        for level in self.levels {
            level.copy_into(&mut record);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::FieldSpec;

    fn schemas() -> (FieldSchema, FieldSchema) {
        let local = FieldSchema::sorted(&[
            FieldSpec::int("x"),
            FieldSpec::int("y"),
            FieldSpec::any("tag"),
        ])
        .unwrap_or_default();
        let stream = FieldSchema::sorted(&[
            FieldSpec::int("x"),
            FieldSpec::long("extra"),
            FieldSpec::any("tag"),
        ])
        .unwrap_or_default();
        (local, stream)
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_reconcile_defaults_missing_and_drops_extra() {
        let (local, stream) = schemas();
        // stream order: extra, x, tag
        let values = vec![Value::Long(9), Value::Int(3), Value::str("t")];
        let source = FieldSource::reconcile(Arc::from("demo.P"), &local, &stream, &values).unwrap();

        assert_eq!(source.get_i32("x", -1).unwrap(), 3);
        assert!(!source.defaulted("x").unwrap());
        assert_eq!(source.get_i32("y", -1).unwrap(), -1);
        assert!(source.defaulted("y").unwrap());
        assert_eq!(source.get_object("tag", Value::Null).unwrap(), Value::str("t"));
        assert!(source.get_i64("extra", 0).is_err());
    }

    #[test]
    fn test_reconcile_rejects_type_change() {
        let local = FieldSchema::sorted(&[FieldSpec::int("x")]).unwrap_or_default();
        let stream = FieldSchema::sorted(&[FieldSpec::long("x")]).unwrap_or_default();
        let result = FieldSource::reconcile(Arc::from("demo.P"), &local, &stream, &[Value::Long(1)]);
        assert!(matches!(result, Err(CodecError::IncompatibleClass(_))));
    }

    #[test]
    fn test_wrong_getter_is_rejected() {
        let local = FieldSchema::sorted(&[FieldSpec::int("x")]).unwrap_or_default();
        let source = FieldSource::defaults(Arc::from("demo.P"), &local);
        assert!(source.get_i64("x", 0).is_err());
        assert!(source.get_object("x", Value::Null).is_err());
        assert!(source.get_i32("missing", 0).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_atomic_fields_prefer_leaf_level() {
        let schema = FieldSchema::sorted(&[FieldSpec::int("id")]).unwrap();
        let base = FieldSource::reconcile(
            Arc::from("demo.Base"),
            &schema,
            &schema,
            &[Value::Int(1)],
        )
        .unwrap();
        let leaf = FieldSource::reconcile(
            Arc::from("demo.Leaf"),
            &schema,
            &schema,
            &[Value::Int(2)],
        )
        .unwrap();
        let levels = vec![base, leaf];
        let graph = Graph::new();
        let fields = AtomicFields::new("demo.Leaf", &levels, &graph);

        assert_eq!(fields.get_i32("id", 0).unwrap(), 2);
        assert_eq!(
            fields.level("demo.Base").unwrap().get_i32("id", 0).unwrap(),
            1
        );
        let record = fields.to_record();
        assert_eq!(record.get_in("demo.Base", "id"), Some(&Value::Int(1)));
        assert_eq!(record.get("id"), Some(&Value::Int(2)));
    }
}
