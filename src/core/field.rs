//! Field type tags and serializable field schemas.

use crate::core::graph::{Value, ANY_CLASS};
use crate::error::{constants, CodecError, Result};
use bytes::BufMut;
use std::collections::HashSet;
use std::sync::Arc;

/// Type code of a serializable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Object,
    Array,
}

impl TypeTag {
    pub fn code(self) -> u8 {
        match self {
            TypeTag::Byte => b'B',
            TypeTag::Char => b'C',
            TypeTag::Double => b'D',
            TypeTag::Float => b'F',
            TypeTag::Int => b'I',
            TypeTag::Long => b'J',
            TypeTag::Short => b'S',
            TypeTag::Boolean => b'Z',
            TypeTag::Object => b'L',
            TypeTag::Array => b'[',
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            b'B' => Ok(TypeTag::Byte),
            b'C' => Ok(TypeTag::Char),
            b'D' => Ok(TypeTag::Double),
            b'F' => Ok(TypeTag::Float),
            b'I' => Ok(TypeTag::Int),
            b'J' => Ok(TypeTag::Long),
            b'S' => Ok(TypeTag::Short),
            b'Z' => Ok(TypeTag::Boolean),
            b'L' => Ok(TypeTag::Object),
            b'[' => Ok(TypeTag::Array),
            other => Err(CodecError::StreamFraming(format!(
                "unknown field type code {other:#04x}"
            ))),
        }
    }

    pub fn is_primitive(self) -> bool {
        !matches!(self, TypeTag::Object | TypeTag::Array)
    }

    /// Encoded width of a primitive; zero for references
    pub fn width(self) -> usize {
        match self {
            TypeTag::Byte | TypeTag::Boolean => 1,
            TypeTag::Char | TypeTag::Short => 2,
            TypeTag::Int | TypeTag::Float => 4,
            TypeTag::Long | TypeTag::Double => 8,
            TypeTag::Object | TypeTag::Array => 0,
        }
    }

    /// Bytes an element of this type claims from the allocation budget
    pub fn claim_width(self) -> u64 {
        if self.is_primitive() {
            self.width() as u64
        } else {
            8
        }
    }

    /// Value a field of this type holds when the stream does not supply one
    pub fn default_value(self) -> Value {
        match self {
            TypeTag::Byte => Value::Byte(0),
            TypeTag::Char => Value::Char(0),
            TypeTag::Double => Value::Double(0.0),
            TypeTag::Float => Value::Float(0.0),
            TypeTag::Int => Value::Int(0),
            TypeTag::Long => Value::Long(0),
            TypeTag::Short => Value::Short(0),
            TypeTag::Boolean => Value::Bool(false),
            TypeTag::Object | TypeTag::Array => Value::Null,
        }
    }

    /// Decode one primitive from the start of `bytes`
    pub fn decode(self, bytes: &[u8]) -> Result<Value> {
        let need = self.width();
        if !self.is_primitive() || bytes.len() < need {
            return Err(CodecError::StreamFraming(format!(
                "primitive data too short for {}",
                self.code() as char
            )));
        }
        let mut b8 = [0u8; 8];
        b8[..need].copy_from_slice(&bytes[..need]);
        Ok(match self {
            TypeTag::Byte => Value::Byte(b8[0] as i8),
            TypeTag::Boolean => Value::Bool(b8[0] != 0),
            TypeTag::Char => Value::Char(u16::from_be_bytes([b8[0], b8[1]])),
            TypeTag::Short => Value::Short(i16::from_be_bytes([b8[0], b8[1]])),
            TypeTag::Int => Value::Int(i32::from_be_bytes([b8[0], b8[1], b8[2], b8[3]])),
            TypeTag::Float => {
                Value::Float(f32::from_bits(u32::from_be_bytes([b8[0], b8[1], b8[2], b8[3]])))
            }
            TypeTag::Long => Value::Long(i64::from_be_bytes(b8)),
            TypeTag::Double => Value::Double(f64::from_bits(u64::from_be_bytes(b8))),
            TypeTag::Object | TypeTag::Array => Value::Null,
        })
    }

    /// Append a primitive; `Null` encodes the zero value
    pub fn encode<B: BufMut>(self, value: &Value, out: &mut B) -> Result<()> {
        match (self, value) {
            (_, Value::Null) if self.is_primitive() => {
                return self.encode(&self.default_value(), out)
            }
            (TypeTag::Byte, Value::Byte(v)) => out.put_i8(*v),
            (TypeTag::Boolean, Value::Bool(v)) => out.put_u8(u8::from(*v)),
            (TypeTag::Char, Value::Char(v)) => out.put_u16(*v),
            (TypeTag::Short, Value::Short(v)) => out.put_i16(*v),
            (TypeTag::Int, Value::Int(v)) => out.put_i32(*v),
            (TypeTag::Float, Value::Float(v)) => out.put_f32(*v),
            (TypeTag::Long, Value::Long(v)) => out.put_i64(*v),
            (TypeTag::Double, Value::Double(v)) => out.put_f64(*v),
            (tag, other) => {
                return Err(CodecError::InvariantViolation(format!(
                    "{} value stored in field of type {}",
                    other.kind_name(),
                    tag.code() as char
                )))
            }
        }
        Ok(())
    }
}

/// Declaration of one serializable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: Arc<str>,
    pub tag: TypeTag,
    /// Declared class of a reference field
    pub type_name: Option<Arc<str>>,
    pub unshared: bool,
}

impl FieldSpec {
    pub fn primitive(name: &str, tag: TypeTag) -> Self {
        Self {
            name: Arc::from(name),
            tag,
            type_name: None,
            unshared: false,
        }
    }

    pub fn boolean(name: &str) -> Self {
        Self::primitive(name, TypeTag::Boolean)
    }

    pub fn byte(name: &str) -> Self {
        Self::primitive(name, TypeTag::Byte)
    }

    pub fn char(name: &str) -> Self {
        Self::primitive(name, TypeTag::Char)
    }

    pub fn short(name: &str) -> Self {
        Self::primitive(name, TypeTag::Short)
    }

    pub fn int(name: &str) -> Self {
        Self::primitive(name, TypeTag::Int)
    }

    pub fn long(name: &str) -> Self {
        Self::primitive(name, TypeTag::Long)
    }

    pub fn float(name: &str) -> Self {
        Self::primitive(name, TypeTag::Float)
    }

    pub fn double(name: &str) -> Self {
        Self::primitive(name, TypeTag::Double)
    }

    /// Reference field declared with class `type_name`
    pub fn object(name: &str, type_name: &str) -> Self {
        let tag = if type_name.starts_with('[') {
            TypeTag::Array
        } else {
            TypeTag::Object
        };
        Self {
            name: Arc::from(name),
            tag,
            type_name: Some(Arc::from(type_name)),
            unshared: false,
        }
    }

    /// Reference field accepting any value
    pub fn any(name: &str) -> Self {
        Self::object(name, ANY_CLASS)
    }

    pub fn unshared(mut self) -> Self {
        self.unshared = true;
        self
    }

    pub fn is_primitive(&self) -> bool {
        self.tag.is_primitive()
    }
}

/// A field with its position in the encoded layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDesc {
    pub spec: FieldSpec,
    /// Byte offset for primitives, reference index for references
    pub offset: usize,
}

/// Ordered field layout of one hierarchy level.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSchema {
    fields: Vec<FieldDesc>,
    prim_data_size: usize,
    num_refs: usize,
}

impl FieldSchema {
    /// Layout for local declarations: primitives first, each group sorted by name
    pub fn sorted(specs: &[FieldSpec]) -> Result<Self> {
        let mut ordered = specs.to_vec();
        ordered.sort_by(|a, b| {
            b.is_primitive()
                .cmp(&a.is_primitive())
                .then_with(|| a.name.cmp(&b.name))
        });
        Self::from_stream(ordered)
    }

    /// Layout exactly as a descriptor lists it
    pub fn from_stream(specs: Vec<FieldSpec>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(specs.len());
        let mut fields = Vec::with_capacity(specs.len());
        let mut prim_data_size = 0usize;
        let mut num_refs = 0usize;
        let mut refs_started = false;

        for spec in specs {
            if !seen.insert(spec.name.clone()) {
                return Err(CodecError::StreamFraming(format!(
                    "{}: {}",
                    constants::ERR_DUPLICATE_FIELD,
                    spec.name
                )));
            }
            let offset = if spec.is_primitive() {
                if refs_started {
                    return Err(CodecError::StreamFraming(
                        constants::ERR_FIELD_ORDER.to_string(),
                    ));
                }
                let at = prim_data_size;
                prim_data_size += spec.tag.width();
                at
            } else {
                refs_started = true;
                num_refs += 1;
                num_refs - 1
            };
            fields.push(FieldDesc { spec, offset });
        }

        Ok(Self {
            fields,
            prim_data_size,
            num_refs,
        })
    }

    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn prim_data_size(&self) -> usize {
        self.prim_data_size
    }

    pub fn num_refs(&self) -> usize {
        self.num_refs
    }

    pub fn get(&self, name: &str) -> Option<&FieldDesc> {
        self.fields.iter().find(|f| &*f.spec.name == name)
    }

    pub fn primitives(&self) -> impl Iterator<Item = &FieldDesc> {
        self.fields.iter().filter(|f| f.spec.is_primitive())
    }

    pub fn references(&self) -> impl Iterator<Item = &FieldDesc> {
        self.fields.iter().filter(|f| !f.spec.is_primitive())
    }

    /// Decode the primitive block of this level
    pub fn decode_primitives(&self, data: &[u8]) -> Result<Vec<Value>> {
        self.primitives()
            .map(|f| f.spec.tag.decode(&data[f.offset.min(data.len())..]))
            .collect()
    }

    /// Bytes claimed from the budget by one instance of this level
    pub fn claim(&self) -> u64 {
        self.prim_data_size as u64 + 8 * self.num_refs as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_sorted_layout() {
        let schema = FieldSchema::sorted(&[
            FieldSpec::any("next"),
            FieldSpec::long("b"),
            FieldSpec::int("a"),
            FieldSpec::object("label", "object_wire.String"),
        ])
        .unwrap();
        let names: Vec<&str> = schema.fields().iter().map(|f| &*f.spec.name).collect();
        assert_eq!(names, ["a", "b", "label", "next"]);
        assert_eq!(schema.prim_data_size(), 12);
        assert_eq!(schema.num_refs(), 2);
        assert_eq!(schema.get("b").map(|f| f.offset), Some(4));
        assert_eq!(schema.get("next").map(|f| f.offset), Some(1));
    }

    #[test]
    fn test_stream_order_enforced() {
        let err = FieldSchema::from_stream(vec![FieldSpec::any("r"), FieldSpec::int("p")]);
        assert!(matches!(err, Err(CodecError::StreamFraming(_))));
        let dup = FieldSchema::from_stream(vec![FieldSpec::int("x"), FieldSpec::long("x")]);
        assert!(dup.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_primitive_codec() {
        let schema =
            FieldSchema::sorted(&[FieldSpec::int("i"), FieldSpec::double("d"), FieldSpec::boolean("z")])
                .unwrap();
        let mut buf = BytesMut::new();
        for f in schema.primitives() {
            let value = match f.spec.tag {
                TypeTag::Int => Value::Int(-7),
                TypeTag::Double => Value::Double(2.5),
                _ => Value::Bool(true),
            };
            f.spec.tag.encode(&value, &mut buf).unwrap();
        }
        assert_eq!(buf.len(), schema.prim_data_size());
        let values = schema.decode_primitives(&buf).unwrap();
        assert_eq!(values, vec![Value::Double(2.5), Value::Int(-7), Value::Bool(true)]);
    }

    #[test]
    fn test_encode_rejects_wrong_variant() {
        let mut buf = BytesMut::new();
        assert!(TypeTag::Int.encode(&Value::Long(1), &mut buf).is_err());
        assert!(TypeTag::Int.encode(&Value::Null, &mut buf).is_ok());
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_array_field_tag() {
        assert_eq!(FieldSpec::object("xs", "[I").tag, TypeTag::Array);
        assert_eq!(TypeTag::Array.claim_width(), 8);
    }
}
