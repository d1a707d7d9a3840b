//! # Object Graph
//!
//! Decoded values live in a [`Graph`] arena and refer to each other through
//! [`ObjRef`] indices, which is how shared and cyclic structure is expressed
//! without reference counting cycles.
//!
//! A slot is reserved before an object's fields are read so that
//! back-references taken during the read point at the right index. The slot
//! becomes usable only once construction completes; a slot whose object was
//! denied or failed is discarded and never yields an object.

use crate::error::{CodecError, Result};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Class name every reference value is an instance of
pub const ANY_CLASS: &str = "object_wire.Any";

/// Class name of string values
pub const STRING_CLASS: &str = "object_wire.String";

/// Class name reported for class literal objects
pub const CLASS_CLASS: &str = "object_wire.Class";

/// Class name reported for proxy instances
pub const PROXY_CLASS: &str = "object_wire.Proxy";

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Index of an object slot in a [`Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(usize);

impl ObjRef {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A single decoded or to-be-encoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Ref(ObjRef),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_ref(&self) -> Option<ObjRef> {
        match self {
            Value::Ref(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Char(_) => "char",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Ref(_) => "reference",
        }
    }

    fn same_scalar(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<ObjRef> for Value {
    fn from(r: ObjRef) -> Self {
        Value::Ref(r)
    }
}

/// One named field of a [`Record`], tagged with the hierarchy level that declares it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    pub owner: Arc<str>,
    pub name: Arc<str>,
    pub value: Value,
}

/// Instance of a class type.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    class_name: Arc<str>,
    fields: Vec<RecordField>,
}

impl Record {
    pub fn new(class_name: impl Into<Arc<str>>) -> Self {
        Self {
            class_name: class_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    /// Set a field declared by the record's own class
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let owner = self.class_name.clone();
        self.set_in(&owner, name, value);
    }

    /// Set a field declared by hierarchy level `owner`
    pub fn set_in(&mut self, owner: &str, name: &str, value: impl Into<Value>) {
        let value = value.into();
        if let Some(existing) = self
            .fields
            .iter_mut()
            .find(|f| &*f.owner == owner && &*f.name == name)
        {
            existing.value = value;
            return;
        }
        self.fields.push(RecordField {
            owner: Arc::from(owner),
            name: Arc::from(name),
            value,
        });
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Field by name, preferring the most derived declaration
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.get_in(&self.class_name, name).or_else(|| {
            self.fields
                .iter()
                .rev()
                .find(|f| &*f.name == name)
                .map(|f| &f.value)
        })
    }

    /// Field declared by hierarchy level `owner`
    pub fn get_in(&self, owner: &str, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|f| &*f.owner == owner && &*f.name == name)
            .map(|f| &f.value)
    }
}

/// Element storage of an [`Array`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Byte(Bytes),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Ref(Vec<Value>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::Byte(v) => v.len(),
            ArrayData::Char(v) => v.len(),
            ArrayData::Short(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::Long(v) => v.len(),
            ArrayData::Float(v) => v.len(),
            ArrayData::Double(v) => v.len(),
            ArrayData::Ref(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn same_primitives(&self, other: &ArrayData) -> bool {
        match (self, other) {
            (ArrayData::Float(a), ArrayData::Float(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (ArrayData::Double(a), ArrayData::Double(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            _ => self == other,
        }
    }
}

/// Array instance; `class_name` is the array signature such as `[I` or `[Ldemo.Node;`.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    class_name: Arc<str>,
    data: ArrayData,
}

impl Array {
    /// Array of primitives or of `object_wire.Any` references
    pub fn new(data: ArrayData) -> Self {
        let class_name = match &data {
            ArrayData::Bool(_) => "[Z".to_string(),
            ArrayData::Byte(_) => "[B".to_string(),
            ArrayData::Char(_) => "[C".to_string(),
            ArrayData::Short(_) => "[S".to_string(),
            ArrayData::Int(_) => "[I".to_string(),
            ArrayData::Long(_) => "[J".to_string(),
            ArrayData::Float(_) => "[F".to_string(),
            ArrayData::Double(_) => "[D".to_string(),
            ArrayData::Ref(_) => format!("[L{ANY_CLASS};"),
        };
        Self {
            class_name: Arc::from(class_name),
            data,
        }
    }

    /// Reference array whose declared component class is `component`
    pub fn of_refs(component: &str, values: Vec<Value>) -> Self {
        let class_name = if component.starts_with('[') {
            format!("[{component}")
        } else {
            format!("[L{component};")
        };
        Self {
            class_name: Arc::from(class_name),
            data: ArrayData::Ref(values),
        }
    }

    pub(crate) fn from_parts(class_name: Arc<str>, data: ArrayData) -> Self {
        Self { class_name, data }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn refs(&self) -> Option<&[Value]> {
        match &self.data {
            ArrayData::Ref(v) => Some(v),
            _ => None,
        }
    }
}

/// Enum constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub class_name: Arc<str>,
    pub constant: Arc<str>,
}

/// Throwable value; substituted by a surrogate on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: String,
    pub message: Option<String>,
    pub cause: Value,
}

/// Permission value; substituted by a surrogate on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub kind: String,
    pub name: String,
    pub actions: Option<String>,
}

/// Dynamic proxy instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Proxy {
    pub interfaces: Vec<String>,
    pub handler: Value,
}

/// Heap object stored in a [`Graph`] slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Record(Record),
    Array(Array),
    Enum(EnumValue),
    Class(Arc<str>),
    List(Vec<Value>),
    Set(Vec<Value>),
    Collection(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Failure(Failure),
    Permission(Permission),
    Proxy(Proxy),
}

impl Object {
    /// Class name the object reports for type checks
    pub fn class_name(&self) -> &str {
        match self {
            Object::Record(r) => r.class_name(),
            Object::Array(a) => a.class_name(),
            Object::Enum(e) => &e.class_name,
            Object::Class(_) => CLASS_CLASS,
            Object::List(_) => "object_wire.List",
            Object::Set(_) => "object_wire.Set",
            Object::Collection(_) => "object_wire.Collection",
            Object::Map(_) => "object_wire.Map",
            Object::Failure(_) => "object_wire.Failure",
            Object::Permission(_) => "object_wire.Permission",
            Object::Proxy(_) => PROXY_CLASS,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Object::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Reference-bearing values held directly by this object
    fn children(&self) -> Vec<Value> {
        match self {
            Object::Record(r) => r.fields.iter().map(|f| f.value.clone()).collect(),
            Object::Array(a) => a.refs().map(<[Value]>::to_vec).unwrap_or_default(),
            Object::Enum(_) | Object::Class(_) | Object::Permission(_) => Vec::new(),
            Object::List(v) | Object::Set(v) | Object::Collection(v) => v.clone(),
            Object::Map(entries) => entries
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect(),
            Object::Failure(f) => vec![f.cause.clone()],
            Object::Proxy(p) => vec![p.handler.clone()],
        }
    }

    /// Same variant and same non-reference content
    fn same_header(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Record(a), Object::Record(b)) => {
                a.class_name == b.class_name
                    && a.fields.len() == b.fields.len()
                    && a.fields
                        .iter()
                        .zip(&b.fields)
                        .all(|(x, y)| x.owner == y.owner && x.name == y.name)
            }
            (Object::Array(a), Object::Array(b)) => {
                a.class_name == b.class_name
                    && match (&a.data, &b.data) {
                        (ArrayData::Ref(x), ArrayData::Ref(y)) => x.len() == y.len(),
                        (x, y) => x.same_primitives(y),
                    }
            }
            (Object::Enum(a), Object::Enum(b)) => a == b,
            (Object::Class(a), Object::Class(b)) => a == b,
            (Object::List(a), Object::List(b))
            | (Object::Set(a), Object::Set(b))
            | (Object::Collection(a), Object::Collection(b)) => a.len() == b.len(),
            (Object::Map(a), Object::Map(b)) => a.len() == b.len(),
            (Object::Failure(a), Object::Failure(b)) => {
                a.kind == b.kind && a.message == b.message
            }
            (Object::Permission(a), Object::Permission(b)) => a == b,
            (Object::Proxy(a), Object::Proxy(b)) => a.interfaces == b.interfaces,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Ready(Object),
    Alias(Value),
    Discarded,
}

#[derive(Debug, Clone)]
struct Entry {
    /// Class names this slot is an instance of, most derived first
    lineage: Arc<[Arc<str>]>,
    slot: Slot,
}

/// Arena of objects addressed by [`ObjRef`].
#[derive(Debug)]
pub struct Graph {
    id: u64,
    entries: Vec<Entry>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            entries: Vec::new(),
        }
    }

    /// Process-unique identity of this arena
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store a finished object
    pub fn insert(&mut self, object: Object) -> ObjRef {
        let lineage: Arc<[Arc<str>]> = Arc::from(vec![Arc::<str>::from(object.class_name())]);
        self.entries.push(Entry {
            lineage,
            slot: Slot::Ready(object),
        });
        ObjRef(self.entries.len() - 1)
    }

    /// Reserve a slot to be filled later; used to build cycles
    pub fn reserve(&mut self, class_name: &str) -> ObjRef {
        self.reserve_with_lineage(Arc::from(vec![Arc::<str>::from(class_name)]))
    }

    pub(crate) fn reserve_with_lineage(&mut self, lineage: Arc<[Arc<str>]>) -> ObjRef {
        self.entries.push(Entry {
            lineage,
            slot: Slot::Pending,
        });
        ObjRef(self.entries.len() - 1)
    }

    /// Complete a reserved slot
    pub fn fill(&mut self, r: ObjRef, object: Object) -> Result<()> {
        match self.entries.get_mut(r.0) {
            Some(entry) if matches!(entry.slot, Slot::Pending) => {
                entry.slot = Slot::Ready(object);
                Ok(())
            }
            Some(_) => Err(CodecError::IllegalReference(format!(
                "slot {} is not pending",
                r.0
            ))),
            None => Err(CodecError::IllegalReference(format!(
                "slot {} does not exist",
                r.0
            ))),
        }
    }

    /// Replace a pending slot with a substitute value
    pub(crate) fn alias(&mut self, r: ObjRef, value: Value) {
        if let Some(entry) = self.entries.get_mut(r.0) {
            entry.slot = Slot::Alias(value);
        }
    }

    /// Mark a slot as never usable
    pub(crate) fn discard(&mut self, r: ObjRef) {
        if let Some(entry) = self.entries.get_mut(r.0) {
            entry.slot = Slot::Discarded;
        }
    }

    /// Object behind `r`, following substitutions; `None` while pending or when discarded
    pub fn get(&self, r: ObjRef) -> Option<&Object> {
        match self.resolve(&Value::Ref(r)) {
            Value::Ref(target) => match &self.entries.get(target.0)?.slot {
                Slot::Ready(object) => Some(object),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut Object> {
        let target = match self.resolve(&Value::Ref(r)) {
            Value::Ref(target) => target,
            _ => return None,
        };
        match &mut self.entries.get_mut(target.0)?.slot {
            Slot::Ready(object) => Some(object),
            _ => None,
        }
    }

    /// Object referred to by `value`, if it is a usable reference
    pub fn deref(&self, value: &Value) -> Option<&Object> {
        value.as_ref().and_then(|r| self.get(r))
    }

    pub fn record(&self, value: &Value) -> Option<&Record> {
        self.deref(value).and_then(Object::as_record)
    }

    pub fn array(&self, value: &Value) -> Option<&Array> {
        self.deref(value).and_then(Object::as_array)
    }

    pub fn is_pending(&self, r: ObjRef) -> bool {
        matches!(
            self.entries.get(r.0).map(|e| &e.slot),
            Some(Slot::Pending)
        )
    }

    pub fn is_discarded(&self, r: ObjRef) -> bool {
        matches!(
            self.entries.get(r.0).map(|e| &e.slot),
            Some(Slot::Discarded)
        )
    }

    /// Follow substitutions until a non-substituted value is reached
    pub fn resolve(&self, value: &Value) -> Value {
        let mut current = value.clone();
        // substitution chains are acyclic by construction; the bound guards hostile hooks
        for _ in 0..=self.entries.len() {
            match &current {
                Value::Ref(r) => match self.entries.get(r.0).map(|e| &e.slot) {
                    Some(Slot::Alias(next)) => current = next.clone(),
                    _ => return current,
                },
                _ => return current,
            }
        }
        Value::Null
    }

    /// Whether `value` may be stored in a field declared with class `class_name`
    pub fn is_instance(&self, value: &Value, class_name: &str) -> bool {
        if class_name == ANY_CLASS {
            return !matches!(
                value,
                Value::Bool(_)
                    | Value::Byte(_)
                    | Value::Char(_)
                    | Value::Short(_)
                    | Value::Int(_)
                    | Value::Long(_)
                    | Value::Float(_)
                    | Value::Double(_)
            );
        }
        match self.resolve(value) {
            Value::Null => true,
            Value::Str(_) => class_name == STRING_CLASS,
            Value::Ref(r) => self
                .entries
                .get(r.0)
                .map(|e| match &e.slot {
                    Slot::Ready(object) if object.class_name() == class_name => true,
                    _ => e.lineage.iter().any(|c| &**c == class_name),
                })
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Compare two rooted graphs for equal topology and content.
    ///
    /// Sharing must correspond one to one: two references to the same object
    /// on one side must map to two references to the same object on the other.
    pub fn shape_eq(&self, root: &Value, other: &Graph, other_root: &Value) -> bool {
        let mut forward: HashMap<ObjRef, ObjRef> = HashMap::new();
        let mut backward: HashMap<ObjRef, ObjRef> = HashMap::new();
        let mut work: VecDeque<(Value, Value)> = VecDeque::new();
        work.push_back((root.clone(), other_root.clone()));

        while let Some((a, b)) = work.pop_front() {
            let a = self.resolve(&a);
            let b = other.resolve(&b);
            match (&a, &b) {
                (Value::Ref(ra), Value::Ref(rb)) => {
                    match (forward.get(ra), backward.get(rb)) {
                        (Some(x), Some(y)) if x == rb && y == ra => continue,
                        (None, None) => {
                            forward.insert(*ra, *rb);
                            backward.insert(*rb, *ra);
                        }
                        _ => return false,
                    }
                    let (oa, ob) = match (self.get(*ra), other.get(*rb)) {
                        (Some(oa), Some(ob)) => (oa, ob),
                        (None, None) => continue,
                        _ => return false,
                    };
                    if !oa.same_header(ob) {
                        return false;
                    }
                    for (ca, cb) in oa.children().into_iter().zip(ob.children()) {
                        work.push_back((ca, cb));
                    }
                }
                (Value::Ref(_), _) | (_, Value::Ref(_)) => return false,
                _ => {
                    if !a.same_scalar(&b) {
                        return false;
                    }
                }
            }
        }
        true
    }
}
