//! # Wire Writer
//!
//! Encoder that mirrors [`WireReader`](crate::core::reader::WireReader)
//! token for token. Values are taken from a [`Graph`]; object identity is
//! the [`ObjRef`], so shared references and cycles are written once and
//! referenced by handle afterwards.
//!
//! Lists, sets, collections, maps, failures and permissions are replaced by
//! their surrogate records. Their element lists travel as synthetic
//! `object_wire.Any[]` arrays that are never shared.
//!
//! Objects are encoded from an explicit action stack. Custom write routines
//! and externalizable routines recurse through [`ObjectOutput::write_value`],
//! bounded by `limits.max_depth`.
//!
//! When encoding fails after bytes of the value were produced, the writer
//! emits EXCEPTION followed by a failure surrogate so the reader surfaces
//! [`CodecError::WriteAborted`] and stays aligned.

use crate::config::{CodecConfig, STREAM_MAGIC, STREAM_VERSION};
use crate::core::descriptor::{array_component, ClassDescriptor, DescriptorCache};
use crate::core::graph::{Array, ArrayData, Failure, Graph, ObjRef, Object, Value, ANY_CLASS};
use crate::core::handles::{DescKey, HandleMap};
use crate::core::object_io::ObjectOutput;
use crate::core::surrogate::{builtin_type, surrogate_fields, surrogate_for, SurrogateValue};
use crate::core::token::Token;
use crate::core::types::{ProxyType, RuntimeType, Strategy, TypeResolver};
use crate::error::{constants, CodecError, Result};
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::mutf8;
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Largest chunk emitted in one block data token
const MAX_BLOCK_CHUNK: usize = crate::config::MAX_BLOCK_CHUNK;

/// One pending piece of output.
enum Action {
    /// Pre-encoded bytes, such as a level's primitive field data
    Raw(Bytes),
    Value { value: Value, unshared: bool },
    /// Inline `object_wire.Any[]` with an unrecorded handle
    Synthetic(Vec<Value>),
    /// Custom write routine of one hierarchy level
    Custom { ty: RuntimeType, obj: ObjRef },
    External { ty: RuntimeType, obj: ObjRef },
    EndBlock,
}

/// Encoder for one byte stream.
pub struct WireWriter<W: Write> {
    sink: W,
    buf: BytesMut,
    handles: HandleMap,
    registry: Arc<dyn TypeResolver>,
    cache: &'static DescriptorCache,
    graph_id: Option<u64>,
    max_depth: usize,
    max_descriptor_depth: usize,
    depth: usize,
}

impl<W: Write> WireWriter<W> {
    /// Start a stream by writing its header
    pub fn new(sink: W, registry: Arc<dyn TypeResolver>, config: &CodecConfig) -> Result<Self> {
        config.validate_strict()?;
        let mut this = Self {
            sink,
            buf: BytesMut::with_capacity(4096),
            handles: HandleMap::new(config.limits.max_handles),
            registry,
            cache: DescriptorCache::global(),
            graph_id: None,
            max_depth: config.limits.max_depth,
            max_descriptor_depth: config.limits.max_descriptor_depth,
            depth: 0,
        };
        this.buf.put_u16(STREAM_MAGIC);
        this.buf.put_u16(STREAM_VERSION);
        this.flush_buf()?;
        Ok(this)
    }

    pub fn with_defaults(sink: W, registry: Arc<dyn TypeResolver>) -> Result<Self> {
        Self::new(sink, registry, &CodecConfig::default())
    }

    /// Write `value` and everything reachable from it
    #[instrument(skip(self, graph, value), level = "debug")]
    pub fn write_value(&mut self, graph: &Graph, value: &Value) -> Result<()> {
        self.write_top(graph, value, false)
    }

    /// Write `value` as a fresh copy that can never be back-referenced
    #[instrument(skip(self, graph, value), level = "debug")]
    pub fn write_unshared(&mut self, graph: &Graph, value: &Value) -> Result<()> {
        self.write_top(graph, value, true)
    }

    /// Forget every handle; the next value starts from the base handle again
    pub fn reset(&mut self) -> Result<()> {
        self.buf.put_u8(Token::Reset.byte());
        self.handles.clear();
        self.graph_id = None;
        global_metrics().reset();
        debug!("writer reset");
        self.flush_buf()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.flush_buf()?;
        self.sink.flush()?;
        Ok(())
    }

    /// Handles assigned since the last reset
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.sink)
    }

    fn write_top(&mut self, graph: &Graph, value: &Value, unshared: bool) -> Result<()> {
        match self.graph_id {
            Some(id) if id != graph.id() && !self.handles.is_empty() => {
                return Err(CodecError::InvariantViolation(
                    "value belongs to a different graph; reset the writer first".into(),
                ))
            }
            _ => self.graph_id = Some(graph.id()),
        }

        let _timer = Timer::start("write_value");
        let start = self.buf.len();
        self.depth = 0;
        let root = Action::Value {
            value: value.clone(),
            unshared,
        };
        match self.encode(graph, root) {
            Ok(()) => {
                global_metrics().value_encoded();
                self.flush_buf()
            }
            Err(err) => {
                self.depth = 0;
                if self.buf.len() > start {
                    self.abort_value(&err)?;
                }
                self.flush_buf()?;
                Err(err)
            }
        }
    }

    /// Replace the rest of a half-written value with a failure report
    fn abort_value(&mut self, err: &CodecError) -> Result<()> {
        warn!(error = %err, "aborting partially written value");
        self.buf.put_u8(Token::Exception.byte());
        self.handles.clear();
        let mut report = Graph::new();
        let failure = report.insert(Object::Failure(Failure {
            kind: format!("{:?}", err.kind()),
            message: Some(err.to_string()),
            cause: Value::Null,
        }));
        self.encode(
            &report,
            Action::Value {
                value: Value::Ref(failure),
                unshared: false,
            },
        )?;
        self.handles.clear();
        self.graph_id = None;
        Ok(())
    }

    fn flush_buf(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.sink.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Nested write on behalf of a routine; bounded by `max_depth`
    fn write_nested(&mut self, graph: &Graph, value: Value, unshared: bool) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(CodecError::ResourceExhaustion(format!(
                "{} ({})",
                constants::ERR_DEPTH_LIMIT,
                self.max_depth
            )));
        }
        self.depth += 1;
        let result = self.encode(graph, Action::Value { value, unshared });
        self.depth -= 1;
        result
    }

    fn encode(&mut self, graph: &Graph, root: Action) -> Result<()> {
        let mut stack = vec![root];
        while let Some(action) = stack.pop() {
            match action {
                Action::Raw(bytes) => self.buf.put_slice(&bytes),
                Action::Value { value, unshared } => {
                    self.write_value_token(graph, &value, unshared, &mut stack)?
                }
                Action::Synthetic(values) => self.write_synthetic(values, &mut stack)?,
                Action::Custom { ty, obj } => self.run_routine(graph, &ty, obj, false)?,
                Action::External { ty, obj } => self.run_routine(graph, &ty, obj, true)?,
                Action::EndBlock => self.buf.put_u8(Token::EndBlock.byte()),
            }
        }
        Ok(())
    }

    fn write_value_token(
        &mut self,
        graph: &Graph,
        value: &Value,
        unshared: bool,
        stack: &mut Vec<Action>,
    ) -> Result<()> {
        match graph.resolve(value) {
            Value::Null => {
                self.buf.put_u8(Token::Null.byte());
                Ok(())
            }
            Value::Str(s) => self.write_string(&s, unshared),
            Value::Ref(r) => self.write_object(graph, r, unshared, stack),
            other => Err(CodecError::InvariantViolation(format!(
                "{} cannot be written as a value",
                other.kind_name()
            ))),
        }
    }

    fn write_string(&mut self, s: &Arc<str>, unshared: bool) -> Result<()> {
        if !unshared {
            if let Some(handle) = self.handles.string(s) {
                self.put_handle_ref(handle);
                return Ok(());
            }
        }
        let encoded = mutf8::encode(s);
        if encoded.len() <= usize::from(u16::MAX) {
            self.buf.put_u8(Token::NewString.byte());
            self.buf.put_u16(encoded.len() as u16);
        } else {
            self.buf.put_u8(Token::NewLongString.byte());
            self.buf.put_u64(encoded.len() as u64);
        }
        self.buf.put_slice(&encoded);
        if unshared {
            self.handles.assign()?;
        } else {
            self.handles.assign_string(s)?;
        }
        Ok(())
    }

    fn put_handle_ref(&mut self, handle: u32) {
        self.buf.put_u8(Token::HandleRef.byte());
        self.buf.put_u32(handle);
    }

    fn assign_object(&mut self, r: ObjRef, unshared: bool) -> Result<u32> {
        if unshared {
            self.handles.assign()
        } else {
            self.handles.assign_object(r)
        }
    }

    fn write_object(
        &mut self,
        graph: &Graph,
        r: ObjRef,
        unshared: bool,
        stack: &mut Vec<Action>,
    ) -> Result<()> {
        if !unshared {
            if let Some(handle) = self.handles.object(r) {
                self.put_handle_ref(handle);
                return Ok(());
            }
        }
        if graph.is_discarded(r) {
            self.buf.put_u8(Token::Null.byte());
            return Ok(());
        }
        let object = graph.get(r).ok_or_else(|| {
            CodecError::InvariantViolation(format!("object {} is not ready", r.index()))
        })?;

        match object {
            Object::Array(array) => self.write_array(array, r, unshared, stack),
            Object::Enum(e) => {
                let ty = self
                    .registry
                    .lookup(&e.class_name)
                    .filter(|t| t.strategy() == Strategy::Enum)
                    .ok_or_else(|| {
                        CodecError::TypeResolution(format!("no enum type {}", e.class_name))
                    })?;
                if !ty.enum_constants().iter().any(|c| **c == *e.constant) {
                    return Err(CodecError::InvariantViolation(format!(
                        "{} is not a constant of {}",
                        e.constant, e.class_name
                    )));
                }
                let desc = self.cache.lookup(&ty, self.max_descriptor_depth)?;
                self.buf.put_u8(Token::NewEnum.byte());
                self.write_class_desc(&desc)?;
                self.assign_object(r, unshared)?;
                stack.push(Action::Value {
                    value: Value::Str(e.constant.clone()),
                    unshared: false,
                });
                Ok(())
            }
            Object::Class(name) => {
                let desc = match self.registry.lookup(name) {
                    Some(ty) => self.cache.lookup(&ty, self.max_descriptor_depth)?,
                    None if name.starts_with('[') => Arc::new(ClassDescriptor::array(name)?),
                    None => {
                        return Err(CodecError::TypeResolution(format!(
                            "no registered type {name}"
                        )))
                    }
                };
                self.buf.put_u8(Token::NewClass.byte());
                self.write_class_desc(&desc)?;
                self.assign_object(r, unshared)?;
                Ok(())
            }
            Object::Record(record) => {
                let ty = self.registry.lookup(record.class_name()).ok_or_else(|| {
                    CodecError::TypeResolution(format!(
                        "no registered type {}",
                        record.class_name()
                    ))
                })?;
                let desc = self.cache.lookup(&ty, self.max_descriptor_depth)?;
                if desc.flags().is_enum() {
                    return Err(CodecError::InvariantViolation(format!(
                        "record of enum type {}",
                        desc.name()
                    )));
                }
                let actions = if ty.strategy() == Strategy::Externalizable {
                    vec![Action::External { ty, obj: r }, Action::EndBlock]
                } else {
                    let mut levels = Vec::new();
                    let mut next = Some(ty);
                    while let Some(level) = next {
                        next = level.superclass();
                        levels.push(level);
                    }
                    levels.reverse();
                    let mut actions = Vec::new();
                    for (level_ty, level) in levels.into_iter().zip(desc.chain()) {
                        actions.extend(level_actions(&level, |name| {
                            record
                                .get_in(level.name(), name)
                                .or_else(|| record.get(name))
                                .cloned()
                        })?);
                        if level.flags().has_write_method() {
                            actions.push(Action::Custom {
                                ty: level_ty,
                                obj: r,
                            });
                            actions.push(Action::EndBlock);
                        }
                    }
                    actions
                };
                self.begin_object(&desc, r, unshared, actions, stack)
            }
            Object::Proxy(proxy) => {
                let proxy_ty = ProxyType::new(&proxy.interfaces);
                let desc = self.cache.lookup(&proxy_ty, self.max_descriptor_depth)?;
                let mut actions = Vec::new();
                for level in desc.chain() {
                    actions.extend(level_actions(&level, |name| {
                        (name == "handler").then(|| proxy.handler.clone())
                    })?);
                }
                self.begin_object(&desc, r, unshared, actions, stack)
            }
            other => {
                let (spec, fields) = surrogate_for(other)
                    .zip(surrogate_fields(other))
                    .ok_or_else(|| {
                        CodecError::InvariantViolation(format!(
                            "{} has no wire form",
                            other.class_name()
                        ))
                    })?;
                let ty = builtin_type(spec.kind).ok_or_else(|| {
                    CodecError::TypeResolution(format!("no surrogate type {}", spec.class_name))
                })?;
                let desc = self.cache.lookup(&ty, self.max_descriptor_depth)?;
                let mut actions = Vec::new();
                for field in desc.schema().references() {
                    let value = fields
                        .iter()
                        .find(|(name, _)| *name == &*field.spec.name)
                        .map(|(_, v)| v.clone())
                        .unwrap_or(SurrogateValue::Value(Value::Null));
                    actions.push(match value {
                        SurrogateValue::Value(value) => Action::Value {
                            value,
                            unshared: false,
                        },
                        SurrogateValue::Array(values) => Action::Synthetic(values),
                    });
                }
                self.begin_object(&desc, r, unshared, actions, stack)
            }
        }
    }

    fn begin_object(
        &mut self,
        desc: &Arc<ClassDescriptor>,
        r: ObjRef,
        unshared: bool,
        actions: Vec<Action>,
        stack: &mut Vec<Action>,
    ) -> Result<()> {
        self.buf.put_u8(Token::NewObject.byte());
        self.write_class_desc(desc)?;
        self.assign_object(r, unshared)?;
        stack.extend(actions.into_iter().rev());
        Ok(())
    }

    fn write_array(
        &mut self,
        array: &Array,
        r: ObjRef,
        unshared: bool,
        stack: &mut Vec<Action>,
    ) -> Result<()> {
        let component = array_component(array.class_name())?;
        let matches = match array.data() {
            ArrayData::Ref(_) => !component.is_primitive(),
            data => primitive_tag(data) == Some(component),
        };
        if !matches {
            return Err(CodecError::InvariantViolation(format!(
                "array {} holds elements of another type",
                array.class_name()
            )));
        }
        let len = i32::try_from(array.len()).map_err(|_| {
            CodecError::InvariantViolation(format!("array of {} elements", array.len()))
        })?;
        let desc = Arc::new(ClassDescriptor::array(array.class_name())?);

        self.buf.put_u8(Token::NewArray.byte());
        self.write_class_desc(&desc)?;
        self.assign_object(r, unshared)?;
        self.buf.put_i32(len);
        match array.data() {
            ArrayData::Bool(v) => v.iter().for_each(|b| self.buf.put_u8(u8::from(*b))),
            ArrayData::Byte(v) => self.buf.put_slice(v),
            ArrayData::Char(v) => v.iter().for_each(|c| self.buf.put_u16(*c)),
            ArrayData::Short(v) => v.iter().for_each(|s| self.buf.put_i16(*s)),
            ArrayData::Int(v) => v.iter().for_each(|i| self.buf.put_i32(*i)),
            ArrayData::Long(v) => v.iter().for_each(|l| self.buf.put_i64(*l)),
            ArrayData::Float(v) => v.iter().for_each(|f| self.buf.put_f32(*f)),
            ArrayData::Double(v) => v.iter().for_each(|d| self.buf.put_f64(*d)),
            ArrayData::Ref(values) => stack.extend(values.iter().rev().map(|v| Action::Value {
                value: v.clone(),
                unshared: false,
            })),
        }
        Ok(())
    }

    fn write_synthetic(&mut self, values: Vec<Value>, stack: &mut Vec<Action>) -> Result<()> {
        let len = i32::try_from(values.len()).map_err(|_| {
            CodecError::InvariantViolation(format!("surrogate of {} elements", values.len()))
        })?;
        let desc = Arc::new(ClassDescriptor::array(&format!("[L{ANY_CLASS};"))?);
        self.buf.put_u8(Token::NewArray.byte());
        self.write_class_desc(&desc)?;
        self.handles.assign()?;
        self.buf.put_i32(len);
        stack.extend(values.into_iter().rev().map(|value| Action::Value {
            value,
            unshared: false,
        }));
        Ok(())
    }

    fn write_class_desc(&mut self, desc: &Arc<ClassDescriptor>) -> Result<()> {
        let key = DescKey::of(desc);
        if let Some(handle) = self.handles.class(&key) {
            self.put_handle_ref(handle);
            return Ok(());
        }

        if desc.is_proxy() {
            let names = desc
                .interfaces()
                .iter()
                .map(|i| utf_bytes(i))
                .collect::<Result<Vec<_>>>()?;
            self.buf.put_u8(Token::NewProxyClassDesc.byte());
            self.handles.assign_class(key)?;
            self.buf.put_i32(names.len() as i32);
            for name in &names {
                put_utf(&mut self.buf, name);
            }
        } else {
            let name = utf_bytes(desc.name())?;
            let schema = desc.schema();
            let count = u16::try_from(schema.len()).map_err(|_| {
                CodecError::InvariantViolation(format!("{} has too many fields", desc.name()))
            })?;
            let field_names = schema
                .fields()
                .iter()
                .map(|f| utf_bytes(&f.spec.name))
                .collect::<Result<Vec<_>>>()?;

            self.buf.put_u8(Token::NewClassDesc.byte());
            put_utf(&mut self.buf, &name);
            self.buf.put_i64(desc.version_id());
            self.handles.assign_class(key)?;
            self.buf.put_u8(desc.flags().bits());
            self.buf.put_u16(count);
            for (field, field_name) in schema.fields().iter().zip(&field_names) {
                self.buf.put_u8(field.spec.tag.code());
                put_utf(&mut self.buf, field_name);
                if !field.spec.is_primitive() {
                    match &field.spec.type_name {
                        Some(type_name) => self.write_string(type_name, false)?,
                        None => self.buf.put_u8(Token::Null.byte()),
                    }
                }
            }
        }
        debug!(class = %desc.name(), handle = self.handles.len(), "wrote class descriptor");

        self.buf.put_u8(Token::EndBlock.byte());
        match desc.superclass() {
            Some(superclass) => self.write_class_desc(superclass),
            None => {
                self.buf.put_u8(Token::Null.byte());
                Ok(())
            }
        }
    }

    fn run_routine(
        &mut self,
        graph: &Graph,
        ty: &RuntimeType,
        obj: ObjRef,
        external: bool,
    ) -> Result<()> {
        let record = graph.get(obj).and_then(Object::as_record).ok_or_else(|| {
            CodecError::InvariantViolation(format!("object {} is not a record", obj.index()))
        })?;
        let mut out = RoutineOutput {
            writer: self,
            graph,
            block: BytesMut::new(),
        };
        if external {
            ty.write_external(record, &mut out)?;
        } else {
            ty.write_object(record, &mut out)?;
        }
        out.flush_block();
        Ok(())
    }
}

/// Field actions of one hierarchy level: primitive data, then references
fn level_actions<F>(level: &ClassDescriptor, get: F) -> Result<Vec<Action>>
where
    F: Fn(&str) -> Option<Value>,
{
    let schema = level.schema();
    let mut data = BytesMut::with_capacity(schema.prim_data_size());
    for field in schema.primitives() {
        let value = get(&field.spec.name).unwrap_or(Value::Null);
        field.spec.tag.encode(&value, &mut data)?;
    }
    let mut actions = Vec::with_capacity(schema.num_refs() + 1);
    if !data.is_empty() {
        actions.push(Action::Raw(data.freeze()));
    }
    for field in schema.references() {
        actions.push(Action::Value {
            value: get(&field.spec.name).unwrap_or(Value::Null),
            unshared: field.spec.unshared,
        });
    }
    Ok(actions)
}

fn primitive_tag(data: &ArrayData) -> Option<crate::core::field::TypeTag> {
    use crate::core::field::TypeTag;
    Some(match data {
        ArrayData::Bool(_) => TypeTag::Boolean,
        ArrayData::Byte(_) => TypeTag::Byte,
        ArrayData::Char(_) => TypeTag::Char,
        ArrayData::Short(_) => TypeTag::Short,
        ArrayData::Int(_) => TypeTag::Int,
        ArrayData::Long(_) => TypeTag::Long,
        ArrayData::Float(_) => TypeTag::Float,
        ArrayData::Double(_) => TypeTag::Double,
        ArrayData::Ref(_) => return None,
    })
}

/// Modified UTF-8 of a name, checked against the `u16` length prefix
fn utf_bytes(s: &str) -> Result<Vec<u8>> {
    let bytes = mutf8::encode(s);
    if bytes.len() > usize::from(u16::MAX) {
        return Err(CodecError::InvariantViolation(format!(
            "name of {} bytes exceeds the length prefix",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn put_utf(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

/// [`ObjectOutput`] that frames routine output as block data.
struct RoutineOutput<'a, W: Write> {
    writer: &'a mut WireWriter<W>,
    graph: &'a Graph,
    block: BytesMut,
}

impl<W: Write> RoutineOutput<'_, W> {
    fn flush_block(&mut self) {
        let buf = &mut self.writer.buf;
        for chunk in self.block.chunks(MAX_BLOCK_CHUNK) {
            if chunk.len() <= usize::from(u8::MAX) {
                buf.put_u8(Token::BlockData.byte());
                buf.put_u8(chunk.len() as u8);
            } else {
                buf.put_u8(Token::BlockDataLong.byte());
                buf.put_i32(chunk.len() as i32);
            }
            buf.put_slice(chunk);
        }
        self.block.clear();
    }

    fn nested(&mut self, value: &Value, unshared: bool) -> Result<()> {
        self.flush_block();
        self.writer.write_nested(self.graph, value.clone(), unshared)
    }
}

impl<W: Write> ObjectOutput for RoutineOutput<'_, W> {
    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.block.put_u8(u8::from(v));
        Ok(())
    }

    fn write_i8(&mut self, v: i8) -> Result<()> {
        self.block.put_i8(v);
        Ok(())
    }

    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.block.put_u8(v);
        Ok(())
    }

    fn write_i16(&mut self, v: i16) -> Result<()> {
        self.block.put_i16(v);
        Ok(())
    }

    fn write_char(&mut self, v: u16) -> Result<()> {
        self.block.put_u16(v);
        Ok(())
    }

    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.block.put_i32(v);
        Ok(())
    }

    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.block.put_i64(v);
        Ok(())
    }

    fn write_f32(&mut self, v: f32) -> Result<()> {
        self.block.put_f32(v);
        Ok(())
    }

    fn write_f64(&mut self, v: f64) -> Result<()> {
        self.block.put_f64(v);
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.block.put_slice(bytes);
        Ok(())
    }

    fn write_utf(&mut self, s: &str) -> Result<()> {
        let bytes = utf_bytes(s)?;
        put_utf(&mut self.block, &bytes);
        Ok(())
    }

    fn write_value(&mut self, value: &Value) -> Result<()> {
        self.nested(value, false)
    }

    fn write_unshared(&mut self, value: &Value) -> Result<()> {
        self.nested(value, true)
    }

    fn graph(&self) -> &Graph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TypeRegistry;

    fn writer() -> WireWriter<Vec<u8>> {
        WireWriter::with_defaults(Vec::new(), Arc::new(TypeRegistry::with_builtins()))
            .unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_header_and_string_dedup() {
        let mut w = writer();
        let graph = Graph::new();
        w.write_value(&graph, &Value::str("hi")).unwrap();
        w.write_value(&graph, &Value::str("hi")).unwrap();
        let bytes = w.into_inner().unwrap();
        assert_eq!(
            bytes,
            vec![
                0xAC, 0xED, 0x00, 0x05, 0x74, 0x00, 0x02, b'h', b'i', 0x71, 0x00, 0x7E, 0x00,
                0x00
            ]
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_reset_clears_handles() {
        let mut w = writer();
        let graph = Graph::new();
        w.write_value(&graph, &Value::str("a")).unwrap();
        assert_eq!(w.handle_count(), 1);
        w.reset().unwrap();
        assert_eq!(w.handle_count(), 0);
        let bytes = w.into_inner().unwrap();
        assert_eq!(bytes.last(), Some(&0x79));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_primitive_value_is_rejected_without_output() {
        let mut w = writer();
        let graph = Graph::new();
        assert!(matches!(
            w.write_value(&graph, &Value::Int(3)),
            Err(CodecError::InvariantViolation(_))
        ));
        assert_eq!(w.into_inner().unwrap().len(), 4);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_foreign_graph_needs_reset() {
        let mut w = writer();
        let mut first = Graph::new();
        let list = first.insert(Object::List(vec![]));
        w.write_value(&first, &Value::Ref(list)).unwrap();

        let mut second = Graph::new();
        let other = second.insert(Object::List(vec![]));
        assert!(w.write_value(&second, &Value::Ref(other)).is_err());
        w.reset().unwrap();
        assert!(w.write_value(&second, &Value::Ref(other)).is_ok());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_long_block_data_is_chunked() {
        let mut out = writer();
        let graph = Graph::new();
        let mut routine = RoutineOutput {
            writer: &mut out,
            graph: &graph,
            block: BytesMut::new(),
        };
        routine.write_bytes(&[7u8; 1500]).unwrap();
        routine.flush_block();
        let bytes = out.buf.clone();
        assert_eq!(bytes[0], Token::BlockDataLong.byte());
        assert_eq!(&bytes[1..5], &1024i32.to_be_bytes());
        assert_eq!(bytes[5 + 1024], Token::BlockDataLong.byte());
        assert_eq!(&bytes[6 + 1024..10 + 1024], &476i32.to_be_bytes());
    }
}
