//! # Wire Reader
//!
//! Token-driven decoder producing values in a [`Graph`] arena.
//!
//! ## Decode loop
//! Objects and reference arrays are decoded on an explicit frame stack, so a
//! long reference chain costs heap frames instead of call stack. Only custom
//! read routines and externalizable routines recurse, through
//! [`ObjectInput::read_value`], and that recursion is bounded by
//! `limits.max_depth`.
//!
//! ## Failure handling
//! Object-level failures (version mismatch, unresolvable type, rejected
//! invariants) discard the object, mark its handle DISCARDED and keep the
//! stream aligned; the first such failure is returned once the top-level value
//! has been consumed. Gate denials discard silently. Framing and resource
//! errors close the byte source and every later read fails with
//! [`CodecError::StreamClosed`].
//!
//! ## Example
//! ```rust
//! use object_wire::core::reader::WireReader;
//! use object_wire::core::security::CapabilityContext;
//! use object_wire::core::types::TypeRegistry;
//! use object_wire::core::graph::Value;
//! use std::sync::Arc;
//!
//! // header followed by a single NULL token
//! let bytes = [0xAC, 0xED, 0x00, 0x05, 0x70];
//! let registry = Arc::new(TypeRegistry::with_builtins());
//! let mut reader = WireReader::with_defaults(&bytes[..], registry).unwrap();
//! let value = reader.read_value(&CapabilityContext::untrusted()).unwrap();
//! assert_eq!(value, Value::Null);
//! ```

use crate::config::{CodecConfig, LimitsConfig, STREAM_MAGIC, STREAM_VERSION};
use crate::core::budget::{Budget, FIELD_OVERHEAD, OBJECT_OVERHEAD};
use crate::core::construct::{self, Completion, Construction};
use crate::core::descriptor::{array_component, reconcile, ClassDescriptor, DescriptorCache, LevelPlan};
use crate::core::field::{FieldSchema, FieldSpec, TypeTag};
use crate::core::field_source::FieldSource;
use crate::core::graph::{Array, ArrayData, EnumValue, Graph, ObjRef, Object, Value, ANY_CLASS};
use crate::core::handles::{HandleEntry, HandleTable, Resolution, StreamClass};
use crate::core::object_io::ObjectInput;
use crate::core::security::{CapabilityContext, Decision, SecurityGate};
use crate::core::source::Source;
use crate::core::token::{ClassFlags, Token};
use crate::core::types::{Resolved, RuntimeType, Strategy, TypeResolver};
use crate::error::{constants, CodecError, Result};
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::mutf8;
use bytes::{Buf, Bytes};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// What the decode loop does after one step.
enum Step {
    /// A complete value for the enclosing frame
    Value(Value),
    /// A frame was pushed and must be advanced
    Pushed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Reading the field values of the current level
    Fields,
    /// Skipping the annotation region of the current level up to END_BLOCK
    Annotations,
    /// Skipping the rest of an externalizable region up to END_BLOCK
    External,
}

struct ObjectFrame {
    handle: u32,
    obj: ObjRef,
    unshared: bool,
    plan: Arc<[LevelPlan]>,
    level: usize,
    values: Vec<Value>,
    phase: Phase,
    construction: Construction,
}

struct ArrayFrame {
    handle: u32,
    obj: ObjRef,
    unshared: bool,
    class_name: Arc<str>,
    len: usize,
    elements: Vec<Value>,
}

enum Frame {
    Object(ObjectFrame),
    Array(ArrayFrame),
}

impl Frame {
    /// Handle, object and sharing of the value under construction
    fn target(&self) -> (u32, ObjRef, bool) {
        match self {
            Frame::Object(o) => (o.handle, o.obj, o.unshared),
            Frame::Array(a) => (a.handle, a.obj, a.unshared),
        }
    }
}

/// Decoder for one byte stream.
pub struct WireReader<R> {
    source: Source<R>,
    handles: HandleTable,
    graph: Graph,
    budget: Budget,
    resolver: Arc<dyn TypeResolver>,
    cache: &'static DescriptorCache,
    gate: SecurityGate,
    limits: LimitsConfig,
    frames: Vec<Frame>,
    depth: usize,
    failure: Option<CodecError>,
    enums: HashMap<(Arc<str>, Arc<str>), ObjRef>,
}

impl<R: Read> WireReader<R> {
    /// Open a stream and validate its header
    pub fn new(reader: R, resolver: Arc<dyn TypeResolver>, config: &CodecConfig) -> Result<Self> {
        config.validate_strict()?;
        let limits = config.limits.clone();
        let mut this = Self {
            source: Source::new(reader),
            handles: HandleTable::new(limits.max_handles),
            graph: Graph::new(),
            budget: Budget::new(limits.budget_bytes),
            resolver,
            cache: DescriptorCache::global(),
            gate: SecurityGate::new(limits.max_descriptor_depth),
            limits,
            frames: Vec::new(),
            depth: 0,
            failure: None,
            enums: HashMap::new(),
        };
        this.read_header()?;
        Ok(this)
    }

    /// Open a stream with the default configuration
    pub fn with_defaults(reader: R, resolver: Arc<dyn TypeResolver>) -> Result<Self> {
        Self::new(reader, resolver, &CodecConfig::default())
    }

    fn read_header(&mut self) -> Result<()> {
        let magic = self.source.read_u16()?;
        if magic != STREAM_MAGIC {
            self.source.close();
            return Err(CodecError::StreamFraming(format!(
                "{}: {magic:#06x}",
                constants::ERR_BAD_MAGIC
            )));
        }
        let version = self.source.read_u16()?;
        if version != STREAM_VERSION {
            self.source.close();
            return Err(CodecError::StreamFraming(format!(
                "{}: {version}",
                constants::ERR_BAD_VERSION
            )));
        }
        Ok(())
    }

    /// Read the next top-level value
    #[instrument(skip(self, ctx), level = "debug")]
    pub fn read_value(&mut self, ctx: &CapabilityContext) -> Result<Value> {
        self.read_top(ctx, false)
    }

    /// Read the next top-level value; it may never be referenced again
    #[instrument(skip(self, ctx), level = "debug")]
    pub fn read_unshared(&mut self, ctx: &CapabilityContext) -> Result<Value> {
        self.read_top(ctx, true)
    }

    /// Arena holding the values read since the last reset.
    ///
    /// A RESET in the stream starts a fresh arena, so values returned before
    /// it no longer index into this one. Take the arena with
    /// [`take_graph`](Self::take_graph) to keep them.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Take the arena of the values read so far and start a fresh one.
    ///
    /// Handles naming objects of the taken arena are detached: a later
    /// back-reference to one of them reads as null and reports an
    /// `InvariantViolation` for its value. Strings and class descriptors
    /// stay shared.
    pub fn take_graph(&mut self) -> Graph {
        self.handles.detach_objects();
        self.enums.clear();
        std::mem::take(&mut self.graph)
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_closed()
    }

    /// Bytes consumed, including the header
    pub fn position(&self) -> u64 {
        self.source.position()
    }

    /// Handles assigned since the last reset
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn budget_remaining(&self) -> u64 {
        self.budget.remaining()
    }

    /// Drop the byte source; later reads fail with `StreamClosed`
    pub fn close(&mut self) {
        self.source.close();
        self.handles.clear();
        self.frames.clear();
    }

    fn read_top(&mut self, ctx: &CapabilityContext, unshared: bool) -> Result<Value> {
        if self.source.is_closed() {
            return Err(CodecError::StreamClosed);
        }
        let _timer = Timer::start("read_value");
        self.budget.reset();
        self.failure = None;
        self.depth = 0;

        match self.read_graph_value(ctx, unshared, true) {
            Ok(value) => {
                self.budget.reset();
                global_metrics().value_decoded();
                match self.failure.take() {
                    Some(err) => Err(err),
                    None => Ok(value),
                }
            }
            Err(err) => Err(self.abort(err)),
        }
    }

    fn abort(&mut self, err: CodecError) -> CodecError {
        let pending: Vec<(u32, ObjRef, bool)> =
            self.frames.drain(..).map(|f| f.target()).collect();
        for (handle, obj, unshared) in pending {
            self.graph.discard(obj);
            // an aborted write has already emptied the table
            if !unshared && self.handles.set(handle, HandleEntry::Discarded).is_err() {
                debug!(handle, "handle of aborted object no longer assigned");
            }
        }
        self.depth = 0;
        self.failure = None;
        if err.is_fatal() {
            warn!(
                error = %err,
                position = self.source.position(),
                "closing stream after fatal error"
            );
            global_metrics().fatal_error();
            self.source.close();
            self.handles.clear();
        }
        err
    }

    /// Decode one value, driving every frame pushed on its behalf to completion
    fn read_graph_value(
        &mut self,
        ctx: &CapabilityContext,
        unshared: bool,
        top: bool,
    ) -> Result<Value> {
        if top {
            while self.source.peek_u8()? == Token::Reset.byte() {
                self.source.read_u8()?;
                self.handles.clear();
                self.graph = Graph::new();
                self.enums.clear();
                self.budget.reset();
                global_metrics().reset();
                debug!("stream reset");
            }
        }

        let floor = self.frames.len();
        let mut step = self.begin_value(ctx, unshared)?;
        loop {
            if let Step::Value(value) = step {
                if self.frames.len() == floor {
                    return Ok(value);
                }
                self.accept(value);
            }
            step = self.advance(ctx)?;
        }
    }

    /// Nested read on behalf of a routine; bounded by `max_depth`
    fn read_nested(&mut self, ctx: &CapabilityContext, unshared: bool) -> Result<Value> {
        if self.depth >= self.limits.max_depth {
            return Err(CodecError::ResourceExhaustion(format!(
                "{} ({})",
                constants::ERR_DEPTH_LIMIT,
                self.limits.max_depth
            )));
        }
        self.depth += 1;
        let result = self.read_graph_value(ctx, unshared, false);
        self.depth -= 1;
        result
    }

    fn push_frame(&mut self, frame: Frame) -> Result<()> {
        if self.frames.len() >= self.limits.max_frames {
            return Err(CodecError::ResourceExhaustion(format!(
                "{} ({})",
                constants::ERR_FRAME_LIMIT,
                self.limits.max_frames
            )));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Hand a finished child value to the innermost frame
    fn accept(&mut self, value: Value) {
        match self.frames.last_mut() {
            Some(Frame::Array(a)) => a.elements.push(value),
            Some(Frame::Object(o)) if o.phase == Phase::Fields => o.values.push(value),
            // values inside annotation regions are read and dropped
            _ => {}
        }
    }

    fn begin_value(&mut self, ctx: &CapabilityContext, unshared: bool) -> Result<Step> {
        let token = Token::parse(self.source.read_u8()?)?;
        match token {
            Token::Null => Ok(Step::Value(Value::Null)),
            Token::HandleRef => {
                let handle = self.source.read_u32()?;
                if unshared {
                    return Err(CodecError::IllegalReference(format!(
                        "{}: {handle:#x}",
                        constants::ERR_UNSHARED_REUSE
                    )));
                }
                let value = self.handles.resolve(handle)?;
                if self.handles.is_detached(handle) {
                    self.record_failure(CodecError::InvariantViolation(format!(
                        "handle {handle:#x} names an object of a graph already taken"
                    )));
                }
                Ok(Step::Value(value))
            }
            Token::NewString | Token::NewLongString => {
                self.read_string_body(token, unshared).map(|s| Step::Value(Value::Str(s)))
            }
            Token::NewObject => self.begin_object(ctx, unshared),
            Token::NewArray => self.begin_array(ctx, unshared),
            Token::NewEnum => self.read_enum(ctx, unshared).map(Step::Value),
            Token::NewClass => self.read_class_literal(ctx, unshared).map(Step::Value),
            Token::Exception => Err(self.read_exception(ctx)),
            Token::Reset => Err(CodecError::StreamFraming(constants::ERR_NESTED_RESET.into())),
            Token::EndBlock => Err(CodecError::StreamFraming(
                constants::ERR_UNEXPECTED_END_BLOCK.into(),
            )),
            Token::BlockData
            | Token::BlockDataLong
            | Token::NewClassDesc
            | Token::NewProxyClassDesc => Err(CodecError::StreamFraming(format!(
                "{} token where a value is expected",
                token.name()
            ))),
        }
    }

    /// Move the innermost frame forward by one step
    fn advance(&mut self, ctx: &CapabilityContext) -> Result<Step> {
        match self.frames.pop() {
            Some(Frame::Array(array)) => {
                if array.elements.len() < array.len {
                    self.frames.push(Frame::Array(array));
                    return self.begin_value(ctx, false);
                }
                self.finish_array(array).map(Step::Value)
            }
            Some(Frame::Object(object)) => self.advance_object(ctx, object),
            None => Err(CodecError::StreamFraming(
                "decode loop advanced with no pending value".into(),
            )),
        }
    }

    fn advance_object(&mut self, ctx: &CapabilityContext, mut frame: ObjectFrame) -> Result<Step> {
        loop {
            match frame.phase {
                Phase::Fields => {
                    let plan = frame.plan.clone();
                    let level = match plan.get(frame.level) {
                        Some(level) => level,
                        None => return self.finish_object(frame).map(Step::Value),
                    };
                    let schema = level.stream.as_ref().map(|d| d.schema());
                    let wanted = schema.map(FieldSchema::len).unwrap_or(0);
                    if frame.values.len() < wanted {
                        let unshared = field_unshared(level, frame.values.len());
                        self.frames.push(Frame::Object(frame));
                        return self.begin_value(ctx, unshared);
                    }
                    self.complete_level(ctx, &mut frame, level)?;
                }
                Phase::Annotations | Phase::External => {
                    let token = Token::parse(self.source.peek_u8()?)?;
                    match token {
                        Token::BlockData | Token::BlockDataLong => self.skip_block()?,
                        Token::EndBlock => {
                            self.source.read_u8()?;
                            if frame.phase == Phase::External {
                                return self.finish_object(frame).map(Step::Value);
                            }
                            frame.phase = Phase::Fields;
                            frame.level += 1;
                            self.load_level(&mut frame)?;
                        }
                        _ => {
                            self.frames.push(Frame::Object(frame));
                            return self.begin_value(ctx, false);
                        }
                    }
                }
            }
        }
    }

    /// All values of the current level are in; construct and move on
    fn complete_level(
        &mut self,
        ctx: &CapabilityContext,
        frame: &mut ObjectFrame,
        level: &LevelPlan,
    ) -> Result<()> {
        let values = std::mem::take(&mut frame.values);
        let region = level
            .stream
            .as_ref()
            .map(|d| d.flags().has_write_method())
            .unwrap_or(false);

        if let Some((ty, fields)) = frame.construction.accept_level(level, &values, &self.graph) {
            self.run_read_object(ctx, &mut frame.construction, &ty, &fields, region)?;
        }

        if region {
            frame.phase = Phase::Annotations;
        } else {
            frame.level += 1;
            self.load_level(frame)?;
        }
        Ok(())
    }

    /// Read the primitive data of the frame's current level
    fn load_level(&mut self, frame: &mut ObjectFrame) -> Result<()> {
        let desc = match frame.plan.get(frame.level).and_then(|l| l.stream.clone()) {
            Some(desc) => desc,
            None => return Ok(()),
        };
        let schema = desc.schema();
        let data = self.source.read_vec(schema.prim_data_size())?;
        frame.values = schema.decode_primitives(&data)?;
        Ok(())
    }

    fn run_read_object(
        &mut self,
        ctx: &CapabilityContext,
        construction: &mut Construction,
        ty: &RuntimeType,
        fields: &FieldSource,
        region: bool,
    ) -> Result<()> {
        let result = match construction.record_mut() {
            Some(record) => {
                let mut input = RoutineInput::new(self, ctx, region);
                ty.read_object(fields, &mut input, record)
            }
            None => Ok(()),
        };
        result.map_err(routine_error)
    }

    fn run_read_external(
        &mut self,
        ctx: &CapabilityContext,
        construction: &mut Construction,
        ty: &RuntimeType,
    ) -> Result<()> {
        let result = match construction.record_mut() {
            Some(record) => {
                let mut input = RoutineInput::new(self, ctx, true);
                ty.read_external(record, &mut input)
            }
            None => Ok(()),
        };
        result.map_err(routine_error)
    }

    fn begin_object(&mut self, ctx: &CapabilityContext, unshared: bool) -> Result<Step> {
        let class = self
            .read_class_desc(ctx, 0)?
            .ok_or_else(|| CodecError::StreamFraming("object with null class descriptor".into()))?;
        let desc = &class.desc;
        let flags = desc.flags();
        if desc.is_array() || flags.is_enum() {
            return Err(CodecError::StreamFraming(format!(
                "{} cannot be read as an ordinary object",
                desc.name()
            )));
        }
        if !flags.is_serializable() && !flags.is_externalizable() {
            return Err(CodecError::StreamFraming(format!(
                "{} is not serializable",
                desc.name()
            )));
        }
        if flags.is_externalizable() && !flags.contains(ClassFlags::BLOCK_DATA) {
            return Err(CodecError::StreamFraming(format!(
                "{}: externalizable data without block framing",
                desc.name()
            )));
        }

        let (plan, construction, lineage) = match &class.resolution {
            Ok(Resolution::Type { ty, plan }) => match self.gate.authorize(ty, ctx) {
                Decision::Allow => (
                    plan.clone(),
                    Construction::start(ty),
                    construct::lineage(ty, self.limits.max_descriptor_depth),
                ),
                Decision::Deny(category) => {
                    warn!(
                        class = %desc.name(),
                        category = %category,
                        "security gate denied construction"
                    );
                    global_metrics().object_denied();
                    (
                        class.stream_plan.clone(),
                        Construction::discard(None),
                        stream_lineage(desc),
                    )
                }
            },
            Ok(Resolution::Array) => {
                return Err(CodecError::StreamFraming(format!(
                    "array class {} used for an object",
                    desc.name()
                )))
            }
            Err(e) => (
                class.stream_plan.clone(),
                Construction::discard(Some(e.duplicate())),
                stream_lineage(desc),
            ),
        };

        self.budget
            .claim(OBJECT_OVERHEAD + LevelPlan::claim(&plan), desc.name())?;
        let obj = self.graph.reserve_with_lineage(lineage);
        let handle = self.handles.assign(object_entry(obj, unshared))?;

        let mut frame = ObjectFrame {
            handle,
            obj,
            unshared,
            plan,
            level: 0,
            values: Vec::new(),
            phase: Phase::Fields,
            construction,
        };

        if flags.is_externalizable() {
            if let Construction::External { ty, .. } = &frame.construction {
                let ty = ty.clone();
                self.run_read_external(ctx, &mut frame.construction, &ty)?;
            }
            frame.phase = Phase::External;
        } else {
            self.load_level(&mut frame)?;
        }
        self.push_frame(Frame::Object(frame))?;
        Ok(Step::Pushed)
    }

    fn finish_object(&mut self, frame: ObjectFrame) -> Result<Value> {
        let ObjectFrame {
            handle,
            obj,
            unshared,
            construction,
            ..
        } = frame;
        match construction.complete(&self.graph) {
            Completion::Built { object, ty } => match construct::resolve_instance(&ty, object) {
                Ok(Resolved::Object(object)) => {
                    self.graph.fill(obj, object)?;
                    global_metrics().object_constructed();
                    Ok(Value::Ref(obj))
                }
                Ok(Resolved::Value(value)) => {
                    self.graph.alias(obj, value.clone());
                    self.handles.finish(handle, value.clone(), unshared)?;
                    global_metrics().object_constructed();
                    Ok(value)
                }
                Err(e) => self.discard_object(handle, obj, unshared, Some(e)),
            },
            Completion::Discarded(failure) => self.discard_object(handle, obj, unshared, failure),
        }
    }

    fn discard_object(
        &mut self,
        handle: u32,
        obj: ObjRef,
        unshared: bool,
        failure: Option<CodecError>,
    ) -> Result<Value> {
        self.graph.discard(obj);
        if !unshared {
            self.handles.set(handle, HandleEntry::Discarded)?;
        }
        if let Some(err) = failure {
            self.record_failure(err);
        }
        Ok(Value::Null)
    }

    fn record_failure(&mut self, err: CodecError) {
        warn!(error = %err, "discarding object after failure");
        global_metrics().object_failed();
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }

    fn begin_array(&mut self, ctx: &CapabilityContext, unshared: bool) -> Result<Step> {
        let class = self
            .read_class_desc(ctx, 0)?
            .ok_or_else(|| CodecError::StreamFraming("array with null class descriptor".into()))?;
        let desc = class.desc.clone();
        if !desc.is_array() {
            return Err(CodecError::StreamFraming(format!(
                "{} is not an array class",
                desc.name()
            )));
        }
        let component = array_component(desc.name())?;
        let len = self.source.read_i32()?;
        if len < 0 {
            return Err(CodecError::StreamFraming(format!(
                "{}: array of {len}",
                constants::ERR_NEGATIVE_LENGTH
            )));
        }
        self.budget.claim(OBJECT_OVERHEAD, desc.name())?;
        self.budget
            .claim_elements(len as u64, component.claim_width(), desc.name())?;
        let len = len as usize;

        if component.is_primitive() {
            let data = self.read_primitive_array(component, len)?;
            let obj = self
                .graph
                .insert(Object::Array(Array::from_parts(desc.name_arc().clone(), data)));
            self.handles.assign(object_entry(obj, unshared))?;
            return Ok(Step::Value(Value::Ref(obj)));
        }

        let lineage: Arc<[Arc<str>]> =
            Arc::from(vec![desc.name_arc().clone(), Arc::<str>::from(ANY_CLASS)]);
        let obj = self.graph.reserve_with_lineage(lineage);
        let handle = self.handles.assign(object_entry(obj, unshared))?;
        self.push_frame(Frame::Array(ArrayFrame {
            handle,
            obj,
            unshared,
            class_name: desc.name_arc().clone(),
            len,
            elements: Vec::with_capacity(len.min(1024)),
        }))?;
        Ok(Step::Pushed)
    }

    fn finish_array(&mut self, frame: ArrayFrame) -> Result<Value> {
        let array = Array::from_parts(frame.class_name, ArrayData::Ref(frame.elements));
        self.graph.fill(frame.obj, Object::Array(array))?;
        Ok(Value::Ref(frame.obj))
    }

    fn read_primitive_array(&mut self, tag: TypeTag, len: usize) -> Result<ArrayData> {
        let total = len.checked_mul(tag.width()).ok_or_else(|| {
            CodecError::ResourceExhaustion(constants::ERR_BUDGET_EXCEEDED.into())
        })?;
        let raw = self.source.read_vec(total)?;
        Ok(match tag {
            TypeTag::Byte => ArrayData::Byte(Bytes::from(raw)),
            TypeTag::Boolean => ArrayData::Bool(raw.iter().map(|b| *b != 0).collect()),
            TypeTag::Char => ArrayData::Char(be_chunks(&raw, u16::from_be_bytes)),
            TypeTag::Short => ArrayData::Short(be_chunks(&raw, i16::from_be_bytes)),
            TypeTag::Int => ArrayData::Int(be_chunks(&raw, i32::from_be_bytes)),
            TypeTag::Long => ArrayData::Long(be_chunks(&raw, i64::from_be_bytes)),
            TypeTag::Float => ArrayData::Float(be_chunks(&raw, |b: [u8; 4]| {
                f32::from_bits(u32::from_be_bytes(b))
            })),
            TypeTag::Double => ArrayData::Double(be_chunks(&raw, |b: [u8; 8]| {
                f64::from_bits(u64::from_be_bytes(b))
            })),
            TypeTag::Object | TypeTag::Array => {
                return Err(CodecError::StreamFraming(
                    "reference array read as primitive data".into(),
                ))
            }
        })
    }

    fn read_enum(&mut self, ctx: &CapabilityContext, unshared: bool) -> Result<Value> {
        let class = self
            .read_class_desc(ctx, 0)?
            .ok_or_else(|| CodecError::StreamFraming("enum with null class descriptor".into()))?;
        if !class.desc.flags().is_enum() {
            return Err(CodecError::StreamFraming(format!(
                "enum constant of non-enum class {}",
                class.desc.name()
            )));
        }
        let handle = self.handles.assign(if unshared {
            HandleEntry::Unshared
        } else {
            HandleEntry::Discarded
        })?;
        let constant = self.read_string_value()?.ok_or_else(|| {
            CodecError::StreamFraming(format!("null constant for enum {}", class.desc.name()))
        })?;

        let value = match &class.resolution {
            Ok(Resolution::Type { ty, .. }) if ty.strategy() == Strategy::Enum => {
                if ty.enum_constants().iter().any(|c| **c == *constant) {
                    Value::Ref(self.canonical_enum(ty.name(), constant))
                } else {
                    self.record_failure(CodecError::IncompatibleClass(format!(
                        "no constant {} in enum {}",
                        constant,
                        ty.name()
                    )));
                    Value::Null
                }
            }
            Ok(_) => {
                self.record_failure(CodecError::IncompatibleClass(format!(
                    "{} is not an enum type",
                    class.desc.name()
                )));
                Value::Null
            }
            Err(e) => {
                self.record_failure(e.duplicate());
                Value::Null
            }
        };
        if !unshared && !value.is_null() {
            self.handles.set(handle, HandleEntry::Value(value.clone()))?;
        }
        Ok(value)
    }

    fn canonical_enum(&mut self, class_name: &str, constant: Arc<str>) -> ObjRef {
        let key = (Arc::<str>::from(class_name), constant);
        if let Some(r) = self.enums.get(&key) {
            return *r;
        }
        let r = self.graph.insert(Object::Enum(EnumValue {
            class_name: key.0.clone(),
            constant: key.1.clone(),
        }));
        self.enums.insert(key, r);
        r
    }

    fn read_class_literal(&mut self, ctx: &CapabilityContext, unshared: bool) -> Result<Value> {
        let class = self
            .read_class_desc(ctx, 0)?
            .ok_or_else(|| CodecError::StreamFraming("class literal with null descriptor".into()))?;
        let value = match &class.resolution {
            Ok(_) => Value::Ref(
                self.graph
                    .insert(Object::Class(class.desc.name_arc().clone())),
            ),
            Err(e) => {
                self.record_failure(e.duplicate());
                Value::Null
            }
        };
        let entry = match (&value, unshared) {
            (_, true) => HandleEntry::Unshared,
            (Value::Null, false) => HandleEntry::Discarded,
            (v, false) => HandleEntry::Value(v.clone()),
        };
        self.handles.assign(entry)?;
        Ok(value)
    }

    /// Sender aborted a write; read its failure report and surface it
    fn read_exception(&mut self, ctx: &CapabilityContext) -> CodecError {
        self.handles.clear();
        let report = self.read_nested(ctx, false);
        self.handles.clear();
        match report {
            Ok(value) => match self.graph.deref(&value) {
                Some(Object::Failure(f)) => CodecError::WriteAborted(match &f.message {
                    Some(message) => format!("{}: {}", f.kind, message),
                    None => f.kind.clone(),
                }),
                None => CodecError::WriteAborted("sender aborted the write".into()),
                Some(other) => CodecError::StreamFraming(format!(
                    "exception token followed by {}",
                    other.class_name()
                )),
            },
            Err(e) => e,
        }
    }

    fn read_string_body(&mut self, token: Token, unshared: bool) -> Result<Arc<str>> {
        let len = match token {
            Token::NewString => u64::from(self.source.read_u16()?),
            _ => self.source.read_u64()?,
        };
        self.budget.claim(len, "string")?;
        let len = usize::try_from(len).map_err(|_| {
            CodecError::ResourceExhaustion(format!("string of {len} bytes"))
        })?;
        let bytes = self.source.read_vec(len)?;
        let text: Arc<str> = Arc::from(mutf8::decode(&bytes)?);
        self.handles.assign(if unshared {
            HandleEntry::Unshared
        } else {
            HandleEntry::Value(Value::Str(text.clone()))
        })?;
        Ok(text)
    }

    /// String value in a position that only admits strings
    fn read_string_value(&mut self) -> Result<Option<Arc<str>>> {
        let token = Token::parse(self.source.read_u8()?)?;
        match token {
            Token::Null => Ok(None),
            Token::NewString | Token::NewLongString => self.read_string_body(token, false).map(Some),
            Token::HandleRef => {
                let handle = self.source.read_u32()?;
                match self.handles.resolve(handle)? {
                    Value::Str(s) => Ok(Some(s)),
                    other => Err(CodecError::StreamFraming(format!(
                        "handle {handle:#x} names a {} where a string is expected",
                        other.kind_name()
                    ))),
                }
            }
            other => Err(CodecError::StreamFraming(format!(
                "{} token where a string is expected",
                other.name()
            ))),
        }
    }

    /// `u16`-prefixed modified UTF-8 used for names
    fn read_utf(&mut self) -> Result<String> {
        let len = self.source.read_u16()?;
        self.budget.claim(u64::from(len), "name")?;
        let bytes = self.source.read_vec(usize::from(len))?;
        mutf8::decode(&bytes)
    }

    fn skip_block(&mut self) -> Result<()> {
        let token = Token::parse(self.source.read_u8()?)?;
        let len = match token {
            Token::BlockData => u64::from(self.source.read_u8()?),
            Token::BlockDataLong => {
                let len = self.source.read_i32()?;
                if len < 0 {
                    return Err(CodecError::StreamFraming(format!(
                        "{}: block data of {len}",
                        constants::ERR_NEGATIVE_LENGTH
                    )));
                }
                len as u64
            }
            other => {
                return Err(CodecError::StreamFraming(format!(
                    "{} token where block data is expected",
                    other.name()
                )))
            }
        };
        debug!(bytes = len, "skipping unread block data");
        self.source.skip(len)
    }

    /// Class annotations: block data only, terminated by END_BLOCK
    fn skip_class_annotations(&mut self) -> Result<()> {
        loop {
            match Token::parse(self.source.peek_u8()?)? {
                Token::EndBlock => {
                    self.source.read_u8()?;
                    return Ok(());
                }
                Token::BlockData | Token::BlockDataLong => self.skip_block()?,
                other => {
                    return Err(CodecError::StreamFraming(format!(
                        "{} token inside class annotations",
                        other.name()
                    )))
                }
            }
        }
    }

    fn read_class_desc(
        &mut self,
        ctx: &CapabilityContext,
        depth: usize,
    ) -> Result<Option<Arc<StreamClass>>> {
        if depth > self.limits.max_descriptor_depth {
            return Err(CodecError::ResourceExhaustion(format!(
                "superclass chain deeper than {}",
                self.limits.max_descriptor_depth
            )));
        }
        let token = Token::parse(self.source.read_u8()?)?;
        match token {
            Token::Null => Ok(None),
            Token::HandleRef => {
                let handle = self.source.read_u32()?;
                self.handles.resolve_class(handle).map(Some)
            }
            Token::NewClassDesc => self.read_plain_desc(ctx, depth).map(Some),
            Token::NewProxyClassDesc => self.read_proxy_desc(ctx, depth).map(Some),
            other => Err(CodecError::StreamFraming(format!(
                "{} token where a class descriptor is expected",
                other.name()
            ))),
        }
    }

    fn read_plain_desc(&mut self, ctx: &CapabilityContext, depth: usize) -> Result<Arc<StreamClass>> {
        let name = self.read_utf()?;
        let version_id = self.source.read_i64()?;
        let handle = self.handles.assign(HandleEntry::PendingClass)?;
        let flags = ClassFlags::from_bits(self.source.read_u8()?)?;
        let count = self.source.read_u16()?;
        self.budget
            .claim_elements(u64::from(count), FIELD_OVERHEAD, "field descriptors")?;

        let mut specs = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let tag = TypeTag::from_code(self.source.read_u8()?)?;
            let field_name = self.read_utf()?;
            let type_name = if tag.is_primitive() {
                None
            } else {
                self.read_string_value()?
            };
            specs.push(FieldSpec {
                name: Arc::from(field_name),
                tag,
                type_name,
                unshared: false,
            });
        }
        let schema = FieldSchema::from_stream(specs)?;
        self.skip_class_annotations()?;
        let superclass = self.read_class_desc(ctx, depth + 1)?.map(|c| c.desc.clone());

        let is_array = name.starts_with('[');
        if is_array && (!schema.is_empty() || superclass.is_some()) {
            return Err(CodecError::StreamFraming(format!(
                "array class {name} declares fields or a superclass"
            )));
        }
        if flags.is_enum() && !schema.is_empty() {
            return Err(CodecError::StreamFraming(format!(
                "enum class {name} declares fields"
            )));
        }
        if is_array {
            array_component(&name)?;
        }

        let desc = Arc::new(ClassDescriptor::new(name, version_id, flags, schema, superclass));
        self.finish_desc(ctx, handle, desc)
    }

    fn read_proxy_desc(&mut self, ctx: &CapabilityContext, depth: usize) -> Result<Arc<StreamClass>> {
        let handle = self.handles.assign(HandleEntry::PendingClass)?;
        let count = self.source.read_i32()?;
        if count < 0 {
            return Err(CodecError::StreamFraming(format!(
                "{}: {count} proxy interfaces",
                constants::ERR_NEGATIVE_LENGTH
            )));
        }
        let count = count as usize;
        if count > self.limits.max_proxy_interfaces {
            return Err(CodecError::ResourceExhaustion(format!(
                "proxy with {count} interfaces exceeds {}",
                self.limits.max_proxy_interfaces
            )));
        }
        let mut interfaces = Vec::with_capacity(count);
        for _ in 0..count {
            interfaces.push(self.read_utf()?);
        }
        self.skip_class_annotations()?;
        let superclass = self.read_class_desc(ctx, depth + 1)?.map(|c| c.desc.clone());
        let desc = Arc::new(ClassDescriptor::proxy(interfaces, superclass));
        self.finish_desc(ctx, handle, desc)
    }

    fn finish_desc(
        &mut self,
        ctx: &CapabilityContext,
        handle: u32,
        desc: Arc<ClassDescriptor>,
    ) -> Result<Arc<StreamClass>> {
        let chain = desc.chain();
        if chain.len() > self.limits.max_descriptor_depth {
            return Err(CodecError::ResourceExhaustion(format!(
                "superclass chain of {} has {} levels",
                desc.name(),
                chain.len()
            )));
        }
        let stream_plan: Arc<[LevelPlan]> = Arc::from(LevelPlan::stream_only(&desc));
        let resolution = if desc.is_array() {
            Ok(Resolution::Array)
        } else {
            self.resolve_type(ctx, &desc)
        };
        match &resolution {
            Ok(_) => debug!(
                class = %desc.name(),
                version = desc.version_id(),
                "resolved class descriptor"
            ),
            Err(e) => debug!(class = %desc.name(), error = %e, "class descriptor did not resolve"),
        }
        let class = Arc::new(StreamClass {
            desc,
            stream_plan,
            resolution,
        });
        self.handles.set(handle, HandleEntry::Class(class.clone()))?;
        Ok(class)
    }

    fn resolve_type(
        &self,
        ctx: &CapabilityContext,
        desc: &Arc<ClassDescriptor>,
    ) -> std::result::Result<Resolution, CodecError> {
        let resolved = if desc.is_proxy() {
            self.resolver.resolve_proxy(desc.interfaces(), ctx.loader())
        } else {
            self.resolver.resolve(desc, ctx.loader())
        };
        let ty = resolved.map_err(resolution_error)?;
        let plan = reconcile(desc, &ty, self.cache, self.limits.max_descriptor_depth)
            .map_err(resolution_error)?;
        Ok(Resolution::Type {
            ty,
            plan: Arc::from(plan),
        })
    }
}

/// Split big-endian element data into values of `N` bytes each
fn be_chunks<const N: usize, T>(raw: &[u8], f: impl Fn([u8; N]) -> T) -> Vec<T> {
    raw.chunks_exact(N)
        .map(|c| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(c);
            f(buf)
        })
        .collect()
}

/// Handle entry of a freshly allocated object or array
fn object_entry(obj: ObjRef, unshared: bool) -> HandleEntry {
    if unshared {
        HandleEntry::Unshared
    } else {
        HandleEntry::Value(Value::Ref(obj))
    }
}

fn stream_lineage(desc: &ClassDescriptor) -> Arc<[Arc<str>]> {
    Arc::from(vec![desc.name_arc().clone(), Arc::<str>::from(ANY_CLASS)])
}

/// Whether stream reference field `index` of `level` is read unshared
fn field_unshared(level: &LevelPlan, index: usize) -> bool {
    let name = match level
        .stream
        .as_ref()
        .and_then(|d| d.schema().fields().get(index))
    {
        Some(field) => field.spec.name.clone(),
        None => return false,
    };
    level
        .local
        .as_ref()
        .and_then(|l| l.desc.schema().get(&name))
        .map(|f| f.spec.unshared)
        .unwrap_or(false)
}

/// Resolver failures only fail the objects that use the descriptor
fn resolution_error(err: CodecError) -> CodecError {
    if err.is_fatal() {
        CodecError::TypeResolution(err.to_string())
    } else {
        err
    }
}

/// Errors escaping a routine leave the stream position owned by user code
fn routine_error(err: CodecError) -> CodecError {
    match err {
        CodecError::WriteAborted(_) => err,
        other => other.escalate(),
    }
}

/// [`ObjectInput`] over the block data region of one routine.
struct RoutineInput<'a, R> {
    reader: &'a mut WireReader<R>,
    ctx: &'a CapabilityContext,
    block: Bytes,
    region: bool,
}

impl<'a, R: Read> RoutineInput<'a, R> {
    fn new(reader: &'a mut WireReader<R>, ctx: &'a CapabilityContext, region: bool) -> Self {
        Self {
            reader,
            ctx,
            block: Bytes::new(),
            region,
        }
    }

    fn underflow() -> CodecError {
        CodecError::StreamFraming(constants::ERR_BLOCK_UNDERFLOW.into())
    }

    /// Load the next block data chunk of the region
    fn refill(&mut self) -> Result<()> {
        if !self.region {
            return Err(Self::underflow());
        }
        let source = &mut self.reader.source;
        let len = match Token::parse(source.peek_u8()?)? {
            Token::BlockData => {
                source.read_u8()?;
                usize::from(source.read_u8()?)
            }
            Token::BlockDataLong => {
                source.read_u8()?;
                let len = source.read_i32()?;
                if len < 0 {
                    return Err(CodecError::StreamFraming(format!(
                        "{}: block data of {len}",
                        constants::ERR_NEGATIVE_LENGTH
                    )));
                }
                len as usize
            }
            Token::Exception => {
                source.read_u8()?;
                return Err(self.reader.read_exception(self.ctx));
            }
            _ => return Err(Self::underflow()),
        };
        self.reader.budget.claim(len as u64, "block data")?;
        self.block = Bytes::from(self.reader.source.read_vec(len)?);
        Ok(())
    }

    fn fill(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            if !self.block.has_remaining() {
                self.refill()?;
                continue;
            }
            let n = self.block.remaining().min(out.len() - filled);
            self.block.copy_to_slice(&mut out[filled..filled + n]);
            filled += n;
        }
        Ok(())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    fn nested(&mut self, unshared: bool) -> Result<Value> {
        if !self.region {
            return Err(Self::underflow());
        }
        if self.block.has_remaining() {
            return Err(CodecError::StreamFraming(format!(
                "value requested with {} bytes of block data unread",
                self.block.remaining()
            )));
        }
        self.reader.read_nested(self.ctx, unshared)
    }
}

impl<R: Read> ObjectInput for RoutineInput<'_, R> {
    fn has_custom_data(&self) -> bool {
        self.region
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.array::<1>()?[0] != 0)
    }

    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.array::<1>()?[0] as i8)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    fn read_char(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(u32::from_be_bytes(self.array()?)))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(self.array()?)))
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.fill(buf)
    }

    fn read_utf(&mut self) -> Result<String> {
        let len = usize::from(u16::from_be_bytes(self.array()?));
        let mut bytes = vec![0u8; len];
        self.fill(&mut bytes)?;
        mutf8::decode(&bytes)
    }

    fn read_value(&mut self) -> Result<Value> {
        self.nested(false)
    }

    fn read_unshared(&mut self) -> Result<Value> {
        self.nested(true)
    }

    fn graph(&self) -> &Graph {
        &self.reader.graph
    }
}
