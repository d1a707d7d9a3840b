//! # Serializable Types
//!
//! A [`SerialType`] is the local description of a class: its name, version
//! id, declared fields, superclass and the hooks that build or fill an
//! instance. The reader looks types up through an injected [`TypeResolver`];
//! [`TypeRegistry`] is the stock map-based resolver.
//!
//! ## Construction strategies
//! - **Atomic**: fields of every level are gathered first and handed to
//!   `build`, which validates them and returns the finished object
//! - **Legacy**: an empty record is filled level by level, optionally through
//!   a custom `read_object` routine
//! - **Externalizable**: `new_instance` creates an empty record and
//!   `read_external` consumes a block data region
//! - **Enum** and **Proxy** are canonical values with no user construction

use crate::core::descriptor::ClassDescriptor;
use crate::core::field::FieldSpec;
use crate::core::field_source::{AtomicFields, FieldSource};
use crate::core::graph::{Object, Proxy, Record, Value, PROXY_CLASS};
use crate::core::object_io::{ObjectInput, ObjectOutput};
use crate::error::{constants, CodecError, Result};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Shared handle to a local type
pub type RuntimeType = Arc<dyn SerialType>;

/// How instances of a type are created from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Atomic,
    Legacy,
    Externalizable,
    Enum,
    Proxy,
}

/// Result of a resolve hook.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Keep this object in the slot that was reserved for the instance
    Object(Object),
    /// Substitute another value for the instance
    Value(Value),
}

/// Local type known to the codec.
pub trait SerialType: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn version_id(&self) -> i64;

    fn strategy(&self) -> Strategy;

    /// Serializable fields declared by this level only
    fn fields(&self) -> &[FieldSpec] {
        &[]
    }

    fn superclass(&self) -> Option<RuntimeType> {
        None
    }

    fn has_custom_read(&self) -> bool {
        false
    }

    fn has_custom_write(&self) -> bool {
        false
    }

    fn has_resolve(&self) -> bool {
        false
    }

    fn enum_constants(&self) -> &[String] {
        &[]
    }

    fn interfaces(&self) -> &[String] {
        &[]
    }

    /// Atomic construction from gathered fields
    fn build(&self, fields: &AtomicFields<'_>) -> Result<Object> {
        let _ = fields;
        Err(CodecError::InvariantViolation(format!(
            "{}: {}",
            constants::ERR_NO_BUILDER,
            self.name()
        )))
    }

    /// Custom read routine for this level of a legacy object
    fn read_object(
        &self,
        fields: &FieldSource,
        input: &mut dyn ObjectInput,
        record: &mut Record,
    ) -> Result<()> {
        let _ = input;
        fields.copy_into(record);
        Ok(())
    }

    /// Custom write routine for this level, run after the default fields
    fn write_object(&self, record: &Record, output: &mut dyn ObjectOutput) -> Result<()> {
        let _ = (record, output);
        Ok(())
    }

    /// Empty instance for externalizable construction
    fn new_instance(&self) -> Result<Record> {
        Err(CodecError::InvariantViolation(format!(
            "{}: {}",
            constants::ERR_NO_INSTANCE,
            self.name()
        )))
    }

    fn read_external(&self, record: &mut Record, input: &mut dyn ObjectInput) -> Result<()> {
        let _ = (record, input);
        Ok(())
    }

    fn write_external(&self, record: &Record, output: &mut dyn ObjectOutput) -> Result<()> {
        let _ = (record, output);
        Ok(())
    }

    /// Substitution hook run once the instance is complete
    fn read_resolve(&self, object: Object) -> Result<Resolved> {
        Ok(Resolved::Object(object))
    }
}

type BuildFn = dyn Fn(&AtomicFields<'_>) -> Result<Object> + Send + Sync;
type ReadFn = dyn Fn(&FieldSource, &mut dyn ObjectInput, &mut Record) -> Result<()> + Send + Sync;
type WriteFn = dyn Fn(&Record, &mut dyn ObjectOutput) -> Result<()> + Send + Sync;
type ExternalReadFn = dyn Fn(&mut Record, &mut dyn ObjectInput) -> Result<()> + Send + Sync;
type ResolveFn = dyn Fn(Object) -> Result<Resolved> + Send + Sync;

/// Data-driven [`SerialType`] whose hooks are closures.
///
/// ```rust
/// use object_wire::core::field::FieldSpec;
/// use object_wire::core::graph::{Object, Record};
/// use object_wire::core::types::{RecordType, SerialType};
///
/// let point = RecordType::atomic("demo.Point", 1)
///     .field(FieldSpec::int("x"))
///     .field(FieldSpec::int("y"))
///     .build_with(|f| {
///         let x = f.get_i32("x", 0)?;
///         let y = f.get_i32("y", 0)?;
///         Ok(Object::Record(Record::new("demo.Point").with("x", x).with("y", y)))
///     })
///     .finish();
/// assert_eq!(point.name(), "demo.Point");
/// ```
pub struct RecordType {
    name: Arc<str>,
    version_id: i64,
    strategy: Strategy,
    fields: Vec<FieldSpec>,
    superclass: Option<RuntimeType>,
    build: Option<Arc<BuildFn>>,
    read: Option<Arc<ReadFn>>,
    write: Option<Arc<WriteFn>>,
    external_read: Option<Arc<ExternalReadFn>>,
    external_write: Option<Arc<WriteFn>>,
    resolve: Option<Arc<ResolveFn>>,
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordType")
            .field("name", &self.name)
            .field("version_id", &self.version_id)
            .field("strategy", &self.strategy)
            .field("fields", &self.fields)
            .field("superclass", &self.superclass.as_ref().map(|s| s.name().to_string()))
            .field("custom_read", &self.read.is_some())
            .field("custom_write", &self.write.is_some())
            .finish()
    }
}

impl RecordType {
    fn builder(name: &str, version_id: i64, strategy: Strategy) -> RecordTypeBuilder {
        RecordTypeBuilder {
            inner: RecordType {
                name: Arc::from(name),
                version_id,
                strategy,
                fields: Vec::new(),
                superclass: None,
                build: None,
                read: None,
                write: None,
                external_read: None,
                external_write: None,
                resolve: None,
            },
        }
    }

    /// Type built in one step from its gathered fields
    pub fn atomic(name: &str, version_id: i64) -> RecordTypeBuilder {
        Self::builder(name, version_id, Strategy::Atomic)
    }

    /// Type filled in place level by level
    pub fn legacy(name: &str, version_id: i64) -> RecordTypeBuilder {
        Self::builder(name, version_id, Strategy::Legacy)
    }

    /// Type that reads and writes its own block data
    pub fn externalizable(name: &str, version_id: i64) -> RecordTypeBuilder {
        Self::builder(name, version_id, Strategy::Externalizable)
    }
}

/// Builder for [`RecordType`].
pub struct RecordTypeBuilder {
    inner: RecordType,
}

impl RecordTypeBuilder {
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.inner.fields.push(spec);
        self
    }

    pub fn extends(mut self, superclass: RuntimeType) -> Self {
        self.inner.superclass = Some(superclass);
        self
    }

    pub fn build_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&AtomicFields<'_>) -> Result<Object> + Send + Sync + 'static,
    {
        self.inner.build = Some(Arc::new(f));
        self
    }

    pub fn read_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&FieldSource, &mut dyn ObjectInput, &mut Record) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.read = Some(Arc::new(f));
        self
    }

    pub fn write_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record, &mut dyn ObjectOutput) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.write = Some(Arc::new(f));
        self
    }

    pub fn external<R, W>(mut self, read: R, write: W) -> Self
    where
        R: Fn(&mut Record, &mut dyn ObjectInput) -> Result<()> + Send + Sync + 'static,
        W: Fn(&Record, &mut dyn ObjectOutput) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.external_read = Some(Arc::new(read));
        self.inner.external_write = Some(Arc::new(write));
        self
    }

    pub fn resolve_with<F>(mut self, f: F) -> Self
    where
        F: Fn(Object) -> Result<Resolved> + Send + Sync + 'static,
    {
        self.inner.resolve = Some(Arc::new(f));
        self
    }

    pub fn finish(self) -> RuntimeType {
        Arc::new(self.inner)
    }
}

impl SerialType for RecordType {
    fn name(&self) -> &str {
        &self.name
    }

    fn version_id(&self) -> i64 {
        self.version_id
    }

    fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    fn superclass(&self) -> Option<RuntimeType> {
        self.superclass.clone()
    }

    fn has_custom_read(&self) -> bool {
        self.read.is_some()
    }

    fn has_custom_write(&self) -> bool {
        self.write.is_some()
    }

    fn has_resolve(&self) -> bool {
        self.resolve.is_some()
    }

    fn build(&self, fields: &AtomicFields<'_>) -> Result<Object> {
        match &self.build {
            Some(build) => build(fields),
            None => Ok(Object::Record(fields.to_record())),
        }
    }

    fn read_object(
        &self,
        fields: &FieldSource,
        input: &mut dyn ObjectInput,
        record: &mut Record,
    ) -> Result<()> {
        match &self.read {
            Some(read) => read(fields, input, record),
            None => {
                fields.copy_into(record);
                Ok(())
            }
        }
    }

    fn write_object(&self, record: &Record, output: &mut dyn ObjectOutput) -> Result<()> {
        match &self.write {
            Some(write) => write(record, output),
            None => Ok(()),
        }
    }

    fn new_instance(&self) -> Result<Record> {
        match self.strategy {
            Strategy::Externalizable | Strategy::Legacy => Ok(Record::new(self.name.clone())),
            _ => Err(CodecError::InvariantViolation(format!(
                "{}: {}",
                constants::ERR_NO_INSTANCE,
                self.name
            ))),
        }
    }

    fn read_external(&self, record: &mut Record, input: &mut dyn ObjectInput) -> Result<()> {
        match &self.external_read {
            Some(read) => read(record, input),
            None => Ok(()),
        }
    }

    fn write_external(&self, record: &Record, output: &mut dyn ObjectOutput) -> Result<()> {
        match &self.external_write {
            Some(write) => write(record, output),
            None => Ok(()),
        }
    }

    fn read_resolve(&self, object: Object) -> Result<Resolved> {
        match &self.resolve {
            Some(resolve) => resolve(object),
            None => Ok(Resolved::Object(object)),
        }
    }
}

/// Enum type with a fixed list of constant names.
#[derive(Debug, Clone)]
pub struct EnumType {
    name: Arc<str>,
    constants: Vec<String>,
}

impl EnumType {
    pub fn new<I, S>(name: &str, constants: I) -> RuntimeType
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            name: Arc::from(name),
            constants: constants.into_iter().map(Into::into).collect(),
        })
    }
}

impl SerialType for EnumType {
    fn name(&self) -> &str {
        &self.name
    }

    fn version_id(&self) -> i64 {
        0
    }

    fn strategy(&self) -> Strategy {
        Strategy::Enum
    }

    fn enum_constants(&self) -> &[String] {
        &self.constants
    }
}

static PROXY_BASE: Lazy<RuntimeType> = Lazy::new(|| {
    RecordType::atomic(PROXY_CLASS, 0)
        .field(FieldSpec::any("handler"))
        .finish()
});

/// Name a proxy class is known by for the given interface list
pub fn proxy_class_name(interfaces: &[String]) -> String {
    format!("$Proxy({})", interfaces.join(","))
}

/// Dynamic proxy class implementing a list of interfaces.
#[derive(Debug, Clone)]
pub struct ProxyType {
    name: Arc<str>,
    interfaces: Vec<String>,
}

impl ProxyType {
    pub fn new(interfaces: &[String]) -> RuntimeType {
        Arc::new(Self {
            name: Arc::from(proxy_class_name(interfaces)),
            interfaces: interfaces.to_vec(),
        })
    }

    /// Superclass shared by every proxy; holds the invocation handler
    pub fn base() -> RuntimeType {
        Arc::clone(&PROXY_BASE)
    }
}

impl SerialType for ProxyType {
    fn name(&self) -> &str {
        &self.name
    }

    fn version_id(&self) -> i64 {
        0
    }

    fn strategy(&self) -> Strategy {
        Strategy::Proxy
    }

    fn superclass(&self) -> Option<RuntimeType> {
        Some(Self::base())
    }

    fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    fn build(&self, fields: &AtomicFields<'_>) -> Result<Object> {
        let handler = fields.get_object("handler", Value::Null)?;
        Ok(Object::Proxy(Proxy {
            interfaces: self.interfaces.clone(),
            handler,
        }))
    }
}

/// Caller-supplied context for type resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderContext {
    /// Namespace the resolver may use to scope lookups
    pub namespace: Option<String>,
}

impl LoaderContext {
    pub fn named(namespace: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
        }
    }
}

/// Maps stream descriptors to local types.
pub trait TypeResolver: Send + Sync {
    fn resolve(&self, desc: &ClassDescriptor, loader: &LoaderContext) -> Result<RuntimeType>;

    fn resolve_proxy(&self, interfaces: &[String], loader: &LoaderContext) -> Result<RuntimeType> {
        let _ = loader;
        Err(CodecError::TypeResolution(format!(
            "proxy classes are not supported: {}",
            interfaces.join(",")
        )))
    }

    /// Type registered under `name`; used by the writer
    fn lookup(&self, name: &str) -> Option<RuntimeType>;
}

/// Map-based [`TypeResolver`].
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, RuntimeType>,
    proxy_interfaces: HashSet<String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that already knows the surrogate types and the proxy base
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for ty in crate::core::surrogate::builtin_types() {
            registry.register(ty);
        }
        registry.register(ProxyType::base());
        registry
    }

    /// Register `ty` and every superclass not yet known.
    /// The walk stops at the first ancestor already registered.
    pub fn register(&mut self, ty: RuntimeType) -> &mut Self {
        let mut next = Some(ty);
        while let Some(ty) = next {
            if self.types.contains_key(ty.name()) {
                break;
            }
            next = ty.superclass();
            self.types.insert(ty.name().to_string(), ty);
        }
        self
    }

    pub fn with(mut self, ty: RuntimeType) -> Self {
        self.register(ty);
        self
    }

    /// Permit proxies that implement `interface`
    pub fn allow_proxy_interface(&mut self, interface: &str) -> &mut Self {
        self.proxy_interfaces.insert(interface.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl TypeResolver for TypeRegistry {
    fn resolve(&self, desc: &ClassDescriptor, loader: &LoaderContext) -> Result<RuntimeType> {
        self.types.get(desc.name()).cloned().ok_or_else(|| {
            CodecError::TypeResolution(match &loader.namespace {
                Some(ns) => format!("unknown class {} in {}", desc.name(), ns),
                None => format!("unknown class {}", desc.name()),
            })
        })
    }

    fn resolve_proxy(&self, interfaces: &[String], _loader: &LoaderContext) -> Result<RuntimeType> {
        if let Some(missing) = interfaces
            .iter()
            .find(|i| !self.proxy_interfaces.contains(i.as_str()))
        {
            return Err(CodecError::TypeResolution(format!(
                "proxy interface {missing} is not allowed"
            )));
        }
        Ok(ProxyType::new(interfaces))
    }

    fn lookup(&self, name: &str) -> Option<RuntimeType> {
        self.types.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::FieldSchema;
    use crate::core::graph::Graph;

    #[test]
    fn test_builder_flags() {
        let plain = RecordType::legacy("demo.Plain", 1).field(FieldSpec::int("x")).finish();
        assert_eq!(plain.strategy(), Strategy::Legacy);
        assert!(!plain.has_custom_read());
        assert!(!plain.has_custom_write());

        let custom = RecordType::legacy("demo.Custom", 1)
            .read_with(|f, _in, r| {
                f.copy_into(r);
                Ok(())
            })
            .write_with(|_r, _out| Ok(()))
            .finish();
        assert!(custom.has_custom_read());
        assert!(custom.has_custom_write());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_default_atomic_build_copies_fields() {
        let ty = RecordType::atomic("demo.P", 1).field(FieldSpec::int("x")).finish();
        let schema = FieldSchema::sorted(ty.fields()).unwrap();
        let levels = vec![FieldSource::reconcile(
            Arc::from("demo.P"),
            &schema,
            &schema,
            &[Value::Int(4)],
        )
        .unwrap()];
        let graph = Graph::new();
        let object = ty.build(&AtomicFields::new("demo.P", &levels, &graph)).unwrap();
        assert_eq!(
            object.as_record().and_then(|r| r.get("x")),
            Some(&Value::Int(4))
        );
    }

    #[test]
    fn test_registry_registers_superclasses() {
        let base = RecordType::legacy("demo.Base", 1).finish();
        let sub = RecordType::legacy("demo.Sub", 1).extends(base).finish();
        let registry = TypeRegistry::new().with(sub);
        assert!(registry.lookup("demo.Base").is_some());
        assert!(registry.lookup("demo.Sub").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_proxy_resolution_requires_allowed_interfaces() {
        let mut registry = TypeRegistry::new();
        registry.allow_proxy_interface("demo.Greeter");
        let loader = LoaderContext::default();
        assert!(registry
            .resolve_proxy(&["demo.Greeter".to_string()], &loader)
            .is_ok());
        assert!(registry
            .resolve_proxy(&["demo.Other".to_string()], &loader)
            .is_err());
    }

    #[test]
    fn test_externalizable_new_instance() {
        let ty = RecordType::externalizable("demo.Ext", 3).finish();
        assert!(ty.new_instance().is_ok());
        let atomic = RecordType::atomic("demo.A", 1).finish();
        assert!(atomic.new_instance().is_err());
    }
}
