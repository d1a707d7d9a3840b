//! # Class Descriptors
//!
//! A [`ClassDescriptor`] is the wire-level description of one class:
//! name, version id, flags, ordered field layout and superclass link.
//!
//! Descriptors come from two places. Stream descriptors are read from the
//! wire and say how the sender laid out an object. Local descriptors are
//! derived from a [`RuntimeType`] and cached process-wide in
//! [`DescriptorCache`]; the writer emits them and the reader reconciles the
//! stream chain against them level by level.

use crate::core::field::{FieldSchema, TypeTag};
use crate::core::token::ClassFlags;
use crate::core::types::{proxy_class_name, RuntimeType, SerialType, Strategy};
use crate::error::{CodecError, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tracing::debug;

/// Wire-level description of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDescriptor {
    name: Arc<str>,
    version_id: i64,
    flags: ClassFlags,
    schema: FieldSchema,
    /// Interfaces of a proxy class; `None` for ordinary classes
    interfaces: Option<Vec<String>>,
    superclass: Option<Arc<ClassDescriptor>>,
}

impl ClassDescriptor {
    pub fn new(
        name: impl Into<Arc<str>>,
        version_id: i64,
        flags: ClassFlags,
        schema: FieldSchema,
        superclass: Option<Arc<ClassDescriptor>>,
    ) -> Self {
        Self {
            name: name.into(),
            version_id,
            flags,
            schema,
            interfaces: None,
            superclass,
        }
    }

    /// Proxy class descriptor; its superclass is the proxy base
    pub fn proxy(interfaces: Vec<String>, superclass: Option<Arc<ClassDescriptor>>) -> Self {
        Self {
            name: Arc::from(proxy_class_name(&interfaces)),
            version_id: 0,
            flags: ClassFlags::new(ClassFlags::SERIALIZABLE),
            schema: FieldSchema::default(),
            interfaces: Some(interfaces),
            superclass,
        }
    }

    /// Descriptor of an array class such as `[I`
    pub fn array(name: &str) -> Result<Self> {
        array_component(name)?;
        Ok(Self::new(
            name,
            0,
            ClassFlags::new(ClassFlags::SERIALIZABLE),
            FieldSchema::default(),
            None,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    pub fn version_id(&self) -> i64 {
        self.version_id
    }

    pub fn flags(&self) -> ClassFlags {
        self.flags
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn superclass(&self) -> Option<&Arc<ClassDescriptor>> {
        self.superclass.as_ref()
    }

    pub fn is_proxy(&self) -> bool {
        self.interfaces.is_some()
    }

    pub fn interfaces(&self) -> &[String] {
        self.interfaces.as_deref().unwrap_or(&[])
    }

    pub fn is_array(&self) -> bool {
        self.name.starts_with('[')
    }

    /// Chain from the root ancestor down to this descriptor
    pub fn chain(self: &Arc<Self>) -> Vec<Arc<ClassDescriptor>> {
        let mut chain = vec![self.clone()];
        let mut next = self.superclass.clone();
        while let Some(desc) = next {
            next = desc.superclass.clone();
            chain.push(desc);
        }
        chain.reverse();
        chain
    }

    /// Number of levels from this descriptor up to its root ancestor
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut next = self.superclass.as_deref();
        while let Some(desc) = next {
            depth += 1;
            next = desc.superclass.as_deref();
        }
        depth
    }

    /// Derive the local descriptor chain of `ty` without caching.
    /// Chains longer than `max_depth` levels are refused.
    pub fn derive(ty: &RuntimeType, max_depth: usize) -> Result<Arc<ClassDescriptor>> {
        let mut chain = Vec::new();
        let mut next = Some(ty.clone());
        while let Some(ty) = next {
            if chain.len() >= max_depth {
                return Err(CodecError::TypeResolution(format!(
                    "superclass chain of {} is too deep",
                    chain
                        .first()
                        .map(|t: &RuntimeType| t.name().to_string())
                        .unwrap_or_default()
                )));
            }
            next = ty.superclass();
            chain.push(ty);
        }

        let mut superclass: Option<Arc<ClassDescriptor>> = None;
        for ty in chain.iter().rev() {
            let desc = match ty.strategy() {
                Strategy::Proxy => ClassDescriptor::proxy(ty.interfaces().to_vec(), superclass),
                strategy => {
                    let mut flags = match strategy {
                        Strategy::Externalizable => ClassFlags::new(
                            ClassFlags::EXTERNALIZABLE | ClassFlags::BLOCK_DATA,
                        ),
                        Strategy::Enum => {
                            ClassFlags::new(ClassFlags::SERIALIZABLE | ClassFlags::ENUM)
                        }
                        _ => ClassFlags::new(ClassFlags::SERIALIZABLE),
                    };
                    if ty.has_custom_write() && strategy != Strategy::Externalizable {
                        flags = flags.with(ClassFlags::WRITE_METHOD);
                    }
                    let schema = match strategy {
                        Strategy::Externalizable | Strategy::Enum => FieldSchema::default(),
                        _ => FieldSchema::sorted(ty.fields())?,
                    };
                    ClassDescriptor::new(ty.name(), ty.version_id(), flags, schema, superclass)
                }
            };
            superclass = Some(Arc::new(desc));
        }
        superclass.ok_or_else(|| CodecError::TypeResolution("empty type chain".into()))
    }
}

/// Component type of an array class name
pub fn array_component(name: &str) -> Result<TypeTag> {
    let bytes = name.as_bytes();
    let invalid = || CodecError::StreamFraming(format!("invalid array class name {name}"));
    if bytes.len() < 2 || bytes[0] != b'[' {
        return Err(invalid());
    }
    let tag = TypeTag::from_code(bytes[1]).map_err(|_| invalid())?;
    if tag == TypeTag::Object && !(name.len() > 3 && name.ends_with(';')) {
        return Err(invalid());
    }
    if tag.is_primitive() && bytes.len() != 2 {
        return Err(invalid());
    }
    Ok(tag)
}

/// Identity of a resolved type: the address of its shared allocation
type CacheKey = usize;

fn cache_key(ty: &RuntimeType) -> CacheKey {
    Arc::as_ptr(ty) as *const () as usize
}

struct CacheEntry {
    /// Keeps the allocation, and so the key, from being reused while cached
    ty: Weak<dyn SerialType>,
    desc: Arc<ClassDescriptor>,
}

impl CacheEntry {
    fn is_live(&self) -> bool {
        self.ty.strong_count() > 0
    }
}

/// Entry count at which dead entries are first swept
const SWEEP_THRESHOLD: usize = 64;

/// Process-wide cache of local descriptors.
///
/// Entries are keyed by type identity, not by name: two distinct types that
/// share a name and version id get their own descriptors. An entry lives as
/// long as its type does; entries of dropped types are swept on insert.
#[derive(Default)]
pub struct DescriptorCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl std::fmt::Debug for DescriptorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCache")
            .field("entries", &self.len())
            .finish()
    }
}

static GLOBAL_CACHE: Lazy<DescriptorCache> = Lazy::new(DescriptorCache::new);

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static DescriptorCache {
        &GLOBAL_CACHE
    }

    /// Local descriptor for `ty`, deriving it on first use.
    /// A chain deeper than `max_depth` is refused even when cached.
    pub fn lookup(&self, ty: &RuntimeType, max_depth: usize) -> Result<Arc<ClassDescriptor>> {
        let key = cache_key(ty);
        let cached = {
            let entries = self.entries.read().map_err(|_| {
                CodecError::TypeResolution("descriptor cache lock poisoned".into())
            })?;
            entries
                .get(&key)
                .filter(|e| e.is_live())
                .map(|e| e.desc.clone())
        };
        if let Some(desc) = cached {
            if desc.depth() > max_depth {
                return Err(CodecError::TypeResolution(format!(
                    "superclass chain of {} is too deep",
                    desc.name()
                )));
            }
            return Ok(desc);
        }

        let derived = ClassDescriptor::derive(ty, max_depth)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CodecError::TypeResolution("descriptor cache lock poisoned".into()))?;
        if entries.len() >= SWEEP_THRESHOLD && entries.len().is_power_of_two() {
            entries.retain(|_, e| e.is_live());
        }
        let entry = entries
            .entry(key)
            .and_modify(|e| {
                if !e.is_live() {
                    *e = CacheEntry {
                        ty: Arc::downgrade(ty),
                        desc: derived.clone(),
                    };
                }
            })
            .or_insert_with(|| CacheEntry {
                ty: Arc::downgrade(ty),
                desc: derived.clone(),
            });
        let desc = entry.desc.clone();
        debug!(class = %desc.name(), version = desc.version_id(), "cached local descriptor");
        Ok(desc)
    }

    /// Number of entries whose type is still alive
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|e| e.values().filter(|e| e.is_live()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One local hierarchy level: the type and its descriptor.
#[derive(Debug, Clone)]
pub struct LocalLevel {
    pub ty: RuntimeType,
    pub desc: Arc<ClassDescriptor>,
}

/// One level of a reconciled hierarchy.
#[derive(Debug, Clone)]
pub struct LevelPlan {
    /// Stream layout of the level; `None` when only the local type has it
    pub stream: Option<Arc<ClassDescriptor>>,
    /// Local type of the level; `None` when only the stream has it
    pub local: Option<LocalLevel>,
}

impl LevelPlan {
    /// Plan that consumes the stream layout and ignores every value
    pub fn stream_only(desc: &Arc<ClassDescriptor>) -> Vec<LevelPlan> {
        desc.chain()
            .into_iter()
            .map(|d| LevelPlan {
                stream: Some(d),
                local: None,
            })
            .collect()
    }

    /// Bytes one object with this plan claims from the budget
    pub fn claim(plan: &[LevelPlan]) -> u64 {
        plan.iter()
            .filter_map(|l| l.stream.as_ref())
            .map(|d| d.schema().claim())
            .sum()
    }
}

/// Local type chain of `ty`, most derived first
fn local_chain(
    ty: &RuntimeType,
    cache: &DescriptorCache,
    max_depth: usize,
) -> Result<Vec<LocalLevel>> {
    let mut levels = Vec::new();
    let mut next = Some(ty.clone());
    while let Some(ty) = next {
        if levels.len() >= max_depth {
            return Err(CodecError::TypeResolution(format!(
                "superclass chain of {} is too deep",
                ty.name()
            )));
        }
        next = ty.superclass();
        let desc = cache.lookup(&ty, max_depth)?;
        levels.push(LocalLevel { ty, desc });
    }
    Ok(levels)
}

/// Pair the stream chain of `stream` with the local chain of `ty`.
///
/// The leaf levels are always paired; ancestors pair by class name. Paired
/// levels must agree on version id and on the types of shared fields.
/// The returned plan is ordered from the root ancestor down.
pub fn reconcile(
    stream: &Arc<ClassDescriptor>,
    ty: &RuntimeType,
    cache: &DescriptorCache,
    max_depth: usize,
) -> Result<Vec<LevelPlan>> {
    let locals = local_chain(ty, cache, max_depth)?;
    let mut streams = stream.chain();
    streams.reverse();

    let mut plan = Vec::with_capacity(locals.len().max(streams.len()));
    let mut si = 0usize;
    for (li, local) in locals.into_iter().enumerate() {
        let matched = if li == 0 {
            if streams.is_empty() {
                None
            } else {
                Some(0)
            }
        } else {
            streams[si..]
                .iter()
                .position(|s| s.name() == local.desc.name())
                .map(|p| si + p)
        };
        match matched {
            Some(at) => {
                for skipped in &streams[si..at] {
                    plan.push(LevelPlan {
                        stream: Some(skipped.clone()),
                        local: None,
                    });
                }
                let remote = streams[at].clone();
                check_level(&remote, &local.desc)?;
                plan.push(LevelPlan {
                    stream: Some(remote),
                    local: Some(local),
                });
                si = at + 1;
            }
            None => plan.push(LevelPlan {
                stream: None,
                local: Some(local),
            }),
        }
    }
    for rest in &streams[si..] {
        plan.push(LevelPlan {
            stream: Some(rest.clone()),
            local: None,
        });
    }
    plan.reverse();
    Ok(plan)
}

/// Version and shape agreement of one paired level
fn check_level(stream: &ClassDescriptor, local: &ClassDescriptor) -> Result<()> {
    if stream.is_proxy() != local.is_proxy() {
        return Err(CodecError::IncompatibleClass(format!(
            "{}: proxy and non-proxy descriptors do not match",
            local.name()
        )));
    }
    if !stream.is_proxy() && stream.version_id() != local.version_id() {
        return Err(CodecError::VersionMismatch {
            class: local.name().to_string(),
            stream: stream.version_id(),
            local: local.version_id(),
        });
    }
    let (sf, lf) = (stream.flags(), local.flags());
    if sf.is_externalizable() != lf.is_externalizable() {
        return Err(CodecError::IncompatibleClass(format!(
            "{}: externalizable flag does not match",
            local.name()
        )));
    }
    if sf.is_enum() != lf.is_enum() {
        return Err(CodecError::IncompatibleClass(format!(
            "{}: enum flag does not match",
            local.name()
        )));
    }
    for field in local.schema().fields() {
        if let Some(remote) = stream.schema().get(&field.spec.name) {
            let (a, b) = (remote.spec.tag, field.spec.tag);
            let ok = if a.is_primitive() || b.is_primitive() {
                a == b
            } else {
                true
            };
            if !ok {
                return Err(CodecError::IncompatibleClass(format!(
                    "{}.{}: stream type {} does not match local type {}",
                    local.name(),
                    field.spec.name,
                    a.code() as char,
                    b.code() as char
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::FieldSpec;
    use crate::config::DEFAULT_MAX_DESCRIPTOR_DEPTH as DEPTH;
    use crate::core::types::{EnumType, RecordType};

    fn hierarchy() -> RuntimeType {
        let base = RecordType::legacy("test.desc.Base", 1)
            .field(FieldSpec::int("id"))
            .finish();
        RecordType::legacy("test.desc.Sub", 2)
            .field(FieldSpec::any("name"))
            .field(FieldSpec::long("stamp"))
            .extends(base)
            .write_with(|_, _| Ok(()))
            .finish()
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_derive_local_descriptor() {
        let desc = ClassDescriptor::derive(&hierarchy(), DEPTH).unwrap();
        assert_eq!(desc.name(), "test.desc.Sub");
        assert!(desc.flags().has_write_method());
        assert!(desc.flags().is_serializable());
        assert_eq!(desc.schema().fields()[0].spec.name.as_ref(), "stamp");
        let chain = desc.chain();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name(), "test.desc.Base");
        assert!(!chain[0].flags().has_write_method());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_cache_returns_same_descriptor() {
        let cache = DescriptorCache::new();
        let ty = hierarchy();
        let a = cache.lookup(&ty, DEPTH).unwrap();
        let b = cache.lookup(&ty, DEPTH).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_cache_separates_same_named_types() {
        let cache = DescriptorCache::new();
        let first = RecordType::atomic("test.desc.Twin", 1)
            .field(FieldSpec::int("a"))
            .finish();
        let second = RecordType::atomic("test.desc.Twin", 1)
            .field(FieldSpec::long("b"))
            .finish();

        let a = cache.lookup(&first, DEPTH).unwrap();
        let b = cache.lookup(&second, DEPTH).unwrap();
        assert!(a.schema().get("a").is_some());
        assert!(b.schema().get("b").is_some());
        assert!(b.schema().get("a").is_none());
        assert_eq!(cache.len(), 2);

        drop(first);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_configured_depth_limits_chain() {
        let cache = DescriptorCache::new();
        let ty = hierarchy();
        assert!(matches!(
            ClassDescriptor::derive(&ty, 1),
            Err(CodecError::TypeResolution(m)) if m.contains("too deep")
        ));
        assert_eq!(cache.lookup(&ty, 2).unwrap().depth(), 2);
        // a cached chain is still checked against a tighter limit
        assert!(cache.lookup(&ty, 1).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_reconcile_pairs_by_name() {
        let cache = DescriptorCache::new();
        let ty = hierarchy();
        let local = ClassDescriptor::derive(&ty, DEPTH).unwrap();

        // stream has an extra middle level and lacks nothing else
        let base = local.superclass().unwrap().clone();
        let middle = Arc::new(ClassDescriptor::new(
            "test.desc.Middle",
            7,
            ClassFlags::new(ClassFlags::SERIALIZABLE),
            FieldSchema::default(),
            Some(base),
        ));
        let leaf = Arc::new(ClassDescriptor::new(
            "test.desc.Sub",
            2,
            local.flags(),
            local.schema().clone(),
            Some(middle),
        ));

        let plan = reconcile(&leaf, &ty, &cache, DEPTH).unwrap();
        let shape: Vec<(bool, bool)> = plan
            .iter()
            .map(|l| (l.stream.is_some(), l.local.is_some()))
            .collect();
        assert_eq!(shape, [(true, true), (true, false), (true, true)]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_reconcile_local_only_level() {
        let cache = DescriptorCache::new();
        let ty = hierarchy();
        let local = ClassDescriptor::derive(&ty, DEPTH).unwrap();
        let leaf = Arc::new(ClassDescriptor::new(
            "test.desc.Sub",
            2,
            local.flags(),
            local.schema().clone(),
            None,
        ));
        let plan = reconcile(&leaf, &ty, &cache, DEPTH).unwrap();
        assert!(plan[0].stream.is_none());
        assert!(plan[0].local.is_some());
    }

    #[test]
    fn test_reconcile_version_mismatch() {
        let cache = DescriptorCache::new();
        let ty = hierarchy();
        let leaf = Arc::new(ClassDescriptor::new(
            "test.desc.Sub",
            99,
            ClassFlags::new(ClassFlags::SERIALIZABLE),
            FieldSchema::default(),
            None,
        ));
        assert!(matches!(
            reconcile(&leaf, &ty, &cache, DEPTH),
            Err(CodecError::VersionMismatch { stream: 99, local: 2, .. })
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_enum_descriptor_flags() {
        let color = EnumType::new("test.desc.Color", ["RED"]);
        let desc = ClassDescriptor::derive(&color, DEPTH).unwrap();
        assert!(desc.flags().is_enum());
        assert!(desc.schema().is_empty());
    }

    #[test]
    fn test_array_component() {
        assert_eq!(array_component("[I").ok(), Some(TypeTag::Int));
        assert_eq!(array_component("[Ldemo.Node;").ok(), Some(TypeTag::Object));
        assert_eq!(array_component("[[I").ok(), Some(TypeTag::Array));
        assert!(array_component("[Q").is_err());
        assert!(array_component("[Lx").is_err());
        assert!(array_component("I").is_err());
    }
}
