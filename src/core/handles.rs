//! Handle bookkeeping for both directions of the stream.
//!
//! Handles are assigned in appearance order starting at
//! [`BASE_HANDLE`](crate::config::BASE_HANDLE). The reader keeps a table from
//! handle to value; the writer keeps the inverse map from identity to handle.
//! Both sides must assign handles for exactly the same tokens.

use crate::config::BASE_HANDLE;
use crate::core::descriptor::{ClassDescriptor, LevelPlan};
use crate::core::graph::{ObjRef, Value};
use crate::core::types::RuntimeType;
use crate::error::{constants, CodecError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Local binding of a stream descriptor.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Resolved to a local type with a reconciled level plan
    Type {
        ty: RuntimeType,
        plan: Arc<[LevelPlan]>,
    },
    /// Array class; no type lookup is needed
    Array,
}

/// Stream descriptor with its resolution outcome.
#[derive(Debug)]
pub struct StreamClass {
    pub desc: Arc<ClassDescriptor>,
    /// Plan that consumes the stream layout without constructing anything
    pub stream_plan: Arc<[LevelPlan]>,
    /// Resolution failures are object-level; they are reported per use
    pub resolution: std::result::Result<Resolution, CodecError>,
}

/// What a reader handle refers to.
#[derive(Debug, Clone)]
pub enum HandleEntry {
    Value(Value),
    Class(Arc<StreamClass>),
    /// Descriptor whose definition is still being read
    PendingClass,
    /// Value read unshared; any back-reference is illegal
    Unshared,
    /// Object that was denied or failed; back-references read as null
    Discarded,
    /// Object of an arena the caller has taken; back-references read as null
    Detached,
}

/// Reader side: handle to entry.
#[derive(Debug)]
pub struct HandleTable {
    entries: Vec<HandleEntry>,
    max: usize,
}

impl HandleTable {
    pub fn new(max: usize) -> Self {
        Self {
            entries: Vec::new(),
            max,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handle the next `assign` will return
    pub fn next_handle(&self) -> u32 {
        BASE_HANDLE + self.entries.len() as u32
    }

    /// Assign the next handle to `entry`
    pub fn assign(&mut self, entry: HandleEntry) -> Result<u32> {
        if self.entries.len() >= self.max {
            return Err(CodecError::ResourceExhaustion(format!(
                "{} ({})",
                constants::ERR_HANDLE_LIMIT,
                self.max
            )));
        }
        let handle = self.next_handle();
        self.entries.push(entry);
        debug!(handle, "assigned handle");
        Ok(handle)
    }

    /// Replace the entry of an assigned handle
    pub fn set(&mut self, handle: u32, entry: HandleEntry) -> Result<()> {
        let index = Self::index(handle)?;
        match self.entries.get_mut(index) {
            Some(slot) => {
                *slot = entry;
                Ok(())
            }
            None => Err(CodecError::IllegalReference(format!(
                "handle {handle:#x} was never assigned"
            ))),
        }
    }

    /// Record the finished value of an object handle
    pub fn finish(&mut self, handle: u32, value: Value, unshared: bool) -> Result<()> {
        if unshared {
            return Ok(());
        }
        self.set(handle, HandleEntry::Value(value))
    }

    fn index(handle: u32) -> Result<usize> {
        handle
            .checked_sub(BASE_HANDLE)
            .map(|i| i as usize)
            .ok_or_else(|| {
                CodecError::IllegalReference(format!("handle {handle:#x} below base"))
            })
    }

    fn entry(&self, handle: u32) -> Result<&HandleEntry> {
        let index = Self::index(handle)?;
        self.entries.get(index).ok_or_else(|| {
            CodecError::IllegalReference(format!("dangling handle {handle:#x}"))
        })
    }

    /// Value a back-reference denotes
    pub fn resolve(&self, handle: u32) -> Result<Value> {
        match self.entry(handle)? {
            HandleEntry::Value(v) => Ok(v.clone()),
            HandleEntry::Discarded | HandleEntry::Detached => Ok(Value::Null),
            HandleEntry::Unshared => Err(CodecError::IllegalReference(format!(
                "{}: {handle:#x}",
                constants::ERR_UNSHARED_REUSE
            ))),
            HandleEntry::Class(_) | HandleEntry::PendingClass => Err(
                CodecError::IllegalReference(format!(
                    "handle {handle:#x} names a class descriptor where a value is expected"
                )),
            ),
        }
    }

    /// Completed descriptor a back-reference denotes
    pub fn resolve_class(&self, handle: u32) -> Result<Arc<StreamClass>> {
        match self.entry(handle)? {
            HandleEntry::Class(c) => Ok(c.clone()),
            HandleEntry::PendingClass => Err(CodecError::IllegalReference(format!(
                "{}: {handle:#x}",
                constants::ERR_SELF_SUPERCLASS
            ))),
            _ => Err(CodecError::IllegalReference(format!(
                "handle {handle:#x} does not name a class descriptor"
            ))),
        }
    }

    pub fn is_detached(&self, handle: u32) -> bool {
        matches!(self.entry(handle), Ok(HandleEntry::Detached))
    }

    /// Detach every handle that names an object; strings and classes stay
    pub fn detach_objects(&mut self) {
        for entry in &mut self.entries {
            if let HandleEntry::Value(Value::Ref(_)) = entry {
                *entry = HandleEntry::Detached;
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Writer-side key of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DescKey {
    Class(Arc<str>, i64),
    Proxy(Vec<String>),
}

impl DescKey {
    pub fn of(desc: &ClassDescriptor) -> Self {
        if desc.is_proxy() {
            DescKey::Proxy(desc.interfaces().to_vec())
        } else {
            DescKey::Class(desc.name_arc().clone(), desc.version_id())
        }
    }
}

/// Writer side: identity to handle.
///
/// Refuses to assign more than `max` handles, the same limit a reader with
/// the same configuration enforces.
#[derive(Debug)]
pub struct HandleMap {
    next: u32,
    max: usize,
    objects: HashMap<ObjRef, u32>,
    strings: HashMap<Arc<str>, u32>,
    classes: HashMap<DescKey, u32>,
}

impl HandleMap {
    pub fn new(max: usize) -> Self {
        Self {
            next: 0,
            max,
            objects: HashMap::new(),
            strings: HashMap::new(),
            classes: HashMap::new(),
        }
    }

    /// Consume the next handle without recording an identity
    pub fn assign(&mut self) -> Result<u32> {
        if self.next as usize >= self.max {
            return Err(CodecError::ResourceExhaustion(format!(
                "{} ({})",
                constants::ERR_HANDLE_LIMIT,
                self.max
            )));
        }
        let handle = BASE_HANDLE + self.next;
        self.next += 1;
        Ok(handle)
    }

    pub fn assign_object(&mut self, r: ObjRef) -> Result<u32> {
        let handle = self.assign()?;
        self.objects.insert(r, handle);
        Ok(handle)
    }

    pub fn assign_string(&mut self, s: &Arc<str>) -> Result<u32> {
        let handle = self.assign()?;
        self.strings.insert(s.clone(), handle);
        Ok(handle)
    }

    pub fn assign_class(&mut self, key: DescKey) -> Result<u32> {
        let handle = self.assign()?;
        self.classes.insert(key, handle);
        Ok(handle)
    }

    pub fn object(&self, r: ObjRef) -> Option<u32> {
        self.objects.get(&r).copied()
    }

    pub fn string(&self, s: &str) -> Option<u32> {
        self.strings.get(s).copied()
    }

    pub fn class(&self, key: &DescKey) -> Option<u32> {
        self.classes.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.next as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next == 0
    }

    pub fn clear(&mut self) {
        self.next = 0;
        self.objects.clear();
        self.strings.clear();
        self.classes.clear();
    }
}
