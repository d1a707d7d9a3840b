//! # Object Construction
//!
//! Turns the field values the reader gathers for one object into a finished
//! [`Object`], using the strategy the resolved type selects:
//!
//! - **Atomic**: every level's [`FieldSource`] is collected first and the
//!   type's `build` hook runs exactly once, after the last level is read
//! - **Legacy**: an empty record is filled level by level, root first; levels
//!   with a custom read routine hand their fields to that routine
//! - **Externalizable**: an empty record is handed to `read_external`
//! - **Discard**: the stream shape is consumed and nothing is built
//!
//! A failure at any point switches the construction to the discard variant,
//! so the reader keeps consuming the same bytes it would have consumed for a
//! successful object.

use crate::core::descriptor::LevelPlan;
use crate::core::field_source::{AtomicFields, FieldSource};
use crate::core::graph::{Graph, Object, Record, Value, ANY_CLASS};
use crate::core::types::{Resolved, RuntimeType, Strategy};
use crate::error::{CodecError, Result};
use std::sync::Arc;

/// Construction state of one object being read.
#[derive(Debug)]
pub enum Construction {
    Atomic {
        ty: RuntimeType,
        sources: Vec<FieldSource>,
    },
    Legacy {
        ty: RuntimeType,
        record: Record,
    },
    External {
        ty: RuntimeType,
        record: Record,
    },
    /// Consume the stream shape only; carries the first object-level failure
    Discard { failure: Option<CodecError> },
}

/// Outcome of [`Construction::complete`].
#[derive(Debug)]
pub enum Completion {
    Built { object: Object, ty: RuntimeType },
    Discarded(Option<CodecError>),
}

impl Construction {
    /// Begin constructing an instance of `ty`
    pub fn start(ty: &RuntimeType) -> Self {
        match ty.strategy() {
            Strategy::Atomic | Strategy::Proxy => Construction::Atomic {
                ty: ty.clone(),
                sources: Vec::new(),
            },
            Strategy::Legacy => match ty.new_instance() {
                Ok(record) => Construction::Legacy {
                    ty: ty.clone(),
                    record,
                },
                Err(e) => Self::discard(Some(object_level(e))),
            },
            Strategy::Externalizable => match ty.new_instance() {
                Ok(record) => Construction::External {
                    ty: ty.clone(),
                    record,
                },
                Err(e) => Self::discard(Some(object_level(e))),
            },
            Strategy::Enum => Self::discard(Some(CodecError::IncompatibleClass(format!(
                "enum type {} read as an ordinary object",
                ty.name()
            )))),
        }
    }

    pub fn discard(failure: Option<CodecError>) -> Self {
        Construction::Discard { failure }
    }

    pub fn is_discard(&self) -> bool {
        matches!(self, Construction::Discard { .. })
    }

    /// Switch to the discard variant, keeping the first failure
    pub fn fail(&mut self, err: CodecError) {
        match self {
            Construction::Discard { failure } => {
                if failure.is_none() {
                    *failure = Some(err);
                }
            }
            _ => *self = Self::discard(Some(err)),
        }
    }

    /// Record being filled by a legacy or externalizable construction
    pub fn record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Construction::Legacy { record, .. } | Construction::External { record, .. } => {
                Some(record)
            }
            _ => None,
        }
    }

    /// Take in the values read for one hierarchy level.
    ///
    /// Returns the level's type and fields when a custom read routine must
    /// run before the next level; the caller owns the stream while it does.
    pub fn accept_level(
        &mut self,
        level: &LevelPlan,
        values: &[Value],
        graph: &Graph,
    ) -> Option<(RuntimeType, FieldSource)> {
        let local = match (&level.local, self.is_discard()) {
            (Some(local), false) => local,
            _ => return None,
        };
        let class_name = local.desc.name_arc().clone();
        let source = match &level.stream {
            Some(stream) => {
                match FieldSource::reconcile(class_name, local.desc.schema(), stream.schema(), values)
                {
                    Ok(source) => source,
                    Err(e) => {
                        self.fail(e);
                        return None;
                    }
                }
            }
            None => FieldSource::defaults(class_name, local.desc.schema()),
        };
        if let Err(e) = check_reference_types(&source, local.ty.fields(), graph) {
            self.fail(e);
            return None;
        }

        match self {
            Construction::Atomic { sources, .. } => {
                sources.push(source);
                None
            }
            Construction::Legacy { record, .. } => {
                if local.ty.has_custom_read() && level.stream.is_some() {
                    Some((local.ty.clone(), source))
                } else {
                    source.copy_into(record);
                    None
                }
            }
            Construction::External { .. } | Construction::Discard { .. } => None,
        }
    }

    /// Finish the object once every level has been consumed
    pub fn complete(self, graph: &Graph) -> Completion {
        match self {
            Construction::Atomic { ty, sources } => {
                let fields = AtomicFields::new(ty.name(), &sources, graph);
                match ty.build(&fields) {
                    Ok(object) => Completion::Built { object, ty },
                    Err(e) => Completion::Discarded(Some(object_level(e))),
                }
            }
            Construction::Legacy { ty, record } | Construction::External { ty, record } => {
                Completion::Built {
                    object: Object::Record(record),
                    ty,
                }
            }
            Construction::Discard { failure } => Completion::Discarded(failure),
        }
    }
}

/// Run the resolve hook of `ty`, if it declares one
pub fn resolve_instance(ty: &RuntimeType, object: Object) -> Result<Resolved> {
    if ty.has_resolve() {
        ty.read_resolve(object).map_err(object_level)
    } else {
        Ok(Resolved::Object(object))
    }
}

/// Class names an instance of `ty` answers to, most derived first.
/// At most `max_depth` hierarchy levels are walked.
pub fn lineage(ty: &RuntimeType, max_depth: usize) -> Arc<[Arc<str>]> {
    let mut names: Vec<Arc<str>> = Vec::new();
    let mut next = Some(ty.clone());
    let mut depth = 0usize;
    while let Some(level) = next {
        depth += 1;
        if depth > max_depth {
            break;
        }
        names.push(Arc::from(level.name()));
        names.extend(level.interfaces().iter().map(|i| Arc::<str>::from(i.as_str())));
        next = level.superclass();
    }
    names.push(Arc::from(ANY_CLASS));
    Arc::from(names)
}

/// Errors raised by user hooks never close the stream on their own
fn object_level(err: CodecError) -> CodecError {
    if err.is_fatal() {
        CodecError::InvariantViolation(err.to_string())
    } else {
        err
    }
}

/// Stream-supplied references must be instances of the declared field class
fn check_reference_types(
    source: &FieldSource,
    specs: &[crate::core::field::FieldSpec],
    graph: &Graph,
) -> Result<()> {
    for spec in specs.iter().filter(|s| !s.is_primitive()) {
        let declared = match &spec.type_name {
            Some(declared) => declared,
            None => continue,
        };
        if source.defaulted(&spec.name)? {
            continue;
        }
        let value = source.get_object(&spec.name, Value::Null)?;
        if !graph.is_instance(&value, declared) {
            return Err(CodecError::IncompatibleClass(format!(
                "{}.{} holds a {} where {} is declared",
                source.class_name(),
                spec.name,
                value.kind_name(),
                declared
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::{DescriptorCache, LocalLevel};
    use crate::core::field::FieldSpec;
    use crate::core::types::RecordType;

    fn plan_for(ty: &RuntimeType) -> Vec<LevelPlan> {
        let cache = DescriptorCache::new();
        let desc = cache
            .lookup(ty, crate::config::DEFAULT_MAX_DESCRIPTOR_DEPTH)
            .unwrap_or_else(|e| panic!("{e}"));
        vec![LevelPlan {
            stream: Some(desc.clone()),
            local: Some(LocalLevel {
                ty: ty.clone(),
                desc,
            }),
        }]
    }

    #[test]
    fn test_atomic_build_rejects_invariant() {
        let ty = RecordType::atomic("test.construct.Range", 1)
            .field(FieldSpec::int("lo"))
            .field(FieldSpec::int("hi"))
            .build_with(|f| {
                let (lo, hi) = (f.get_i32("lo", 0)?, f.get_i32("hi", 0)?);
                if lo > hi {
                    return Err(CodecError::InvariantViolation("lo > hi".into()));
                }
                Ok(Object::Record(f.to_record()))
            })
            .finish();
        let plan = plan_for(&ty);
        let graph = Graph::new();

        let mut ok = Construction::start(&ty);
        assert!(ok.accept_level(&plan[0], &[Value::Int(7), Value::Int(1)], &graph).is_none());
        assert!(matches!(ok.complete(&graph), Completion::Built { .. }));

        let mut bad = Construction::start(&ty);
        bad.accept_level(&plan[0], &[Value::Int(1), Value::Int(7)], &graph);
        assert!(matches!(
            bad.complete(&graph),
            Completion::Discarded(Some(CodecError::InvariantViolation(_)))
        ));
    }

    #[test]
    fn test_legacy_custom_read_is_handed_back() {
        let ty = RecordType::legacy("test.construct.Custom", 1)
            .field(FieldSpec::int("x"))
            .read_with(|f, _, r| {
                f.copy_into(r);
                Ok(())
            })
            .finish();
        let plan = plan_for(&ty);
        let graph = Graph::new();
        let mut construction = Construction::start(&ty);
        let routine = construction.accept_level(&plan[0], &[Value::Int(3)], &graph);
        assert!(routine.is_some());
        assert!(construction.record_mut().is_some());
    }

    #[test]
    fn test_reference_type_mismatch_discards() {
        let ty = RecordType::atomic("test.construct.Named", 1)
            .field(FieldSpec::object("name", crate::core::graph::STRING_CLASS))
            .finish();
        let plan = plan_for(&ty);
        let mut graph = Graph::new();
        let other = graph.insert(Object::Class(Arc::from("x")));
        let mut construction = Construction::start(&ty);
        construction.accept_level(&plan[0], &[Value::Ref(other)], &graph);
        assert!(construction.is_discard());
        assert!(matches!(
            construction.complete(&graph),
            Completion::Discarded(Some(CodecError::IncompatibleClass(_)))
        ));
    }

    #[test]
    fn test_fail_keeps_first_error() {
        let mut construction = Construction::discard(None);
        construction.fail(CodecError::TypeResolution("first".into()));
        construction.fail(CodecError::TypeResolution("second".into()));
        assert!(matches!(
            construction,
            Construction::Discard { failure: Some(CodecError::TypeResolution(m)) } if m == "first"
        ));
    }

    #[test]
    fn test_lineage_includes_ancestors() {
        let base = RecordType::legacy("test.construct.Base", 1).finish();
        let sub = RecordType::legacy("test.construct.Sub", 1).extends(base).finish();
        let names: Vec<String> = lineage(&sub, 8).iter().map(|n| n.to_string()).collect();
        assert_eq!(
            names,
            ["test.construct.Sub", "test.construct.Base", ANY_CLASS]
        );
        let names: Vec<String> = lineage(&sub, 1).iter().map(|n| n.to_string()).collect();
        assert_eq!(names, ["test.construct.Sub", ANY_CLASS]);
    }
}
