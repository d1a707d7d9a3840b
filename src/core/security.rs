//! # Security Gate
//!
//! Decides, per object, whether the stream may construct an instance of a
//! resolved type. Denied objects are consumed from the stream and decode as
//! null; they never reach user code.
//!
//! Capabilities are passed explicitly through a [`CapabilityContext`], never
//! looked up from ambient state. A type passes without a grant when it is on
//! the context's exemption list, or when implicit exemption is enabled and no
//! level of its hierarchy declares a custom read routine or a reference field.

use crate::config::SecurityConfig;
use crate::core::types::{LoaderContext, RuntimeType, Strategy};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Capability category a grant is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Atomic,
    Externalizable,
    Legacy,
    Proxy,
}

impl Category {
    /// Category required to construct a type with `strategy`; `None` for enums
    pub fn for_strategy(strategy: Strategy) -> Option<Self> {
        match strategy {
            Strategy::Atomic => Some(Category::Atomic),
            Strategy::Legacy => Some(Category::Legacy),
            Strategy::Externalizable => Some(Category::Externalizable),
            Strategy::Proxy => Some(Category::Proxy),
            Strategy::Enum => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Atomic => "ATOMIC",
            Category::Externalizable => "EXTERNALIZABLE",
            Category::Legacy => "LEGACY",
            Category::Proxy => "PROXY",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Source of construction grants.
pub trait CapabilityStore: Send + Sync {
    fn grants(&self, category: Category, type_name: &str) -> bool;
}

/// Set of explicit grants, optionally per whole category.
#[derive(Debug, Default, Clone)]
pub struct Grants {
    types: HashSet<(Category, String)>,
    categories: HashSet<Category>,
}

impl Grants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant construction of `type_name` under `category`
    pub fn allow(mut self, category: Category, type_name: &str) -> Self {
        self.types.insert((category, type_name.to_string()));
        self
    }

    /// Grant every type of `category`
    pub fn allow_category(mut self, category: Category) -> Self {
        self.categories.insert(category);
        self
    }

    /// Grant the built-in surrogate types
    pub fn with_surrogates(self) -> Self {
        crate::core::surrogate::SURROGATES
            .iter()
            .fold(self, |grants, s| grants.allow(Category::Atomic, s.class_name))
    }
}

impl CapabilityStore for Grants {
    fn grants(&self, category: Category, type_name: &str) -> bool {
        self.categories.contains(&category)
            || self.types.contains(&(category, type_name.to_string()))
    }
}

/// Store that grants everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl CapabilityStore for AllowAll {
    fn grants(&self, _category: Category, _type_name: &str) -> bool {
        true
    }
}

/// Store that grants nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl CapabilityStore for DenyAll {
    fn grants(&self, _category: Category, _type_name: &str) -> bool {
        false
    }
}

/// Capabilities in effect for one read call.
#[derive(Clone)]
pub struct CapabilityContext {
    store: Arc<dyn CapabilityStore>,
    exempt: HashSet<String>,
    implicit_exemption: bool,
    loader: LoaderContext,
}

impl fmt::Debug for CapabilityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityContext")
            .field("exempt", &self.exempt)
            .field("implicit_exemption", &self.implicit_exemption)
            .field("loader", &self.loader)
            .finish()
    }
}

impl CapabilityContext {
    pub fn new(store: Arc<dyn CapabilityStore>) -> Self {
        Self {
            store,
            exempt: HashSet::new(),
            implicit_exemption: true,
            loader: LoaderContext::default(),
        }
    }

    /// Context configured from the `[security]` section
    pub fn from_config(config: &SecurityConfig, store: Arc<dyn CapabilityStore>) -> Self {
        Self::new(store)
            .with_implicit_exemption(config.implicit_exemption)
            .with_exempt_types(config.exempt_types.iter().map(String::as_str))
    }

    /// Context that grants every category
    pub fn trusted() -> Self {
        Self::new(Arc::new(AllowAll))
    }

    /// Context that grants nothing; only exempt types may be built
    pub fn untrusted() -> Self {
        Self::new(Arc::new(DenyAll))
    }

    pub fn with_implicit_exemption(mut self, enabled: bool) -> Self {
        self.implicit_exemption = enabled;
        self
    }

    pub fn with_exempt_types<'a, I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.exempt.extend(names.into_iter().map(String::from));
        self
    }

    pub fn with_loader(mut self, loader: LoaderContext) -> Self {
        self.loader = loader;
        self
    }

    pub fn loader(&self) -> &LoaderContext {
        &self.loader
    }

    fn grants(&self, category: Category, type_name: &str) -> bool {
        self.store.grants(category, type_name)
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Construction refused; carries the category that was missing
    Deny(Category),
}

/// Per-object construction check.
#[derive(Debug, Clone, Copy)]
pub struct SecurityGate {
    /// Hierarchies deeper than this never qualify for implicit exemption
    max_descriptor_depth: usize,
}

impl Default for SecurityGate {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_DESCRIPTOR_DEPTH)
    }
}

impl SecurityGate {
    pub fn new(max_descriptor_depth: usize) -> Self {
        Self {
            max_descriptor_depth,
        }
    }

    pub fn authorize(&self, ty: &RuntimeType, ctx: &CapabilityContext) -> Decision {
        let category = match Category::for_strategy(ty.strategy()) {
            Some(category) => category,
            None => return Decision::Allow,
        };
        if ctx.exempt.contains(ty.name()) {
            return Decision::Allow;
        }
        if ctx.implicit_exemption && category != Category::Proxy && self.is_field_only(ty) {
            return Decision::Allow;
        }
        if ctx.grants(category, ty.name()) {
            Decision::Allow
        } else {
            Decision::Deny(category)
        }
    }

    /// No level declares a custom read routine or a reference field
    fn is_field_only(&self, ty: &RuntimeType) -> bool {
        if ty.strategy() == Strategy::Externalizable {
            return false;
        }
        let mut next = Some(ty.clone());
        let mut depth = 0usize;
        while let Some(level) = next {
            depth += 1;
            if depth > self.max_descriptor_depth
                || level.has_custom_read()
                || level.fields().iter().any(|f| !f.is_primitive())
            {
                return false;
            }
            next = level.superclass();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::FieldSpec;
    use crate::core::types::{EnumType, ProxyType, RecordType};

    fn point() -> RuntimeType {
        RecordType::atomic("demo.Point", 1)
            .field(FieldSpec::int("x"))
            .finish()
    }

    fn node() -> RuntimeType {
        RecordType::atomic("demo.Node", 1)
            .field(FieldSpec::any("next"))
            .finish()
    }

    #[test]
    fn test_primitive_only_type_is_implicitly_exempt() {
        let ctx = CapabilityContext::untrusted();
        assert_eq!(SecurityGate::default().authorize(&point(), &ctx), Decision::Allow);
        let strict = CapabilityContext::untrusted().with_implicit_exemption(false);
        assert_eq!(
            SecurityGate::default().authorize(&point(), &strict),
            Decision::Deny(Category::Atomic)
        );
    }

    #[test]
    fn test_reference_fields_need_grant() {
        let ctx = CapabilityContext::untrusted();
        assert_eq!(
            SecurityGate::default().authorize(&node(), &ctx),
            Decision::Deny(Category::Atomic)
        );
        let granted =
            CapabilityContext::new(Arc::new(Grants::new().allow(Category::Atomic, "demo.Node")));
        assert_eq!(SecurityGate::default().authorize(&node(), &granted), Decision::Allow);
    }

    #[test]
    fn test_custom_read_in_ancestor_needs_grant() {
        let base = RecordType::legacy("demo.Base", 1)
            .read_with(|f, _, r| {
                f.copy_into(r);
                Ok(())
            })
            .finish();
        let sub = RecordType::legacy("demo.Sub", 1).extends(base).finish();
        let ctx = CapabilityContext::untrusted();
        assert_eq!(
            SecurityGate::default().authorize(&sub, &ctx),
            Decision::Deny(Category::Legacy)
        );
    }

    #[test]
    fn test_explicit_exemption_list() {
        let ctx = CapabilityContext::untrusted().with_exempt_types(["demo.Node"]);
        assert_eq!(SecurityGate::default().authorize(&node(), &ctx), Decision::Allow);
    }

    #[test]
    fn test_proxy_and_externalizable_always_need_grant() {
        let ctx = CapabilityContext::untrusted();
        let proxy = ProxyType::new(&["demo.Greeter".to_string()]);
        assert_eq!(
            SecurityGate::default().authorize(&proxy, &ctx),
            Decision::Deny(Category::Proxy)
        );
        let ext = RecordType::externalizable("demo.Ext", 1).finish();
        assert_eq!(
            SecurityGate::default().authorize(&ext, &ctx),
            Decision::Deny(Category::Externalizable)
        );
        let color = EnumType::new("demo.Color", ["RED"]);
        assert_eq!(SecurityGate::default().authorize(&color, &ctx), Decision::Allow);
    }

    #[test]
    fn test_configured_depth_bounds_implicit_exemption() {
        let base = RecordType::atomic("demo.Base", 1)
            .field(FieldSpec::int("id"))
            .finish();
        let sub = RecordType::atomic("demo.Sub", 1)
            .field(FieldSpec::int("x"))
            .extends(base)
            .finish();
        let ctx = CapabilityContext::untrusted();
        assert_eq!(SecurityGate::new(2).authorize(&sub, &ctx), Decision::Allow);
        assert_eq!(
            SecurityGate::new(1).authorize(&sub, &ctx),
            Decision::Deny(Category::Atomic)
        );
    }

    #[test]
    fn test_category_wide_grant() {
        let ctx = CapabilityContext::new(Arc::new(Grants::new().allow_category(Category::Atomic)));
        assert_eq!(SecurityGate::default().authorize(&node(), &ctx), Decision::Allow);
    }
}
