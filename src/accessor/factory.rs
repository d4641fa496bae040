//! Accessor registry: creates accessors and keys from selectors.
//!
//! Each host data kind registers [`AccessorMethods`]. Creation walks the
//! data's class hierarchy from the most derived kind; a method returning
//! `Ok(None)` hands the request to the next kind up. Extra properties
//! (`$Index`) bypass the registry.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::{
    create_chain_accessor, AccessorKeys, AttributeAccessor, ElementKeys, EntryKeys, IndexAccessor,
    MetadataAttributeAccessor, PropertyAccessor,
};
use crate::data::{
    control_point_property, point_property, DataKind, HostData, PointData, SplineData,
};
use crate::metadata::INVALID_ENTRY_KEY;
use crate::selector::{DomainId, Selector, SelectorTarget};
use crate::util::{AttributeType, AttributeValue, Error, Result};

/// Creates an accessor for a resolved selector and domain.
pub type CreateAccessorFn =
    fn(&dyn HostData, &Selector, DomainId) -> Result<Option<Box<dyn AttributeAccessor>>>;

/// Creates keys over mutable data.
pub type CreateKeysFn =
    for<'a> fn(
        &'a mut dyn HostData,
        &Selector,
        DomainId,
    ) -> Result<Option<Box<dyn AccessorKeys + 'a>>>;

/// Creates keys over shared data.
pub type CreateConstKeysFn =
    for<'a> fn(&'a dyn HostData, &Selector, DomainId) -> Result<Option<Box<dyn AccessorKeys + 'a>>>;

/// Creation functions of one data kind.
#[derive(Clone, Copy)]
pub struct AccessorMethods {
    pub create_accessor: CreateAccessorFn,
    pub create_const_accessor: CreateAccessorFn,
    pub create_keys: CreateKeysFn,
    pub create_const_keys: CreateConstKeysFn,
}

impl std::fmt::Debug for AccessorMethods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessorMethods")
    }
}

/// How an existing attribute's type is checked against the values to write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TypeMatchPolicy {
    /// Types must be equal.
    Exact,
    /// Values must broadcast into the existing type.
    #[default]
    Broadcastable,
    /// Values must broadcast or construct into the existing type.
    BroadcastableOrConstructible,
}

impl TypeMatchPolicy {
    /// Whether values of `from` can be written into an attribute of type `to`.
    pub fn accepts(self, from: AttributeType, to: AttributeType) -> bool {
        match self {
            Self::Exact => from == to,
            Self::Broadcastable => AttributeValue::is_broadcastable(from, to),
            Self::BroadcastableOrConstructible => {
                AttributeValue::is_broadcastable(from, to)
                    || AttributeValue::is_constructible(from, to)
            }
        }
    }
}

/// Table of creation functions per data kind.
#[derive(Debug, Default)]
pub struct AccessorRegistry {
    methods: HashMap<DataKind, AccessorMethods>,
}

impl AccessorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in kinds: any data, points and splines.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DataKind::BASE, base_methods());
        registry.register(DataKind::POINT, point_methods());
        registry.register(DataKind::SPLINE, spline_methods());
        registry
    }

    /// Register a kind. Returns false (and keeps the existing methods) if
    /// the kind is already registered.
    pub fn register(&mut self, kind: DataKind, methods: AccessorMethods) -> bool {
        if self.methods.contains_key(&kind) {
            warn!("Accessor methods for {kind} are already registered");
            return false;
        }
        self.methods.insert(kind, methods);
        true
    }

    /// Remove a kind. Returns false if it was not registered.
    pub fn unregister(&mut self, kind: DataKind) -> bool {
        self.methods.remove(&kind).is_some()
    }

    pub fn is_registered(&self, kind: DataKind) -> bool {
        self.methods.contains_key(&kind)
    }

    /// Methods of the first registered kind in the hierarchy of `data`.
    fn walk<R>(
        &self,
        data: &dyn HostData,
        mut f: impl FnMut(&AccessorMethods) -> Result<Option<R>>,
    ) -> Result<Option<R>> {
        for kind in data.class_hierarchy() {
            if let Some(methods) = self.methods.get(kind) {
                if let Some(found) = f(methods)? {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    fn accessor_impl(
        &self,
        data: &dyn HostData,
        selector: &Selector,
        read_only: bool,
    ) -> Result<Box<dyn AttributeAccessor>> {
        let selector = selector.copy_and_fix_last(data)?;
        let base: Box<dyn AttributeAccessor> = match selector.target() {
            SelectorTarget::ExtraProperty(_) => Box::new(IndexAccessor),
            target => {
                let domain = data.domain_id_from_selector(&selector)?;
                let found = self.walk(data, |methods| {
                    let create = if read_only {
                        methods.create_const_accessor
                    } else {
                        methods.create_accessor
                    };
                    create(data, &selector, domain)
                })?;
                match (found, target) {
                    (Some(accessor), _) => accessor,
                    (None, SelectorTarget::Attribute(name)) => {
                        return Err(Error::AttributeNotFound(format!("{name} on {domain}")))
                    }
                    (None, _) => {
                        return Err(Error::selector(format!(
                            "'{}' is not a property of {}",
                            selector.name(),
                            data.kind()
                        )))
                    }
                }
            }
        };
        create_chain_accessor(base, selector.extra_names())
    }

    fn log_failure<T>(result: Result<T>, selector: &Selector, quiet: bool) -> Result<T> {
        if let Err(e) = &result {
            if !quiet {
                warn!("No accessor for '{selector}': {e}");
            }
        }
        result
    }

    /// Writable accessor for `selector` on `data`.
    ///
    /// Failures are logged unless `quiet`.
    pub fn create_accessor(
        &self,
        data: &dyn HostData,
        selector: &Selector,
        quiet: bool,
    ) -> Result<Box<dyn AttributeAccessor>> {
        Self::log_failure(self.accessor_impl(data, selector, false), selector, quiet)
    }

    /// Read-only accessor for `selector` on `data`.
    pub fn create_const_accessor(
        &self,
        data: &dyn HostData,
        selector: &Selector,
        quiet: bool,
    ) -> Result<Box<dyn AttributeAccessor>> {
        Self::log_failure(self.accessor_impl(data, selector, true), selector, quiet)
    }

    /// Keys allowing writes (and entry creation) on `data`.
    pub fn create_keys<'a>(
        &self,
        data: &'a mut dyn HostData,
        selector: &Selector,
    ) -> Result<Box<dyn AccessorKeys + 'a>> {
        let domain = data.domain_id_from_selector(selector)?;
        let kind = data.kind();

        // A mutable borrow can only be handed out once: pick the kind with
        // a shared check first.
        let mut create = None;
        for k in data.class_hierarchy() {
            let Some(methods) = self.methods.get(k) else {
                continue;
            };
            if (methods.create_const_keys)(&*data, selector, domain)?.is_some() {
                create = Some(methods.create_keys);
                break;
            }
        }
        let no_keys = || Error::UnsupportedOperation(format!("no keys for '{selector}' on {kind}"));
        let create = create.ok_or_else(no_keys)?;
        create(data, selector, domain)?.ok_or_else(no_keys)
    }

    /// Read-only keys on `data`.
    pub fn create_const_keys<'a>(
        &self,
        data: &'a dyn HostData,
        selector: &Selector,
    ) -> Result<Box<dyn AccessorKeys + 'a>> {
        let domain = data.domain_id_from_selector(selector)?;
        for kind in data.class_hierarchy() {
            let Some(methods) = self.methods.get(kind) else {
                continue;
            };
            if let Some(keys) = (methods.create_const_keys)(data, selector, domain)? {
                return Ok(keys);
            }
        }
        Err(Error::UnsupportedOperation(format!(
            "no keys for '{selector}' on {}",
            data.kind()
        )))
    }

    /// Accessor for writing values shaped like `matching` into `selector`.
    ///
    /// A missing attribute is created. An existing attribute whose type
    /// `policy` rejects is deleted and recreated with `matching`'s type.
    /// New attributes take `matching`'s value for an unset key as default.
    pub fn create_accessor_with_attribute_creation(
        &self,
        data: &dyn HostData,
        selector: &Selector,
        matching: &dyn AttributeAccessor,
        policy: TypeMatchPolicy,
    ) -> Result<Box<dyn AttributeAccessor>> {
        let selector = match selector.copy_and_fix_last(data) {
            Ok(fixed) => fixed,
            Err(_) if selector.is_last() => {
                return Err(Error::selector(
                    "cannot create an attribute through @Last on empty data",
                ))
            }
            Err(e) => return Err(e),
        };
        let SelectorTarget::Attribute(name) = selector.target() else {
            return self.create_accessor(data, &selector, false);
        };
        if !selector.is_basic() {
            return self.create_accessor(data, &selector, false);
        }

        let domain_id = data.domain_id_from_selector(&selector)?;
        let domain = data
            .metadata()
            .domain(domain_id)
            .ok_or_else(|| Error::DomainNotFound(domain_id.to_string()))?;
        let wanted = matching.value_type();

        if let Some(existing) = domain.get_attribute(name) {
            let existing_type = existing.attribute_type();
            if policy.accepts(wanted, existing_type) {
                return self.create_accessor(data, &selector, false);
            }
            debug!("Recreating attribute '{name}' as {wanted} (was {existing_type})");
            domain.delete_attribute(name);
        }

        let default = matching
            .get(0, &EntryKeys::single(INVALID_ENTRY_KEY))
            .unwrap_or_else(|_| AttributeValue::zero(wanted));
        let allows_interpolation = matching
            .attribute()
            .map_or(wanted.interpolates_by_default(), |a| a.allows_interpolation());
        domain.create_attribute_from_value(name, &default, allows_interpolation, false)?;
        self.create_accessor(data, &selector, false)
    }
}

// ============================================================================
// Built-in kinds
// ============================================================================

fn metadata_accessor(
    data: &dyn HostData,
    selector: &Selector,
    domain: DomainId,
    read_only: bool,
) -> Result<Option<Box<dyn AttributeAccessor>>> {
    let SelectorTarget::Attribute(name) = selector.target() else {
        return Ok(None);
    };
    let Some(domain) = data.metadata().const_domain(domain) else {
        return Ok(None);
    };
    Ok(domain.get_attribute(name).map(|attribute| {
        Box::new(MetadataAttributeAccessor::new(attribute, domain, read_only))
            as Box<dyn AttributeAccessor>
    }))
}

/// Entry keys over every row of a domain (one key for single-entry domains).
fn metadata_keys(data: &dyn HostData, domain: DomainId) -> EntryKeys {
    let metadata = data.metadata();
    let count = metadata.item_count(domain).max(0) as usize;
    let multi_entry = metadata.layout().info(domain).map_or(true, |info| info.multi_entry);
    if multi_entry {
        EntryKeys::range(0, count)
    } else if count > 0 {
        EntryKeys::single(0)
    } else {
        EntryKeys::single(INVALID_ENTRY_KEY)
    }
}

/// Methods for any data: attributes through entry keys.
pub fn base_methods() -> AccessorMethods {
    fn create_keys<'a>(
        data: &'a mut dyn HostData,
        _selector: &Selector,
        domain: DomainId,
    ) -> Result<Option<Box<dyn AccessorKeys + 'a>>> {
        Ok(Some(Box::new(metadata_keys(&*data, domain))))
    }
    fn create_const_keys<'a>(
        data: &'a dyn HostData,
        _selector: &Selector,
        domain: DomainId,
    ) -> Result<Option<Box<dyn AccessorKeys + 'a>>> {
        Ok(Some(Box::new(metadata_keys(data, domain).into_read_only())))
    }

    AccessorMethods {
        create_accessor: |data, selector, domain| metadata_accessor(data, selector, domain, false),
        create_const_accessor: |data, selector, domain| {
            metadata_accessor(data, selector, domain, true)
        },
        create_keys,
        create_const_keys,
    }
}

fn is_elements(data: &dyn HostData, domain: DomainId) -> bool {
    data.metadata().layout().resolve(domain) == DomainId::ELEMENTS
}

fn point_accessor(
    data: &dyn HostData,
    selector: &Selector,
    domain: DomainId,
    read_only: bool,
) -> Result<Option<Box<dyn AttributeAccessor>>> {
    match selector.target() {
        SelectorTarget::Property(name) if is_elements(data, domain) => Ok(point_property(name)
            .map(|p| Box::new(PropertyAccessor::new(p, read_only)) as Box<dyn AttributeAccessor>)),
        _ => Ok(None),
    }
}

/// Methods for [`PointData`]: point properties and per-point entry keys.
pub fn point_methods() -> AccessorMethods {
    fn create_keys<'a>(
        data: &'a mut dyn HostData,
        _selector: &Selector,
        domain: DomainId,
    ) -> Result<Option<Box<dyn AccessorKeys + 'a>>> {
        if !is_elements(&*data, domain) {
            return Ok(None);
        }
        Ok(data
            .as_any_mut()
            .downcast_mut::<PointData>()
            .map(|points| {
                Box::new(ElementKeys::Mut(points.points_mut())) as Box<dyn AccessorKeys + 'a>
            }))
    }
    fn create_const_keys<'a>(
        data: &'a dyn HostData,
        _selector: &Selector,
        domain: DomainId,
    ) -> Result<Option<Box<dyn AccessorKeys + 'a>>> {
        if !is_elements(data, domain) {
            return Ok(None);
        }
        Ok(data
            .as_any()
            .downcast_ref::<PointData>()
            .map(|points| {
                Box::new(ElementKeys::Const(points.points())) as Box<dyn AccessorKeys + 'a>
            }))
    }

    AccessorMethods {
        create_accessor: |data, selector, domain| point_accessor(data, selector, domain, false),
        create_const_accessor: |data, selector, domain| {
            point_accessor(data, selector, domain, true)
        },
        create_keys,
        create_const_keys,
    }
}

fn spline_accessor(
    data: &dyn HostData,
    selector: &Selector,
    domain: DomainId,
    read_only: bool,
) -> Result<Option<Box<dyn AttributeAccessor>>> {
    match selector.target() {
        SelectorTarget::Property(name) if is_elements(data, domain) => {
            Ok(control_point_property(name).map(|p| {
                Box::new(PropertyAccessor::new(p, read_only)) as Box<dyn AttributeAccessor>
            }))
        }
        _ => Ok(None),
    }
}

/// Methods for [`SplineData`]: control point properties and keys.
pub fn spline_methods() -> AccessorMethods {
    fn create_keys<'a>(
        data: &'a mut dyn HostData,
        _selector: &Selector,
        domain: DomainId,
    ) -> Result<Option<Box<dyn AccessorKeys + 'a>>> {
        if !is_elements(&*data, domain) {
            return Ok(None);
        }
        Ok(data.as_any_mut().downcast_mut::<SplineData>().map(|spline| {
            Box::new(ElementKeys::Mut(spline.control_points_mut())) as Box<dyn AccessorKeys + 'a>
        }))
    }
    fn create_const_keys<'a>(
        data: &'a dyn HostData,
        _selector: &Selector,
        domain: DomainId,
    ) -> Result<Option<Box<dyn AccessorKeys + 'a>>> {
        if !is_elements(data, domain) {
            return Ok(None);
        }
        Ok(data.as_any().downcast_ref::<SplineData>().map(|spline| {
            Box::new(ElementKeys::Const(spline.control_points())) as Box<dyn AccessorKeys + 'a>
        }))
    }

    AccessorMethods {
        create_accessor: |data, selector, domain| spline_accessor(data, selector, domain, false),
        create_const_accessor: |data, selector, domain| {
            spline_accessor(data, selector, domain, true)
        },
        create_keys,
        create_const_keys,
    }
}
