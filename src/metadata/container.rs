//! Metadata containers.
//!
//! A [`Metadata`] container belongs to one data object and owns its domains.
//! Which domains exist, which one is the default and how they are named in
//! selectors is described by a [`DomainLayout`] chosen by the data kind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smallvec::{smallvec, SmallVec};
use tracing::{debug, debug_span, warn};

use super::{AttributeFilter, MetadataAttribute, MetadataDomain, MetadataType, TypedAttribute};
use crate::selector::{AttributeIdentifier, DomainId};
use crate::util::{AttributeValue, Error, Result};

/// Description of one domain of a layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainInfo {
    pub id: DomainId,
    /// Names accepted in selectors (`@Name.`), first one is canonical.
    pub names: SmallVec<[String; 2]>,
    pub multi_entry: bool,
    pub supports_parenting: bool,
}

impl DomainInfo {
    /// Describe a domain.
    pub fn new(id: DomainId, names: &[&str], multi_entry: bool, supports_parenting: bool) -> Self {
        Self {
            id,
            names: names.iter().map(|n| n.to_string()).collect(),
            multi_entry,
            supports_parenting,
        }
    }

    /// Canonical selector name.
    pub fn name(&self) -> String {
        self.names.first().cloned().unwrap_or_else(|| self.id.to_string())
    }
}

/// The set of domains a container supports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainLayout {
    pub default_domain: DomainId,
    pub domains: SmallVec<[DomainInfo; 2]>,
}

impl DomainLayout {
    /// Layout of point data: a data row plus one row per point.
    pub fn points() -> Self {
        Self {
            default_domain: DomainId::ELEMENTS,
            domains: smallvec![
                DomainInfo::new(DomainId::DATA, &["Data", "Global"], false, true),
                DomainInfo::new(DomainId::ELEMENTS, &["Points", "Elements"], true, true),
            ],
        }
    }

    /// Layout of attribute sets.
    pub fn params() -> Self {
        Self {
            default_domain: DomainId::ELEMENTS,
            domains: smallvec![
                DomainInfo::new(DomainId::DATA, &["Data"], false, true),
                DomainInfo::new(DomainId::ELEMENTS, &["Elements"], true, true),
            ],
        }
    }

    /// Layout of splines: control point rows cannot inherit from a parent.
    pub fn splines() -> Self {
        Self {
            default_domain: DomainId::ELEMENTS,
            domains: smallvec![
                DomainInfo::new(DomainId::DATA, &["Data"], false, true),
                DomainInfo::new(DomainId::ELEMENTS, &["ControlPoints", "Elements"], true, false),
            ],
        }
    }

    /// Layout with a single multi-entry domain (legacy files).
    pub fn single() -> Self {
        Self {
            default_domain: DomainId::ELEMENTS,
            domains: smallvec![DomainInfo::new(DomainId::ELEMENTS, &["Elements"], true, true)],
        }
    }

    /// Map [`DomainId::DEFAULT`] to the default domain.
    pub fn resolve(&self, id: DomainId) -> DomainId {
        if id.is_default() {
            self.default_domain
        } else {
            id
        }
    }

    /// Description of a domain.
    pub fn info(&self, id: DomainId) -> Option<&DomainInfo> {
        let id = self.resolve(id);
        self.domains.iter().find(|d| d.id == id)
    }

    /// Resolve a selector domain name (case-insensitive).
    pub fn id_from_name(&self, name: &str) -> Option<DomainId> {
        self.domains
            .iter()
            .find(|d| d.names.iter().any(|n| n.eq_ignore_ascii_case(name)))
            .map(|d| d.id)
    }
}

/// Domains of one data object.
pub struct Metadata {
    layout: DomainLayout,
    parent: RwLock<Option<Arc<Metadata>>>,
    inherit_attributes: AtomicBool,
    domains: RwLock<HashMap<DomainId, Arc<MetadataDomain>>>,
    creation: Mutex<()>,
}

impl std::fmt::Debug for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metadata")
            .field("default_domain", &self.layout.default_domain)
            .field("domains", &self.domain_ids())
            .field("has_parent", &self.parent().is_some())
            .finish()
    }
}

impl Metadata {
    /// Empty container.
    pub fn new(layout: DomainLayout) -> Self {
        Self {
            layout,
            parent: RwLock::new(None),
            inherit_attributes: AtomicBool::new(true),
            domains: RwLock::new(HashMap::new()),
            creation: Mutex::new(()),
        }
    }

    /// Container inheriting entries (and optionally attributes) from `parent`.
    pub fn new_child(parent: &Arc<Metadata>, add_attributes_from_parent: bool) -> Result<Self> {
        let child = Self::new(parent.layout.clone());
        child.initialize(parent, add_attributes_from_parent)?;
        Ok(child)
    }

    /// Full copy of `source`, filtered by attribute name.
    pub fn new_copy(source: &Metadata, filter: &AttributeFilter) -> Result<Self> {
        let copy = Self::new(source.layout.clone());
        copy.initialize_as_copy(source, filter, None)?;
        Ok(copy)
    }

    /// Copy of `source` keeping only the listed entries per domain.
    ///
    /// Domains without a list are copied in full (and flattened).
    pub fn new_partial_copy(
        source: &Metadata,
        subsets: &HashMap<DomainId, Vec<i64>>,
    ) -> Result<Self> {
        let copy = Self::new(source.layout.clone());
        copy.initialize_as_copy(source, &AttributeFilter::all(), Some(subsets))?;
        Ok(copy)
    }

    /// Link to `parent`. Every parent domain gets a child domain; its
    /// attributes are imported only if `add_attributes_from_parent`.
    ///
    /// Without imported attributes, lookups see local attributes only.
    pub fn initialize(
        &self,
        parent: &Arc<Metadata>,
        add_attributes_from_parent: bool,
    ) -> Result<()> {
        if std::ptr::eq(self, Arc::as_ptr(parent)) {
            return Ok(());
        }
        *self.parent.write() = Some(Arc::clone(parent));
        self.inherit_attributes
            .store(add_attributes_from_parent, Ordering::Relaxed);

        let filter = if add_attributes_from_parent {
            AttributeFilter::all()
        } else {
            AttributeFilter::none()
        };
        for id in parent.domain_ids() {
            let Some(info) = self.layout.info(id).cloned() else {
                continue;
            };
            if let Some(parent_domain) = parent.const_domain(id) {
                let domain =
                    Arc::new(MetadataDomain::new(id, info.multi_entry, info.supports_parenting));
                domain.initialize(Some(&parent_domain), &filter)?;
                self.domains.write().insert(id, domain);
            }
        }
        Ok(())
    }

    /// Copy every domain of `source`, optionally keeping subsets of entries.
    pub fn initialize_as_copy(
        &self,
        source: &Metadata,
        filter: &AttributeFilter,
        subsets: Option<&HashMap<DomainId, Vec<i64>>>,
    ) -> Result<()> {
        if std::ptr::eq(self, source) {
            return Ok(());
        }
        let mut keeps_parent = false;
        for id in source.domain_ids() {
            let (Some(info), Some(source_domain)) =
                (self.layout.info(id).cloned(), source.const_domain(id))
            else {
                continue;
            };
            let domain =
                Arc::new(MetadataDomain::new(id, info.multi_entry, info.supports_parenting));
            let subset = subsets.and_then(|s| s.get(&id)).map(Vec::as_slice);
            domain.initialize_as_copy(&source_domain, filter, subset)?;
            if subsets.is_some() && subset.is_none() {
                domain.flatten();
            }
            keeps_parent |= domain.parent().is_some();
            self.domains.write().insert(id, domain);
        }
        *self.parent.write() = if keeps_parent { source.parent() } else { None };
        Ok(())
    }

    /// Import attribute definitions from `other` that pass `filter`.
    pub fn add_attributes_filtered(&self, other: &Metadata, filter: &AttributeFilter) {
        for id in other.domain_ids() {
            let (Some(other_domain), Some(domain)) = (other.const_domain(id), self.domain(id))
            else {
                continue;
            };
            for (name, _) in other_domain.attribute_names_and_types() {
                if filter.passes(&name) {
                    domain.add_attribute_from(&other_domain, &name);
                }
            }
        }
    }

    // ========================================================================
    // Domains
    // ========================================================================

    /// Domain layout.
    #[inline]
    pub fn layout(&self) -> &DomainLayout {
        &self.layout
    }

    /// Parent container.
    pub fn parent(&self) -> Option<Arc<Metadata>> {
        self.parent.read().clone()
    }

    /// Root of the parent chain.
    pub fn root(self: &Arc<Self>) -> Arc<Metadata> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Id of the default domain.
    #[inline]
    pub fn default_domain_id(&self) -> DomainId {
        self.layout.default_domain
    }

    /// Resolve a selector domain name.
    pub fn domain_id_from_name(&self, name: &str) -> Option<DomainId> {
        self.layout.id_from_name(name)
    }

    /// Ids of the domains created so far, sorted.
    pub fn domain_ids(&self) -> Vec<DomainId> {
        let mut ids: Vec<DomainId> = self.domains.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Domain by id, created on first use if the layout supports it.
    pub fn domain(&self, id: DomainId) -> Option<Arc<MetadataDomain>> {
        let id = self.layout.resolve(id);
        if let Some(domain) = self.domains.read().get(&id) {
            return Some(Arc::clone(domain));
        }
        let info = self.layout.info(id)?.clone();

        let _guard = self.creation.lock();
        if let Some(domain) = self.domains.read().get(&id) {
            return Some(Arc::clone(domain));
        }

        let domain = Arc::new(MetadataDomain::new(id, info.multi_entry, info.supports_parenting));
        if let Some(parent_domain) = self.parent().and_then(|p| p.const_domain(id)) {
            let filter = if self.inherit_attributes.load(Ordering::Relaxed) {
                AttributeFilter::all()
            } else {
                AttributeFilter::none()
            };
            if let Err(e) = domain.initialize(Some(&parent_domain), &filter) {
                warn!("Domain {id} could not be linked to its parent: {e}");
            }
        }
        debug!("Created domain {id}");
        self.domains.write().insert(id, Arc::clone(&domain));
        Some(domain)
    }

    /// Domain by id, without creating it.
    pub fn const_domain(&self, id: DomainId) -> Option<Arc<MetadataDomain>> {
        let id = self.layout.resolve(id);
        self.domains.read().get(&id).cloned()
    }

    /// The default domain (created on first use).
    pub fn default_domain(&self) -> Option<Arc<MetadataDomain>> {
        self.domain(DomainId::DEFAULT)
    }

    fn require_domain(&self, id: DomainId) -> Result<Arc<MetadataDomain>> {
        self.domain(id)
            .ok_or_else(|| Error::DomainNotFound(id.to_string()))
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Create a typed attribute, see [`MetadataDomain::create_attribute`].
    pub fn create_attribute<T: MetadataType>(
        &self,
        identifier: &AttributeIdentifier,
        default_value: T,
        allows_interpolation: bool,
        override_parent: bool,
    ) -> Result<Arc<TypedAttribute<T>>> {
        self.require_domain(identifier.domain)?.create_attribute(
            &identifier.name,
            default_value,
            allows_interpolation,
            override_parent,
        )
    }

    /// Create an attribute typed by its default value.
    pub fn create_attribute_from_value(
        &self,
        identifier: &AttributeIdentifier,
        default_value: &AttributeValue,
        allows_interpolation: bool,
        override_parent: bool,
    ) -> Result<Arc<dyn MetadataAttribute>> {
        self.require_domain(identifier.domain)?.create_attribute_from_value(
            &identifier.name,
            default_value,
            allows_interpolation,
            override_parent,
        )
    }

    /// Type-erased attribute.
    pub fn get_attribute(
        &self,
        identifier: &AttributeIdentifier,
    ) -> Option<Arc<dyn MetadataAttribute>> {
        self.const_domain(identifier.domain)?
            .get_attribute(&identifier.name)
    }

    /// Typed attribute.
    pub fn get_typed_attribute<T: MetadataType>(
        &self,
        identifier: &AttributeIdentifier,
    ) -> Result<Arc<TypedAttribute<T>>> {
        self.const_domain(identifier.domain)
            .ok_or_else(|| Error::AttributeNotFound(identifier.to_string()))?
            .get_typed_attribute(&identifier.name)
    }

    /// Whether the attribute exists.
    pub fn has_attribute(&self, identifier: &AttributeIdentifier) -> bool {
        self.const_domain(identifier.domain)
            .is_some_and(|d| d.has_attribute(&identifier.name))
    }

    /// Remove an attribute. Returns false if it did not exist.
    pub fn delete_attribute(&self, identifier: &AttributeIdentifier) -> bool {
        self.const_domain(identifier.domain)
            .is_some_and(|d| d.delete_attribute(&identifier.name))
    }

    /// Rename an attribute within its domain.
    pub fn rename_attribute(&self, identifier: &AttributeIdentifier, new_name: &str) -> Result<()> {
        self.const_domain(identifier.domain)
            .ok_or_else(|| Error::AttributeNotFound(identifier.to_string()))?
            .rename_attribute(&identifier.name, new_name)
    }

    /// Latest attribute of a domain.
    pub fn latest_attribute_name(&self, domain: DomainId) -> Option<String> {
        self.const_domain(domain)?.latest_attribute_name()
    }

    /// Import the definition of an attribute of `other`.
    ///
    /// No-op if it already exists here or is missing in `other`.
    pub fn add_attribute(&self, other: &Metadata, identifier: &AttributeIdentifier) -> bool {
        let Some(other_domain) = other.const_domain(identifier.domain) else {
            return false;
        };
        if !other_domain.has_attribute(&identifier.name) {
            return false;
        }
        match self.domain(identifier.domain) {
            Some(domain) => domain.add_attribute_from(&other_domain, &identifier.name),
            None => false,
        }
    }

    /// Copy an attribute with its values from `other`.
    ///
    /// Both domains must have the same entry count, entries map 1:1.
    pub fn copy_attribute(
        &self,
        other: &Metadata,
        from: &AttributeIdentifier,
        to: &AttributeIdentifier,
    ) -> Result<()> {
        let source = other
            .const_domain(from.domain)
            .filter(|d| d.has_attribute(&from.name))
            .ok_or_else(|| {
                warn!("Cannot copy missing attribute '{from}'");
                Error::AttributeNotFound(from.to_string())
            })?;
        let target = self.require_domain(to.domain)?;
        if target.has_attribute(&to.name) {
            warn!("Cannot copy '{from}' onto existing attribute '{to}'");
            let existing = target
                .get_attribute(&to.name)
                .map(|a| a.attribute_type().to_string())
                .unwrap_or_default();
            return Err(Error::DuplicateName {
                name: to.name.clone(),
                existing: existing.clone(),
                requested: existing,
            });
        }

        if Arc::ptr_eq(&source, &target) {
            target.copy_attribute(&from.name, &to.name, true, true, true)?;
            return Ok(());
        }

        let (expected, actual) = (target.item_count(), source.item_count());
        if expected != actual {
            return Err(Error::EntryCountMismatch {
                expected: expected as usize,
                actual: actual as usize,
            });
        }
        target.copy_attribute_from(&source, &from.name, &to.name, false, true, true)?;
        Ok(())
    }

    // ========================================================================
    // Entries
    // ========================================================================

    /// Append an entry to a domain.
    pub fn add_entry(&self, domain: DomainId, parent_key: i64) -> Result<i64> {
        Ok(self.require_domain(domain)?.add_entry(parent_key))
    }

    /// Entry count of a domain (0 if it does not exist yet).
    pub fn item_count(&self, domain: DomainId) -> i64 {
        self.const_domain(domain).map_or(0, |d| d.item_count())
    }

    // ========================================================================
    // Flattening
    // ========================================================================

    /// Flatten every domain and drop the parent link.
    pub fn flatten(&self) {
        let _span = debug_span!("flatten_metadata").entered();
        let domains: Vec<Arc<MetadataDomain>> = self.domains.read().values().cloned().collect();
        for domain in domains {
            domain.flatten();
        }
        *self.parent.write() = None;
    }

    /// Compress domains with a keep list, flatten the others.
    pub fn flatten_and_compress(&self, keep: &HashMap<DomainId, Vec<i64>>) -> Result<()> {
        let domains: Vec<Arc<MetadataDomain>> = self.domains.read().values().cloned().collect();
        for domain in domains {
            match keep.get(&domain.id()) {
                Some(list) => domain.flatten_and_compress(list)?,
                None => domain.flatten(),
            }
        }
        *self.parent.write() = None;
        Ok(())
    }

    // ========================================================================
    // Serialization support
    // ========================================================================

    pub(crate) fn domains_snapshot(&self) -> Vec<Arc<MetadataDomain>> {
        let mut domains: Vec<Arc<MetadataDomain>> = self.domains.read().values().cloned().collect();
        domains.sort_by_key(|d| d.id());
        domains
    }

    pub(crate) fn from_domains(layout: DomainLayout, domains: Vec<MetadataDomain>) -> Self {
        let metadata = Self::new(layout);
        {
            let mut map = metadata.domains.write();
            for domain in domains {
                map.insert(domain.id(), Arc::new(domain));
            }
        }
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::INVALID_ENTRY_KEY;

    #[test]
    fn test_layout_resolution() {
        let layout = DomainLayout::points();
        assert_eq!(layout.resolve(DomainId::DEFAULT), DomainId::ELEMENTS);
        assert_eq!(layout.id_from_name("global"), Some(DomainId::DATA));
        assert_eq!(layout.id_from_name("Points"), Some(DomainId::ELEMENTS));
        assert_eq!(layout.id_from_name("Vertices"), None);
        assert!(!layout.info(DomainId::DATA).unwrap().multi_entry);
    }

    #[test]
    fn test_lazy_domain_creation() {
        let m = Metadata::new(DomainLayout::points());
        assert!(m.const_domain(DomainId::DATA).is_none());
        let d1 = m.domain(DomainId::DATA).unwrap();
        let d2 = m.domain(DomainId::DATA).unwrap();
        assert!(Arc::ptr_eq(&d1, &d2));
        assert!(m.domain(DomainId(42)).is_none());
    }

    #[test]
    fn test_child_without_attributes() {
        let parent = Arc::new(Metadata::new(DomainLayout::params()));
        let ident = AttributeIdentifier::new("Score");
        parent.create_attribute(&ident, 1i32, true, false).unwrap();
        parent.add_entry(DomainId::DEFAULT, INVALID_ENTRY_KEY).unwrap();

        let child = Metadata::new_child(&parent, false).unwrap();
        assert!(!child.has_attribute(&ident));
        assert_eq!(child.item_count(DomainId::DEFAULT), 1);
        assert!(child.add_attribute(&parent, &ident));
        assert!(!child.add_attribute(&parent, &ident));
        assert!(child.has_attribute(&ident));
    }

    #[test]
    fn test_copy_attribute_count_mismatch() {
        let a = Metadata::new(DomainLayout::params());
        let b = Metadata::new(DomainLayout::params());
        let ident = AttributeIdentifier::new("V");
        a.create_attribute(&ident, 0i32, true, false).unwrap();
        a.add_entry(DomainId::DEFAULT, INVALID_ENTRY_KEY).unwrap();
        assert!(matches!(
            b.copy_attribute(&a, &ident, &ident),
            Err(Error::EntryCountMismatch { .. })
        ));
        b.add_entry(DomainId::DEFAULT, INVALID_ENTRY_KEY).unwrap();
        b.copy_attribute(&a, &ident, &ident).unwrap();
        assert!(b.copy_attribute(&a, &ident, &ident).is_err());
        let missing = AttributeIdentifier::new("Missing");
        assert!(b.copy_attribute(&a, &missing, &AttributeIdentifier::new("X")).is_err());
    }

    #[test]
    fn test_root() {
        let root = Arc::new(Metadata::new(DomainLayout::points()));
        let child = Arc::new(Metadata::new_child(&root, true).unwrap());
        let grandchild = Arc::new(Metadata::new_child(&child, true).unwrap());
        assert!(Arc::ptr_eq(&grandchild.root(), &root));
    }
}
