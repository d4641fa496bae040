//! Metadata domains.
//!
//! A [`MetadataDomain`] owns a row space (entries) and the attributes defined
//! over it. A domain may reference a parent domain: entries below the
//! parent's item count at initialization time are inherited, attributes are
//! child attributes that resolve unset entries through their parents.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::{debug, debug_span, warn};

use super::{
    new_attribute_erased, read_attribute_erased, read_bytes, AttributeFilter, MetadataAttribute,
    MetadataOp, MetadataType, TypedAttribute, INVALID_ENTRY_KEY, PREALLOC_LIMIT,
};
use crate::config;
use crate::selector::{is_valid_attribute_name, DomainId};
use crate::util::{AttributeType, AttributeValue, Error, Result};

static NEXT_DOMAIN_UID: AtomicU64 = AtomicU64::new(1);

/// Entry key handed out by [`MetadataDomain::reserve`].
///
/// Every ticket of one reservation epoch must be passed to
/// [`MetadataDomain::commit`] before the next `add_entry` or reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryTicket(i64);

impl EntryTicket {
    /// Entry key the committed entry will have.
    pub fn key(self) -> i64 {
        self.0
    }
}

/// Attributes by name, with creation order for "latest attribute" queries.
#[derive(Default)]
struct AttributeTable {
    by_name: HashMap<String, Arc<dyn MetadataAttribute>>,
    ids: HashMap<String, i64>,
    next_id: i64,
}

impl AttributeTable {
    fn insert(&mut self, attribute: Arc<dyn MetadataAttribute>) {
        let name = attribute.name();
        self.ids.insert(name.clone(), self.next_id);
        self.next_id += 1;
        self.by_name.insert(name, attribute);
    }

    /// Replace an attribute in place, keeping its creation id.
    fn replace(&mut self, attribute: Arc<dyn MetadataAttribute>) {
        let name = attribute.name();
        if self.ids.contains_key(&name) {
            self.by_name.insert(name, attribute);
        } else {
            self.insert(attribute);
        }
    }

    fn remove(&mut self, name: &str) -> Option<Arc<dyn MetadataAttribute>> {
        self.ids.remove(name);
        self.by_name.remove(name)
    }

    /// Attributes sorted by creation id.
    fn ordered(&self) -> Vec<Arc<dyn MetadataAttribute>> {
        let mut named: Vec<(i64, &Arc<dyn MetadataAttribute>)> = self
            .by_name
            .iter()
            .map(|(name, attr)| (self.ids.get(name).copied().unwrap_or(i64::MAX), attr))
            .collect();
        named.sort_by_key(|(id, _)| *id);
        named.into_iter().map(|(_, attr)| Arc::clone(attr)).collect()
    }

    fn latest(&self) -> Option<String> {
        self.ids
            .iter()
            .max_by_key(|(_, &id)| id)
            .map(|(name, _)| name.clone())
    }
}

/// Row bookkeeping: parent keys of local entries.
#[derive(Clone, Default)]
struct EntryTable {
    item_key_offset: i64,
    parent_keys: Vec<i64>,
}

impl EntryTable {
    fn item_count(&self) -> i64 {
        self.item_key_offset + self.parent_keys.len() as i64
    }

    /// Parent keys of every entry, inherited ones marked invalid.
    fn flattened(&self) -> Vec<i64> {
        let mut keys = vec![INVALID_ENTRY_KEY; self.item_key_offset as usize];
        keys.extend_from_slice(&self.parent_keys);
        keys
    }
}

/// A row space with its attributes.
pub struct MetadataDomain {
    id: DomainId,
    uid: u64,
    multi_entry: bool,
    supports_parenting: bool,
    parent: RwLock<Option<Arc<MetadataDomain>>>,
    attributes: RwLock<AttributeTable>,
    entries: RwLock<EntryTable>,
    delayed_entries: AtomicI64,
}

impl std::fmt::Debug for MetadataDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataDomain")
            .field("id", &self.id)
            .field("multi_entry", &self.multi_entry)
            .field("items", &self.item_count())
            .field("attributes", &self.attribute_count())
            .finish()
    }
}

impl MetadataDomain {
    /// Create an empty domain.
    pub fn new(id: DomainId, multi_entry: bool, supports_parenting: bool) -> Self {
        Self {
            id,
            uid: NEXT_DOMAIN_UID.fetch_add(1, Ordering::Relaxed),
            multi_entry,
            supports_parenting,
            parent: RwLock::new(None),
            attributes: RwLock::new(AttributeTable::default()),
            entries: RwLock::new(EntryTable::default()),
            delayed_entries: AtomicI64::new(0),
        }
    }

    /// Domain id within its container.
    #[inline]
    pub fn id(&self) -> DomainId {
        self.id
    }

    /// Process-unique identity of this domain.
    #[inline]
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Whether the domain holds one row per element (false: a single row).
    #[inline]
    pub fn supports_multi_entry(&self) -> bool {
        self.multi_entry
    }

    /// Whether `initialize` may link to a parent instead of copying.
    #[inline]
    pub fn supports_parenting(&self) -> bool {
        self.supports_parenting
    }

    /// Parent domain, if any.
    pub fn parent(&self) -> Option<Arc<MetadataDomain>> {
        self.parent.read().clone()
    }

    /// Uid of the root of the parent chain.
    pub fn root_uid(&self) -> u64 {
        let mut uid = self.uid;
        let mut current = self.parent();
        while let Some(domain) = current {
            uid = domain.uid;
            current = domain.parent();
        }
        uid
    }

    /// Whether `other` is this domain or one of its ancestors.
    pub fn is_self_or_ancestor(&self, other: &MetadataDomain) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let mut current = self.parent();
        while let Some(domain) = current {
            if std::ptr::eq(Arc::as_ptr(&domain), other) {
                return true;
            }
            current = domain.parent();
        }
        false
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    /// Link to `parent` and import its attribute definitions.
    ///
    /// Degrades to [`initialize_as_copy`](Self::initialize_as_copy) when
    /// this domain does not support parenting. A missing parent, the domain
    /// itself or one of its descendants is ignored.
    pub fn initialize(
        &self,
        parent: Option<&Arc<MetadataDomain>>,
        filter: &AttributeFilter,
    ) -> Result<()> {
        let Some(parent) = parent else {
            return Ok(());
        };
        if parent.is_self_or_ancestor(self) {
            warn!("Domain {} cannot be parented to itself or a descendant", self.id);
            return Ok(());
        }
        if !self.supports_parenting {
            return self.initialize_as_copy(parent, filter, None);
        }

        let offset = parent.item_count();
        {
            let mut entries = self.entries.write();
            entries.item_key_offset = offset;
            entries.parent_keys.clear();
        }
        *self.parent.write() = Some(Arc::clone(parent));

        let inherited: Vec<Arc<dyn MetadataAttribute>> = parent
            .attributes
            .read()
            .ordered()
            .into_iter()
            .filter(|attr| filter.passes(&attr.name()))
            .collect();

        let mut table = self.attributes.write();
        *table = AttributeTable::default();
        for attr in inherited {
            table.insert(attr.new_child_erased(offset));
        }
        debug!(
            "Domain {} linked to parent ({} items, {} attributes)",
            self.id,
            offset,
            table.by_name.len()
        );
        Ok(())
    }

    /// Duplicate `source`'s attributes and entries.
    ///
    /// With `subset`, only those source entries are kept, renumbered in
    /// order, and the result has no parent. Without it, entries and parent
    /// keys are preserved and the source's parent link is kept when legal.
    pub fn initialize_as_copy(
        &self,
        source: &MetadataDomain,
        filter: &AttributeFilter,
        subset: Option<&[i64]>,
    ) -> Result<()> {
        if std::ptr::eq(self, source) {
            return Ok(());
        }
        let _span = debug_span!("initialize_as_copy", domain = %self.id).entered();
        let source_attributes: Vec<Arc<dyn MetadataAttribute>> = source
            .attributes
            .read()
            .ordered()
            .into_iter()
            .filter(|attr| filter.passes(&attr.name()))
            .collect();

        let mut table = AttributeTable::default();
        let (entries, parent) = match subset {
            Some(keep) => {
                for attr in &source_attributes {
                    let copy = attr.copy_erased(&attr.name(), false, true, true);
                    copy.flatten_and_compress(keep)?;
                    table.insert(copy);
                }
                let entries = EntryTable {
                    item_key_offset: 0,
                    parent_keys: vec![INVALID_ENTRY_KEY; keep.len()],
                };
                (entries, None)
            }
            None => {
                let source_parent = source.parent();
                let keep_parent = self.supports_parenting && source_parent.is_some();
                for attr in &source_attributes {
                    table.insert(attr.copy_erased(&attr.name(), keep_parent, true, true));
                }
                let source_entries = source.entries.read().clone();
                if keep_parent {
                    (source_entries, source_parent)
                } else {
                    let entries = EntryTable {
                        item_key_offset: 0,
                        parent_keys: source_entries.flattened(),
                    };
                    (entries, None)
                }
            }
        };

        *self.attributes.write() = table;
        *self.entries.write() = entries;
        *self.parent.write() = parent;
        Ok(())
    }

    // ========================================================================
    // Entries
    // ========================================================================

    /// Total number of entries, inherited ones included.
    pub fn item_count(&self) -> i64 {
        self.entries.read().item_count()
    }

    /// Number of entries created on this domain.
    pub fn local_item_count(&self) -> i64 {
        self.entries.read().parent_keys.len() as i64
    }

    /// First local entry key; lower keys are inherited.
    pub fn item_key_offset(&self) -> i64 {
        self.entries.read().item_key_offset
    }

    /// Parent entry of `entry` (inherited entries map to themselves).
    pub fn parent_key(&self, entry: i64) -> i64 {
        let entries = self.entries.read();
        if entry < 0 {
            return INVALID_ENTRY_KEY;
        }
        if entry < entries.item_key_offset {
            return entry;
        }
        entries
            .parent_keys
            .get((entry - entries.item_key_offset) as usize)
            .copied()
            .unwrap_or(INVALID_ENTRY_KEY)
    }

    /// Append an entry. Single-entry domains only create one row; further
    /// calls return entry 0.
    pub fn add_entry(&self, parent_key: i64) -> i64 {
        let mut entries = self.entries.write();
        if !self.multi_entry && entries.item_count() > 0 {
            if config::global().warn_on_scalar_add_entry {
                warn!("Domain {} holds a single entry, reusing entry 0", self.id);
            }
            return 0;
        }
        entries.parent_keys.push(parent_key);
        entries.item_count() - 1
    }

    /// Append one entry per parent key.
    pub fn add_entries(&self, parent_keys: &[i64]) -> Vec<i64> {
        if !self.multi_entry {
            return parent_keys.iter().map(|&p| self.add_entry(p)).collect();
        }
        let mut entries = self.entries.write();
        let first = entries.item_count();
        entries.parent_keys.extend_from_slice(parent_keys);
        (first..first + parent_keys.len() as i64).collect()
    }

    /// Reserve an entry key without creating the entry.
    ///
    /// Safe to call from several threads. The entries are created by
    /// [`add_delayed_entries`](Self::add_delayed_entries); direct
    /// [`add_entry`](Self::add_entry) calls in between are not allowed.
    /// Single-entry domains hand out entry 0 every time.
    pub fn add_entry_placeholder(&self) -> i64 {
        if !self.multi_entry {
            return 0;
        }
        let entries = self.entries.read();
        entries.item_count() + self.delayed_entries.fetch_add(1, Ordering::Relaxed)
    }

    /// Create the entries reserved by placeholders, with their parent keys.
    pub fn add_delayed_entries(&self, placeholders: &[(i64, i64)]) {
        if !self.multi_entry {
            if let Some(&(_, parent_key)) = placeholders.first() {
                let mut entries = self.entries.write();
                if entries.item_count() == 0 {
                    entries.parent_keys.push(parent_key);
                }
            }
            return;
        }
        let mut sorted = placeholders.to_vec();
        sorted.sort_unstable_by_key(|&(entry, _)| entry);

        let mut entries = self.entries.write();
        for (entry, parent_key) in sorted {
            let index = entry - entries.item_key_offset;
            if index < 0 {
                continue;
            }
            let index = index as usize;
            if index >= entries.parent_keys.len() {
                entries.parent_keys.resize(index + 1, INVALID_ENTRY_KEY);
            }
            entries.parent_keys[index] = parent_key;
        }
        self.delayed_entries.store(0, Ordering::Relaxed);
    }

    /// Reserve an entry, thread-safe. See [`EntryTicket`].
    pub fn reserve(&self) -> EntryTicket {
        EntryTicket(self.add_entry_placeholder())
    }

    /// Create the reserved entries with their parent keys, closing the epoch.
    pub fn commit(&self, tickets: &[(EntryTicket, i64)]) {
        let placeholders: Vec<(i64, i64)> =
            tickets.iter().map(|&(t, parent)| (t.0, parent)).collect();
        self.add_delayed_entries(&placeholders);
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Attributes in creation order.
    ///
    /// The table lock is released on return, so callers may reach back into
    /// this domain (or pass it as the other side) while iterating.
    pub fn ordered_attributes(&self) -> Vec<Arc<dyn MetadataAttribute>> {
        self.attributes.read().ordered()
    }

    /// Number of attributes.
    pub fn attribute_count(&self) -> usize {
        self.attributes.read().by_name.len()
    }

    /// Whether an attribute with this name exists.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.read().by_name.contains_key(name)
    }

    /// Whether both domains define an attribute of the same name.
    pub fn has_common_attributes(&self, other: &MetadataDomain) -> bool {
        if std::ptr::eq(self, other) {
            return self.attribute_count() > 0;
        }
        let names: Vec<String> = self.attributes.read().by_name.keys().cloned().collect();
        let other_table = other.attributes.read();
        names.iter().any(|name| other_table.by_name.contains_key(name))
    }

    /// Attribute names and types in creation order.
    pub fn attribute_names_and_types(&self) -> Vec<(String, AttributeType)> {
        self.attributes
            .read()
            .ordered()
            .iter()
            .map(|attr| (attr.name(), attr.attribute_type()))
            .collect()
    }

    /// Most recently created attribute.
    pub fn latest_attribute_name(&self) -> Option<String> {
        self.attributes.read().latest()
    }

    /// Type-erased attribute by name.
    pub fn get_attribute(&self, name: &str) -> Option<Arc<dyn MetadataAttribute>> {
        self.attributes.read().by_name.get(name).cloned()
    }

    /// Typed attribute by name.
    pub fn get_typed_attribute<T: MetadataType>(
        &self,
        name: &str,
    ) -> Result<Arc<TypedAttribute<T>>> {
        let attr = self
            .get_attribute(name)
            .ok_or_else(|| Error::AttributeNotFound(name.to_string()))?;
        let actual = attr.attribute_type();
        attr.downcast_arc::<T>()
            .ok_or_else(|| Error::type_mismatch(T::TYPE, actual))
    }

    /// Create a typed attribute.
    ///
    /// An existing attribute of the same type is returned (with a warning)
    /// unless `override_parent` is set and it inherits from a parent, in
    /// which case it is replaced by a standalone attribute.
    pub fn create_attribute<T: MetadataType>(
        &self,
        name: &str,
        default_value: T,
        allows_interpolation: bool,
        override_parent: bool,
    ) -> Result<Arc<TypedAttribute<T>>> {
        let attr = self.create_attribute_from_value(
            name,
            &default_value.to_value(),
            allows_interpolation,
            override_parent,
        )?;
        let actual = attr.attribute_type();
        attr.downcast_arc::<T>()
            .ok_or_else(|| Error::type_mismatch(T::TYPE, actual))
    }

    /// Create an attribute whose type is given by its default value.
    pub fn create_attribute_from_value(
        &self,
        name: &str,
        default_value: &AttributeValue,
        allows_interpolation: bool,
        override_parent: bool,
    ) -> Result<Arc<dyn MetadataAttribute>> {
        if !is_valid_attribute_name(name) {
            return Err(Error::InvalidName(name.to_string()));
        }
        let requested = default_value.value_type();
        let mut table = self.attributes.write();

        if let Some(existing) = table.by_name.get(name) {
            if existing.attribute_type() != requested {
                return Err(Error::DuplicateName {
                    name: name.to_string(),
                    existing: existing.attribute_type().to_string(),
                    requested: requested.to_string(),
                });
            }
            if !(override_parent && existing.has_parent()) {
                warn!("Attribute '{name}' already exists on domain {}", self.id);
                return Ok(Arc::clone(existing));
            }
            table.remove(name);
        }

        let attr = new_attribute_erased(name, default_value, allows_interpolation);
        table.insert(Arc::clone(&attr));
        Ok(attr)
    }

    /// Remove an attribute. Returns false if it did not exist.
    pub fn delete_attribute(&self, name: &str) -> bool {
        self.attributes.write().remove(name).is_some()
    }

    /// Rename an attribute, keeping its creation order.
    pub fn rename_attribute(&self, old_name: &str, new_name: &str) -> Result<()> {
        if !is_valid_attribute_name(new_name) {
            return Err(Error::InvalidName(new_name.to_string()));
        }
        let mut table = self.attributes.write();
        if table.by_name.contains_key(new_name) {
            let existing = &table.by_name[new_name];
            return Err(Error::DuplicateName {
                name: new_name.to_string(),
                existing: existing.attribute_type().to_string(),
                requested: existing.attribute_type().to_string(),
            });
        }
        let id = table
            .ids
            .remove(old_name)
            .ok_or_else(|| Error::AttributeNotFound(old_name.to_string()))?;
        let attr = table
            .by_name
            .remove(old_name)
            .ok_or_else(|| Error::AttributeNotFound(old_name.to_string()))?;
        attr.set_name(new_name);
        table.ids.insert(new_name.to_string(), id);
        table.by_name.insert(new_name.to_string(), attr);
        Ok(())
    }

    /// Drop the local values of an attribute. Returns false if absent.
    pub fn clear_attribute(&self, name: &str) -> bool {
        match self.get_attribute(name) {
            Some(attr) => {
                attr.clear();
                true
            }
            None => false,
        }
    }

    /// Duplicate an attribute of this domain under another name.
    pub fn copy_attribute(
        &self,
        source_name: &str,
        new_name: &str,
        keep_parent: bool,
        copy_entries: bool,
        copy_values: bool,
    ) -> Result<Arc<dyn MetadataAttribute>> {
        self.copy_attribute_from(
            self,
            source_name,
            new_name,
            keep_parent,
            copy_entries,
            copy_values,
        )
    }

    /// Duplicate an attribute of `source` into this domain.
    ///
    /// `keep_parent` requires both domains to share the same root.
    pub fn copy_attribute_from(
        &self,
        source: &MetadataDomain,
        source_name: &str,
        new_name: &str,
        keep_parent: bool,
        copy_entries: bool,
        copy_values: bool,
    ) -> Result<Arc<dyn MetadataAttribute>> {
        if !is_valid_attribute_name(new_name) {
            return Err(Error::InvalidName(new_name.to_string()));
        }
        if keep_parent && self.root_uid() != source.root_uid() {
            return Err(Error::UnsupportedOperation(format!(
                "cannot keep the parent of '{source_name}' across unrelated domains"
            )));
        }
        let attr = source
            .get_attribute(source_name)
            .ok_or_else(|| Error::AttributeNotFound(source_name.to_string()))?;

        let copy = attr.copy_erased(new_name, keep_parent, copy_entries, copy_values);
        let mut table = self.attributes.write();
        if let Some(existing) = table.by_name.get(new_name) {
            return Err(Error::DuplicateName {
                name: new_name.to_string(),
                existing: existing.attribute_type().to_string(),
                requested: copy.attribute_type().to_string(),
            });
        }
        table.insert(Arc::clone(&copy));
        Ok(copy)
    }

    /// Import the definition of `name` from `other` if absent locally.
    ///
    /// When `other` is this domain's parent the new attribute inherits its
    /// values; otherwise only the type, default and interpolation flag are
    /// imported. Returns true if an attribute was added.
    pub fn add_attribute_from(&self, other: &MetadataDomain, name: &str) -> bool {
        if self.has_attribute(name) {
            return false;
        }
        let Some(attr) = other.get_attribute(name) else {
            return false;
        };
        let is_parent = self
            .parent()
            .is_some_and(|p| std::ptr::eq(Arc::as_ptr(&p), other));
        let added = if is_parent {
            attr.new_child_erased(self.item_key_offset())
        } else {
            attr.new_definition(name)
        };
        let mut table = self.attributes.write();
        if table.by_name.contains_key(name) {
            return false;
        }
        table.insert(added);
        true
    }

    /// Convert an attribute to another type.
    ///
    /// Every value (and the default) is broadcast or constructed into the
    /// new type; the attribute is flattened in the process.
    pub fn change_attribute_type(&self, name: &str, new_type: AttributeType) -> Result<()> {
        let attr = self
            .get_attribute(name)
            .ok_or_else(|| Error::AttributeNotFound(name.to_string()))?;
        let old_type = attr.attribute_type();
        if old_type == new_type {
            return Ok(());
        }
        let convert = |value: &AttributeValue| {
            value
                .broadcast(new_type)
                .or_else(|| value.construct(new_type))
                .ok_or_else(|| Error::type_mismatch(new_type, old_type))
        };

        let default_value = convert(&attr.default_value_erased())?;
        let converted = new_attribute_erased(name, &default_value, attr.allows_interpolation());
        for entry in 0..self.item_count() {
            if attr.value_key(entry) != super::DEFAULT_VALUE_KEY {
                converted.set_value_erased(entry, &convert(&attr.value_at(entry))?)?;
            }
        }
        self.attributes.write().replace(converted);
        Ok(())
    }

    // ========================================================================
    // Bulk value operations
    // ========================================================================

    /// Copy values of every common attribute from `source[in_keys[i]]` into
    /// `out_keys[i]`.
    ///
    /// Invalid out keys get a fresh entry. Duplicate `(in, out)` pairs are
    /// applied once. Large batches process attributes in parallel; each
    /// attribute is written by a single worker.
    pub fn set_attributes(
        &self,
        in_keys: &[i64],
        source: &MetadataDomain,
        out_keys: &mut [i64],
    ) -> Result<()> {
        if in_keys.len() != out_keys.len() {
            return Err(Error::EntryCountMismatch {
                expected: in_keys.len(),
                actual: out_keys.len(),
            });
        }
        let _span =
            debug_span!("set_attributes", domain = %self.id, count = in_keys.len()).entered();

        for out in out_keys.iter_mut().filter(|k| **k == INVALID_ENTRY_KEY) {
            *out = self.add_entry(INVALID_ENTRY_KEY);
        }

        let mut seen = HashSet::with_capacity(in_keys.len());
        let pairs: Vec<(i64, i64)> = in_keys
            .iter()
            .copied()
            .zip(out_keys.iter().copied())
            .filter(|pair| seen.insert(*pair))
            .collect();

        self.set_attribute_pairs(&pairs, source);
        Ok(())
    }

    /// Copy values from the parent domain into entries, using each entry's
    /// parent key.
    pub fn set_attributes_from_parent(&self, entries: &[i64]) -> Result<()> {
        let parent = self
            .parent()
            .ok_or_else(|| {
                Error::UnsupportedOperation(format!("domain {} has no parent", self.id))
            })?;
        let pairs: Vec<(i64, i64)> = entries
            .iter()
            .map(|&entry| (self.parent_key(entry), entry))
            .filter(|&(parent_key, entry)| parent_key != INVALID_ENTRY_KEY && entry >= 0)
            .collect();
        self.set_attribute_pairs(&pairs, &parent);
        Ok(())
    }

    fn set_attribute_pairs(&self, pairs: &[(i64, i64)], source: &MetadataDomain) {
        if pairs.is_empty() {
            return;
        }
        let work: Vec<(Arc<dyn MetadataAttribute>, Arc<dyn MetadataAttribute>)> = self
            .ordered_attributes()
            .into_iter()
            .filter_map(|attr| source.get_attribute(&attr.name()).map(|src| (attr, src)))
            .collect();

        let apply = |(attr, src): &(Arc<dyn MetadataAttribute>, Arc<dyn MetadataAttribute>)| {
            if let Err(e) = attr.set_values_from(pairs, src.as_ref()) {
                debug!("Skipping attribute '{}': {e}", attr.name());
            }
        };

        if pairs.len() >= config::global().parallel_set_attributes_threshold && work.len() > 1 {
            work.par_iter().for_each(apply);
        } else {
            work.iter().for_each(apply);
        }
    }

    /// Merge entries of two domains into `out_entry` with `op`.
    ///
    /// An attribute takes part from side A only if `subset_a` also defines
    /// it (likewise for B). Mismatched types are skipped. An invalid
    /// `out_entry` gets a fresh entry; the entry used is returned.
    #[allow(clippy::too_many_arguments)]
    pub fn merge_attributes_subset(
        &self,
        entry_a: i64,
        domain_a: &MetadataDomain,
        subset_a: &MetadataDomain,
        entry_b: i64,
        domain_b: &MetadataDomain,
        subset_b: &MetadataDomain,
        out_entry: i64,
        op: MetadataOp,
    ) -> i64 {
        let out_entry = if out_entry == INVALID_ENTRY_KEY {
            self.add_entry(INVALID_ENTRY_KEY)
        } else {
            out_entry
        };

        for attr in self.ordered_attributes() {
            let name = attr.name();
            let a = subset_a
                .has_attribute(&name)
                .then(|| domain_a.get_attribute(&name))
                .flatten();
            let b = subset_b
                .has_attribute(&name)
                .then(|| domain_b.get_attribute(&name))
                .flatten();
            if a.is_none() && b.is_none() {
                continue;
            }
            let result = attr.set_value_merged(
                out_entry,
                a.as_deref().map(|attr| (attr, entry_a)),
                b.as_deref().map(|attr| (attr, entry_b)),
                op,
            );
            if let Err(e) = result {
                warn!("Skipping attribute '{name}' in merge: {e}");
            }
        }
        out_entry
    }

    /// [`merge_attributes_subset`](Self::merge_attributes_subset) with each
    /// domain as its own subset.
    pub fn merge_attributes(
        &self,
        entry_a: i64,
        domain_a: &MetadataDomain,
        entry_b: i64,
        domain_b: &MetadataDomain,
        out_entry: i64,
        op: MetadataOp,
    ) -> i64 {
        self.merge_attributes_subset(
            entry_a, domain_a, domain_a, entry_b, domain_b, domain_b, out_entry, op,
        )
    }

    /// Reset interpolable attributes of `entry` before accumulation.
    pub fn reset_weighted_attributes(&self, entry: i64) {
        for attr in self.ordered_attributes() {
            if let Err(e) = attr.reset_weighted_value(entry) {
                debug!("Cannot reset '{}': {e}", attr.name());
            }
        }
    }

    /// Add `weight * source[source_entry]` into `entry` for common attributes.
    pub fn accumulate_weighted_attributes(
        &self,
        entry: i64,
        source: &MetadataDomain,
        source_entry: i64,
        weight: f32,
        set_non_interpolable: bool,
    ) {
        for attr in self.ordered_attributes() {
            let Some(src) = source.get_attribute(&attr.name()) else {
                continue;
            };
            if let Err(e) = attr.accumulate_weighted_value(
                entry,
                src.as_ref(),
                source_entry,
                weight,
                set_non_interpolable,
            ) {
                warn!("Skipping attribute '{}' in weighted blend: {e}", attr.name());
            }
        }
    }

    /// Blend `(source_entry, weight)` pairs into `out_entry`.
    ///
    /// Non-interpolable attributes take the value of the heaviest source
    /// when `set_non_interpolable` is set. Returns the entry written.
    pub fn compute_weighted_attributes(
        &self,
        out_entry: i64,
        source: &MetadataDomain,
        weighted: &[(i64, f32)],
        set_non_interpolable: bool,
    ) -> i64 {
        let out_entry = if out_entry == INVALID_ENTRY_KEY {
            self.add_entry(INVALID_ENTRY_KEY)
        } else {
            out_entry
        };
        if weighted.is_empty() {
            return out_entry;
        }

        let heaviest = weighted
            .iter()
            .copied()
            .reduce(|best, item| if item.1 > best.1 { item } else { best })
            .map(|(entry, _)| entry)
            .unwrap_or(INVALID_ENTRY_KEY);

        for attr in self.ordered_attributes() {
            let Some(src) = source.get_attribute(&attr.name()) else {
                continue;
            };
            let result = if attr.allows_interpolation() {
                attr.reset_weighted_value(out_entry).and_then(|_| {
                    for &(entry, weight) in weighted {
                        attr.accumulate_weighted_value(
                            out_entry,
                            src.as_ref(),
                            entry,
                            weight,
                            false,
                        )?;
                    }
                    attr.finish_weighted_value(out_entry)
                })
            } else if set_non_interpolable {
                attr.set_value_from(out_entry, src.as_ref(), heaviest)
            } else {
                Ok(())
            };
            if let Err(e) = result {
                warn!("Skipping attribute '{}' in weighted blend: {e}", attr.name());
            }
        }
        out_entry
    }

    // ========================================================================
    // Flattening
    // ========================================================================

    /// Materialize inherited entries and values, then drop the parent.
    pub fn flatten(&self) {
        let _span = debug_span!("flatten_domain", domain = %self.id).entered();
        let attributes = self.ordered_attributes();
        attributes.par_iter().for_each(|attr| attr.flatten());

        let mut entries = self.entries.write();
        let flattened = entries.flattened();
        entries.parent_keys = flattened;
        entries.item_key_offset = 0;
        *self.parent.write() = None;
    }

    /// Keep only `keep` entries (renumbered in order) and drop the parent.
    pub fn flatten_and_compress(&self, keep: &[i64]) -> Result<()> {
        let _span =
            debug_span!("flatten_and_compress", domain = %self.id, keep = keep.len()).entered();
        let attributes = self.ordered_attributes();
        attributes
            .par_iter()
            .try_for_each(|attr| attr.flatten_and_compress(keep))?;

        let mut entries = self.entries.write();
        entries.parent_keys = vec![INVALID_ENTRY_KEY; keep.len()];
        entries.item_key_offset = 0;
        *self.parent.write() = None;
        Ok(())
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Write attributes (flattened) and parent keys.
    pub(crate) fn write_payload(&self, w: &mut dyn Write) -> Result<()> {
        let attributes = self.ordered_attributes();
        w.write_i32::<LittleEndian>(attributes.len() as i32)?;
        for attr in &attributes {
            let name = attr.name();
            w.write_u32::<LittleEndian>(name.len() as u32)?;
            w.write_all(name.as_bytes())?;
            w.write_i32::<LittleEndian>(attr.attribute_type().id() as i32)?;
            attr.write_payload_erased(w)?;
        }

        let parent_keys = self.entries.read().flattened();
        w.write_i32::<LittleEndian>(parent_keys.len() as i32)?;
        for key in parent_keys {
            w.write_i64::<LittleEndian>(key)?;
        }
        Ok(())
    }

    /// Inverse of [`write_payload`](Self::write_payload).
    pub(crate) fn read_payload(
        id: DomainId,
        multi_entry: bool,
        supports_parenting: bool,
        r: &mut dyn Read,
    ) -> Result<Self> {
        let domain = Self::new(id, multi_entry, supports_parenting);

        let attribute_count = r.read_i32::<LittleEndian>()?;
        if attribute_count < 0 {
            return Err(Error::invalid("negative attribute count"));
        }
        {
            let mut table = domain.attributes.write();
            for _ in 0..attribute_count {
                let len = r.read_u32::<LittleEndian>()? as usize;
                let name = String::from_utf8(read_bytes(r, len)?)?;
                let type_id = r.read_i32::<LittleEndian>()?;
                let ty = u8::try_from(type_id)
                    .ok()
                    .and_then(AttributeType::from_id)
                    .ok_or_else(|| {
                        Error::invalid(format!("unknown type id {type_id} for '{name}'"))
                    })?;
                table.insert(read_attribute_erased(&name, ty, r)?);
            }
        }

        let key_count = r.read_i32::<LittleEndian>()?;
        if key_count < 0 {
            return Err(Error::invalid("negative entry count"));
        }
        let mut parent_keys = Vec::with_capacity((key_count as usize).min(PREALLOC_LIMIT));
        for _ in 0..key_count {
            parent_keys.push(r.read_i64::<LittleEndian>()?);
        }
        domain.entries.write().parent_keys = parent_keys;
        Ok(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elements() -> MetadataDomain {
        MetadataDomain::new(DomainId::ELEMENTS, true, true)
    }

    #[test]
    fn test_create_is_idempotent() {
        let d = elements();
        let a = d.create_attribute("Score", 0i32, true, false).unwrap();
        let b = d.create_attribute("Score", 5i32, true, false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(matches!(
            d.create_attribute("Score", 0.0f64, true, false),
            Err(Error::DuplicateName { .. })
        ));
        assert!(matches!(
            d.create_attribute("@Last", 0i32, true, false),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_scalar_domain_single_entry() {
        let d = MetadataDomain::new(DomainId::DATA, false, true);
        assert_eq!(d.add_entry(INVALID_ENTRY_KEY), 0);
        assert_eq!(d.add_entry(INVALID_ENTRY_KEY), 0);
        assert_eq!(d.item_count(), 1);
    }

    #[test]
    fn test_placeholders() {
        let d = elements();
        d.add_entry(INVALID_ENTRY_KEY);
        let keys: Vec<i64> = (0..3).map(|_| d.add_entry_placeholder()).collect();
        assert_eq!(keys, vec![1, 2, 3]);
        d.add_delayed_entries(&[(3, 30), (1, 10), (2, 20)]);
        assert_eq!(d.item_count(), 4);
        assert_eq!(d.parent_key(2), 20);
        assert_eq!(d.add_entry_placeholder(), 4);
    }

    #[test]
    fn test_self_merge_alongside_writers() {
        let d = elements();
        d.add_entry(INVALID_ENTRY_KEY);
        let score = d.create_attribute("Score", 1i32, true, false).unwrap();
        score.set_value(0, 3).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..200 {
                    d.create_attribute(&format!("Extra{i}"), 0.0f64, true, false).unwrap();
                }
            });
            for _ in 0..200 {
                let out = d.merge_attributes(0, &d, 0, &d, INVALID_ENTRY_KEY, MetadataOp::Add);
                d.set_attributes(&[0], &d, &mut [out]).unwrap();
                d.compute_weighted_attributes(out, &d, &[(0, 0.5), (out, 0.5)], true);
            }
        });

        assert_eq!(d.attribute_count(), 201);
        assert_eq!(score.get_value_from_item_key(0), 3);
    }

    #[test]
    fn test_single_entry_placeholders() {
        let d = MetadataDomain::new(DomainId::DATA, false, true);
        let keys: Vec<i64> = (0..3).map(|_| d.add_entry_placeholder()).collect();
        assert_eq!(keys, vec![0, 0, 0]);
        d.add_delayed_entries(&[
            (0, INVALID_ENTRY_KEY),
            (0, INVALID_ENTRY_KEY),
            (0, INVALID_ENTRY_KEY),
        ]);
        assert_eq!(d.item_count(), 1);

        let ticket = d.reserve();
        assert_eq!(ticket.key(), 0);
        d.commit(&[(ticket, INVALID_ENTRY_KEY)]);
        assert_eq!(d.item_count(), 1);
    }

    #[test]
    fn test_parallel_reserve_then_commit() {
        let d = elements();
        let tickets: Vec<EntryTicket> = (0..64).into_par_iter().map(|_| d.reserve()).collect();
        let mut keys: Vec<i64> = tickets.iter().map(|t| t.key()).collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..64).collect::<Vec<_>>());

        let pairs: Vec<(EntryTicket, i64)> = tickets.iter().map(|&t| (t, t.key() * 2)).collect();
        d.commit(&pairs);
        assert_eq!(d.item_count(), 64);
        assert_eq!(d.parent_key(10), 20);
        assert_eq!(d.reserve().key(), 64);
    }

    #[test]
    fn test_latest_and_rename() {
        let d = elements();
        d.create_attribute("A", 0i32, true, false).unwrap();
        d.create_attribute("B", 0i32, true, false).unwrap();
        assert_eq!(d.latest_attribute_name().as_deref(), Some("B"));
        d.rename_attribute("B", "C").unwrap();
        assert_eq!(d.latest_attribute_name().as_deref(), Some("C"));
        assert!(d.rename_attribute("C", "A").is_err());
        assert!(d.delete_attribute("C"));
        assert_eq!(d.latest_attribute_name().as_deref(), Some("A"));
    }

    #[test]
    fn test_initialize_links_parent() {
        let parent = Arc::new(elements());
        let attr = parent.create_attribute("Score", 0i32, true, false).unwrap();
        let e0 = parent.add_entry(INVALID_ENTRY_KEY);
        attr.set_value(e0, 3).unwrap();

        let child = elements();
        child.initialize(Some(&parent), &AttributeFilter::all()).unwrap();
        assert_eq!(child.item_count(), 1);
        let child_attr = child.get_typed_attribute::<i32>("Score").unwrap();
        assert_eq!(child_attr.get_value_from_item_key(e0), 3);
        assert_eq!(child.root_uid(), parent.uid());

        let e1 = child.add_entry(e0);
        assert_eq!(e1, 1);
        child.set_attributes_from_parent(&[e1]).unwrap();
        assert_eq!(child_attr.get_value_from_item_key(e1), 3);
    }

    #[test]
    fn test_initialize_without_parenting_copies() {
        let parent = Arc::new(elements());
        parent.create_attribute("Score", 1i32, true, false).unwrap();
        parent.add_entry(INVALID_ENTRY_KEY);

        let child = MetadataDomain::new(DomainId::ELEMENTS, true, false);
        child.initialize(Some(&parent), &AttributeFilter::all()).unwrap();
        assert!(child.parent().is_none());
        assert_eq!(child.item_count(), 1);
        assert!(child.has_attribute("Score"));
    }

    #[test]
    fn test_set_attributes_dedup() {
        let src = elements();
        let a = src.create_attribute("V", 0i64, true, false).unwrap();
        for i in 0..4 {
            let e = src.add_entry(INVALID_ENTRY_KEY);
            a.set_value(e, i * 10).unwrap();
        }
        let dst = elements();
        dst.create_attribute("V", 0i64, true, false).unwrap();
        dst.create_attribute("Other", 0.0f32, true, false).unwrap();

        let mut out = vec![INVALID_ENTRY_KEY; 3];
        dst.set_attributes(&[3, 1, 3], &src, &mut out).unwrap();
        assert_eq!(out, vec![0, 1, 2]);
        let v = dst.get_typed_attribute::<i64>("V").unwrap();
        assert_eq!(v.get_values_from_item_keys(&out), vec![30, 10, 30]);
    }

    #[test]
    fn test_merge_skips_mismatch() {
        let a = elements();
        let b = elements();
        let out = elements();
        a.create_attribute("X", 0.0f64, true, false).unwrap().set_value(0, 1.0).unwrap();
        b.create_attribute("X", 0.0f64, true, false).unwrap().set_value(0, 2.0).unwrap();
        a.create_attribute("Y", 0i32, true, false).unwrap().set_value(0, 1).unwrap();
        b.create_attribute("Y", 0i32, true, false).unwrap().set_value(0, 2).unwrap();
        out.create_attribute("X", 0.0f64, true, false).unwrap();
        out.create_attribute("Y", 0.0f32, true, false).unwrap();

        let e = out.merge_attributes(0, &a, 0, &b, INVALID_ENTRY_KEY, MetadataOp::Add);
        assert_eq!(out.get_typed_attribute::<f64>("X").unwrap().get_value_from_item_key(e), 3.0);
        assert_eq!(out.get_typed_attribute::<f32>("Y").unwrap().get_value_from_item_key(e), 0.0);
    }

    #[test]
    fn test_compute_weighted() {
        let src = elements();
        let d = src.create_attribute("D", 0.0f64, true, false).unwrap();
        let t = src.create_attribute("T", String::new(), false, false).unwrap();
        d.set_value(0, 0.0).unwrap();
        d.set_value(1, 10.0).unwrap();
        t.set_value(0, "light".into()).unwrap();
        t.set_value(1, "heavy".into()).unwrap();

        let out = elements();
        out.create_attribute("D", 0.0f64, true, false).unwrap();
        out.create_attribute("T", String::new(), false, false).unwrap();
        let e =
            out.compute_weighted_attributes(INVALID_ENTRY_KEY, &src, &[(0, 0.3), (1, 0.7)], true);
        let blended = out.get_typed_attribute::<f64>("D").unwrap().get_value_from_item_key(e);
        assert!((blended - 7.0).abs() < 1e-9);
        let text = out.get_typed_attribute::<String>("T").unwrap();
        assert_eq!(text.get_value_from_item_key(e), "heavy");
    }

    #[test]
    fn test_change_attribute_type() {
        let d = elements();
        let a = d.create_attribute("N", 2i32, true, false).unwrap();
        let e = d.add_entry(INVALID_ENTRY_KEY);
        a.set_value(e, 7).unwrap();
        d.change_attribute_type("N", AttributeType::Double).unwrap();
        let converted = d.get_typed_attribute::<f64>("N").unwrap();
        assert_eq!(converted.get_value_from_item_key(e), 7.0);
        assert_eq!(converted.default_value(), 2.0);
        assert!(d.change_attribute_type("N", AttributeType::Quat).is_err());
    }

    #[test]
    fn test_copy_keep_parent_requires_same_root() {
        let a = elements();
        let b = elements();
        a.create_attribute("S", 0i32, true, false).unwrap();
        assert!(matches!(
            b.copy_attribute_from(&a, "S", "S", true, true, true),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(b.copy_attribute_from(&a, "S", "S", false, true, true).is_ok());
        assert!(b.copy_attribute_from(&a, "S", "S", false, true, true).is_err());
    }
}
