//! Typed attribute columns.
//!
//! A [`TypedAttribute<T>`] maps entry keys (rows) to value keys, and value
//! keys to values. Value keys form a single key space along the parent
//! chain: a child attribute's local values start at `value_key_offset`, which
//! is the parent's value count when the child was created. Keys below the
//! offset are resolved by the parent. Entries without a local mapping that
//! are below `inherited_entry_count` are resolved by the parent as well.
//!
//! Parents are shared read-only: once a child references an attribute, that
//! attribute must not be mutated again (only its owner may flatten it away).

use std::any::Any;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::{debug, warn};

use super::{MetadataOp, MetadataType, DEFAULT_VALUE_KEY, INVALID_ENTRY_KEY, PREALLOC_LIMIT};
use crate::util::{AttributeType, AttributeValue, Error, Result};

/// Mutable state of a typed attribute, guarded by one lock.
#[derive(Clone)]
struct Storage<T: MetadataType> {
    default_value: T,
    values: Vec<T>,
    value_key_offset: i64,
    entry_to_value: HashMap<i64, i64>,
    inherited_entry_count: i64,
    parent: Option<Arc<TypedAttribute<T>>>,
    /// Local value positions by [`MetadataType::intern_hash`], interned types only.
    interned: HashMap<u64, SmallVec<[usize; 1]>>,
}

impl<T: MetadataType> Storage<T> {
    fn new(default_value: T) -> Self {
        Self {
            default_value,
            values: Vec::new(),
            value_key_offset: 0,
            entry_to_value: HashMap::new(),
            inherited_entry_count: 0,
            parent: None,
            interned: HashMap::new(),
        }
    }

    fn value_key_count(&self) -> i64 {
        self.value_key_offset + self.values.len() as i64
    }

    fn value_key(&self, entry: i64) -> i64 {
        if entry == INVALID_ENTRY_KEY {
            return DEFAULT_VALUE_KEY;
        }
        if let Some(&key) = self.entry_to_value.get(&entry) {
            return key;
        }
        match &self.parent {
            Some(parent) if entry < self.inherited_entry_count => parent.get_value_key(entry),
            _ => DEFAULT_VALUE_KEY,
        }
    }

    fn value(&self, key: i64) -> T {
        if key == DEFAULT_VALUE_KEY {
            return self.default_value.clone();
        }
        if key >= self.value_key_offset {
            return self
                .values
                .get((key - self.value_key_offset) as usize)
                .cloned()
                .unwrap_or_else(|| self.default_value.clone());
        }
        match &self.parent {
            Some(parent) => parent.get_value(key),
            None => self.default_value.clone(),
        }
    }

    /// Appends (or finds, for interned types) a value and returns its key.
    fn add_value(&mut self, value: T) -> i64 {
        if !T::TYPE.interns_values() {
            self.values.push(value);
            return self.value_key_count() - 1;
        }

        let Self { values, interned, value_key_offset, .. } = self;
        let bucket = interned.entry(value.intern_hash()).or_default();
        if let Some(&pos) = bucket.iter().find(|&&pos| values[pos].values_equal(&value)) {
            return *value_key_offset + pos as i64;
        }
        bucket.push(values.len());
        values.push(value);
        *value_key_offset + values.len() as i64 - 1
    }

    /// Replace the local value table.
    fn set_value_table(&mut self, values: Vec<T>) {
        self.values = values;
        self.interned.clear();
        if T::TYPE.interns_values() {
            for (pos, value) in self.values.iter().enumerate() {
                self.interned.entry(value.intern_hash()).or_default().push(pos);
            }
        }
    }

    fn set(&mut self, entry: i64, value: T) {
        let key = self.add_value(value);
        self.entry_to_value.insert(entry, key);
    }

    /// Values of the whole chain below `limit`, indexed by value key.
    fn chain_values(&self, limit: i64) -> Vec<T> {
        let mut out = match &self.parent {
            Some(parent) if self.value_key_offset > 0 => {
                parent.storage.read().chain_values(self.value_key_offset)
            }
            _ => Vec::new(),
        };
        out.resize(self.value_key_offset as usize, self.default_value.clone());
        out.extend(self.values.iter().cloned());
        out.truncate(limit.max(0) as usize);
        out
    }

    /// Effective entry mapping of the whole chain for entries below `limit`.
    fn chain_entries(&self, limit: i64, out: &mut HashMap<i64, i64>) {
        if let Some(parent) = &self.parent {
            let inherited_limit = limit.min(self.inherited_entry_count);
            if inherited_limit > 0 {
                parent.storage.read().chain_entries(inherited_limit, out);
            }
        }
        for (&entry, &key) in &self.entry_to_value {
            if entry < limit {
                out.insert(entry, key);
            }
        }
    }
}

/// A named, typed column of values addressed by entry key.
pub struct TypedAttribute<T: MetadataType> {
    name: RwLock<String>,
    allows_interpolation: bool,
    storage: RwLock<Storage<T>>,
}

impl<T: MetadataType> TypedAttribute<T> {
    /// Create a standalone attribute.
    pub fn new(name: impl Into<String>, default_value: T, allows_interpolation: bool) -> Self {
        Self {
            name: RwLock::new(name.into()),
            allows_interpolation: allows_interpolation && T::TYPE.interpolates_by_default(),
            storage: RwLock::new(Storage::new(default_value)),
        }
    }

    /// Create a child attribute that lazily resolves entries below
    /// `inherited_entry_count` through `parent`.
    pub fn new_child(parent: &Arc<Self>, inherited_entry_count: i64) -> Self {
        let parent_storage = parent.storage.read();
        let mut storage = Storage::new(parent_storage.default_value.clone());
        storage.value_key_offset = parent_storage.value_key_count();
        storage.inherited_entry_count = inherited_entry_count;
        storage.parent = Some(Arc::clone(parent));
        drop(parent_storage);

        Self {
            name: RwLock::new(parent.name()),
            allows_interpolation: parent.allows_interpolation,
            storage: RwLock::new(storage),
        }
    }

    /// Attribute name.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    /// Whether weighted blending is allowed.
    pub fn allows_interpolation(&self) -> bool {
        self.allows_interpolation
    }

    /// Default value returned for entries without a value.
    pub fn default_value(&self) -> T {
        self.storage.read().default_value.clone()
    }

    /// Replace the default value.
    pub fn set_default_value(&self, value: T) {
        self.storage.write().default_value = value;
    }

    /// Parent attribute, if any.
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.storage.read().parent.clone()
    }

    /// Whether `other` is this attribute or one of its ancestors.
    pub fn is_self_or_ancestor(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let mut current = self.parent();
        while let Some(attr) = current {
            if std::ptr::eq(Arc::as_ptr(&attr), other) {
                return true;
            }
            current = attr.parent();
        }
        false
    }

    /// Value key for an entry ([`DEFAULT_VALUE_KEY`] if unset).
    pub fn get_value_key(&self, entry: i64) -> i64 {
        self.storage.read().value_key(entry)
    }

    /// Value for a value key.
    pub fn get_value(&self, value_key: i64) -> T {
        self.storage.read().value(value_key)
    }

    /// Value for an entry: local mapping, then parent, then default.
    pub fn get_value_from_item_key(&self, entry: i64) -> T {
        let storage = self.storage.read();
        let key = storage.value_key(entry);
        storage.value(key)
    }

    /// Values for a batch of entries under a single lock.
    pub fn get_values_from_item_keys(&self, entries: &[i64]) -> Vec<T> {
        let storage = self.storage.read();
        entries
            .iter()
            .map(|&entry| storage.value(storage.value_key(entry)))
            .collect()
    }

    /// Set the value of one entry.
    pub fn set_value(&self, entry: i64, value: T) -> Result<()> {
        if entry < 0 {
            return Err(Error::InvalidEntryKey(entry));
        }
        self.storage.write().set(entry, value);
        Ok(())
    }

    /// Set values for a batch of entries under a single lock.
    pub fn set_values(&self, entries: &[i64], values: &[T]) -> Result<()> {
        if entries.len() != values.len() {
            return Err(Error::EntryCountMismatch {
                expected: entries.len(),
                actual: values.len(),
            });
        }
        if let Some(&bad) = entries.iter().find(|&&e| e < 0) {
            return Err(Error::InvalidEntryKey(bad));
        }
        let mut storage = self.storage.write();
        for (&entry, value) in entries.iter().zip(values) {
            storage.set(entry, value.clone());
        }
        Ok(())
    }

    /// Point an entry at an existing value key of this attribute's chain.
    pub fn set_value_from_value_key(&self, entry: i64, value_key: i64) -> Result<()> {
        if entry < 0 {
            return Err(Error::InvalidEntryKey(entry));
        }
        let mut storage = self.storage.write();
        if value_key >= storage.value_key_count() {
            return Err(Error::invalid(format!(
                "value key {value_key} out of range for '{}'",
                self.name()
            )));
        }
        storage.entry_to_value.insert(entry, value_key);
        Ok(())
    }

    /// Appends a value without binding it to an entry.
    pub fn add_value(&self, value: T) -> i64 {
        self.storage.write().add_value(value)
    }

    /// Copy the value `other` holds for `other_entry` into `entry`.
    ///
    /// When `other` shares this attribute's key space (self or an ancestor),
    /// only the value key is copied.
    pub fn set_value_from(&self, entry: i64, other: &Self, other_entry: i64) -> Result<()> {
        if self.is_self_or_ancestor(other) {
            let key = other.get_value_key(other_entry);
            if key != DEFAULT_VALUE_KEY {
                return self.set_value_from_value_key(entry, key);
            }
        }
        self.set_value(entry, other.get_value_from_item_key(other_entry))
    }

    /// Binary merge of two source entries into `entry`.
    ///
    /// A missing side falls back to the other side's value. Operations that
    /// have no meaning for `T` keep the source (`a`) value.
    pub fn set_value_merged(
        &self,
        entry: i64,
        a: Option<(&Self, i64)>,
        b: Option<(&Self, i64)>,
        op: MetadataOp,
    ) -> Result<()> {
        let value_a = a.map(|(attr, e)| attr.get_value_from_item_key(e));
        let value_b = b.map(|(attr, e)| attr.get_value_from_item_key(e));

        let merged = match (value_a, value_b) {
            (Some(va), Some(vb)) => va.merge(&vb, op).unwrap_or_else(|| {
                debug!("'{}': {op} not defined for {}, keeping source value", self.name(), T::TYPE);
                va
            }),
            (Some(v), None) | (None, Some(v)) => v,
            (None, None) => return Ok(()),
        };
        self.set_value(entry, merged)
    }

    /// Reset an entry to the accumulation zero before weighted blending.
    pub fn reset_weighted_value(&self, entry: i64) -> Result<()> {
        if !self.allows_interpolation {
            return Ok(());
        }
        self.set_value(entry, T::accumulation_zero())
    }

    /// `value(entry) += weight * other.value(other_entry)`.
    ///
    /// Non-interpolable attributes are skipped unless `set_non_interpolable`
    /// is true, in which case the value is overwritten (last writer wins).
    pub fn accumulate_weighted_value(
        &self,
        entry: i64,
        other: &Self,
        other_entry: i64,
        weight: f32,
        set_non_interpolable: bool,
    ) -> Result<()> {
        if !self.allows_interpolation {
            if set_non_interpolable {
                return self.set_value_from(entry, other, other_entry);
            }
            return Ok(());
        }
        let incoming = other.get_value_from_item_key(other_entry);
        let mut current = self.get_value_from_item_key(entry);
        if !current.weighted_add(&incoming, weight) {
            return Ok(());
        }
        self.set_value(entry, current)
    }

    /// Normalize an accumulated value (quaternions, transforms).
    pub fn finish_weighted_value(&self, entry: i64) -> Result<()> {
        if !self.allows_interpolation {
            return Ok(());
        }
        let mut value = self.get_value_from_item_key(entry);
        value.finish_accumulation();
        self.set_value(entry, value)
    }

    /// Whether the entry has a value other than the default key.
    pub fn has_non_default_value(&self, entry: i64) -> bool {
        self.get_value_key(entry) != DEFAULT_VALUE_KEY
    }

    /// Whether the value behind `value_key` equals the default value.
    pub fn is_equal_to_default_value(&self, value_key: i64) -> bool {
        let storage = self.storage.read();
        value_key == DEFAULT_VALUE_KEY
            || storage.value(value_key).values_equal(&storage.default_value)
    }

    /// Whether two value keys hold equal values.
    pub fn values_are_equal(&self, key_a: i64, key_b: i64) -> bool {
        if key_a == key_b {
            return true;
        }
        let storage = self.storage.read();
        storage.value(key_a).values_equal(&storage.value(key_b))
    }

    /// Total number of value keys in the chain.
    pub fn value_key_count(&self) -> i64 {
        self.storage.read().value_key_count()
    }

    /// Number of locally stored values.
    pub fn local_value_count(&self) -> usize {
        self.storage.read().values.len()
    }

    /// Number of locally mapped entries.
    pub fn local_entry_count(&self) -> usize {
        self.storage.read().entry_to_value.len()
    }

    /// Drop every local entry and value; inherited values stay visible.
    pub fn clear(&self) {
        let mut storage = self.storage.write();
        storage.set_value_table(Vec::new());
        storage.entry_to_value.clear();
    }

    /// Flattened `(entry mapping, values)` without modifying the attribute.
    fn flattened_tables(&self) -> (HashMap<i64, i64>, Vec<T>) {
        let storage = self.storage.read();
        let mut entries = HashMap::new();
        storage.chain_entries(i64::MAX, &mut entries);
        let values = storage.chain_values(storage.value_key_count());
        (entries, values)
    }

    /// Materialize every reachable entry locally and drop the parent link.
    pub fn flatten(&self) {
        if self.storage.read().parent.is_none() {
            return;
        }
        let (entries, values) = self.flattened_tables();
        let mut storage = self.storage.write();
        storage.entry_to_value = entries;
        storage.set_value_table(values);
        storage.value_key_offset = 0;
        storage.inherited_entry_count = 0;
        storage.parent = None;
    }

    /// Keep only `keep` entries, renumbered `0..keep.len()` in that order,
    /// and drop the parent link. Values are compacted.
    pub fn flatten_and_compress(&self, keep: &[i64]) -> Result<()> {
        if let Some(&bad) = keep.iter().find(|&&e| e < 0) {
            return Err(Error::InvalidEntryKey(bad));
        }

        let mut remap: HashMap<i64, i64> = HashMap::new();
        let mut values = Vec::new();
        let mut entries = HashMap::with_capacity(keep.len());
        {
            let storage = self.storage.read();
            for (new_entry, &old_entry) in keep.iter().enumerate() {
                let old_key = storage.value_key(old_entry);
                if old_key == DEFAULT_VALUE_KEY {
                    continue;
                }
                let new_key = *remap.entry(old_key).or_insert_with(|| {
                    values.push(storage.value(old_key));
                    values.len() as i64 - 1
                });
                entries.insert(new_entry as i64, new_key);
            }
        }

        let mut storage = self.storage.write();
        storage.entry_to_value = entries;
        storage.set_value_table(values);
        storage.value_key_offset = 0;
        storage.inherited_entry_count = 0;
        storage.parent = None;
        Ok(())
    }

    /// Duplicate this attribute under a new name.
    ///
    /// - `keep_parent`: share this attribute's parent and key space, copying
    ///   only local state. Otherwise the copy is flattened.
    /// - `copy_entries`: copy the entry mapping (requires `copy_values` when
    ///   the mapping refers to local values).
    /// - `copy_values`: copy the value table.
    pub fn copy(
        &self,
        new_name: &str,
        keep_parent: bool,
        copy_entries: bool,
        copy_values: bool,
    ) -> Self {
        let storage = self.storage.read();
        let mut copy = Storage::new(storage.default_value.clone());

        if keep_parent && storage.parent.is_some() {
            copy.parent = storage.parent.clone();
            copy.value_key_offset = storage.value_key_offset;
            copy.inherited_entry_count = storage.inherited_entry_count;
            if copy_values {
                copy.set_value_table(storage.values.clone());
            }
            if copy_entries {
                copy.entry_to_value = storage
                    .entry_to_value
                    .iter()
                    .filter(|(_, &key)| copy_values || key < storage.value_key_offset)
                    .map(|(&e, &k)| (e, k))
                    .collect();
            }
        } else {
            drop(storage);
            let (entries, values) = self.flattened_tables();
            if copy_values {
                copy.set_value_table(values);
                if copy_entries {
                    copy.entry_to_value = entries;
                }
            }
        }

        Self {
            name: RwLock::new(new_name.to_string()),
            allows_interpolation: self.allows_interpolation,
            storage: RwLock::new(copy),
        }
    }

    /// Serialize in flattened form.
    pub fn write_payload<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let (entries, values) = self.flattened_tables();
        let default_value = self.default_value();

        w.write_u8(self.allows_interpolation as u8)?;
        default_value.write_to(w)?;

        let mut sorted: Vec<(i64, i64)> = entries.into_iter().collect();
        sorted.sort_unstable();
        w.write_i32::<LittleEndian>(sorted.len() as i32)?;
        for (entry, key) in sorted {
            w.write_i64::<LittleEndian>(entry)?;
            w.write_i64::<LittleEndian>(key)?;
        }

        w.write_i32::<LittleEndian>(values.len() as i32)?;
        for value in &values {
            value.write_to(w)?;
        }
        Ok(())
    }

    /// Inverse of [`write_payload`](Self::write_payload).
    pub fn read_payload<R: Read>(name: &str, r: &mut R) -> Result<Self> {
        let allows_interpolation = r.read_u8()? != 0;
        let default_value = T::read_from(r)?;
        let mut storage = Storage::new(default_value);

        let entry_count = r.read_i32::<LittleEndian>()?;
        if entry_count < 0 {
            return Err(Error::invalid(format!("negative entry count for '{name}'")));
        }
        for _ in 0..entry_count {
            let entry = r.read_i64::<LittleEndian>()?;
            let key = r.read_i64::<LittleEndian>()?;
            storage.entry_to_value.insert(entry, key);
        }

        let value_count = r.read_i32::<LittleEndian>()?;
        if value_count < 0 {
            return Err(Error::invalid(format!("negative value count for '{name}'")));
        }
        let mut values = Vec::with_capacity((value_count as usize).min(PREALLOC_LIMIT));
        for _ in 0..value_count {
            values.push(T::read_from(r)?);
        }
        storage.set_value_table(values);

        if let Some((&entry, _)) = storage
            .entry_to_value
            .iter()
            .find(|(_, &key)| key != DEFAULT_VALUE_KEY && (key < 0 || key >= value_count as i64))
        {
            return Err(Error::invalid(format!(
                "entry {entry} of '{name}' has a dangling value key"
            )));
        }

        Ok(Self {
            name: RwLock::new(name.to_string()),
            allows_interpolation,
            storage: RwLock::new(storage),
        })
    }
}

/// Type-erased view of a [`TypedAttribute`], as stored by a domain.
pub trait MetadataAttribute: Send + Sync + 'static {
    /// Attribute name.
    fn name(&self) -> String;

    /// Rename (domain bookkeeping is the caller's job).
    fn set_name(&self, name: &str);

    /// Value type.
    fn attribute_type(&self) -> AttributeType;

    /// Whether weighted blending is allowed.
    fn allows_interpolation(&self) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Whether a parent attribute is referenced.
    fn has_parent(&self) -> bool;

    /// Value key for an entry.
    fn value_key(&self, entry: i64) -> i64;

    /// Whether equal values share value keys.
    fn uses_value_keys(&self) -> bool {
        self.attribute_type().interns_values()
    }

    /// Whether the value behind a key equals the default.
    fn is_equal_to_default_value(&self, value_key: i64) -> bool;

    /// Type-erased value of an entry.
    fn value_at(&self, entry: i64) -> AttributeValue;

    /// Type-erased value behind a value key.
    fn value_for_key(&self, value_key: i64) -> AttributeValue;

    /// Type-erased default value.
    fn default_value_erased(&self) -> AttributeValue;

    /// Set an entry from a type-erased value of the exact type.
    fn set_value_erased(&self, entry: i64, value: &AttributeValue) -> Result<()>;

    /// Set the default from a type-erased value of the exact type.
    fn set_default_value_erased(&self, value: &AttributeValue) -> Result<()>;

    /// Copy `other[other_entry]` into `entry`. Fails on type mismatch.
    fn set_value_from(
        &self,
        entry: i64,
        other: &dyn MetadataAttribute,
        other_entry: i64,
    ) -> Result<()>;

    /// Batch form of [`set_value_from`](Self::set_value_from) over `(in, out)` pairs.
    fn set_values_from(&self, pairs: &[(i64, i64)], other: &dyn MetadataAttribute) -> Result<()>;

    /// Binary merge, see [`TypedAttribute::set_value_merged`].
    fn set_value_merged(
        &self,
        entry: i64,
        a: Option<(&dyn MetadataAttribute, i64)>,
        b: Option<(&dyn MetadataAttribute, i64)>,
        op: MetadataOp,
    ) -> Result<()>;

    fn reset_weighted_value(&self, entry: i64) -> Result<()>;

    fn accumulate_weighted_value(
        &self,
        entry: i64,
        other: &dyn MetadataAttribute,
        other_entry: i64,
        weight: f32,
        set_non_interpolable: bool,
    ) -> Result<()>;

    fn finish_weighted_value(&self, entry: i64) -> Result<()>;

    fn flatten(&self);

    fn flatten_and_compress(&self, keep: &[i64]) -> Result<()>;

    /// Duplicate, see [`TypedAttribute::copy`].
    fn copy_erased(
        &self,
        new_name: &str,
        keep_parent: bool,
        copy_entries: bool,
        copy_values: bool,
    ) -> Arc<dyn MetadataAttribute>;

    /// New child attribute referencing this one.
    fn new_child_erased(self: Arc<Self>, inherited_entry_count: i64) -> Arc<dyn MetadataAttribute>;

    /// Empty attribute with the same type, default and interpolation flag.
    fn new_definition(&self, name: &str) -> Arc<dyn MetadataAttribute>;

    fn clear(&self);

    fn local_entry_count(&self) -> usize;

    fn local_value_count(&self) -> usize;

    fn write_payload_erased(&self, w: &mut dyn Write) -> io::Result<()>;
}

impl<'a> dyn MetadataAttribute + 'a {
    /// Downcast to a typed reference.
    pub fn downcast_ref<T: MetadataType>(&self) -> Option<&TypedAttribute<T>> {
        self.as_any().downcast_ref::<TypedAttribute<T>>()
    }

    /// Downcast a shared handle.
    pub fn downcast_arc<T: MetadataType>(self: Arc<Self>) -> Option<Arc<TypedAttribute<T>>> {
        self.into_any().downcast::<TypedAttribute<T>>().ok()
    }
}

impl<T: MetadataType> TypedAttribute<T> {
    fn same_type<'a>(&self, other: &'a dyn MetadataAttribute) -> Result<&'a TypedAttribute<T>> {
        other.downcast_ref::<T>().ok_or_else(|| {
            warn!(
                "Attribute '{}' ({}) cannot take values from '{}' ({})",
                self.name(),
                T::TYPE,
                other.name(),
                other.attribute_type()
            );
            Error::type_mismatch(T::TYPE, other.attribute_type())
        })
    }
}

impl<T: MetadataType> MetadataAttribute for TypedAttribute<T> {
    fn name(&self) -> String {
        TypedAttribute::name(self)
    }

    fn set_name(&self, name: &str) {
        TypedAttribute::set_name(self, name)
    }

    fn attribute_type(&self) -> AttributeType {
        T::TYPE
    }

    fn allows_interpolation(&self) -> bool {
        self.allows_interpolation
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn has_parent(&self) -> bool {
        self.storage.read().parent.is_some()
    }

    fn value_key(&self, entry: i64) -> i64 {
        self.get_value_key(entry)
    }

    fn is_equal_to_default_value(&self, value_key: i64) -> bool {
        TypedAttribute::is_equal_to_default_value(self, value_key)
    }

    fn value_at(&self, entry: i64) -> AttributeValue {
        self.get_value_from_item_key(entry).to_value()
    }

    fn value_for_key(&self, value_key: i64) -> AttributeValue {
        self.get_value(value_key).to_value()
    }

    fn default_value_erased(&self) -> AttributeValue {
        self.default_value().to_value()
    }

    fn set_value_erased(&self, entry: i64, value: &AttributeValue) -> Result<()> {
        let typed = T::from_value(value)
            .ok_or_else(|| Error::type_mismatch(T::TYPE, value.value_type()))?;
        self.set_value(entry, typed)
    }

    fn set_default_value_erased(&self, value: &AttributeValue) -> Result<()> {
        let typed = T::from_value(value)
            .ok_or_else(|| Error::type_mismatch(T::TYPE, value.value_type()))?;
        self.set_default_value(typed);
        Ok(())
    }

    fn set_value_from(
        &self,
        entry: i64,
        other: &dyn MetadataAttribute,
        other_entry: i64,
    ) -> Result<()> {
        let other = self.same_type(other)?;
        TypedAttribute::set_value_from(self, entry, other, other_entry)
    }

    fn set_values_from(&self, pairs: &[(i64, i64)], other: &dyn MetadataAttribute) -> Result<()> {
        let other = self.same_type(other)?;
        if self.is_self_or_ancestor(other) {
            for &(in_key, out_key) in pairs {
                TypedAttribute::set_value_from(self, out_key, other, in_key)?;
            }
            return Ok(());
        }
        let in_keys: Vec<i64> = pairs.iter().map(|p| p.0).collect();
        let out_keys: Vec<i64> = pairs.iter().map(|p| p.1).collect();
        let values = other.get_values_from_item_keys(&in_keys);
        self.set_values(&out_keys, &values)
    }

    fn set_value_merged(
        &self,
        entry: i64,
        a: Option<(&dyn MetadataAttribute, i64)>,
        b: Option<(&dyn MetadataAttribute, i64)>,
        op: MetadataOp,
    ) -> Result<()> {
        let a = match a {
            Some((attr, e)) => Some((self.same_type(attr)?, e)),
            None => None,
        };
        let b = match b {
            Some((attr, e)) => Some((self.same_type(attr)?, e)),
            None => None,
        };
        TypedAttribute::set_value_merged(self, entry, a, b, op)
    }

    fn reset_weighted_value(&self, entry: i64) -> Result<()> {
        TypedAttribute::reset_weighted_value(self, entry)
    }

    fn accumulate_weighted_value(
        &self,
        entry: i64,
        other: &dyn MetadataAttribute,
        other_entry: i64,
        weight: f32,
        set_non_interpolable: bool,
    ) -> Result<()> {
        let other = self.same_type(other)?;
        TypedAttribute::accumulate_weighted_value(
            self,
            entry,
            other,
            other_entry,
            weight,
            set_non_interpolable,
        )
    }

    fn finish_weighted_value(&self, entry: i64) -> Result<()> {
        TypedAttribute::finish_weighted_value(self, entry)
    }

    fn flatten(&self) {
        TypedAttribute::flatten(self)
    }

    fn flatten_and_compress(&self, keep: &[i64]) -> Result<()> {
        TypedAttribute::flatten_and_compress(self, keep)
    }

    fn copy_erased(
        &self,
        new_name: &str,
        keep_parent: bool,
        copy_entries: bool,
        copy_values: bool,
    ) -> Arc<dyn MetadataAttribute> {
        Arc::new(self.copy(new_name, keep_parent, copy_entries, copy_values))
    }

    fn new_child_erased(self: Arc<Self>, inherited_entry_count: i64) -> Arc<dyn MetadataAttribute> {
        Arc::new(TypedAttribute::new_child(&self, inherited_entry_count))
    }

    fn new_definition(&self, name: &str) -> Arc<dyn MetadataAttribute> {
        Arc::new(TypedAttribute::new(name, self.default_value(), self.allows_interpolation))
    }

    fn clear(&self) {
        TypedAttribute::clear(self)
    }

    fn local_entry_count(&self) -> usize {
        TypedAttribute::local_entry_count(self)
    }

    fn local_value_count(&self) -> usize {
        TypedAttribute::local_value_count(self)
    }

    fn write_payload_erased(&self, mut w: &mut dyn Write) -> io::Result<()> {
        self.write_payload(&mut w)
    }
}

/// Build a standalone attribute of a runtime type from a type-erased default.
pub fn new_attribute_erased(
    name: &str,
    default_value: &AttributeValue,
    allows_interpolation: bool,
) -> Arc<dyn MetadataAttribute> {
    crate::dispatch_type!(default_value.value_type(), T => {
        let default = T::from_value(default_value).unwrap_or_else(T::zero);
        Arc::new(TypedAttribute::<T>::new(name, default, allows_interpolation))
            as Arc<dyn MetadataAttribute>
    })
}

/// Read an attribute payload of a runtime type.
pub fn read_attribute_erased(
    name: &str,
    ty: AttributeType,
    r: &mut dyn Read,
) -> Result<Arc<dyn MetadataAttribute>> {
    let mut r = r;
    crate::dispatch_type!(ty, T => {
        let attr = TypedAttribute::<T>::read_payload(name, &mut r)?;
        Ok(Arc::new(attr) as Arc<dyn MetadataAttribute>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Name;

    #[test]
    fn test_default_and_set() {
        let attr = TypedAttribute::new("Score", 0i32, true);
        assert_eq!(attr.get_value_from_item_key(3), 0);
        attr.set_value(3, 10).unwrap();
        assert_eq!(attr.get_value_from_item_key(3), 10);
        assert!(attr.has_non_default_value(3));
        assert!(!attr.has_non_default_value(4));
        assert!(attr.set_value(INVALID_ENTRY_KEY, 1).is_err());
    }

    #[test]
    fn test_interned_values() {
        let attr = TypedAttribute::new("Tag", String::new(), false);
        attr.set_value(0, "a".to_string()).unwrap();
        attr.set_value(1, "b".to_string()).unwrap();
        attr.set_value(2, "a".to_string()).unwrap();
        assert_eq!(attr.local_value_count(), 2);
        assert_eq!(attr.get_value_key(0), attr.get_value_key(2));

        let names = TypedAttribute::new("N", Name::none(), false);
        names.set_value(0, Name::new("Oak")).unwrap();
        names.set_value(1, Name::new("OAK")).unwrap();
        assert_eq!(names.local_value_count(), 1);
    }

    #[test]
    fn test_interning_many_values() {
        let attr = TypedAttribute::new("Tag", String::new(), false);
        for i in 0..20_000i64 {
            attr.set_value(i, format!("v{i}")).unwrap();
        }
        for i in 0..20_000i64 {
            attr.set_value(20_000 + i, format!("v{i}")).unwrap();
        }
        assert_eq!(attr.local_value_count(), 20_000);
        assert_eq!(attr.get_value_key(123), attr.get_value_key(20_123));

        // The index follows table rebuilds.
        attr.flatten_and_compress(&[5, 7]).unwrap();
        attr.set_value(2, "v7".to_string()).unwrap();
        assert_eq!(attr.local_value_count(), 2);
        assert_eq!(attr.get_value_key(2), attr.get_value_key(1));

        let mut bytes = Vec::new();
        attr.write_payload(&mut bytes).unwrap();
        let read = TypedAttribute::<String>::read_payload("Tag", &mut bytes.as_slice()).unwrap();
        read.set_value(9, "v5".to_string()).unwrap();
        assert_eq!(read.local_value_count(), 2);
    }

    #[test]
    fn test_child_inherits_parent_values() {
        let parent = Arc::new(TypedAttribute::new("Score", 0i32, true));
        parent.set_value(0, 5).unwrap();
        parent.set_value(1, 6).unwrap();

        let child = TypedAttribute::new_child(&parent, 2);
        assert_eq!(child.get_value_from_item_key(0), 5);
        assert_eq!(child.local_entry_count(), 0);

        child.set_value(1, 60).unwrap();
        child.set_value(2, 7).unwrap();
        assert_eq!(child.get_value_from_item_key(1), 60);
        assert_eq!(parent.get_value_from_item_key(1), 6);

        child.flatten();
        assert!(child.parent().is_none());
        assert_eq!(child.get_value_from_item_key(0), 5);
        assert_eq!(child.get_value_from_item_key(1), 60);
        assert_eq!(child.get_value_from_item_key(2), 7);
    }

    #[test]
    fn test_entries_past_inherited_count_use_default() {
        let parent = Arc::new(TypedAttribute::new("Score", -1i32, true));
        parent.set_value(5, 50).unwrap();
        let child = TypedAttribute::new_child(&parent, 3);
        assert_eq!(child.get_value_from_item_key(5), -1);
    }

    #[test]
    fn test_flatten_and_compress() {
        let attr = TypedAttribute::new("Score", 0i32, true);
        attr.set_value(0, 10).unwrap();
        attr.set_value(1, 20).unwrap();
        attr.set_value(2, 10).unwrap();
        attr.flatten_and_compress(&[2, 1]).unwrap();
        assert_eq!(attr.get_value_from_item_key(0), 10);
        assert_eq!(attr.get_value_from_item_key(1), 20);
        assert!(!attr.has_non_default_value(2));
        assert!(attr.flatten_and_compress(&[-1]).is_err());
    }

    #[test]
    fn test_copy_from_ancestor_shares_value_key() {
        let parent = Arc::new(TypedAttribute::new("S", String::new(), false));
        parent.set_value(0, "x".to_string()).unwrap();
        let child = TypedAttribute::new_child(&parent, 1);
        child.set_value_from(4, &parent, 0).unwrap();
        assert_eq!(child.get_value_key(4), parent.get_value_key(0));
        assert_eq!(child.local_value_count(), 0);
        assert_eq!(child.get_value_from_item_key(4), "x");
    }

    #[test]
    fn test_merge_ops() {
        let a = TypedAttribute::new("V", 0.0f64, true);
        let b = TypedAttribute::new("V", 0.0f64, true);
        a.set_value(0, 2.0).unwrap();
        b.set_value(0, 3.0).unwrap();
        let out = TypedAttribute::new("V", 0.0f64, true);
        out.set_value_merged(0, Some((&a, 0)), Some((&b, 0)), MetadataOp::Add).unwrap();
        out.set_value_merged(1, Some((&a, 0)), Some((&b, 0)), MetadataOp::SourceValue).unwrap();
        out.set_value_merged(2, None, Some((&b, 0)), MetadataOp::Add).unwrap();
        assert_eq!(out.get_value_from_item_key(0), 5.0);
        assert_eq!(out.get_value_from_item_key(1), 2.0);
        assert_eq!(out.get_value_from_item_key(2), 3.0);
    }

    #[test]
    fn test_weighted_accumulation() {
        let src = TypedAttribute::new("D", 0.0f32, true);
        src.set_value(0, 10.0).unwrap();
        src.set_value(1, 20.0).unwrap();
        let out = TypedAttribute::new("D", 0.0f32, true);
        out.reset_weighted_value(0).unwrap();
        out.accumulate_weighted_value(0, &src, 0, 0.25, false).unwrap();
        out.accumulate_weighted_value(0, &src, 1, 0.75, false).unwrap();
        assert!((out.get_value_from_item_key(0) - 17.5).abs() < 1e-5);

        let tags = TypedAttribute::new("T", String::new(), false);
        let src_tags = TypedAttribute::new("T", String::new(), false);
        src_tags.set_value(0, "a".into()).unwrap();
        tags.accumulate_weighted_value(0, &src_tags, 0, 1.0, false).unwrap();
        assert_eq!(tags.get_value_from_item_key(0), "");
        tags.accumulate_weighted_value(0, &src_tags, 0, 1.0, true).unwrap();
        assert_eq!(tags.get_value_from_item_key(0), "a");
    }

    #[test]
    fn test_type_mismatch_erased() {
        let ints: Arc<dyn MetadataAttribute> = Arc::new(TypedAttribute::new("A", 0i32, true));
        let floats: Arc<dyn MetadataAttribute> = Arc::new(TypedAttribute::new("A", 0.0f32, true));
        assert!(matches!(
            ints.set_value_from(0, floats.as_ref(), 0),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(ints.clone().downcast_arc::<i32>().is_some());
        assert!(ints.downcast_arc::<f32>().is_none());
    }

    #[test]
    fn test_payload_roundtrip() {
        let parent = Arc::new(TypedAttribute::new("P", 1i64, true));
        parent.set_value(0, 7).unwrap();
        let child = TypedAttribute::new_child(&parent, 2);
        child.set_value(1, 8).unwrap();

        let mut buf = Vec::new();
        child.write_payload(&mut buf).unwrap();
        let back = TypedAttribute::<i64>::read_payload("P", &mut buf.as_slice()).unwrap();
        assert_eq!(back.get_value_from_item_key(0), 7);
        assert_eq!(back.get_value_from_item_key(1), 8);
        assert_eq!(back.get_value_from_item_key(2), 1);
        assert!(back.parent().is_none());
    }
}
