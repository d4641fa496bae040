//! Keys: per-index lookup handles consumed by accessors.
//!
//! Attribute accessors read entry keys, property accessors read elements.
//! Indices wrap around the key count so a single key can serve a whole range.

use std::any::Any;

use crate::data::MetadataElement;
use crate::metadata::INVALID_ENTRY_KEY;

/// Lookup handles for a range of logical indices.
pub trait AccessorKeys {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether entries and elements may be written through these keys.
    fn is_read_only(&self) -> bool;

    /// Entry key of a logical index.
    fn entry_key(&self, index: usize) -> i64;

    /// Rebind a logical index to another entry. Returns false if read-only.
    fn set_entry_key(&mut self, index: usize, entry: i64) -> bool;

    /// Element behind a logical index, for property access.
    fn element(&self, _index: usize) -> Option<&dyn Any> {
        None
    }

    fn element_mut(&mut self, _index: usize) -> Option<&mut dyn Any> {
        None
    }
}

#[inline]
fn wrap(index: usize, len: usize) -> Option<usize> {
    (len > 0).then(|| index % len)
}

/// Plain list of entry keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryKeys {
    keys: Vec<i64>,
    read_only: bool,
}

impl EntryKeys {
    pub fn new(keys: Vec<i64>) -> Self {
        Self { keys, read_only: false }
    }

    /// One key serving every index.
    pub fn single(entry: i64) -> Self {
        Self::new(vec![entry])
    }

    /// Keys `start..start + count`.
    pub fn range(start: i64, count: usize) -> Self {
        Self::new((start..start + count as i64).collect())
    }

    /// Same keys, refusing writes.
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }
}

impl AccessorKeys for EntryKeys {
    fn len(&self) -> usize {
        self.keys.len()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn entry_key(&self, index: usize) -> i64 {
        wrap(index, self.keys.len()).map_or(INVALID_ENTRY_KEY, |i| self.keys[i])
    }

    fn set_entry_key(&mut self, index: usize, entry: i64) -> bool {
        match wrap(index, self.keys.len()) {
            Some(i) if !self.read_only => {
                self.keys[i] = entry;
                true
            }
            _ => false,
        }
    }
}

/// Keys over a slice of elements carrying metadata entries.
pub enum ElementKeys<'a, E> {
    Const(&'a [E]),
    Mut(&'a mut [E]),
}

impl<'a, E: MetadataElement> ElementKeys<'a, E> {
    fn elements(&self) -> &[E] {
        match self {
            Self::Const(e) => e,
            Self::Mut(e) => &**e,
        }
    }
}

impl<'a, E: MetadataElement> AccessorKeys for ElementKeys<'a, E> {
    fn len(&self) -> usize {
        self.elements().len()
    }

    fn is_read_only(&self) -> bool {
        matches!(self, Self::Const(_))
    }

    fn entry_key(&self, index: usize) -> i64 {
        let elements = self.elements();
        wrap(index, elements.len()).map_or(INVALID_ENTRY_KEY, |i| elements[i].metadata_entry())
    }

    fn set_entry_key(&mut self, index: usize, entry: i64) -> bool {
        let Self::Mut(elements) = self else {
            return false;
        };
        match wrap(index, elements.len()) {
            Some(i) => {
                elements[i].set_metadata_entry(entry);
                true
            }
            None => false,
        }
    }

    fn element(&self, index: usize) -> Option<&dyn Any> {
        let elements = self.elements();
        wrap(index, elements.len()).map(|i| &elements[i] as &dyn Any)
    }

    fn element_mut(&mut self, index: usize) -> Option<&mut dyn Any> {
        let Self::Mut(elements) = self else {
            return None;
        };
        let i = wrap(index, elements.len())?;
        Some(&mut elements[i] as &mut dyn Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Point;

    #[test]
    fn test_entry_keys_wrap() {
        let mut keys = EntryKeys::single(4);
        assert_eq!(keys.entry_key(0), 4);
        assert_eq!(keys.entry_key(9), 4);
        assert!(keys.set_entry_key(3, 5));
        assert_eq!(keys.keys(), &[5]);

        let empty = EntryKeys::default();
        assert_eq!(empty.entry_key(0), INVALID_ENTRY_KEY);

        let mut frozen = EntryKeys::range(2, 3).into_read_only();
        assert_eq!(frozen.keys(), &[2, 3, 4]);
        assert!(!frozen.set_entry_key(0, 1));
    }

    #[test]
    fn test_element_keys() {
        let mut points = vec![Point::default(), Point::default()];
        points[1].metadata_entry = 8;
        {
            let mut keys = ElementKeys::Mut(&mut points[..]);
            assert_eq!(keys.entry_key(3), 8);
            assert!(keys.set_entry_key(0, 2));
            let p = keys.element_mut(0).unwrap().downcast_mut::<Point>().unwrap();
            p.seed = 3;
        }
        assert_eq!(points[0].metadata_entry, 2);
        assert_eq!(points[0].seed, 3);

        let keys = ElementKeys::Const(&points[..]);
        assert!(keys.is_read_only());
        assert!(keys.element(1).is_some());
    }
}
