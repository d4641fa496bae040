//! Accessors for extra properties, not backed by any storage.

use super::{AccessorFlags, AccessorKeys, AttributeAccessor};
use crate::util::{AttributeType, AttributeValue, Error, Result};

/// Yields the logical index of each value (`$Index`).
#[derive(Clone, Copy, Debug, Default)]
pub struct IndexAccessor;

impl AttributeAccessor for IndexAccessor {
    fn value_type(&self) -> AttributeType {
        AttributeType::Int32
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn get_range(

        &self,

        out: &mut [AttributeValue],

        start: usize,

        _keys: &dyn AccessorKeys,

    ) -> Result<()> {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = AttributeValue::Int32((start + i) as i32);
        }
        Ok(())
    }

    fn set_range(
        &self,
        _values: &[AttributeValue],
        _start: usize,
        _keys: &mut dyn AccessorKeys,
        _flags: AccessorFlags,
    ) -> Result<()> {
        Err(Error::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::EntryKeys;

    #[test]
    fn test_index() {
        let keys = EntryKeys::range(0, 4);
        let mut out = vec![AttributeValue::Int32(0); 3];
        IndexAccessor.get_range(&mut out, 1, &keys).unwrap();
        assert_eq!(
            out,
            vec![AttributeValue::Int32(1), AttributeValue::Int32(2), AttributeValue::Int32(3)]
        );
        let mut keys = keys;
        assert!(IndexAccessor
            .set(AttributeValue::Int32(0), 0, &mut keys, AccessorFlags::STRICT_TYPE)
            .is_err());
    }
}
