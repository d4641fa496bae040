//! Accessor over a metadata attribute.

use std::sync::Arc;

use super::{convert_value, AccessorFlags, AccessorKeys, AttributeAccessor};
use crate::metadata::{MetadataAttribute, MetadataDomain, INVALID_ENTRY_KEY};
use crate::util::{AttributeType, AttributeValue, Error, Result};

/// Reads and writes an attribute through entry keys.
///
/// Writing through an unset key creates an entry in the domain and binds
/// the key to it.
pub struct MetadataAttributeAccessor {
    attribute: Arc<dyn MetadataAttribute>,
    domain: Arc<MetadataDomain>,
    read_only: bool,
}

impl MetadataAttributeAccessor {
    pub fn new(
        attribute: Arc<dyn MetadataAttribute>,
        domain: Arc<MetadataDomain>,
        read_only: bool,
    ) -> Self {
        Self {
            attribute,
            domain,
            read_only,
        }
    }

    pub fn domain(&self) -> &Arc<MetadataDomain> {
        &self.domain
    }

    fn check_keys(&self, count: usize, keys: &dyn AccessorKeys) -> Result<()> {
        if count > 0 && keys.is_empty() {
            return Err(Error::UnsupportedOperation(format!(
                "no keys to access '{}'",
                self.attribute.name()
            )));
        }
        Ok(())
    }
}

impl AttributeAccessor for MetadataAttributeAccessor {
    fn value_type(&self) -> AttributeType {
        self.attribute.attribute_type()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn get_range(

        &self,

        out: &mut [AttributeValue],

        start: usize,

        keys: &dyn AccessorKeys,

    ) -> Result<()> {
        self.check_keys(out.len(), keys)?;
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.attribute.value_at(keys.entry_key(start + i));
        }
        Ok(())
    }

    fn set_range(
        &self,
        values: &[AttributeValue],
        start: usize,
        keys: &mut dyn AccessorKeys,
        flags: AccessorFlags,
    ) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.check_keys(values.len(), keys)?;
        let ty = self.value_type();
        let converted = values
            .iter()
            .map(|v| convert_value(v, ty, flags))
            .collect::<Result<Vec<_>>>()?;

        if flags.contains(AccessorFlags::ALLOW_SET_DEFAULT_VALUE)
            && converted.len() == 1
            && keys.len() == 1
            && keys.entry_key(start) == INVALID_ENTRY_KEY
        {
            return self.attribute.set_default_value_erased(&converted[0]);
        }

        for (i, value) in converted.iter().enumerate() {
            let mut entry = keys.entry_key(start + i);
            if entry == INVALID_ENTRY_KEY {
                if keys.is_read_only() {
                    return Err(Error::InvalidEntryKey(entry));
                }
                entry = self.domain.add_entry(INVALID_ENTRY_KEY);
                keys.set_entry_key(start + i, entry);
            }
            self.attribute.set_value_erased(entry, value)?;
        }
        Ok(())
    }

    fn attribute(&self) -> Option<Arc<dyn MetadataAttribute>> {
        Some(Arc::clone(&self.attribute))
    }

    fn value_keys(&self, start: usize, keys: &dyn AccessorKeys, out: &mut [i64]) -> bool {
        if keys.is_empty() {
            return false;
        }
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.attribute.value_key(keys.entry_key(start + i));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::EntryKeys;
    use crate::selector::DomainId;

    fn score_accessor() -> (MetadataAttributeAccessor, Arc<MetadataDomain>) {
        let domain = Arc::new(MetadataDomain::new(DomainId::ELEMENTS, true, true));
        let attr = domain.create_attribute("Score", 0i32, false, false).unwrap();
        (MetadataAttributeAccessor::new(attr, Arc::clone(&domain), false), domain)
    }

    #[test]
    fn test_unset_keys_allocate_entries() {
        let (accessor, domain) = score_accessor();
        let mut keys = EntryKeys::new(vec![INVALID_ENTRY_KEY; 2]);
        accessor
            .set_range(
                &[AttributeValue::Int32(4), AttributeValue::Int32(5)],
                0,
                &mut keys,
                AccessorFlags::STRICT_TYPE,
            )
            .unwrap();
        assert_eq!(keys.keys(), &[0, 1]);
        assert_eq!(domain.item_count(), 2);
        assert_eq!(accessor.get(1, &keys).unwrap(), AttributeValue::Int32(5));
    }

    #[test]
    fn test_set_default_through_single_key() {
        let (accessor, domain) = score_accessor();
        let mut keys = EntryKeys::single(INVALID_ENTRY_KEY);
        accessor
            .set(
                AttributeValue::Int32(9),
                0,
                &mut keys,
                AccessorFlags::ALLOW_SET_DEFAULT_VALUE,
            )
            .unwrap();
        assert_eq!(domain.item_count(), 0);
        assert_eq!(accessor.attribute().unwrap().default_value_erased(), AttributeValue::Int32(9));
    }

    #[test]
    fn test_read_only_keys_and_types() {
        let (accessor, _) = score_accessor();
        let mut keys = EntryKeys::single(INVALID_ENTRY_KEY).into_read_only();
        assert!(matches!(
            accessor.set(AttributeValue::Int32(1), 0, &mut keys, AccessorFlags::STRICT_TYPE),
            Err(Error::InvalidEntryKey(_))
        ));
        let mut keys = EntryKeys::single(0);
        assert!(accessor
            .set(AttributeValue::Float(1.0), 0, &mut keys, AccessorFlags::ALLOW_BROADCAST)
            .is_err());
    }
}
