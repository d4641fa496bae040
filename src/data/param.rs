//! Attribute sets without spatial elements.

use std::any::Any;
use std::sync::Arc;

use super::{DataKind, HostData};
use crate::metadata::{DomainLayout, Metadata, INVALID_ENTRY_KEY};
use crate::selector::DomainId;
use crate::util::Result;

const HIERARCHY: &[DataKind] = &[DataKind::PARAM, DataKind::BASE];

/// Rows of attributes. Every row is an entry of the elements domain.
#[derive(Debug)]
pub struct ParamData {
    metadata: Arc<Metadata>,
}

impl Default for ParamData {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamData {
    pub fn new() -> Self {
        Self {
            metadata: Arc::new(Metadata::new(DomainLayout::params())),
        }
    }

    /// Rows inheriting from `parent`.
    pub fn new_child(parent: &ParamData, add_attributes_from_parent: bool) -> Result<Self> {
        Ok(Self {
            metadata: Arc::new(Metadata::new_child(&parent.metadata, add_attributes_from_parent)?),
        })
    }

    /// Append a row, returns its entry key.
    pub fn add_row(&self) -> Result<i64> {
        self.metadata.add_entry(DomainId::ELEMENTS, INVALID_ENTRY_KEY)
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.element_count(DomainId::ELEMENTS)
    }
}

impl HostData for ParamData {
    fn kind(&self) -> DataKind {
        DataKind::PARAM
    }

    fn class_hierarchy(&self) -> &'static [DataKind] {
        HIERARCHY
    }

    fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;

    #[test]
    fn test_rows() {
        let params = ParamData::new();
        assert_eq!(params.add_row().unwrap(), 0);
        assert_eq!(params.add_row().unwrap(), 1);
        assert_eq!(params.row_count(), 2);

        let child = ParamData::new_child(&params, true).unwrap();
        assert_eq!(child.row_count(), 2);
        assert_eq!(child.add_row().unwrap(), 2);
        assert_eq!(params.row_count(), 2);
    }

    #[test]
    fn test_domain_resolution() {
        let params = ParamData::new();
        let data: &dyn HostData = &params;
        assert_eq!(
            data.domain_id_from_selector(&Selector::attribute("A")).unwrap(),
            DomainId::ELEMENTS
        );
        assert_eq!(
            data.domain_id_from_selector(&Selector::attribute("A").with_domain("data"))
                .unwrap(),
            DomainId::DATA
        );
        assert!(data
            .domain_id_from_selector(&Selector::attribute("A").with_domain("Points"))
            .is_err());
        assert!(data.is_kind(DataKind::BASE));
        assert!(!data.is_kind(DataKind::POINT));
    }
}
