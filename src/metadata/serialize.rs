//! Binary encoding of metadata containers.
//!
//! ```text
//! magic "AMETA" | version: u32
//! version 1: one domain payload (the default, multi-entry domain)
//! version 2: default domain id: i32 | domain count: i32
//!            per domain: id: i32 | valid: u8 | multi_entry: u8 | parenting: u8
//!                        [payload when valid]
//! payload:   attribute count: i32
//!            per attribute: name | type id: i32 | attribute payload
//!            parent key count: i32 | parent keys: i64...
//! ```
//!
//! All integers are little-endian. Containers are written flattened:
//! inherited values are materialized and no parent link is stored.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use super::{
    compress_frame, decompress_frame, DomainInfo, DomainLayout, Metadata, MetadataDomain,
    PREALLOC_LIMIT,
};
use crate::config;
use crate::selector::DomainId;
use crate::util::{Error, Result};

/// File magic.
pub const MAGIC: &[u8; 5] = b"AMETA";
/// Single-domain layout.
pub const VERSION_LEGACY: u32 = 1;
/// Multi-domain layout with default domain id and validity bytes.
pub const VERSION_MULTI_DOMAIN: u32 = 2;
/// Version written by default.
pub const CURRENT_VERSION: u32 = VERSION_MULTI_DOMAIN;

fn default_names(id: DomainId) -> Vec<String> {
    match id {
        DomainId::DATA => vec!["Data".to_string()],
        DomainId::ELEMENTS => vec!["Elements".to_string()],
        other => vec![other.to_string()],
    }
}

impl Metadata {
    /// Write in the current format.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.write_to_version(w, CURRENT_VERSION)
    }

    /// Write in a given format version.
    ///
    /// The legacy version only stores the default domain.
    pub fn write_to_version<W: Write>(&self, w: &mut W, version: u32) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_u32::<LittleEndian>(version)?;

        match version {
            VERSION_LEGACY => {
                match self.const_domain(DomainId::DEFAULT) {
                    Some(domain) => domain.write_payload(w)?,
                    None => {
                        MetadataDomain::new(self.default_domain_id(), true, true)
                            .write_payload(w)?
                    }
                }
                Ok(())
            }
            VERSION_MULTI_DOMAIN => {
                let layout = self.layout();
                w.write_i32::<LittleEndian>(layout.default_domain.0)?;
                w.write_i32::<LittleEndian>(layout.domains.len() as i32)?;
                for info in &layout.domains {
                    let domain = self.const_domain(info.id);
                    w.write_i32::<LittleEndian>(info.id.0)?;
                    w.write_u8(domain.is_some() as u8)?;
                    w.write_u8(info.multi_entry as u8)?;
                    w.write_u8(info.supports_parenting as u8)?;
                    if let Some(domain) = domain {
                        domain.write_payload(w)?;
                    }
                }
                Ok(())
            }
            other => Err(Error::UnsupportedVersion(other)),
        }
    }

    /// Read a container, inferring the layout from the stream.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 5];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::invalid("not a metadata stream"));
        }
        let version = r.read_u32::<LittleEndian>()?;
        debug!("Reading metadata, version {version}");

        match version {
            VERSION_LEGACY => {
                let domain = MetadataDomain::read_payload(DomainId::ELEMENTS, true, true, r)?;
                Ok(Self::from_domains(DomainLayout::single(), vec![domain]))
            }
            VERSION_MULTI_DOMAIN => {
                let default_domain = DomainId(r.read_i32::<LittleEndian>()?);
                let count = r.read_i32::<LittleEndian>()?;
                if count < 0 {
                    return Err(Error::invalid("negative domain count"));
                }

                let mut infos = Vec::with_capacity((count as usize).min(PREALLOC_LIMIT));
                let mut domains = Vec::new();
                for _ in 0..count {
                    let id = DomainId(r.read_i32::<LittleEndian>()?);
                    let valid = r.read_u8()? != 0;
                    let multi_entry = r.read_u8()? != 0;
                    let supports_parenting = r.read_u8()? != 0;
                    if valid {
                        domains.push(MetadataDomain::read_payload(
                            id,
                            multi_entry,
                            supports_parenting,
                            r,
                        )?);
                    }
                    infos.push(DomainInfo {
                        id,
                        names: default_names(id).into_iter().collect(),
                        multi_entry,
                        supports_parenting,
                    });
                }
                if !infos.iter().any(|d| d.id == default_domain) {
                    return Err(Error::invalid(format!(
                        "default domain {default_domain} is not declared"
                    )));
                }

                let layout = DomainLayout {
                    default_domain,
                    domains: infos.into_iter().collect(),
                };
                Ok(Self::from_domains(layout, domains))
            }
            other => Err(Error::UnsupportedVersion(other)),
        }
    }

    /// Read a container and adopt a known layout (keeps domain names).
    pub fn read_with_layout<R: Read>(r: &mut R, layout: DomainLayout) -> Result<Self> {
        let read = Self::read_from(r)?;
        let domains = read
            .domains_snapshot()
            .into_iter()
            .filter(|d| layout.info(d.id()).is_some())
            .collect::<Vec<_>>();
        let metadata = Metadata::new(layout);
        for domain in domains {
            let target = metadata
                .domain(domain.id())
                .ok_or_else(|| Error::DomainNotFound(domain.id().to_string()))?;
            target.initialize_as_copy(&domain, &super::AttributeFilter::all(), None)?;
        }
        Ok(metadata)
    }

    /// Encode into a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Save to a file, zlib-compressed at the configured level.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.save_to_file_with_level(path, config::global().compression_level)
    }

    /// Save to a file with an explicit compression level (0 = store).
    pub fn save_to_file_with_level(&self, path: impl AsRef<Path>, level: i32) -> Result<()> {
        let frame = compress_frame(&self.to_bytes()?, level)?;
        fs::write(path, frame)?;
        Ok(())
    }

    /// Load a file written by [`save_to_file`](Self::save_to_file).
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let frame = fs::read(path)?;
        let bytes = decompress_frame(&frame)?;
        Self::read_from(&mut bytes.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::INVALID_ENTRY_KEY;
    use crate::selector::AttributeIdentifier;

    #[test]
    fn test_bad_magic_and_version() {
        assert!(Metadata::read_from(&mut &b"NOPE!\x02\0\0\0"[..]).is_err());
        assert!(matches!(
            Metadata::read_from(&mut &b"AMETA\x09\0\0\0"[..]),
            Err(Error::UnsupportedVersion(9))
        ));
        let m = Metadata::new(DomainLayout::points());
        assert!(m.write_to_version(&mut Vec::new(), 7).is_err());
    }

    fn header(version: u32) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&version.to_le_bytes());
        bytes
    }

    #[test]
    fn test_oversized_counts_are_errors() {
        // Domain count far beyond the stream.
        let mut bytes = header(VERSION_MULTI_DOMAIN);
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        assert!(Metadata::read_from(&mut bytes.as_slice()).is_err());

        // Entry count.
        let mut bytes = header(VERSION_LEGACY);
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        assert!(Metadata::read_from(&mut bytes.as_slice()).is_err());

        // Attribute name length.
        let mut bytes = header(VERSION_LEGACY);
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(b"Tag");
        assert!(Metadata::read_from(&mut bytes.as_slice()).is_err());

        // Negative domain count.
        let mut bytes = header(VERSION_MULTI_DOMAIN);
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&(-3i32).to_le_bytes());
        assert!(matches!(
            Metadata::read_from(&mut bytes.as_slice()),
            Err(Error::InvalidStructure(_))
        ));
    }

    #[test]
    fn test_oversized_value_count_is_an_error() {
        let m = Metadata::new(DomainLayout::single());
        let tag = m
            .create_attribute(&AttributeIdentifier::new("Tag"), String::from("a"), false, false)
            .unwrap();
        let e = m.add_entry(DomainId::ELEMENTS, INVALID_ENTRY_KEY).unwrap();
        tag.set_value(e, "b".into()).unwrap();
        let mut bytes = m.to_bytes().unwrap();

        // Rewrite the string length of the last stored value.
        let tail = bytes.len() - 4 - 8 - 1 - 4;
        bytes[tail..tail + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(Metadata::read_from(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_declared_but_empty_domain() {
        let m = Metadata::new(DomainLayout::points());
        let attr = m
            .create_attribute(&AttributeIdentifier::new("Density"), 0.5f32, true, false)
            .unwrap();
        let e = m.add_entry(DomainId::ELEMENTS, INVALID_ENTRY_KEY).unwrap();
        attr.set_value(e, 0.75).unwrap();

        let back = Metadata::read_from(&mut m.to_bytes().unwrap().as_slice()).unwrap();
        assert!(back.const_domain(DomainId::DATA).is_none());
        assert_eq!(back.layout().domains.len(), 2);
        let read = back
            .get_typed_attribute::<f32>(&AttributeIdentifier::new("Density"))
            .unwrap();
        assert_eq!(read.get_value_from_item_key(e), 0.75);
    }
}
