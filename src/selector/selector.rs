//! Selector grammar: `["@" domain "."] ["$"] name ("." extra)*`.
//!
//! A bare name selects an attribute, a `$` prefix selects a property of the
//! data's elements, and `$Index` is the synthetic element index. Trailing
//! tokens are field extractors applied after the base value is read.

use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use super::names::{
    is_valid_attribute_name, is_valid_domain_name, is_valid_name_char, reserved_name,
    INDEX_PROPERTY, LAST_ATTRIBUTE, LAST_CREATED_ATTRIBUTE, SOURCE_ATTRIBUTE,
    SOURCE_NAME_ATTRIBUTE,
};
use crate::data::HostData;
use crate::util::{Error, Result};

/// Properties that are computed rather than stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExtraProperty {
    /// Position of the element in its key range.
    Index,
}

impl ExtraProperty {
    /// Property name as written after `$`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Index => INDEX_PROPERTY,
        }
    }

    /// Parse a property name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        name.eq_ignore_ascii_case(INDEX_PROPERTY).then_some(Self::Index)
    }
}

/// What the base of a selector refers to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SelectorTarget {
    /// Stored attribute, or one of the reserved sentinels.
    Attribute(String),
    /// Property of the data's elements.
    Property(String),
    /// Synthetic property.
    ExtraProperty(ExtraProperty),
}

/// Address of a value on a data object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Selector {
    target: SelectorTarget,
    domain: Option<String>,
    extra_names: SmallVec<[String; 2]>,
}

impl Default for Selector {
    fn default() -> Self {
        Self::last()
    }
}

impl Selector {
    /// Select an attribute by name.
    pub fn attribute(name: impl Into<String>) -> Self {
        Self::from_target(SelectorTarget::Attribute(name.into()))
    }

    /// Select a property by name (without the `$`).
    pub fn property(name: impl Into<String>) -> Self {
        let name = name.into();
        match ExtraProperty::from_name(&name) {
            Some(extra) => Self::extra(extra),
            None => Self::from_target(SelectorTarget::Property(name)),
        }
    }

    /// Select a synthetic property.
    pub fn extra(property: ExtraProperty) -> Self {
        Self::from_target(SelectorTarget::ExtraProperty(property))
    }

    /// The "last written attribute" sentinel.
    pub fn last() -> Self {
        Self::attribute(LAST_ATTRIBUTE)
    }

    /// The "paired input selector" sentinel.
    pub fn source() -> Self {
        Self::attribute(SOURCE_ATTRIBUTE)
    }

    fn from_target(target: SelectorTarget) -> Self {
        Self {
            target,
            domain: None,
            extra_names: SmallVec::new(),
        }
    }

    /// Override the domain by name.
    ///
    /// Sentinel spellings (`Last`, `Source`, ...) are refused by
    /// [`validate`](Self::validate).
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Use the data's default domain.
    pub fn without_domain(mut self) -> Self {
        self.domain = None;
        self
    }

    /// Replace the extractor chain.
    pub fn with_extra_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Base target.
    pub fn target(&self) -> &SelectorTarget {
        &self.target
    }

    /// Domain override, if any.
    pub fn domain_name(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Field extractor chain.
    pub fn extra_names(&self) -> &[String] {
        &self.extra_names
    }

    /// Whether no extractors are applied.
    pub fn is_basic(&self) -> bool {
        self.extra_names.is_empty()
    }

    /// Name of the base target (attribute or property name).
    pub fn name(&self) -> &str {
        match &self.target {
            SelectorTarget::Attribute(name) | SelectorTarget::Property(name) => name,
            SelectorTarget::ExtraProperty(extra) => extra.name(),
        }
    }

    /// Attribute name, if this selects an attribute.
    pub fn attribute_name(&self) -> Option<&str> {
        match &self.target {
            SelectorTarget::Attribute(name) => Some(name),
            _ => None,
        }
    }

    /// Whether the base is `@Last` or `@LastCreated`.
    pub fn is_last(&self) -> bool {
        self.attribute_name()
            .and_then(reserved_name)
            .is_some_and(|n| n == LAST_ATTRIBUTE || n == LAST_CREATED_ATTRIBUTE)
    }

    /// Whether the base is `@Source` or `@SourceName`.
    pub fn is_source(&self) -> bool {
        self.attribute_name()
            .and_then(reserved_name)
            .is_some_and(|n| n == SOURCE_ATTRIBUTE || n == SOURCE_NAME_ATTRIBUTE)
    }

    /// Short form for UI: base name and extractors, without domain.
    pub fn display_text(&self) -> String {
        let mut out = match &self.target {
            SelectorTarget::Attribute(name) => name.clone(),
            SelectorTarget::Property(name) => format!("${name}"),
            SelectorTarget::ExtraProperty(extra) => format!("${}", extra.name()),
        };
        for extra in &self.extra_names {
            out.push('.');
            out.push_str(extra);
        }
        out
    }

    /// Parse selector text.
    pub fn parse(text: &str) -> Result<Self> {
        let tokens: Vec<&str> = text.split('.').map(str::trim).collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(Error::selector(format!("empty token in '{text}'")));
        }

        let mut rest = tokens.as_slice();
        let mut domain = None;
        if let Some((first, tail)) = rest.split_first() {
            if let Some(domain_name) = first.strip_prefix('@') {
                if reserved_name(first).is_none() {
                    if !is_valid_domain_name(domain_name) {
                        return Err(Error::selector(format!("invalid domain '{domain_name}'")));
                    }
                    if tail.is_empty() {
                        return Err(Error::selector(format!(
                            "missing name after domain in '{text}'"
                        )));
                    }
                    domain = Some(domain_name.to_string());
                    rest = tail;
                }
            }
        }

        let (base, extras) = rest
            .split_first()
            .ok_or_else(|| Error::selector("empty selector"))?;

        let target = if let Some(property) = base.strip_prefix('$') {
            if property.is_empty() || !property.chars().all(is_valid_name_char) {
                return Err(Error::selector(format!("invalid property '{base}'")));
            }
            match ExtraProperty::from_name(property) {
                Some(extra) => SelectorTarget::ExtraProperty(extra),
                None => SelectorTarget::Property(property.to_string()),
            }
        } else if let Some(sentinel) = reserved_name(base) {
            SelectorTarget::Attribute(sentinel.to_string())
        } else if is_valid_attribute_name(base) {
            SelectorTarget::Attribute(base.to_string())
        } else {
            return Err(Error::selector(format!("invalid attribute name '{base}'")));
        };

        if let Some(bad) = extras.iter().find(|e| !e.chars().all(is_valid_name_char)) {
            return Err(Error::selector(format!("invalid extra name '{bad}'")));
        }

        Ok(Self {
            target,
            domain,
            extra_names: extras.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Structural validation for selectors built in code.
    pub fn validate(&self) -> Result<()> {
        let base_ok = match &self.target {
            SelectorTarget::Attribute(name) => {
                reserved_name(name).is_some_and(|r| r == name) || is_valid_attribute_name(name)
            }
            SelectorTarget::Property(name) => {
                is_valid_token(name) && ExtraProperty::from_name(name).is_none()
            }
            SelectorTarget::ExtraProperty(_) => true,
        };
        if !base_ok {
            if !self.extra_names.is_empty() && self.name().is_empty() {
                return Err(Error::selector("extra names without a base name"));
            }
            return Err(Error::selector(format!("invalid base name '{}'", self.name())));
        }
        if let Some(domain) = &self.domain {
            if !is_valid_domain_name(domain) {
                return Err(Error::selector(format!("invalid domain '{domain}'")));
            }
        }
        if let Some(bad) = self
            .extra_names
            .iter()
            .find(|e| !is_valid_token(e))
        {
            return Err(Error::selector(format!("invalid extra name '{bad}'")));
        }
        Ok(())
    }

    /// Replace `@Last`/`@LastCreated` by the latest attribute of `data`.
    ///
    /// Selectors that are not `@Last` are returned unchanged.
    pub fn copy_and_fix_last(&self, data: &dyn HostData) -> Result<Self> {
        if !self.is_last() {
            return Ok(self.clone());
        }
        let domain = data.domain_id_from_selector(self)?;
        let latest = data
            .metadata()
            .latest_attribute_name(domain)
            .ok_or_else(|| Error::selector(format!("no attribute written on domain {domain}")))?;

        let mut fixed = self.clone();
        fixed.target = SelectorTarget::Attribute(latest);
        Ok(fixed)
    }

    /// Replace `@Source`/`@SourceName` using the paired input selector.
    ///
    /// `@Source` takes the whole input selector (its extractors first, then
    /// ours); `@SourceName` takes only its name. When `data` is given, an
    /// input `@Last` is resolved against it first.
    pub fn copy_and_fix_source(
        &self,
        source: &Selector,
        data: Option<&dyn HostData>,
    ) -> Result<Self> {
        if !self.is_source() {
            return Ok(self.clone());
        }
        let source = match data {
            Some(data) => source.copy_and_fix_last(data)?,
            None => source.clone(),
        };
        let whole = self
            .attribute_name()
            .and_then(reserved_name)
            .is_some_and(|n| n == SOURCE_ATTRIBUTE);

        let mut fixed = if whole {
            let mut fixed = source.clone();
            fixed.extra_names.extend(self.extra_names.iter().cloned());
            fixed
        } else {
            let mut fixed = self.clone();
            fixed.target = SelectorTarget::Attribute(source.name().to_string());
            fixed
        };
        if self.domain.is_some() {
            fixed.domain = self.domain.clone();
        }
        Ok(fixed)
    }
}

/// Property or extra name that survives a print and parse cycle.
fn is_valid_token(name: &str) -> bool {
    !name.is_empty() && name.trim() == name && name.chars().all(is_valid_name_char)
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(domain) = &self.domain {
            write!(f, "@{domain}.")?;
        }
        f.write_str(&self.display_text())
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let s = Selector::parse("Position").unwrap();
        assert_eq!(s.target(), &SelectorTarget::Attribute("Position".into()));
        assert!(s.is_basic());

        let s = Selector::parse("$Density").unwrap();
        assert_eq!(s.target(), &SelectorTarget::Property("Density".into()));

        let s = Selector::parse("@Data.$Transform").unwrap();
        assert_eq!(s.domain_name(), Some("Data"));
        assert_eq!(s.name(), "Transform");

        let s = Selector::parse("$Transform.Rotation.Z").unwrap();
        assert_eq!(s.extra_names(), &["Rotation".to_string(), "Z".to_string()]);

        let s = Selector::parse("$index").unwrap();
        assert_eq!(s.target(), &SelectorTarget::ExtraProperty(ExtraProperty::Index));
    }

    #[test]
    fn test_parse_sentinels() {
        let s = Selector::parse("@Last").unwrap();
        assert!(s.is_last());
        assert_eq!(s, Selector::default());

        let s = Selector::parse("@Data.@Source.X").unwrap();
        assert!(s.is_source());
        assert_eq!(s.domain_name(), Some("Data"));
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "A..B", "A.", "@Data", "@Data.", "$", "Bad#Name", "A.B#"] {
            assert!(Selector::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_roundtrip() {
        for text in [
            "Position",
            "$Density",
            "@Data.$Transform",
            "$Transform.Rotation.Z",
            "@Last",
            "@Data.Seed.X",
        ] {
            let s = Selector::parse(text).unwrap();
            assert_eq!(s.to_string(), text);
            assert_eq!(Selector::parse(&s.to_string()).unwrap(), s);
        }
        let s = Selector::parse(" Position . X ").unwrap();
        assert_eq!(s.to_string(), "Position.X");
    }

    #[test]
    fn test_generated_roundtrip() {
        let domains = [None, Some("Data"), Some("Points"), Some("My Domain")];
        let bases = [
            Selector::attribute("Density"),
            Selector::attribute("a_b-c/d:e 2"),
            Selector::property("Position"),
            Selector::property("index"),
            Selector::last(),
            Selector::attribute(LAST_CREATED_ATTRIBUTE),
            Selector::source(),
            Selector::attribute(SOURCE_NAME_ATTRIBUTE),
        ];
        let chains: [&[&str]; 4] = [&[], &["X"], &["Rotation", "Z"], &["XY", "Length", "R"]];

        for domain in domains {
            for base in &bases {
                for chain in chains {
                    let mut s = base.clone().with_extra_names(chain.iter().copied());
                    if let Some(domain) = domain {
                        s = s.with_domain(domain);
                    }
                    s.validate().unwrap();
                    let text = s.to_string();
                    assert_eq!(Selector::parse(&text).unwrap(), s, "{text}");
                }
            }
        }
    }

    #[test]
    fn test_validate_rejects_lossy_parts() {
        for domain in ["Last", "lastcreated", "Source", "SourceName"] {
            let s = Selector::attribute("A").with_domain(domain);
            assert!(s.validate().is_err(), "{domain}");
            assert_ne!(Selector::parse(&s.to_string()).unwrap(), s);
        }
        assert!(Selector::attribute("A").with_extra_names([" X"]).validate().is_err());
        assert!(Selector::attribute("@last").validate().is_err());
        let index = Selector::from_target(SelectorTarget::Property("Index".into()));
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_source_name_only() {
        let input = Selector::parse("@Data.Height.X").unwrap();
        let out = Selector::parse("@SourceName.Y").unwrap();
        let fixed = out.copy_and_fix_source(&input, None).unwrap();
        assert_eq!(fixed.to_string(), "Height.Y");

        let whole = Selector::source().with_extra_names(["Z"]);
        let fixed = whole.copy_and_fix_source(&input, None).unwrap();
        assert_eq!(fixed.to_string(), "@Data.Height.X.Z");
    }

    #[test]
    fn test_validate() {
        assert!(Selector::attribute("Ok").validate().is_ok());
        assert!(Selector::attribute("").with_extra_names(["X"]).validate().is_err());
        assert!(Selector::attribute("A.B").validate().is_err());
        assert!(Selector::last().validate().is_ok());
    }
}
