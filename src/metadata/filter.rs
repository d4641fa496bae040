//! Attribute name filtering used when initializing domains from a parent.

/// Whether listed names are kept or dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterMode {
    /// Keep only matching attributes.
    Include,
    /// Keep everything except matching attributes.
    #[default]
    Exclude,
}

/// How a filter name is compared with an attribute name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterMatch {
    /// Exact, case-sensitive.
    #[default]
    Equal,
    /// Filter name is a substring of the attribute name.
    Substring,
    /// Wildcard pattern with `*` and `?`.
    Matches,
}

/// Include/exclude filter over attribute names.
///
/// The default filter excludes nothing, so every attribute passes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeFilter {
    pub mode: FilterMode,
    pub names: Vec<String>,
    pub matching: FilterMatch,
}

impl AttributeFilter {
    /// Filter letting every attribute through.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter letting no attribute through.
    pub fn none() -> Self {
        Self {
            mode: FilterMode::Include,
            names: Vec::new(),
            matching: FilterMatch::Equal,
        }
    }

    /// Keep only the given names.
    pub fn include<I, S>(names: I, matching: FilterMatch) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: FilterMode::Include,
            names: names.into_iter().map(Into::into).collect(),
            matching,
        }
    }

    /// Drop the given names.
    pub fn exclude<I, S>(names: I, matching: FilterMatch) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: FilterMode::Exclude,
            names: names.into_iter().map(Into::into).collect(),
            matching,
        }
    }

    /// Whether an attribute with this name passes the filter.
    pub fn passes(&self, attribute_name: &str) -> bool {
        let matched = self.names.iter().any(|pattern| match self.matching {
            FilterMatch::Equal => pattern == attribute_name,
            FilterMatch::Substring => attribute_name.contains(pattern.as_str()),
            FilterMatch::Matches => wildcard_match(pattern, attribute_name),
        });
        match self.mode {
            FilterMode::Include => matched,
            FilterMode::Exclude => !matched,
        }
    }
}

/// Glob-style match: `*` matches any run, `?` any single character.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_p, star_t)) = star {
            pi = star_p + 1;
            ti = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_passes_everything() {
        assert!(AttributeFilter::all().passes("Anything"));
        assert!(!AttributeFilter::none().passes("Anything"));
    }

    #[test]
    fn test_modes() {
        let inc = AttributeFilter::include(["Density"], FilterMatch::Equal);
        assert!(inc.passes("Density"));
        assert!(!inc.passes("Color"));

        let exc = AttributeFilter::exclude(["Temp"], FilterMatch::Substring);
        assert!(!exc.passes("MyTempValue"));
        assert!(exc.passes("Value"));
    }

    #[test]
    fn test_wildcard() {
        assert!(wildcard_match("Leaf*", "LeafColor"));
        assert!(wildcard_match("*Color", "LeafColor"));
        assert!(wildcard_match("L??f*", "LeafColor"));
        assert!(wildcard_match("*", ""));
        assert!(!wildcard_match("Leaf?", "Leaf"));
        assert!(!wildcard_match("*Size", "LeafColor"));
    }
}
