//! Binary merge operations applied per attribute when two entries are combined.

use std::fmt;

/// Operation used to combine a source value `a` and a target value `b`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MetadataOp {
    Min,
    Max,
    Sub,
    Add,
    Mul,
    Div,
    /// Keep the source (`a`) value.
    #[default]
    SourceValue,
    /// Keep the target (`b`) value.
    TargetValue,
}

impl MetadataOp {
    /// All operations.
    pub const ALL: [Self; 8] = [
        Self::Min,
        Self::Max,
        Self::Sub,
        Self::Add,
        Self::Mul,
        Self::Div,
        Self::SourceValue,
        Self::TargetValue,
    ];

    /// Operation name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Min => "Min",
            Self::Max => "Max",
            Self::Sub => "Sub",
            Self::Add => "Add",
            Self::Mul => "Mul",
            Self::Div => "Div",
            Self::SourceValue => "SourceValue",
            Self::TargetValue => "TargetValue",
        }
    }

    /// Parse from name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for MetadataOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
