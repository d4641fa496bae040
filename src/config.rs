//! Runtime settings
//!
//! Settings are read from `<config_dir>/attrmeta/settings.json` and may be
//! overridden through environment variables. A process-wide copy is
//! installed with [`set_global`] (or [`init_global`] at startup) and read
//! with [`global`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::Result;

/// Tunables for bulk operations and file output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Bulk copy
    pub parallel_set_attributes_threshold: usize,

    // Partitioning
    pub hashed_partition_threshold: usize,

    // File output (0 = store uncompressed, 1-9 = zlib level)
    pub compression_level: i32,

    // Diagnostics
    pub warn_on_scalar_add_entry: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallel_set_attributes_threshold: 1024,
            hashed_partition_threshold: 64,
            compression_level: 6,
            warn_on_scalar_add_entry: true,
        }
    }
}

const ENV_PARALLEL_THRESHOLD: &str = "ATTRMETA_PARALLEL_THRESHOLD";
const ENV_HASH_THRESHOLD: &str = "ATTRMETA_HASH_THRESHOLD";
const ENV_COMPRESSION: &str = "ATTRMETA_COMPRESSION";

static GLOBAL: RwLock<Option<Settings>> = parking_lot::const_rwlock(None);

impl Settings {
    /// Get settings file path
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("attrmeta");
            p.push("settings.json");
            p
        })
    }

    /// Load settings from file, falling back to defaults
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| std::fs::read_to_string(&p).ok())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Parse settings from JSON text (missing fields take defaults)
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Save settings to file
    pub fn save(&self) -> Result<()> {
        if let Some(path) = Self::path() {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        }
        Ok(())
    }

    /// Apply `ATTRMETA_*` environment overrides (unparsable values are ignored)
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_PARALLEL_THRESHOLD).and_then(|s| s.trim().parse().ok()) {
            self.parallel_set_attributes_threshold = v;
        }
        if let Some(v) = lookup(ENV_HASH_THRESHOLD).and_then(|s| s.trim().parse().ok()) {
            self.hashed_partition_threshold = v;
        }
        if let Some(v) = lookup(ENV_COMPRESSION).and_then(|s| s.trim().parse::<i32>().ok()) {
            self.compression_level = v.clamp(0, 9);
        }
    }
}

/// Install process-wide settings
pub fn set_global(settings: Settings) {
    *GLOBAL.write() = Some(settings);
}

/// Current process-wide settings (defaults if none were installed)
pub fn global() -> Settings {
    GLOBAL.read().clone().unwrap_or_default()
}

/// Load the settings file, apply environment overrides and install the result
pub fn init_global() -> Settings {
    let settings = Settings::load().with_env_overrides();
    set_global(settings.clone());
    settings
}

/// Restores the previously installed settings when dropped
#[must_use = "the override ends when the guard is dropped"]
pub struct GlobalOverride {
    previous: Option<Settings>,
}

/// Install process-wide settings until the returned guard is dropped
pub fn override_global(settings: Settings) -> GlobalOverride {
    let previous = GLOBAL.write().replace(settings);
    GlobalOverride { previous }
}

impl Drop for GlobalOverride {
    fn drop(&mut self) {
        *GLOBAL.write() = self.previous.take();
    }
}
