//! Engine configuration
//!
//! Loaded from TOML, e.g.
//!
//! ```toml
//! working_dir = "/srv/export"
//! verify_checksums = true
//! ```

use crate::error::{ArchiveError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory source names are resolved against and extraction writes into
    pub working_dir: PathBuf,

    /// Recompute and compare every header checksum while scanning
    pub verify_checksums: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            working_dir: PathBuf::from("."),
            verify_checksums: false,
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ArchiveError::Config(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ArchiveError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }
}
