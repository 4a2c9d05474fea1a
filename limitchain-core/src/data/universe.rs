//! Static universe — a TOML instrument list.
//!
//! ```toml
//! [[instruments]]
//! code = "600000"
//! name = "Pudong Bank"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::provider::{DataError, UniverseProvider};
use crate::domain::Instrument;
use crate::limit::LimitRules;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseEntry {
    pub code: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UniverseFile {
    #[serde(default)]
    instruments: Vec<UniverseEntry>,
}

/// Fixed instrument list, classified with the configured limit rules.
#[derive(Debug, Clone)]
pub struct StaticUniverse {
    entries: Vec<UniverseEntry>,
    rules: LimitRules,
}

impl StaticUniverse {
    pub fn new(entries: Vec<UniverseEntry>, rules: LimitRules) -> Self {
        Self { entries, rules }
    }

    /// Load a universe from a TOML file.
    pub fn from_file(path: &Path, rules: LimitRules) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DataError::Io(format!("read universe file {}: {e}", path.display())))?;
        Self::from_toml(&content, rules)
    }

    /// Parse a universe from a TOML string.
    pub fn from_toml(content: &str, rules: LimitRules) -> Result<Self, DataError> {
        let file: UniverseFile = toml::from_str(content)
            .map_err(|e| DataError::ResponseFormatChanged(format!("parse universe TOML: {e}")))?;
        Ok(Self::new(file.instruments, rules))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl UniverseProvider for StaticUniverse {
    fn instruments(&self) -> Result<Vec<Instrument>, DataError> {
        if self.entries.is_empty() {
            return Err(DataError::Other("universe is empty".into()));
        }
        Ok(self
            .entries
            .iter()
            .map(|e| Instrument::classify(e.code.trim(), e.name.trim(), &self.rules))
            .collect())
    }
}
