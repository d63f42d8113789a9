//! Store configuration threaded explicitly through `Database` into each collection.
//!
//! Layering follows the usual precedence: values set in code win over environment
//! variables, which win over a config file, which wins over defaults.

use crate::errors::DbError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Load the datafile eagerly when the collection handle is created.
    pub autoload: bool,
    /// Inject `createdAt` / `updatedAt` into stored documents.
    pub timestamp_data: bool,
    /// Datafile extension.
    pub format: String,
    /// Directory holding one datafile per collection.
    pub location: PathBuf,
    pub in_memory_only: bool,
    /// Rewrite the datafile after a successful load.
    pub compact_on_load: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            autoload: false,
            timestamp_data: false,
            format: "txt".to_string(),
            location: PathBuf::from("database"),
            in_memory_only: false,
            compact_on_load: true,
        }
    }
}

impl StoreConfig {
    /// A config that never touches the filesystem.
    #[must_use]
    pub fn in_memory() -> Self {
        Self { in_memory_only: true, ..Self::default() }
    }

    /// # Errors
    /// Returns a configuration error if the TOML cannot be parsed.
    pub fn from_toml_str(s: &str) -> Result<Self, DbError> {
        Ok(toml::from_str::<Self>(s)?)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, DbError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// Apply `RECORDFLOW_*` environment variables on top of this config.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(s) = lookup("RECORDFLOW_LOCATION") {
            self.location = PathBuf::from(s);
        }
        if let Some(s) = lookup("RECORDFLOW_FORMAT") {
            self.format = s;
        }
        if let Some(b) = lookup("RECORDFLOW_AUTOLOAD").and_then(|s| parse_flag(&s)) {
            self.autoload = b;
        }
        if let Some(b) = lookup("RECORDFLOW_TIMESTAMP_DATA").and_then(|s| parse_flag(&s)) {
            self.timestamp_data = b;
        }
        if let Some(b) = lookup("RECORDFLOW_IN_MEMORY").and_then(|s| parse_flag(&s)) {
            self.in_memory_only = b;
        }
        self
    }

    /// Datafile path for a collection: `{location}/{name}.{format}`.
    #[must_use]
    pub fn filename_for(&self, name: &str) -> PathBuf {
        self.location.join(format!("{name}.{}", self.format))
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
