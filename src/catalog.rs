//! Check catalog metadata.
//!
//! Every registered check must have a catalog entry. The entry is copied
//! into the recorded result so that report collaborators never need to
//! consult the catalog again.

use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Descriptive metadata for a single check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogEntry {
    pub description: String,
    pub remediation: String,
    pub best_practice_reference: String,
    pub exception_process: String,
    /// Scenario name to requirement level, e.g. `"Telco" -> "Mandatory"`
    pub category_classification: BTreeMap<String, String>,
}

impl CatalogEntry {
    pub fn new(description: impl Into<String>, remediation: impl Into<String>) -> Self {
        CatalogEntry {
            description: description.into(),
            remediation: remediation.into(),
            ..Default::default()
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.best_practice_reference = reference.into();
        self
    }

    pub fn with_exception_process(mut self, process: impl Into<String>) -> Self {
        self.exception_process = process.into();
        self
    }

    pub fn with_classification(
        mut self,
        scenario: impl Into<String>,
        level: impl Into<String>,
    ) -> Self {
        self.category_classification
            .insert(scenario.into(), level.into());
        self
    }
}

/// Check ID to catalog entry
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a JSON object keyed by check ID.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let entries: HashMap<String, CatalogEntry> = serde_json::from_str(json)?;
        Ok(Catalog { entries })
    }

    pub fn insert(&mut self, check_id: impl Into<String>, entry: CatalogEntry) {
        self.entries.insert(check_id.into(), entry);
    }

    pub fn lookup(&self, check_id: &str) -> Option<&CatalogEntry> {
        self.entries.get(check_id)
    }

    pub fn contains(&self, check_id: &str) -> bool {
        self.entries.contains_key(check_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another catalog into this one; entries in `other` win.
    pub fn extend(&mut self, other: Catalog) {
        self.entries.extend(other.entries);
    }
}
