//! Check registry: group name to group.

use crate::engine::check::Check;
use crate::engine::group::ChecksGroup;
use crate::EngineError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Registered groups, iterated in sorted name order
#[derive(Debug, Default)]
pub struct ChecksDb {
    groups: BTreeMap<String, Arc<Mutex<ChecksGroup>>>,
    /// Check ID to the group it was registered in
    owners: HashMap<String, String>,
}

impl ChecksDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `check` to `group`, creating the group on first use.
    ///
    /// Check IDs are unique across all groups.
    pub fn register(&mut self, group: &str, check: Check) -> Result<(), EngineError> {
        if let Some(owner) = self.owners.get(check.id()) {
            return Err(EngineError::DuplicateCheck {
                check_id: check.id().to_string(),
                group: owner.clone(),
            });
        }

        let entry = self
            .groups
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ChecksGroup::new(group))));

        // A clone of the Arc only exists while a run has the group in flight
        let group_ref = Arc::get_mut(entry).ok_or_else(|| EngineError::RegistryBusy {
            group: group.to_string(),
        })?;
        tracing::debug!(group, check = check.id(), "Registering check");
        self.owners.insert(check.id().to_string(), group.to_string());
        group_ref.get_mut().add(check);
        Ok(())
    }

    pub fn lookup(&self, group: &str) -> Option<Arc<Mutex<ChecksGroup>>> {
        self.groups.get(group).cloned()
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub(crate) fn groups(&self) -> impl Iterator<Item = (&String, &Arc<Mutex<ChecksGroup>>)> {
        self.groups.iter()
    }

    /// Number of registered checks across all groups.
    pub async fn total_checks(&self) -> usize {
        let mut total = 0;
        for group in self.groups.values() {
            total += group.lock().await.len();
        }
        total
    }

    /// IDs of every registered check, in run order.
    pub async fn check_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for group in self.groups.values() {
            let group = group.lock().await;
            ids.extend(group.checks().iter().map(|c| c.id().to_string()));
        }
        ids
    }
}
