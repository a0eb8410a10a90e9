use std::collections::{BTreeSet, HashSet};

use tracing::info;

use crate::error::StoreError;
use crate::events::CollectionUnit;
use crate::raw_store::RawEventStore;

/// Which collection units are durably complete, derived from the raw store.
///
/// Built once per run from a fresh scan; nothing here outlives the process.
#[derive(Debug, Clone, Default)]
pub struct CheckpointLedger {
    completed: HashSet<String>,
}

impl CheckpointLedger {
    pub fn load(store: &RawEventStore) -> Result<Self, StoreError> {
        let keys = store.completed_unit_keys()?;
        info!(
            store = %store.path().display(),
            completed = keys.len(),
            "derived checkpoint ledger from raw store"
        );
        Ok(Self::from_keys(keys))
    }

    pub fn from_keys(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            completed: keys.into_iter().collect(),
        }
    }

    pub fn already_collected(&self, unit: &CollectionUnit) -> bool {
        self.completed.contains(&unit.key())
    }

    /// The requested units not yet collected, ascending and deduplicated.
    pub fn pending_units(&self, requested: &[CollectionUnit]) -> Vec<CollectionUnit> {
        requested
            .iter()
            .filter(|unit| !self.already_collected(unit))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}
