//! Copy-on-write publication of [`RuleSet`] snapshots.
//!
//! Readers never block and never observe a partially-applied change:
//! [`RuleSetHandle::load`] hands out an `Arc<RuleSet>` that is either the
//! previous snapshot in full or the new one in full. Writers serialize
//! through [`RuleSetHandle::publish`]; the engine does not itself arbitrate
//! between concurrent writers.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use crate::change::Change;
use crate::ruleset::RuleSet;
use crate::Error;

/// A handle through which readers observe, and a writer publishes,
/// successive [`RuleSet`] snapshots.
pub struct RuleSetHandle {
    current: ArcSwap<RuleSet>,
}

impl RuleSetHandle {
    pub fn new(initial: RuleSet) -> Self {
        RuleSetHandle { current: ArcSwap::from_pointee(initial) }
    }

    /// Snapshot currently visible to readers.
    pub fn load(&self) -> Arc<RuleSet> {
        self.current.load_full()
    }

    /// Apply `change` to the current snapshot and publish the result,
    /// returning the new snapshot. The previous snapshot remains valid for
    /// any reader still holding an `Arc` to it.
    pub fn publish(&self, change: &Change) -> Result<Arc<RuleSet>, Error> {
        let current = self.load();
        let next = Arc::new(current.apply(change)?);
        self.current.store(next.clone());
        info!(rule_set = %next.name, change_id = %change.id, "published new rule set snapshot");
        Ok(next)
    }
}
