//! Simulated storage stripe.

use std::sync::atomic::{AtomicU64, Ordering};

use stripe_pool::{TickError, TickOutcome, TickResult, TickableStripe};

/// Operations handled per tick.
const BATCH: u64 = 16;

/// A stripe with a queue of pending operations, tagged with the cluster state
/// version it was last configured for.
#[derive(Debug, Default)]
pub struct SimulatedStripe {
    pending: AtomicU64,
    completed: AtomicU64,
    cluster_state_version: AtomicU64,
    /// Version the stripe observed on its last tick.
    ticked_version: AtomicU64,
}

impl SimulatedStripe {
    pub fn enqueue(&self, ops: u64) {
        self.pending.fetch_add(ops, Ordering::Relaxed);
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Only called while the pool is parked.
    pub fn apply_cluster_state(&self, version: u64) {
        self.cluster_state_version.store(version, Ordering::Relaxed);
    }
}

impl TickableStripe for SimulatedStripe {
    fn tick(&self) -> TickResult {
        let version = self.cluster_state_version.load(Ordering::Relaxed);
        let seen = self.ticked_version.swap(version, Ordering::Relaxed);
        if version < seen {
            return Err(TickError::new(format!(
                "cluster state went backwards: {seen} -> {version}"
            )));
        }

        let taken = self
            .pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |pending| {
                Some(pending.saturating_sub(BATCH))
            })
            .map_or(0, |before| before.min(BATCH));
        if taken == 0 {
            return Ok(TickOutcome::NoWork);
        }
        self.completed.fetch_add(taken, Ordering::Relaxed);
        Ok(TickOutcome::DidWork)
    }
}
