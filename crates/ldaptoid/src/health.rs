// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Liveness/readiness state, separate from [`crate::metrics::Metrics`]
//! since the health surface answers "is the server usable", not "how much
//! has it done".

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct HealthState {
    has_published_snapshot: AtomicBool,
    scheduler_halted: AtomicBool,
    mapping_store_degraded: AtomicBool,
}

impl HealthState {
    pub fn mark_snapshot_published(&self) {
        self.has_published_snapshot.store(true, Ordering::Release);
    }

    pub fn mark_scheduler_halted(&self, halted: bool) {
        self.scheduler_halted.store(halted, Ordering::Release);
    }

    pub fn mark_mapping_store_degraded(&self, degraded: bool) {
        self.mapping_store_degraded.store(degraded, Ordering::Release);
    }

    pub fn has_published_snapshot(&self) -> bool {
        self.has_published_snapshot.load(Ordering::Acquire)
    }

    pub fn is_scheduler_halted(&self) -> bool {
        self.scheduler_halted.load(Ordering::Acquire)
    }

    pub fn is_mapping_store_degraded(&self) -> bool {
        self.mapping_store_degraded.load(Ordering::Acquire)
    }

    /// Ready to serve search traffic: a snapshot has published at least
    /// once, regardless of whether the scheduler has since halted.
    pub fn is_ready(&self) -> bool {
        self.has_published_snapshot()
    }

    /// Healthy: ready, and not in a permanently halted refresh state.
    pub fn is_healthy(&self) -> bool {
        self.is_ready() && !self.is_scheduler_halted()
    }
}
