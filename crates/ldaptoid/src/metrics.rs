// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process counters. The counter set is exposed here as plain atomics;
//! serving them over HTTP is out of scope for this crate.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub collisions_total: AtomicU64,
    pub fallbacks_total: AtomicU64,
    pub group_truncated_total: AtomicU64,
    pub refresh_success_total: AtomicU64,
    pub refresh_failure_total: AtomicU64,
    pub active_connections: AtomicI64,
    pub searches_total: AtomicU64,
}

/// Point-in-time read of every counter, for logging or an eventual
/// metrics exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub collisions_total: u64,
    pub fallbacks_total: u64,
    pub group_truncated_total: u64,
    pub refresh_success_total: u64,
    pub refresh_failure_total: u64,
    pub active_connections: i64,
    pub searches_total: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            collisions_total: self.collisions_total.load(Ordering::Relaxed),
            fallbacks_total: self.fallbacks_total.load(Ordering::Relaxed),
            group_truncated_total: self.group_truncated_total.load(Ordering::Relaxed),
            refresh_success_total: self.refresh_success_total.load(Ordering::Relaxed),
            refresh_failure_total: self.refresh_failure_total.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            searches_total: self.searches_total.load(Ordering::Relaxed),
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn search_completed(&self) {
        self.searches_total.fetch_add(1, Ordering::Relaxed);
    }
}
