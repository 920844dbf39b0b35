// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Refresh scheduler (C6): periodically pulls from the IdP, rebuilds a
//! snapshot, and swaps it into the shared `AppContext`. Runs as a single
//! background task; failures back off exponentially and a streak of
//! `maxRetries` in a row halts further attempts until an operator forces
//! one.
//!
//! Idle -> Refreshing -> Idle on success; Refreshing -> Backoff ->
//! Refreshing on failure, with the delay reset to the base interval on the
//! next success.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::idp;
use crate::idp::AdapterError;
use crate::snapshot::SnapshotBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Backoff,
    Halted,
}

pub struct Scheduler {
    ctx: Arc<AppContext>,
    sequence: std::sync::atomic::AtomicU64,
}

impl Scheduler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            sequence: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Runs until `ctx.shutdown` fires. Exits cleanly; never panics on a
    /// refresh failure.
    pub async fn run(&self) {
        let mut phase = Phase::Idle;
        let mut delay = self.ctx.refresh_interval();
        let mut consecutive_failures: u32 = 0;

        loop {
            let wait = match phase {
                Phase::Idle => self.ctx.refresh_interval(),
                Phase::Backoff => delay,
                Phase::Halted => self.ctx.config.max_backoff(),
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.ctx.force_refresh.notified() => {
                    info!("forced refresh requested");
                }
                _ = self.ctx.shutdown.notified() => {
                    info!("refresh scheduler shutting down");
                    return;
                }
            }

            match self.refresh_once().await {
                Ok(()) => {
                    self.ctx.metrics.refresh_success_total.fetch_add(1, Ordering::Relaxed);
                    self.ctx.health.mark_scheduler_halted(false);
                    consecutive_failures = 0;
                    delay = self.ctx.refresh_interval();
                    phase = Phase::Idle;
                }
                Err(e) => {
                    self.ctx.metrics.refresh_failure_total.fetch_add(1, Ordering::Relaxed);
                    consecutive_failures += 1;
                    warn!(error = %e, attempt = consecutive_failures, "refresh cycle failed");

                    if consecutive_failures >= self.ctx.config.max_retries {
                        error!(
                            consecutive_failures,
                            "refresh scheduler halted after repeated failures; last known snapshot keeps serving"
                        );
                        self.ctx.health.mark_scheduler_halted(true);
                        phase = Phase::Halted;
                    } else {
                        // First failure backs off by exactly the refresh
                        // interval; the multiplier only compounds from the
                        // second consecutive failure onward (§4.6).
                        delay = if consecutive_failures == 1 {
                            self.ctx.refresh_interval().min(self.ctx.config.max_backoff())
                        } else {
                            delay.mul_f64(self.ctx.config.backoff_multiplier).min(self.ctx.config.max_backoff())
                        };
                        phase = Phase::Backoff;
                    }
                }
            }
        }
    }

    async fn refresh_once(&self) -> Result<(), RefreshError> {
        let config = &self.ctx.config;
        let mut token = self
            .ctx
            .token_cache
            .get_token(config)
            .await
            .map_err(|e| RefreshError::Token(e.to_string()))?;

        let fetch_result = idp::fetch_users_and_groups(config, &self.ctx.http, &token).await;
        let (raw_users, raw_groups) = match fetch_result {
            Ok(v) => v,
            Err(AdapterError::Auth) => {
                self.ctx.token_cache.evict(config).await;
                token = self
                    .ctx
                    .token_cache
                    .get_token(config)
                    .await
                    .map_err(|e| RefreshError::Token(e.to_string()))?;
                idp::fetch_users_and_groups(config, &self.ctx.http, &token)
                    .await
                    .map_err(|e| RefreshError::Adapter(e.to_string()))?
            }
            Err(e) => return Err(RefreshError::Adapter(e.to_string())),
        };

        let builder = SnapshotBuilder::new(
            &self.ctx.uid_allocator,
            &self.ctx.gid_allocator,
            config,
            &self.ctx.metrics.group_truncated_total,
            &self.sequence,
        );
        let snapshot = builder.build(raw_users, raw_groups);
        self.ctx.publish_snapshot(snapshot);
        self.ctx.persist_allocations().await;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum RefreshError {
    #[error("token acquisition failed: {0}")]
    Token(String),
    #[error("IdP adapter failed: {0}")]
    Adapter(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> crate::config::AppConfig {
        crate::config::AppConfig {
            idp_base_url: "https://idp.invalid".into(),
            idp_client_id: "c".into(),
            idp_client_secret: "s".into(),
            idp_realm: Some("main".into()),
            ldap_base_dn: "dc=example,dc=com".into(),
            max_retries: 2,
            refresh_interval_ms: 50,
            max_backoff_ms: 200,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn refresh_against_unreachable_idp_fails_and_is_counted() {
        let ctx = AppContext::new(config()).await.unwrap();
        let scheduler = Scheduler::new(ctx.clone());
        let result = scheduler.refresh_once().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn halts_after_max_retries_consecutive_failures() {
        let ctx = AppContext::new(config()).await.unwrap();
        let scheduler = Scheduler::new(ctx.clone());
        for _ in 0..ctx.config.max_retries {
            assert!(scheduler.refresh_once().await.is_err());
        }
        // The scheduler's `run` loop is what flips HealthState; this test
        // only confirms the failure path is stable to call repeatedly.
        assert!(ctx.current_snapshot().is_none());
    }
}
