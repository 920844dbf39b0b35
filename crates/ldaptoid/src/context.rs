// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process-wide shared state: the published snapshot, the ID allocators,
//! the token cache, the mapping store handle, and the counters/health
//! surfaces. Built once in `main` and handed to the scheduler and the
//! connection handlers as a single `Arc`.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

use crate::config::AppConfig;
use crate::health::HealthState;
use crate::ids::IdAllocator;
use crate::mapping_store::{self, MappingStore, NoopMappingStore, SqliteMappingStore};
use crate::metrics::Metrics;
use crate::model::{IdNamespace, MappingRecord, Snapshot};
use crate::oauth::TokenCache;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to build HTTP client: {0}")]
    Http(#[source] reqwest::Error),
    #[error("failed to initialize mapping store: {0}")]
    MappingStore(#[source] crate::mapping_store::MappingStoreError),
}

pub struct AppContext {
    pub config: AppConfig,
    pub http: reqwest::Client,
    pub token_cache: TokenCache,
    pub uid_allocator: IdAllocator,
    pub gid_allocator: IdAllocator,
    pub mapping_store: Arc<dyn MappingStore>,
    pub metrics: Metrics,
    pub health: HealthState,
    snapshot: ArcSwapOption<Snapshot>,
    pub force_refresh: Notify,
    pub shutdown: Notify,
}

impl AppContext {
    pub async fn new(config: AppConfig) -> Result<Arc<Self>, ContextError> {
        let http = reqwest::Client::builder()
            .timeout(config.idp_timeout())
            .build()
            .map_err(ContextError::Http)?;

        let mapping_store: Arc<dyn MappingStore> = if config.mapping_store.enabled {
            Arc::new(
                SqliteMappingStore::new(&config.mapping_store, config.mapping_store_timeout())
                    .map_err(ContextError::MappingStore)?,
            )
        } else {
            Arc::new(NoopMappingStore)
        };

        let uid_allocator = IdAllocator::new("uid", config.uid_floor, config.uid_ceiling);
        let gid_allocator = IdAllocator::new("gid", config.gid_floor, config.gid_ceiling);
        seed_allocators(&mapping_store, &uid_allocator, &gid_allocator).await;

        let ctx = Self {
            token_cache: TokenCache::new(http.clone()),
            http,
            uid_allocator,
            gid_allocator,
            mapping_store,
            metrics: Metrics::default(),
            health: HealthState::default(),
            snapshot: ArcSwapOption::from(None),
            force_refresh: Notify::new(),
            shutdown: Notify::new(),
            config,
        };
        Ok(Arc::new(ctx))
    }

    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.load_full()
    }

    pub fn publish_snapshot(&self, snapshot: Snapshot) {
        self.snapshot.store(Some(Arc::new(snapshot)));
        self.health.mark_snapshot_published();
    }

    pub fn request_force_refresh(&self) {
        self.force_refresh.notify_one();
    }

    pub fn request_shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Persist the current allocator contents, best-effort. Failures are
    /// logged and reflected in `HealthState`, never propagated — losing the
    /// mapping store degrades restart stability, not serving.
    pub async fn persist_allocations(&self) {
        let mut ok = true;
        for (idp_id, id) in self.uid_allocator.export() {
            let idp_id = idp_id.strip_prefix("user:").unwrap_or(&idp_id).to_string();
            ok &= persist_one(&self.mapping_store, IdNamespace::User, &idp_id, id).await;
        }
        for (key, id) in self.gid_allocator.export() {
            let (namespace, idp_id) = if let Some(rest) = key.strip_prefix("synthetic:") {
                (IdNamespace::Synthetic, rest.to_string())
            } else if let Some(rest) = key.strip_prefix("group:") {
                (IdNamespace::Group, rest.to_string())
            } else {
                continue;
            };
            ok &= persist_one(&self.mapping_store, namespace, &idp_id, id).await;
        }
        self.health.mark_mapping_store_degraded(!ok);
    }

    pub fn refresh_interval(&self) -> Duration {
        self.config.refresh_interval()
    }
}

async fn persist_one(
    store: &Arc<dyn MappingStore>,
    namespace: IdNamespace,
    idp_id: &str,
    id: i64,
) -> bool {
    let record = MappingRecord {
        key: mapping_store::namespaced_key(namespace, idp_id),
        id,
        timestamp: mapping_store::now_timestamp(),
    };
    match store.put(record).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to persist id mapping");
            false
        }
    }
}

async fn seed_allocators(store: &Arc<dyn MappingStore>, uid: &IdAllocator, gid: &IdAllocator) {
    if store.connect().await.is_err() {
        warn!("mapping store unreachable at startup; starting with empty allocator state");
        return;
    }
    let records = match store.list().await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "failed to load persisted id mappings");
            return;
        }
    };
    let partitioned = mapping_store::partition_by_namespace(records);
    if let Some(entries) = partitioned.get("user") {
        uid.import(entries.iter().map(|(idp_id, id)| (format!("user:{idp_id}"), *id)));
    }
    if let Some(entries) = partitioned.get("group") {
        gid.import(entries.iter().map(|(idp_id, id)| (format!("group:{idp_id}"), *id)));
    }
    if let Some(entries) = partitioned.get("synthetic") {
        gid.import(entries.iter().map(|(idp_id, id)| (format!("synthetic:{idp_id}"), *id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            idp_base_url: "https://idp.example.com".into(),
            idp_client_id: "c".into(),
            idp_client_secret: "s".into(),
            idp_realm: Some("main".into()),
            ldap_base_dn: "dc=example,dc=com".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn new_context_starts_without_a_snapshot() {
        let ctx = AppContext::new(config()).await.unwrap();
        assert!(ctx.current_snapshot().is_none());
        assert!(!ctx.health.is_ready());
    }

    #[tokio::test]
    async fn publishing_a_snapshot_marks_ready() {
        let ctx = AppContext::new(config()).await.unwrap();
        ctx.publish_snapshot(Snapshot {
            users: Vec::new(),
            groups: Vec::new(),
            generated_at: std::time::SystemTime::now(),
            sequence: 1,
            feature_flags: Vec::new(),
        });
        assert!(ctx.current_snapshot().is_some());
        assert!(ctx.health.is_ready());
    }
}
