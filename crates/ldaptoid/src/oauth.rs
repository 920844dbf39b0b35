// SPDX-License-Identifier: Apache-2.0 OR MIT

//! OAuth2 client-credentials token cache (C4).
//!
//! Storage and single-flight fetch coalescing ride on
//! `moka::future::Cache::try_get_with`: concurrent callers for a cache miss
//! on the same key await one shared fetch future instead of each firing
//! their own HTTP request. Expiry is spec-defined (`expiresAt - now >= 30s`)
//! and checked explicitly on every read — moka's own TTL machinery is not
//! used, since the buffer rule doesn't map onto a fixed per-entry TTL.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use moka::future::Cache;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{AppConfig, IdpType};
use crate::model::{TokenEntry, TokenKey};

const EXPIRY_BUFFER: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum OauthError {
    #[error("token request failed: {0}")]
    Request(String),
    #[error("token endpoint returned an error response: {0}")]
    Response(String),
}

impl From<reqwest::Error> for OauthError {
    fn from(e: reqwest::Error) -> Self {
        OauthError::Request(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    #[serde(default)]
    scope: Option<String>,
}

fn default_expires_in() -> u64 {
    300
}

pub struct TokenCache {
    cache: Cache<TokenKey, Arc<TokenEntry>>,
    http: reqwest::Client,
}

impl TokenCache {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            cache: Cache::builder().max_capacity(64).build(),
            http,
        }
    }

    pub fn key_for(config: &AppConfig) -> TokenKey {
        let qualifier = match config.idp_type {
            IdpType::Keycloak => config.idp_realm.clone().unwrap_or_default(),
            IdpType::Entra => config.idp_tenant.clone().unwrap_or_default(),
            IdpType::Zitadel => config.idp_organization.clone().unwrap_or_default(),
        };
        TokenKey {
            idp_type: config.idp_type,
            base_url: config.idp_base_url.clone(),
            client_id: config.idp_client_id.clone(),
            qualifier,
        }
    }

    /// Serve a cached, still-valid token or fetch (and coalesce concurrent
    /// fetches for) a new one.
    pub async fn get_token(&self, config: &AppConfig) -> Result<String, OauthError> {
        let key = Self::key_for(config);
        if let Some(entry) = self.cache.get(&key).await {
            if entry.is_valid(EXPIRY_BUFFER) {
                return Ok(entry.token.clone());
            }
            self.cache.invalidate(&key).await;
        }
        let http = self.http.clone();
        let cfg = config.clone();
        let entry = self
            .cache
            .try_get_with(key, async move { fetch_token(&cfg, &http).await.map(Arc::new) })
            .await
            .map_err(|e: Arc<OauthError>| OauthError::Request(e.to_string()))?;
        Ok(entry.token.clone())
    }

    /// On a 401 from the adapter, evict and allow exactly one re-fetch.
    pub async fn evict(&self, config: &AppConfig) {
        self.cache.invalidate(&Self::key_for(config)).await;
    }
}

async fn fetch_token(config: &AppConfig, http: &reqwest::Client) -> Result<TokenEntry, OauthError> {
    let (url, scope) = token_endpoint_and_scope(config);
    let mut form = vec![
        ("grant_type", "client_credentials".to_string()),
        ("client_id", config.idp_client_id.clone()),
        ("client_secret", config.idp_client_secret.clone()),
    ];
    if !scope.is_empty() {
        form.push(("scope", scope));
    }
    let resp = http
        .post(&url)
        .form(&form)
        .send()
        .await
        .map_err(OauthError::from)?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(OauthError::Response(format!("{status}: {body}")));
    }
    let parsed: TokenResponse = resp.json().await.map_err(OauthError::from)?;
    Ok(TokenEntry {
        token: parsed.access_token,
        expires_at: SystemTime::now() + Duration::from_secs(parsed.expires_in),
        scope: parsed.scope,
    })
}

fn token_endpoint_and_scope(config: &AppConfig) -> (String, String) {
    match config.idp_type {
        IdpType::Keycloak => {
            let realm = config.idp_realm.as_deref().unwrap_or_default();
            (
                format!(
                    "{}/realms/{realm}/protocol/openid-connect/token",
                    config.idp_base_url.trim_end_matches('/')
                ),
                "openid profile email".to_string(),
            )
        }
        IdpType::Entra => {
            let tenant = config.idp_tenant.as_deref().unwrap_or_default();
            (
                format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token"),
                "https://graph.microsoft.com/.default".to_string(),
            )
        }
        IdpType::Zitadel => {
            let mut scope = "urn:zitadel:iam:org:projects:roles".to_string();
            if let Some(org) = &config.idp_organization {
                scope.push_str(&format!(" urn:zitadel:iam:org:id:{org}"));
            }
            (
                format!("{}/oauth/v2/token", config.idp_base_url.trim_end_matches('/')),
                scope,
            )
        }
    }
}
