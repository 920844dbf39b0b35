// SPDX-License-Identifier: Apache-2.0 OR MIT

//! IdP adapter (C3): normalizes users/groups from one of three IdP variants
//! into the canonical shape C5 builds snapshots from.
//!
//! Modeled as a sum type over `IdpType` rather than a trait object
//! hierarchy (REDESIGN GUIDANCE): a single enum dispatches to one of three
//! modules, each a plain async function over a shared `reqwest::Client`.

pub mod entra;
pub mod keycloak;
pub mod zitadel;

use thiserror::Error;

use crate::config::AppConfig;

/// A user as the IdP reports it, before POSIX ID allocation (§3, minus IDs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
}

/// A group as the IdP reports it, before GID allocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawGroup {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub member_user_ids: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Non-2xx HTTP or a network failure — retried by the refresh scheduler.
    #[error("transient adapter failure: {0}")]
    Transient(String),
    /// 401/403 from the IdP — signals the token cache to evict and retry once.
    #[error("adapter authentication rejected")]
    Auth,
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.status().map(|s| s.as_u16()) == Some(401) || e.status().map(|s| s.as_u16()) == Some(403)
        {
            AdapterError::Auth
        } else {
            AdapterError::Transient(e.to_string())
        }
    }
}

/// Fetch `(users, groups)` from whichever IdP `config.idp_type` names.
pub async fn fetch_users_and_groups(
    config: &AppConfig,
    http: &reqwest::Client,
    token: &str,
) -> Result<(Vec<RawUser>, Vec<RawGroup>), AdapterError> {
    match config.idp_type {
        crate::config::IdpType::Keycloak => keycloak::fetch(config, http, token).await,
        crate::config::IdpType::Entra => entra::fetch(config, http, token).await,
        crate::config::IdpType::Zitadel => zitadel::fetch(config, http, token).await,
    }
}

pub(crate) fn status_to_error(status: reqwest::StatusCode) -> AdapterError {
    if status.as_u16() == 401 || status.as_u16() == 403 {
        AdapterError::Auth
    } else {
        AdapterError::Transient(format!("unexpected status {status}"))
    }
}

pub(crate) use status_to_error as http_status_error;
