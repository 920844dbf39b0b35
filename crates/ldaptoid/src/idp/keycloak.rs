// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Keycloak adapter: `GET {base}/users`, `GET {base}/groups` against the
//! realm-scoped Admin REST API.

use serde::Deserialize;

use crate::config::AppConfig;

use super::{http_status_error, AdapterError, RawGroup, RawUser};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeycloakUser {
    id: String,
    username: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct KeycloakGroup {
    id: String,
    name: String,
}

fn admin_realm_base(config: &AppConfig) -> String {
    let realm = config.idp_realm.as_deref().unwrap_or_default();
    format!(
        "{}/admin/realms/{}",
        config.idp_base_url.trim_end_matches('/'),
        realm
    )
}

pub async fn fetch(
    config: &AppConfig,
    http: &reqwest::Client,
    token: &str,
) -> Result<(Vec<RawUser>, Vec<RawGroup>), AdapterError> {
    let base = admin_realm_base(config);

    let users_resp = http
        .get(format!("{base}/users"))
        .bearer_auth(token)
        .header("Accept", "application/json")
        .send()
        .await?;
    if !users_resp.status().is_success() {
        return Err(http_status_error(users_resp.status()));
    }
    let kc_users: Vec<KeycloakUser> = users_resp.json().await?;

    let groups_resp = http
        .get(format!("{base}/groups"))
        .bearer_auth(token)
        .header("Accept", "application/json")
        .send()
        .await?;
    if !groups_resp.status().is_success() {
        return Err(http_status_error(groups_resp.status()));
    }
    let kc_groups: Vec<KeycloakGroup> = groups_resp.json().await?;

    let users: Vec<RawUser> = kc_users
        .into_iter()
        .filter(|u| u.enabled)
        .map(|u| {
            let display_name = match (&u.first_name, &u.last_name) {
                (Some(f), Some(l)) => format!("{f} {l}"),
                (Some(f), None) => f.clone(),
                (None, Some(l)) => l.clone(),
                (None, None) => u.username.clone(),
            };
            RawUser {
                id: u.id,
                username: u.username,
                display_name,
                email: u.email,
            }
        })
        .collect();

    // Per-group membership requires a separate call per group; this core
    // does not make it (§4.3 table note), so member_user_ids stays empty.
    let groups: Vec<RawGroup> = kc_groups
        .into_iter()
        .map(|g| RawGroup {
            id: g.id,
            name: g.name,
            description: None,
            member_user_ids: Vec::new(),
        })
        .collect();

    Ok((users, groups))
}
