// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Microsoft Entra ID adapter: `GET {base}/v1.0/users`, `GET {base}/v1.0/groups`
//! against Microsoft Graph.

use serde::Deserialize;

use crate::config::AppConfig;

use super::{http_status_error, AdapterError, RawGroup, RawUser};

#[derive(Debug, Deserialize)]
struct GraphUser {
    id: String,
    #[serde(rename = "userPrincipalName")]
    user_principal_name: String,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(rename = "givenName", default)]
    given_name: Option<String>,
    #[serde(default)]
    surname: Option<String>,
    #[serde(default)]
    mail: Option<String>,
    #[serde(rename = "accountEnabled", default)]
    account_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct GraphGroup {
    id: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    value: Vec<T>,
}

fn graph_base(config: &AppConfig) -> String {
    config.idp_base_url.trim_end_matches('/').to_string()
}

pub async fn fetch(
    config: &AppConfig,
    http: &reqwest::Client,
    token: &str,
) -> Result<(Vec<RawUser>, Vec<RawGroup>), AdapterError> {
    let base = graph_base(config);

    let users_resp = http
        .get(format!("{base}/v1.0/users"))
        .bearer_auth(token)
        .header("Accept", "application/json")
        .send()
        .await?;
    if !users_resp.status().is_success() {
        return Err(http_status_error(users_resp.status()));
    }
    let graph_users: GraphList<GraphUser> = users_resp.json().await?;

    let groups_resp = http
        .get(format!("{base}/v1.0/groups"))
        .bearer_auth(token)
        .header("Accept", "application/json")
        .send()
        .await?;
    if !groups_resp.status().is_success() {
        return Err(http_status_error(groups_resp.status()));
    }
    let graph_groups: GraphList<GraphGroup> = groups_resp.json().await?;

    let users: Vec<RawUser> = graph_users
        .value
        .into_iter()
        .filter(|u| u.account_enabled)
        .map(|u| {
            let display_name = u.display_name.clone().unwrap_or_else(|| {
                match (&u.given_name, &u.surname) {
                    (Some(g), Some(s)) => format!("{g} {s}"),
                    (Some(g), None) => g.clone(),
                    (None, Some(s)) => s.clone(),
                    (None, None) => u.user_principal_name.clone(),
                }
            });
            RawUser {
                id: u.id,
                username: u.user_principal_name,
                display_name,
                email: u.mail,
            }
        })
        .collect();

    let groups: Vec<RawGroup> = graph_groups
        .value
        .into_iter()
        .map(|g| RawGroup {
            id: g.id,
            name: g.display_name,
            description: None,
            member_user_ids: Vec::new(),
        })
        .collect();

    Ok((users, groups))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_base_trims_trailing_slash() {
        let mut c = AppConfig::default();
        c.idp_base_url = "https://graph.microsoft.com/".into();
        assert_eq!(graph_base(&c), "https://graph.microsoft.com");
    }
}
