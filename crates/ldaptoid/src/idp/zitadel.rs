// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Zitadel v2 adapter: `POST {base}/v2/users` with a query body, optionally
//! scoped to an organization. Group sourcing is empty in this phase (§4.3).

use serde::Deserialize;
use serde_json::json;

use crate::config::AppConfig;

use super::{http_status_error, AdapterError, RawGroup, RawUser};

const ACTIVE_STATE: &str = "USER_STATE_ACTIVE";
const PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
struct ZitadelUser {
    #[serde(rename = "userId")]
    user_id: String,
    state: String,
    #[serde(rename = "preferredLoginName", default)]
    preferred_login_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(rename = "loginNames", default)]
    login_names: Vec<String>,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZitadelUserList {
    result: Vec<ZitadelUser>,
}

fn resolve_username(u: &ZitadelUser) -> String {
    u.preferred_login_name
        .clone()
        .or_else(|| u.username.clone())
        .or_else(|| u.login_names.first().cloned())
        .unwrap_or_else(|| u.user_id.clone())
}

pub async fn fetch(
    config: &AppConfig,
    http: &reqwest::Client,
    token: &str,
) -> Result<(Vec<RawUser>, Vec<RawGroup>), AdapterError> {
    let base = config.idp_base_url.trim_end_matches('/');
    let mut queries = Vec::new();
    if let Some(org) = &config.idp_organization {
        queries.push(json!({ "organizationIdQuery": { "organizationId": org } }));
    }
    let body = json!({
        "query": { "limit": PAGE_LIMIT, "asc": true },
        "queries": queries,
    });

    let resp = http
        .post(format!("{base}/v2/users"))
        .bearer_auth(token)
        .header("Accept", "application/json")
        .json(&body)
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(http_status_error(resp.status()));
    }
    let list: ZitadelUserList = resp.json().await?;

    let users: Vec<RawUser> = list
        .result
        .into_iter()
        .filter(|u| u.state == ACTIVE_STATE)
        .map(|u| {
            let username = resolve_username(&u);
            let display_name = u.display_name.clone().unwrap_or_else(|| username.clone());
            RawUser {
                id: u.user_id,
                username,
                display_name,
                email: u.email,
            }
        })
        .collect();

    Ok((users, Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_prefers_preferred_login_name() {
        let u = ZitadelUser {
            user_id: "1".into(),
            state: ACTIVE_STATE.into(),
            preferred_login_name: Some("alice@example.com".into()),
            username: Some("alice".into()),
            login_names: vec!["alice@other.com".into()],
            display_name: None,
            email: None,
        };
        assert_eq!(resolve_username(&u), "alice@example.com");
    }

    #[test]
    fn username_falls_back_through_chain() {
        let u = ZitadelUser {
            user_id: "1".into(),
            state: ACTIVE_STATE.into(),
            preferred_login_name: None,
            username: None,
            login_names: vec!["login1".into()],
            display_name: None,
            email: None,
        };
        assert_eq!(resolve_username(&u), "login1");
    }
}
