// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Search executor (C9): turns a decoded `SearchRequest` plus one held
//! snapshot reference into an ordered stream of `SearchResultEntry` and a
//! closing `SearchResultDone`.

use std::time::Instant;

use crate::ber::filter::Filter;
use crate::ber::message::{LdapResult, ResultCode, SearchRequest, SearchResultEntry, SearchScope};
use crate::config::AppConfig;
use crate::dn;
use crate::entry::{self, Entry};
use crate::filter_eval;
use crate::model::Snapshot;

pub struct SearchOutcome {
    pub entries: Vec<SearchResultEntry>,
    pub done: LdapResult,
}

/// Enumerate, filter, project, and limit in one pass over a single held
/// `Snapshot` reference — the snapshot never changes mid-response even if
/// the scheduler swaps a new one in concurrently.
pub fn execute(snapshot: &Snapshot, config: &AppConfig, req: &SearchRequest) -> SearchOutcome {
    let suffix = &config.ldap_base_dn;
    let started = Instant::now();
    let time_limit = if req.time_limit > 0 {
        std::time::Duration::from_secs(req.time_limit as u64)
    } else {
        config.ldap_time_limit()
    };
    let size_limit = effective_size_limit(config.ldap_size_limit, req.size_limit);

    if req.base_object.is_empty() && req.scope == SearchScope::BaseObject {
        let root = Entry::root_dse();
        let attrs = entry::project(root.attributes(snapshot, suffix), &req.attributes, req.types_only);
        return SearchOutcome {
            entries: vec![SearchResultEntry {
                object_name: String::new(),
                attributes: attrs,
            }],
            done: LdapResult::success(),
        };
    }

    if !dn::is_within_suffix(&req.base_object, suffix) {
        return SearchOutcome {
            entries: Vec::new(),
            done: LdapResult::success(),
        };
    }

    let candidates = candidate_entries(snapshot, suffix, &req.base_object, req.scope);

    let mut entries = Vec::new();
    let mut result_code = ResultCode::Success;
    for candidate in candidates {
        if started.elapsed() > time_limit {
            result_code = ResultCode::TimeLimitExceeded;
            break;
        }
        let all_attrs = candidate.attributes(snapshot, suffix);
        if !filter_eval::evaluate(&req.filter, &all_attrs, snapshot) {
            continue;
        }
        if entries.len() >= size_limit {
            result_code = ResultCode::SizeLimitExceeded;
            break;
        }
        let projected = entry::project(all_attrs, &req.attributes, req.types_only);
        entries.push(SearchResultEntry {
            object_name: candidate.dn.clone(),
            attributes: projected,
        });
    }

    SearchOutcome {
        entries,
        done: LdapResult::code(result_code),
    }
}

fn effective_size_limit(server_limit: usize, client_limit: i64) -> usize {
    if client_limit > 0 {
        (client_limit as usize).min(server_limit)
    } else {
        server_limit
    }
}

/// Build the ordered candidate list for one scope/base combination: OUs
/// (and the domain root, when in scope) first, then users ascending by
/// `uid`, then groups ascending by `cn` — the ordering §4.9 makes
/// observable to clients.
fn candidate_entries<'a>(
    snapshot: &'a Snapshot,
    suffix: &str,
    base: &str,
    scope: SearchScope,
) -> Vec<Entry<'a>> {
    let domain = Entry::domain(suffix);
    let users_ou = Entry::users_ou(suffix);
    let groups_ou = Entry::groups_ou(suffix);

    match scope {
        SearchScope::BaseObject => single_entry_at(snapshot, suffix, base)
            .into_iter()
            .collect(),
        SearchScope::SingleLevel => {
            if dn::dn_eq(base, suffix) {
                vec![users_ou, groups_ou]
            } else if dn::dn_eq(base, &dn::users_ou_dn(suffix)) {
                sorted_users(snapshot, suffix)
            } else if dn::dn_eq(base, &dn::groups_ou_dn(suffix)) {
                sorted_groups(snapshot, suffix)
            } else {
                Vec::new()
            }
        }
        SearchScope::WholeSubtree => {
            if dn::dn_eq(base, suffix) {
                let mut all = vec![domain, users_ou, groups_ou];
                all.extend(sorted_users(snapshot, suffix));
                all.extend(sorted_groups(snapshot, suffix));
                all
            } else if dn::dn_eq(base, &dn::users_ou_dn(suffix)) {
                let mut all = vec![users_ou];
                all.extend(sorted_users(snapshot, suffix));
                all
            } else if dn::dn_eq(base, &dn::groups_ou_dn(suffix)) {
                let mut all = vec![groups_ou];
                all.extend(sorted_groups(snapshot, suffix));
                all
            } else {
                single_entry_at(snapshot, suffix, base).into_iter().collect()
            }
        }
    }
}

fn single_entry_at<'a>(snapshot: &'a Snapshot, suffix: &str, base: &str) -> Option<Entry<'a>> {
    if dn::dn_eq(base, suffix) {
        return Some(Entry::domain(suffix));
    }
    if dn::dn_eq(base, &dn::users_ou_dn(suffix)) {
        return Some(Entry::users_ou(suffix));
    }
    if dn::dn_eq(base, &dn::groups_ou_dn(suffix)) {
        return Some(Entry::groups_ou(suffix));
    }
    if let Some(user) = snapshot
        .users
        .iter()
        .find(|u| dn::dn_eq(&dn::build_user_dn(&u.username, suffix), base))
    {
        return Some(Entry::for_user(user, suffix));
    }
    if let Some(group) = snapshot
        .groups
        .iter()
        .find(|g| dn::dn_eq(&dn::build_group_dn(&g.name, suffix), base))
    {
        return Some(Entry::for_group(group, suffix));
    }
    None
}

fn sorted_users<'a>(snapshot: &'a Snapshot, suffix: &str) -> Vec<Entry<'a>> {
    let mut users: Vec<&crate::model::User> = snapshot.users.iter().collect();
    users.sort_by(|a, b| a.username.cmp(&b.username));
    users.into_iter().map(|u| Entry::for_user(u, suffix)).collect()
}

fn sorted_groups<'a>(snapshot: &'a Snapshot, suffix: &str) -> Vec<Entry<'a>> {
    let mut groups: Vec<&crate::model::Group> = snapshot.groups.iter().collect();
    groups.sort_by(|a, b| a.name.cmp(&b.name));
    groups.into_iter().map(|g| Entry::for_group(g, suffix)).collect()
}
