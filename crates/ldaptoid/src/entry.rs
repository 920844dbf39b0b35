// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed per-entry-kind attribute records and the symmetric `project`
//! function used by both search output and filter evaluation.
//!
//! Replaces a runtime-typed `HashMap<String, Value>` attribute bag: each
//! entry kind exposes exactly the attributes named in the filter-evaluator
//! table, computed once into an ordered `(name, values)` list that both
//! the search executor and the filter evaluator read.

use crate::model::{Group, Snapshot, User, DEFAULT_PRIMARY_GROUP_ID};

/// Conventional fallback GID when a user's primary group is the sentinel
/// `"users"` (synthetic_primary_group disabled and no matching real group).
const DEFAULT_PRIMARY_GID: i64 = 100;

pub enum EntryKind<'a> {
    RootDse,
    /// The configured suffix itself, e.g. `dc=example,dc=com`.
    Domain,
    Ou { name: &'static str, description: &'static str },
    User(&'a User),
    Group(&'a Group),
}

pub struct Entry<'a> {
    pub dn: String,
    pub kind: EntryKind<'a>,
}

impl<'a> Entry<'a> {
    pub fn root_dse() -> Entry<'static> {
        Entry {
            dn: String::new(),
            kind: EntryKind::RootDse,
        }
    }

    pub fn domain(suffix: &str) -> Entry<'static> {
        Entry {
            dn: suffix.to_string(),
            kind: EntryKind::Domain,
        }
    }

    pub fn users_ou(suffix: &str) -> Entry<'static> {
        Entry {
            dn: crate::dn::users_ou_dn(suffix),
            kind: EntryKind::Ou {
                name: "users",
                description: "POSIX user accounts",
            },
        }
    }

    pub fn groups_ou(suffix: &str) -> Entry<'static> {
        Entry {
            dn: crate::dn::groups_ou_dn(suffix),
            kind: EntryKind::Ou {
                name: "groups",
                description: "POSIX groups",
            },
        }
    }

    pub fn for_user(user: &'a User, suffix: &str) -> Self {
        Entry {
            dn: crate::dn::build_user_dn(&user.username, suffix),
            kind: EntryKind::User(user),
        }
    }

    pub fn for_group(group: &'a Group, suffix: &str) -> Self {
        Entry {
            dn: crate::dn::build_group_dn(&group.name, suffix),
            kind: EntryKind::Group(group),
        }
    }

    /// The full, ordered attribute set for this entry kind. `snapshot` is
    /// needed to resolve cross-references (a user's primary group GID, a
    /// group's member usernames).
    pub fn attributes(&self, snapshot: &Snapshot, suffix: &str) -> Vec<(String, Vec<String>)> {
        match &self.kind {
            EntryKind::RootDse => vec![
                ("objectClass".into(), vec!["top".into(), "rootDSE".into()]),
                ("namingContexts".into(), vec![suffix.to_string()]),
                ("supportedLDAPVersion".into(), vec!["3".into()]),
                (
                    "supportedControl".into(),
                    vec![crate::ber::controls::PAGED_RESULTS_OID.to_string()],
                ),
                ("vendorName".into(), vec!["ldaptoid".into()]),
                (
                    "vendorVersion".into(),
                    vec![env!("CARGO_PKG_VERSION").to_string()],
                ),
            ],
            EntryKind::Domain => {
                let dc = suffix
                    .split(',')
                    .next()
                    .and_then(|rdn| rdn.split_once('='))
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_default();
                vec![
                    ("objectClass".into(), vec!["top".into(), "domain".into()]),
                    ("dc".into(), vec![dc]),
                ]
            }
            EntryKind::Ou { name, description } => vec![
                (
                    "objectClass".into(),
                    vec!["top".into(), "organizationalUnit".into()],
                ),
                ("ou".into(), vec![(*name).to_string()]),
                ("description".into(), vec![(*description).to_string()]),
            ],
            EntryKind::User(user) => user_attributes(user, snapshot, suffix),
            EntryKind::Group(group) => group_attributes(group, snapshot, suffix),
        }
    }
}

fn split_display_name(display_name: &str, fallback: &str) -> (String, String) {
    if display_name.is_empty() {
        return (fallback.to_string(), fallback.to_string());
    }
    match display_name.split_once(' ') {
        Some((given, family)) => (given.to_string(), family.to_string()),
        None => (display_name.to_string(), display_name.to_string()),
    }
}

fn user_attributes(user: &User, snapshot: &Snapshot, suffix: &str) -> Vec<(String, Vec<String>)> {
    let (given_name, sn) = split_display_name(&user.display_name, &user.username);
    let cn = if user.display_name.is_empty() {
        user.username.clone()
    } else {
        user.display_name.clone()
    };
    let gid_number = if user.primary_group_id == DEFAULT_PRIMARY_GROUP_ID {
        DEFAULT_PRIMARY_GID
    } else {
        snapshot
            .group_by_id(&user.primary_group_id)
            .map(|g| g.gid_number)
            .unwrap_or(DEFAULT_PRIMARY_GID)
    };
    let member_of: Vec<String> = user
        .member_group_ids
        .iter()
        .filter_map(|gid| snapshot.group_by_id(gid))
        .map(|g| crate::dn::build_group_dn(&g.name, suffix))
        .collect();

    let mut attrs = vec![
        (
            "objectClass".into(),
            vec![
                "top".into(),
                "person".into(),
                "organizationalPerson".into(),
                "inetOrgPerson".into(),
                "posixAccount".into(),
            ],
        ),
        ("uid".into(), vec![user.username.clone()]),
        ("cn".into(), vec![cn]),
        ("sn".into(), vec![sn]),
        ("givenName".into(), vec![given_name]),
        ("displayName".into(), vec![user.display_name.clone()]),
        ("uidNumber".into(), vec![user.uid_number.to_string()]),
        ("gidNumber".into(), vec![gid_number.to_string()]),
        (
            "homeDirectory".into(),
            vec![format!("/home/{}", user.username)],
        ),
        ("loginShell".into(), vec!["/bin/bash".into()]),
    ];
    if let Some(email) = &user.email {
        attrs.push(("mail".into(), vec![email.clone()]));
    }
    attrs.push(("memberOf".into(), member_of));
    attrs
}

fn group_attributes(group: &Group, snapshot: &Snapshot, suffix: &str) -> Vec<(String, Vec<String>)> {
    let member_uids: Vec<String> = group
        .member_user_ids
        .iter()
        .filter_map(|uid| snapshot.user_by_id(uid))
        .map(|u| u.username.clone())
        .collect();
    let mut members: Vec<String> = group
        .member_user_ids
        .iter()
        .filter_map(|uid| snapshot.user_by_id(uid))
        .map(|u| crate::dn::build_user_dn(&u.username, suffix))
        .collect();
    members.extend(
        group
            .member_group_ids
            .iter()
            .filter_map(|gid| snapshot.group_by_id(gid))
            .map(|g| crate::dn::build_group_dn(&g.name, suffix)),
    );

    let mut attrs = vec![
        (
            "objectClass".into(),
            vec!["top".into(), "groupOfNames".into(), "posixGroup".into()],
        ),
        ("cn".into(), vec![group.name.clone()]),
        ("gidNumber".into(), vec![group.gid_number.to_string()]),
    ];
    if let Some(description) = &group.description {
        attrs.push(("description".into(), vec![description.clone()]));
    }
    attrs.push(("member".into(), members));
    attrs.push(("memberUid".into(), member_uids));
    attrs
}

/// Project a full attribute list down to the names the client requested.
/// Empty list or `*` selects everything; `typesOnly` zeroes the values.
pub fn project(
    all: Vec<(String, Vec<String>)>,
    attr_names: &[String],
    types_only: bool,
) -> Vec<(String, Vec<String>)> {
    let want_all = attr_names.is_empty() || attr_names.iter().any(|a| a == "*");
    let selected: Vec<(String, Vec<String>)> = if want_all {
        all
    } else {
        all.into_iter()
            .filter(|(name, _)| {
                attr_names
                    .iter()
                    .any(|requested| requested.eq_ignore_ascii_case(name))
            })
            .collect()
    };
    if types_only {
        selected.into_iter().map(|(n, _)| (n, Vec::new())).collect()
    } else {
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureFlag;
    use crate::model::GroupFlavor;
    use std::time::SystemTime;

    fn snapshot_with_alice() -> Snapshot {
        let user = User {
            id: "idp-1".into(),
            username: "alice".into(),
            display_name: "Alice Anderson".into(),
            email: Some("alice@example.com".into()),
            active: true,
            uid_number: 10042,
            primary_group_id: "users".into(),
            member_group_ids: vec![],
        };
        Snapshot {
            users: vec![user],
            groups: vec![],
            generated_at: SystemTime::now(),
            sequence: 1,
            feature_flags: vec![],
        }
    }

    #[test]
    fn user_attributes_include_posix_fields() {
        let snap = snapshot_with_alice();
        let entry = Entry::for_user(&snap.users[0], "dc=example,dc=com");
        let attrs = entry.attributes(&snap, "dc=example,dc=com");
        let uid = attrs.iter().find(|(n, _)| n == "uid").unwrap();
        assert_eq!(uid.1, vec!["alice".to_string()]);
        let gid = attrs.iter().find(|(n, _)| n == "gidNumber").unwrap();
        assert_eq!(gid.1, vec!["100".to_string()]);
    }

    #[test]
    fn project_wildcard_returns_everything() {
        let snap = snapshot_with_alice();
        let entry = Entry::for_user(&snap.users[0], "dc=example,dc=com");
        let all = entry.attributes(&snap, "dc=example,dc=com");
        let projected = project(all.clone(), &[], false);
        assert_eq!(projected.len(), all.len());
    }

    #[test]
    fn project_filters_by_name_case_insensitively() {
        let snap = snapshot_with_alice();
        let entry = Entry::for_user(&snap.users[0], "dc=example,dc=com");
        let all = entry.attributes(&snap, "dc=example,dc=com");
        let projected = project(all, &["UID".to_string()], false);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].0, "uid");
    }

    #[test]
    fn project_types_only_empties_values() {
        let snap = snapshot_with_alice();
        let entry = Entry::for_user(&snap.users[0], "dc=example,dc=com");
        let all = entry.attributes(&snap, "dc=example,dc=com");
        let projected = project(all, &["uid".to_string()], true);
        assert!(projected[0].1.is_empty());
    }

    #[test]
    fn group_attributes_expose_member_and_member_uid() {
        let user = User {
            id: "idp-1".into(),
            username: "alice".into(),
            display_name: "Alice".into(),
            email: None,
            active: true,
            uid_number: 10042,
            primary_group_id: "users".into(),
            member_group_ids: vec!["g1".into()],
        };
        let group = Group {
            id: "g1".into(),
            name: "admins".into(),
            description: Some("Admins".into()),
            member_user_ids: vec!["idp-1".into()],
            member_group_ids: vec![],
            gid_number: 20000,
            flavor: GroupFlavor::Real,
            truncated: false,
        };
        let snap = Snapshot {
            users: vec![user],
            groups: vec![group],
            generated_at: SystemTime::now(),
            sequence: 1,
            feature_flags: vec![FeatureFlag::SyntheticPrimaryGroup],
        };
        let entry = Entry::for_group(&snap.groups[0], "dc=example,dc=com");
        let attrs = entry.attributes(&snap, "dc=example,dc=com");
        let member_uid = attrs.iter().find(|(n, _)| n == "memberUid").unwrap();
        assert_eq!(member_uid.1, vec!["alice".to_string()]);
        let member = attrs.iter().find(|(n, _)| n == "member").unwrap();
        assert_eq!(member.1, vec!["uid=alice,ou=users,dc=example,dc=com".to_string()]);
    }
}
