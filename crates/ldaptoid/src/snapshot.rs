// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Snapshot builder (C5): assembles an immutable [`Snapshot`] from adapter
//! output and the ID allocators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::config::{AppConfig, FeatureFlag};
use crate::idp::{RawGroup, RawUser};
use crate::ids::IdAllocator;
use crate::model::{Group, GroupFlavor, Snapshot, User, DEFAULT_PRIMARY_GROUP_ID};

pub struct SnapshotBuilder<'a> {
    pub uid_allocator: &'a IdAllocator,
    pub gid_allocator: &'a IdAllocator,
    pub config: &'a AppConfig,
    pub group_truncated_total: &'a AtomicU64,
    sequence: &'a AtomicU64,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(
        uid_allocator: &'a IdAllocator,
        gid_allocator: &'a IdAllocator,
        config: &'a AppConfig,
        group_truncated_total: &'a AtomicU64,
        sequence: &'a AtomicU64,
    ) -> Self {
        Self {
            uid_allocator,
            gid_allocator,
            config,
            group_truncated_total,
            sequence,
        }
    }

    pub fn build(&self, raw_users: Vec<RawUser>, raw_groups: Vec<RawGroup>) -> Snapshot {
        // Step 1: drop inactive users happens upstream in the adapter
        // (§4.3's "Inactive users are filtered out during adapter output").
        let mut users: Vec<User> = raw_users
            .into_iter()
            .map(|u| {
                let uid = self.uid_allocator.allocate(&format!("user:{}", u.id));
                User {
                    id: u.id,
                    username: u.username,
                    display_name: u.display_name,
                    email: u.email,
                    active: true,
                    uid_number: uid.id,
                    primary_group_id: DEFAULT_PRIMARY_GROUP_ID.to_string(),
                    member_group_ids: Vec::new(),
                }
            })
            .collect();
        let mut users_by_id: HashMap<String, usize> =
            users.iter().enumerate().map(|(i, u)| (u.id.clone(), i)).collect();

        // Step 2: real groups, clipping oversized membership lists.
        let mut groups: Vec<Group> = raw_groups
            .into_iter()
            .map(|g| {
                let gid = self.gid_allocator.allocate(&format!("group:{}", g.id));
                let mut member_user_ids = g.member_user_ids;
                let truncated = member_user_ids.len() > self.config.max_group_members;
                if truncated {
                    member_user_ids.truncate(self.config.max_group_members);
                    self.group_truncated_total.fetch_add(1, Ordering::Relaxed);
                }
                Group {
                    id: g.id,
                    name: g.name,
                    description: g.description,
                    member_user_ids,
                    member_group_ids: Vec::new(),
                    gid_number: gid.id,
                    flavor: GroupFlavor::Real,
                    truncated,
                }
            })
            .collect();

        for group in &groups {
            for uid in &group.member_user_ids {
                if let Some(&idx) = users_by_id.get(uid) {
                    users[idx].member_group_ids.push(group.id.clone());
                }
            }
        }

        // Step 3: synthetic primary groups.
        if self.config.has_feature(FeatureFlag::SyntheticPrimaryGroup) {
            let mut synthetic = Vec::with_capacity(users.len());
            for user in &mut users {
                let synthetic_id = format!("synthetic:{}", user.id);
                let gid = self.gid_allocator.allocate(&synthetic_id);
                synthetic.push(Group {
                    id: synthetic_id.clone(),
                    name: format!("{}-primary", user.username),
                    description: None,
                    member_user_ids: vec![user.id.clone()],
                    member_group_ids: Vec::new(),
                    gid_number: gid.id,
                    flavor: GroupFlavor::SyntheticPrimary,
                    truncated: false,
                });
                user.primary_group_id = synthetic_id;
            }
            groups.extend(synthetic);
            // Re-index: synthetic groups were appended after `users_by_id`
            // was built, but nothing above needs it again in this branch.
        }

        // Step 4: mirror (group-of-groups) synthesis.
        if self.config.has_feature(FeatureFlag::MirrorNestedGroups) {
            let real_groups: Vec<(String, String, Vec<String>)> = groups
                .iter()
                .filter(|g| matches!(g.flavor, GroupFlavor::Real))
                .map(|g| (g.id.clone(), g.name.clone(), g.member_user_ids.clone()))
                .collect();
            users_by_id = users.iter().enumerate().map(|(i, u)| (u.id.clone(), i)).collect();
            let synthetic_primary_of: HashMap<String, String> = users
                .iter()
                .filter(|u| u.primary_group_id.starts_with("synthetic:"))
                .map(|u| (u.id.clone(), u.primary_group_id.clone()))
                .collect();
            for (gid_key, gname, members) in real_groups {
                if members.len() < self.config.mirror_min_members {
                    continue;
                }
                let mirror_members: Vec<String> = members
                    .iter()
                    .filter_map(|uid| synthetic_primary_of.get(uid).cloned())
                    .collect();
                let mirror_id = format!("mirror:{gid_key}");
                let gid = self.gid_allocator.allocate(&mirror_id);
                groups.push(Group {
                    id: mirror_id,
                    name: format!("{gname}-mirror"),
                    description: None,
                    member_user_ids: Vec::new(),
                    member_group_ids: mirror_members,
                    gid_number: gid.id,
                    flavor: GroupFlavor::Mirror,
                    truncated: false,
                });
            }
            let _ = users_by_id;
        }

        // Step 5: stable sort for byte-identical snapshots over identical input.
        users.sort_by(|a, b| a.username.cmp(&b.username));
        for group in &mut groups {
            group.member_user_ids.sort();
            group.member_group_ids.sort();
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Snapshot {
            users,
            groups,
            generated_at: SystemTime::now(),
            sequence,
            feature_flags: self.config.enabled_features.iter().copied().collect(),
        }
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
            max_group_members: 2,
            ..Default::default()
        }
    }

    fn user(id: &str, name: &str) -> RawUser {
        RawUser {
            id: id.into(),
            username: name.into(),
            display_name: name.into(),
            email: None,
        }
    }

    #[test]
    fn uid_numbers_are_unique_and_stable() {
        let cfg = config();
        let uid_alloc = IdAllocator::new("uid", 10000, None);
        let gid_alloc = IdAllocator::new("gid", 10000, None);
        let truncated = AtomicU64::new(0);
        let sequence = AtomicU64::new(0);
        let builder = SnapshotBuilder::new(&uid_alloc, &gid_alloc, &cfg, &truncated, &sequence);
        let snap1 = builder.build(vec![user("1", "alice"), user("2", "bob")], vec![]);
        let ids: Vec<i64> = snap1.users.iter().map(|u| u.uid_number).collect();
        assert_ne!(ids[0], ids[1]);

        let snap2 = builder.build(vec![user("1", "alice"), user("2", "bob")], vec![]);
        assert_eq!(
            snap1.users.iter().find(|u| u.id == "1").unwrap().uid_number,
            snap2.users.iter().find(|u| u.id == "1").unwrap().uid_number
        );
    }

    #[test]
    fn group_membership_truncated_when_over_limit() {
        let cfg = config();
        let uid_alloc = IdAllocator::new("uid", 10000, None);
        let gid_alloc = IdAllocator::new("gid", 10000, None);
        let truncated = AtomicU64::new(0);
        let sequence = AtomicU64::new(0);
        let builder = SnapshotBuilder::new(&uid_alloc, &gid_alloc, &cfg, &truncated, &sequence);
        let users = vec![user("1", "a"), user("2", "b"), user("3", "c")];
        let group = RawGroup {
            id: "g1".into(),
            name: "big".into(),
            description: None,
            member_user_ids: vec!["1".into(), "2".into(), "3".into()],
        };
        let snap = builder.build(users, vec![group]);
        let g = snap.group_by_id("g1").unwrap();
        assert!(g.truncated);
        assert_eq!(g.member_user_ids.len(), 2);
        assert_eq!(truncated.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn synthetic_primary_group_created_when_enabled() {
        let mut cfg = config();
        cfg.enabled_features.insert(FeatureFlag::SyntheticPrimaryGroup);
        let uid_alloc = IdAllocator::new("uid", 10000, None);
        let gid_alloc = IdAllocator::new("gid", 10000, None);
        let truncated = AtomicU64::new(0);
        let sequence = AtomicU64::new(0);
        let builder = SnapshotBuilder::new(&uid_alloc, &gid_alloc, &cfg, &truncated, &sequence);
        let snap = builder.build(vec![user("1", "alice")], vec![]);
        let synthetic_groups: Vec<_> = snap
            .groups
            .iter()
            .filter(|g| g.flavor == GroupFlavor::SyntheticPrimary)
            .collect();
        assert_eq!(synthetic_groups.len(), 1);
        assert_eq!(synthetic_groups[0].member_user_ids, vec!["1".to_string()]);
        assert_eq!(snap.users[0].primary_group_id, synthetic_groups[0].id);
    }

    #[test]
    fn sequence_strictly_increases() {
        let cfg = config();
        let uid_alloc = IdAllocator::new("uid", 10000, None);
        let gid_alloc = IdAllocator::new("gid", 10000, None);
        let truncated = AtomicU64::new(0);
        let sequence = AtomicU64::new(0);
        let builder = SnapshotBuilder::new(&uid_alloc, &gid_alloc, &cfg, &truncated, &sequence);
        let s1 = builder.build(vec![], vec![]);
        let s2 = builder.build(vec![], vec![]);
        assert!(s2.sequence > s1.sequence);
    }
}
