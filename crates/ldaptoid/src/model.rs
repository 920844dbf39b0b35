// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Canonical data model shared by the snapshot pipeline and the protocol
//! engine: `User`, `Group`, `Snapshot`, `MappingRecord`, `TokenEntry`.
//!
//! Everything here is a plain, immutable-after-construction value. A
//! `Snapshot` owns its `User`/`Group` vectors outright; nothing downstream
//! mutates them — the next refresh builds a whole new `Snapshot` instead.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::config::FeatureFlag;

/// Sentinel `primaryGroupId` used when `synthetic_primary_group` is off.
pub const DEFAULT_PRIMARY_GROUP_ID: &str = "users";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub active: bool,
    pub uid_number: i64,
    pub primary_group_id: String,
    pub member_group_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupFlavor {
    Real,
    SyntheticPrimary,
    Mirror,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub member_user_ids: Vec<String>,
    pub member_group_ids: Vec<String>,
    pub gid_number: i64,
    pub flavor: GroupFlavor,
    pub truncated: bool,
}

impl Group {
    pub fn is_synthetic(&self) -> bool {
        !matches!(self.flavor, GroupFlavor::Real)
    }
}

/// An immutable publication unit. Never mutated after `SnapshotBuilder::build`
/// returns; a new refresh produces a brand new instance.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub users: Vec<User>,
    pub groups: Vec<Group>,
    pub generated_at: SystemTime,
    pub sequence: u64,
    pub feature_flags: Vec<FeatureFlag>,
}

impl Snapshot {
    pub fn user_by_username(&self, username: &str) -> Option<&User> {
        self.users
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username))
    }

    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.groups
            .iter()
            .find(|g| g.name.eq_ignore_ascii_case(name))
    }

    pub fn group_by_id(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn user_by_id(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }
}

/// Persisted key -> id record in the mapping store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingRecord {
    pub key: String,
    pub id: i64,
    pub timestamp: u64,
}

/// A namespace for mapping-store keys, mirrored by `IdAllocator::namespace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdNamespace {
    User,
    Group,
    Synthetic,
}

impl IdNamespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Synthetic => "synthetic",
        }
    }
}

/// A cached OAuth2 access token, keyed externally by `TokenKey`.
#[derive(Debug, Clone)]
pub struct TokenEntry {
    pub token: String,
    pub expires_at: SystemTime,
    pub scope: Option<String>,
}

impl TokenEntry {
    /// Served only while `expires_at - now >= buffer`.
    pub fn is_valid(&self, buffer: std::time::Duration) -> bool {
        match self.expires_at.duration_since(SystemTime::now()) {
            Ok(remaining) => remaining >= buffer,
            Err(_) => false,
        }
    }
}

/// Cache key for a cached token: `(idpType, baseURL, clientId, scope-qualifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub idp_type: crate::config::IdpType,
    pub base_url: String,
    pub client_id: String,
    pub qualifier: String,
}
