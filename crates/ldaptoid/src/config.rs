// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process configuration: IdP connection, LDAP listener, scheduler tuning,
//! mapping store, and feature flags.
//!
//! Precedence (lowest to highest): built-in defaults, JSON config file,
//! environment variables, CLI flags. `clap`'s `env` feature handles the
//! file/env/CLI merge for everything except the nested `enabledFeatures`
//! set, which is parsed separately after the base config is assembled.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity provider variants this core speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IdpType {
    Keycloak,
    Entra,
    Zitadel,
}

impl std::fmt::Display for IdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keycloak => write!(f, "keycloak"),
            Self::Entra => write!(f, "entra"),
            Self::Zitadel => write!(f, "zitadel"),
        }
    }
}

/// Optional behaviors, off by default, enabled per `enabledFeatures`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFlag {
    SyntheticPrimaryGroup,
    MirrorNestedGroups,
}

impl FeatureFlag {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "synthetic_primary_group" => Some(Self::SyntheticPrimaryGroup),
            "mirror_nested_groups" => Some(Self::MirrorNestedGroups),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SyntheticPrimaryGroup => "synthetic_primary_group",
            Self::MirrorNestedGroups => "mirror_nested_groups",
        }
    }
}

/// Mapping store (persistence) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingStoreConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mapping_store_path")]
    pub path: String,
}

impl Default for MappingStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_mapping_store_path(),
        }
    }
}

fn default_mapping_store_path() -> String {
    "ldaptoid-mappings.sqlite3".to_string()
}

/// Fully assembled, validated application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub idp_type: IdpType,
    pub idp_base_url: String,
    pub idp_client_id: String,
    pub idp_client_secret: String,
    #[serde(default)]
    pub idp_realm: Option<String>,
    #[serde(default)]
    pub idp_tenant: Option<String>,
    #[serde(default)]
    pub idp_organization: Option<String>,

    #[serde(default = "default_ldap_port")]
    pub ldap_port: u16,
    #[serde(default = "default_bind_address")]
    pub ldap_bind_address: IpAddr,
    pub ldap_base_dn: String,
    #[serde(default)]
    pub ldap_bind_dn: Option<String>,
    #[serde(default)]
    pub ldap_bind_password: Option<String>,
    #[serde(default)]
    pub allow_anonymous_bind: bool,
    #[serde(default = "default_size_limit")]
    pub ldap_size_limit: usize,
    #[serde(default = "default_time_limit_secs")]
    pub ldap_time_limit_secs: u64,

    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub mapping_store: MappingStoreConfig,

    #[serde(default)]
    pub enabled_features: HashSet<FeatureFlag>,

    #[serde(default = "default_max_group_members")]
    pub max_group_members: usize,
    #[serde(default = "default_uid_floor")]
    pub uid_floor: i64,
    #[serde(default)]
    pub uid_ceiling: Option<i64>,
    #[serde(default = "default_uid_floor")]
    pub gid_floor: i64,
    #[serde(default)]
    pub gid_ceiling: Option<i64>,
    #[serde(default = "default_mirror_min_members")]
    pub mirror_min_members: usize,

    #[serde(default = "default_idp_timeout_secs")]
    pub idp_timeout_secs: u64,
    #[serde(default = "default_mapping_store_timeout_secs")]
    pub mapping_store_timeout_secs: u64,
}

fn default_ldap_port() -> u16 {
    389
}

fn default_bind_address() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_size_limit() -> usize {
    1000
}

fn default_time_limit_secs() -> u64 {
    30
}

fn default_refresh_interval_ms() -> u64 {
    300_000
}

fn default_max_backoff_ms() -> u64 {
    3_600_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    10
}

fn default_max_group_members() -> usize {
    5000
}

fn default_uid_floor() -> i64 {
    10000
}

fn default_mirror_min_members() -> usize {
    1
}

fn default_idp_timeout_secs() -> u64 {
    10
}

fn default_mapping_store_timeout_secs() -> u64 {
    3
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        serde_json::from_str(&content).map_err(ConfigError::Parse)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn ldap_time_limit(&self) -> Duration {
        Duration::from_secs(self.ldap_time_limit_secs)
    }

    pub fn idp_timeout(&self) -> Duration {
        Duration::from_secs(self.idp_timeout_secs)
    }

    pub fn mapping_store_timeout(&self) -> Duration {
        Duration::from_secs(self.mapping_store_timeout_secs)
    }

    pub fn has_feature(&self, flag: FeatureFlag) -> bool {
        self.enabled_features.contains(&flag)
    }

    /// Validate cross-field invariants that serde's field-level defaults
    /// can't express (required-together groups, numeric ranges).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idp_base_url.is_empty() {
            return Err(ConfigError::Invalid("idpBaseUrl must not be empty".into()));
        }
        if self.idp_client_id.is_empty() || self.idp_client_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "idpClientId and idpClientSecret are required".into(),
            ));
        }
        match self.idp_type {
            IdpType::Keycloak if self.idp_realm.is_none() => {
                return Err(ConfigError::Invalid(
                    "idpRealm is required for idpType=keycloak".into(),
                ));
            }
            IdpType::Entra if self.idp_tenant.is_none() => {
                return Err(ConfigError::Invalid(
                    "idpTenant is required for idpType=entra".into(),
                ));
            }
            _ => {}
        }
        if self.ldap_base_dn.trim().is_empty() {
            return Err(ConfigError::Invalid("ldapBaseDN must not be empty".into()));
        }
        if self.ldap_port == 0 {
            return Err(ConfigError::Invalid("ldapPort cannot be 0".into()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("maxRetries cannot be 0".into()));
        }
        if self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::Invalid(
                "backoffMultiplier must be greater than 1.0".into(),
            ));
        }
        if let (Some(bind_dn), None) = (&self.ldap_bind_dn, &self.ldap_bind_password) {
            return Err(ConfigError::Invalid(format!(
                "ldapBindPassword is required when ldapBindDN ({bind_dn}) is set"
            )));
        }
        Ok(())
    }
}

/// CLI surface. Mirrors `AppConfig`'s fields that make sense as flags;
/// secrets also accept the `LDAPTOID_*` environment variables via clap's
/// `env` attribute so they never need to appear in `ps` output.
#[derive(Parser, Debug)]
#[command(name = "ldaptoid")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON configuration file (overrides built-in defaults, overridden by flags/env)
    #[arg(short, long)]
    pub config: Option<std::path::PathBuf>,

    #[arg(long, value_enum, env = "LDAPTOID_IDP_TYPE")]
    pub idp_type: Option<IdpType>,
    #[arg(long, env = "LDAPTOID_IDP_BASE_URL")]
    pub idp_base_url: Option<String>,
    #[arg(long, env = "LDAPTOID_IDP_CLIENT_ID")]
    pub idp_client_id: Option<String>,
    #[arg(long, env = "LDAPTOID_IDP_CLIENT_SECRET")]
    pub idp_client_secret: Option<String>,
    #[arg(long, env = "LDAPTOID_IDP_REALM")]
    pub idp_realm: Option<String>,
    #[arg(long, env = "LDAPTOID_IDP_TENANT")]
    pub idp_tenant: Option<String>,
    #[arg(long, env = "LDAPTOID_IDP_ORGANIZATION")]
    pub idp_organization: Option<String>,

    #[arg(long, env = "LDAPTOID_LDAP_PORT")]
    pub ldap_port: Option<u16>,
    #[arg(long, env = "LDAPTOID_LDAP_BASE_DN")]
    pub ldap_base_dn: Option<String>,
    #[arg(long, env = "LDAPTOID_LDAP_BIND_DN")]
    pub ldap_bind_dn: Option<String>,
    #[arg(long, env = "LDAPTOID_LDAP_BIND_PASSWORD")]
    pub ldap_bind_password: Option<String>,
    #[arg(long)]
    pub allow_anonymous_bind: bool,

    #[arg(long, env = "LDAPTOID_MAPPING_STORE_PATH")]
    pub mapping_store_path: Option<String>,

    /// Comma-separated feature flags: synthetic_primary_group, mirror_nested_groups
    #[arg(long, value_delimiter = ',')]
    pub enabled_features: Vec<String>,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Merge CLI/env overrides onto a base config loaded from file/defaults.
    pub fn apply(&self, mut base: AppConfig) -> AppConfig {
        if let Some(v) = self.idp_type {
            base.idp_type = v;
        }
        if let Some(v) = &self.idp_base_url {
            base.idp_base_url = v.clone();
        }
        if let Some(v) = &self.idp_client_id {
            base.idp_client_id = v.clone();
        }
        if let Some(v) = &self.idp_client_secret {
            base.idp_client_secret = v.clone();
        }
        if let Some(v) = &self.idp_realm {
            base.idp_realm = Some(v.clone());
        }
        if let Some(v) = &self.idp_tenant {
            base.idp_tenant = Some(v.clone());
        }
        if let Some(v) = &self.idp_organization {
            base.idp_organization = Some(v.clone());
        }
        if let Some(v) = self.ldap_port {
            base.ldap_port = v;
        }
        if let Some(v) = &self.ldap_base_dn {
            base.ldap_base_dn = v.clone();
        }
        if let Some(v) = &self.ldap_bind_dn {
            base.ldap_bind_dn = Some(v.clone());
        }
        if let Some(v) = &self.ldap_bind_password {
            base.ldap_bind_password = Some(v.clone());
        }
        if self.allow_anonymous_bind {
            base.allow_anonymous_bind = true;
        }
        if let Some(v) = &self.mapping_store_path {
            base.mapping_store.path = v.clone();
        }
        if !self.enabled_features.is_empty() {
            base.enabled_features = self
                .enabled_features
                .iter()
                .filter_map(|s| FeatureFlag::parse(s.trim()))
                .collect();
        }
        base
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            idp_type: IdpType::Keycloak,
            idp_base_url: String::new(),
            idp_client_id: String::new(),
            idp_client_secret: String::new(),
            idp_realm: None,
            idp_tenant: None,
            idp_organization: None,
            ldap_port: default_ldap_port(),
            ldap_bind_address: default_bind_address(),
            ldap_base_dn: String::new(),
            ldap_bind_dn: None,
            ldap_bind_password: None,
            allow_anonymous_bind: false,
            ldap_size_limit: default_size_limit(),
            ldap_time_limit_secs: default_time_limit_secs(),
            refresh_interval_ms: default_refresh_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retries: default_max_retries(),
            mapping_store: MappingStoreConfig::default(),
            enabled_features: HashSet::new(),
            max_group_members: default_max_group_members(),
            uid_floor: default_uid_floor(),
            uid_ceiling: None,
            gid_floor: default_uid_floor(),
            gid_ceiling: None,
            mirror_min_members: default_mirror_min_members(),
            idp_timeout_secs: default_idp_timeout_secs(),
            mapping_store_timeout_secs: default_mapping_store_timeout_secs(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AppConfig {
        AppConfig {
            idp_base_url: "https://idp.example.com".into(),
            idp_client_id: "client".into(),
            idp_client_secret: "secret".into(),
            idp_realm: Some("main".into()),
            ldap_base_dn: "dc=example,dc=com".into(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn missing_realm_for_keycloak_fails() {
        let mut c = minimal();
        c.idp_realm = None;
        assert!(c.validate().is_err());
    }

    #[test]
    fn bind_dn_without_password_fails() {
        let mut c = minimal();
        c.ldap_bind_dn = Some("cn=svc,dc=example,dc=com".into());
        assert!(c.validate().is_err());
    }

    #[test]
    fn feature_flag_roundtrip() {
        assert_eq!(
            FeatureFlag::parse("synthetic_primary_group"),
            Some(FeatureFlag::SyntheticPrimaryGroup)
        );
        assert_eq!(FeatureFlag::parse("bogus"), None);
    }

    #[test]
    fn json_roundtrip() {
        let c = minimal();
        let json = serde_json::to_string(&c).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.idp_base_url, c.idp_base_url);
    }
}
