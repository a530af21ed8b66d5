//! TOML-based configuration system for dirsync.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DirsyncError, Result};
use crate::models::member::MemberField;

/// Shortest permitted interval between self-rescheduled member passes.
pub const MIN_REGENERATE_SECS: u64 = 900;

/// Top-level dirsync configuration, deserialized from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirsyncConfig {
    pub dirsync: DirsyncSection,
    #[serde(default)]
    pub ldap: LdapConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub saml: SamlConfig,
}

/// Core instance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirsyncSection {
    pub instance_name: String,
    /// Public root URL of the application; the origin redirects must stay on.
    pub base_url: String,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "/var/lib/dirsync/dirsync.db".into()
}

/// Directory (LDAP / Active Directory) settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LdapConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub connection: LdapConnectionConfig,
    #[serde(default)]
    pub users: LdapUsersConfig,
    #[serde(default)]
    pub groups: LdapGroupsConfig,
    #[serde(default)]
    pub auth: LdapAuthConfig,
}

/// Password login checked by binding to the directory as the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapAuthConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Accept an email address in place of the login name.
    #[serde(default = "default_true")]
    pub allow_email_login: bool,
    /// Try the local authenticator when the directory has no such user.
    #[serde(default)]
    pub fallback_authenticator: bool,
}

impl Default for LdapAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_email_login: true,
            fallback_authenticator: false,
        }
    }
}

/// How to reach and bind to the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConnectionConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub bind_dn: String,
    #[serde(default)]
    pub bind_password: String,
    #[serde(default)]
    pub base_dn: String,
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LdapConnectionConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            bind_dn: String::new(),
            bind_password: String::new(),
            base_dn: String::new(),
            tls_verify: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

/// User enumeration and the attribute-to-field table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapUsersConfig {
    /// Search base for users; falls back to the connection base DN.
    #[serde(default)]
    pub search_base: Option<String>,
    #[serde(default = "default_user_filter")]
    pub filter: String,
    #[serde(default = "default_identifier_attribute")]
    pub identifier_attribute: String,
    /// Directory attribute (lower-case) to member field.
    #[serde(default = "default_field_mappings")]
    pub field_mappings: BTreeMap<String, MemberField>,
}

impl Default for LdapUsersConfig {
    fn default() -> Self {
        Self {
            search_base: None,
            filter: default_user_filter(),
            identifier_attribute: default_identifier_attribute(),
            field_mappings: default_field_mappings(),
        }
    }
}

fn default_user_filter() -> String {
    "(&(objectClass=user)(objectCategory=person))".into()
}

fn default_identifier_attribute() -> String {
    "objectguid".into()
}

fn default_field_mappings() -> BTreeMap<String, MemberField> {
    BTreeMap::from([
        ("givenname".to_string(), MemberField::FirstName),
        ("sn".to_string(), MemberField::Surname),
        ("mail".to_string(), MemberField::Email),
        ("displayname".to_string(), MemberField::DisplayName),
        ("title".to_string(), MemberField::Title),
        ("department".to_string(), MemberField::Department),
        ("company".to_string(), MemberField::Company),
        ("telephonenumber".to_string(), MemberField::Phone),
    ])
}

/// Group enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapGroupsConfig {
    #[serde(default)]
    pub search_base: Option<String>,
    #[serde(default = "default_group_filter")]
    pub filter: String,
}

impl Default for LdapGroupsConfig {
    fn default() -> Self {
        Self {
            search_base: None,
            filter: default_group_filter(),
        }
    }
}

fn default_group_filter() -> String {
    "(objectClass=group)".into()
}

/// Sync pass behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Delete local members absent from a complete enumeration.
    #[serde(default)]
    pub destructive_members: bool,
    /// Delete local groups absent from a complete enumeration.
    #[serde(default)]
    pub destructive_groups: bool,
    /// Re-run the member pass this many seconds after each run.
    #[serde(default)]
    pub regenerate_time_secs: Option<u64>,
    /// How long a pass's scope lease lives. A lease left behind by a crashed
    /// process can be taken over once it is this old.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            destructive_members: false,
            destructive_groups: false,
            regenerate_time_secs: None,
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

fn default_lock_ttl_secs() -> u64 {
    4 * 60 * 60
}

/// SAML service-provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamlConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub entity_id: String,
    /// Assertion consumer URL advertised in metadata; derived from the base URL when unset.
    #[serde(default)]
    pub acs_url: Option<String>,
    /// Where to land after login when no usable return URL was supplied.
    #[serde(default)]
    pub default_login_dest: Option<String>,
    #[serde(default = "default_given_name_claim")]
    pub given_name_claim: String,
    #[serde(default = "default_surname_claim")]
    pub surname_claim: String,
    #[serde(default = "default_email_claim")]
    pub email_claim: String,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_minutes: u32,
    /// Accept posted responses without checking their XML signature. Only
    /// for deployments where a trusted proxy has already validated them.
    #[serde(default)]
    pub allow_unsigned_assertions: bool,
}

impl Default for SamlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            entity_id: String::new(),
            acs_url: None,
            default_login_dest: None,
            given_name_claim: default_given_name_claim(),
            surname_claim: default_surname_claim(),
            email_claim: default_email_claim(),
            session_timeout_minutes: default_session_timeout(),
            allow_unsigned_assertions: false,
        }
    }
}

fn default_given_name_claim() -> String {
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname".into()
}

fn default_surname_claim() -> String {
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname".into()
}

fn default_email_claim() -> String {
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress".into()
}

fn default_session_timeout() -> u32 {
    480
}

impl LdapConfig {
    pub fn user_search_base(&self) -> &str {
        self.users
            .search_base
            .as_deref()
            .unwrap_or(&self.connection.base_dn)
    }

    pub fn group_search_base(&self) -> &str {
        self.groups
            .search_base
            .as_deref()
            .unwrap_or(&self.connection.base_dn)
    }

    /// Attributes requested for every user lookup.
    pub fn user_attributes(&self) -> Vec<String> {
        let mut attrs: BTreeSet<String> = [
            self.users.identifier_attribute.clone(),
            "cn".into(),
            "samaccountname".into(),
            "useraccountcontrol".into(),
            "memberof".into(),
        ]
        .into_iter()
        .collect();
        attrs.extend(self.users.field_mappings.keys().cloned());
        attrs.into_iter().collect()
    }

    /// Attributes requested for group enumeration.
    pub fn group_attributes(&self) -> Vec<String> {
        vec![
            self.users.identifier_attribute.clone(),
            "cn".into(),
            "samaccountname".into(),
            "name".into(),
            "description".into(),
        ]
    }
}

impl DirsyncConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DirsyncError::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Validate the configuration, returning an error for invalid combinations.
    pub fn validate(&self) -> Result<()> {
        if self.dirsync.instance_name.is_empty() {
            return Err(DirsyncError::Config(
                "dirsync.instance_name must not be empty".into(),
            ));
        }

        if self.dirsync.database.path.is_empty() {
            return Err(DirsyncError::Config(
                "dirsync.database.path must not be empty".into(),
            ));
        }

        url::Url::parse(&self.dirsync.base_url).map_err(|e| {
            DirsyncError::Config(format!(
                "dirsync.base_url is not a valid URL ({}): {e}",
                self.dirsync.base_url
            ))
        })?;

        self.validate_regenerate_time()?;

        if self.sync.lock_ttl_secs == 0 || i64::try_from(self.sync.lock_ttl_secs).is_err() {
            return Err(DirsyncError::Config(format!(
                "sync.lock_ttl_secs must be a positive number of seconds, got {}",
                self.sync.lock_ttl_secs
            )));
        }

        if self.ldap.enabled {
            if self.ldap.connection.server.is_empty() {
                return Err(DirsyncError::Config(
                    "ldap.connection.server is required when LDAP is enabled".into(),
                ));
            }
            if self.ldap.connection.base_dn.is_empty() {
                return Err(DirsyncError::Config(
                    "ldap.connection.base_dn is required when LDAP is enabled".into(),
                ));
            }
        }

        if self.ldap.auth.enabled && !self.ldap.enabled {
            return Err(DirsyncError::Config(
                "ldap.auth.enabled requires ldap.enabled".into(),
            ));
        }

        self.validate_field_mappings()?;

        if self.saml.enabled && self.saml.entity_id.is_empty() {
            return Err(DirsyncError::Config(
                "saml.entity_id is required when SAML is enabled".into(),
            ));
        }

        Ok(())
    }

    /// Reject a re-run interval below the safety floor.
    pub fn validate_regenerate_time(&self) -> Result<()> {
        match self.sync.regenerate_time_secs {
            Some(secs) if secs < MIN_REGENERATE_SECS => Err(DirsyncError::Config(format!(
                "sync.regenerate_time_secs must be {MIN_REGENERATE_SECS} seconds (15 minutes) or greater, got {secs}"
            ))),
            _ => Ok(()),
        }
    }

    fn validate_field_mappings(&self) -> Result<()> {
        let identifier = &self.ldap.users.identifier_attribute;
        if identifier.is_empty() {
            return Err(DirsyncError::Config(
                "ldap.users.identifier_attribute must not be empty".into(),
            ));
        }
        if *identifier != identifier.to_ascii_lowercase() {
            return Err(DirsyncError::Config(format!(
                "ldap.users.identifier_attribute must be lower-case: {identifier}"
            )));
        }

        let mut seen: BTreeMap<MemberField, &str> = BTreeMap::new();
        for (attr, field) in &self.ldap.users.field_mappings {
            if attr.is_empty() {
                return Err(DirsyncError::Config(
                    "ldap.users.field_mappings contains an empty attribute name".into(),
                ));
            }
            if *attr != attr.to_ascii_lowercase() {
                return Err(DirsyncError::Config(format!(
                    "ldap.users.field_mappings attribute must be lower-case: {attr}"
                )));
            }
            if attr == identifier {
                return Err(DirsyncError::Config(format!(
                    "ldap.users.field_mappings must not map the identifier attribute {attr}"
                )));
            }
            if let Some(other) = seen.insert(*field, attr) {
                return Err(DirsyncError::Config(format!(
                    "ldap.users.field_mappings maps both {other} and {attr} to {field:?}"
                )));
            }
        }
        Ok(())
    }

    /// Generate a sensible default configuration.
    pub fn generate_default() -> Self {
        Self {
            dirsync: DirsyncSection {
                instance_name: "My Site".into(),
                base_url: "https://www.example.com/".into(),
                database: DatabaseConfig::default(),
            },
            ldap: LdapConfig::default(),
            sync: SyncConfig::default(),
            saml: SamlConfig::default(),
        }
    }
}
