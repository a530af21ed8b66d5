//! Turns raw directory entries into typed records.

use std::collections::BTreeMap;

use dirsync_core::config::LdapUsersConfig;
use dirsync_core::error::{DirsyncError, Result};
use dirsync_core::models::directory::{AttributeValue, DirectoryRecord, GroupRecord, RawEntry};
use dirsync_core::models::identifier::{IdentifierError, StableIdentifier};
use dirsync_core::models::member::{MemberField, ProfilePatch};

/// `userAccountControl` bit set on disabled accounts.
pub const UAC_ACCOUNT_DISABLE: u32 = 0x2;

/// Applies the configured identifier attribute and field table.
#[derive(Debug, Clone)]
pub struct Normalizer {
    identifier_attribute: String,
    field_mappings: BTreeMap<String, MemberField>,
}

impl Normalizer {
    pub fn new(users: &LdapUsersConfig) -> Self {
        Self {
            identifier_attribute: users.identifier_attribute.to_ascii_lowercase(),
            field_mappings: users.field_mappings.clone(),
        }
    }

    pub fn identifier_attribute(&self) -> &str {
        &self.identifier_attribute
    }

    /// Decode and validate the entry's stable identifier.
    pub fn identifier(&self, entry: &RawEntry) -> Result<StableIdentifier> {
        let value = entry.get(&self.identifier_attribute).ok_or_else(|| {
            DirsyncError::MalformedIdentifier(format!(
                "{} has no {} attribute",
                entry.dn, self.identifier_attribute
            ))
        })?;
        decode_identifier(value).map_err(|e| {
            DirsyncError::MalformedIdentifier(format!(
                "{} on {}: {e}",
                self.identifier_attribute, entry.dn
            ))
        })
    }

    /// Normalize a user entry.
    pub fn user(&self, entry: &RawEntry) -> Result<DirectoryRecord> {
        let identifier = self.identifier(entry)?;

        let mut profile = ProfilePatch::default();
        for (attr, field) in &self.field_mappings {
            if let Some(value) = entry.first_text(attr) {
                profile.set(*field, value.trim());
            }
        }

        let common_name = non_empty(entry.first_text("cn"));
        let account_name = non_empty(entry.first_text("samaccountname"));
        profile.or_set(MemberField::DisplayName, common_name.as_deref());
        profile.or_set(MemberField::Username, account_name.as_deref());
        profile.account_enabled = account_enabled(entry);

        Ok(DirectoryRecord {
            identifier,
            dn: entry.dn.clone(),
            common_name,
            account_name,
            email: profile.email.clone(),
            member_of: entry.all_text("memberof"),
            profile,
        })
    }

    /// Normalize a group entry.
    pub fn group(&self, entry: &RawEntry) -> Result<GroupRecord> {
        let identifier = self.identifier(entry)?;
        Ok(GroupRecord {
            identifier,
            dn: entry.dn.clone(),
            name: non_empty(entry.first_text("name")).or_else(|| non_empty(entry.first_text("cn"))),
            account_name: non_empty(entry.first_text("samaccountname")),
            description: non_empty(entry.first_text("description")),
        })
    }
}

/// Decode an identifier attribute delivered as raw bytes.
///
/// Directory libraries hand back values that happen to be valid UTF-8 as
/// text, so a text value is checked as bytes too. Only the first value of a
/// multi-valued attribute is used.
pub fn decode_identifier(value: &AttributeValue) -> std::result::Result<StableIdentifier, IdentifierError> {
    match value {
        AttributeValue::Binary(values) => {
            let first = values.first().ok_or(IdentifierError::InvalidLength(0))?;
            StableIdentifier::from_wire_bytes(first)
        }
        AttributeValue::Text(values) => {
            let first = values.first().ok_or(IdentifierError::InvalidLength(0))?;
            StableIdentifier::from_wire_bytes(first.as_bytes())
        }
    }
}

/// Account state from `useraccountcontrol`. `None` when absent or unparseable.
pub fn account_enabled(entry: &RawEntry) -> Option<bool> {
    let uac: u32 = entry.first_text("useraccountcontrol")?.trim().parse().ok()?;
    Some(uac & UAC_ACCOUNT_DISABLE == 0)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
