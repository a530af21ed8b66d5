//! Local member (user) entity and the profile merge applied to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifier::StableIdentifier;

/// A local user account, linked to a directory principal by `guid`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    /// Surrogate key; `None` until the member is first persisted.
    pub id: Option<i64>,
    pub guid: Option<StableIdentifier>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub surname: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub title: Option<String>,
    pub department: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub account_enabled: bool,
    pub saml_session_index: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Member {
    /// An unsaved member carrying only its identifier.
    pub fn shell(guid: StableIdentifier) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            guid: Some(guid),
            username: None,
            first_name: None,
            surname: None,
            email: None,
            display_name: None,
            title: None,
            department: None,
            company: None,
            phone: None,
            account_enabled: true,
            saml_session_index: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn exists(&self) -> bool {
        self.id.is_some()
    }

    /// Best-effort human name for log lines.
    pub fn name(&self) -> String {
        match (&self.first_name, &self.surname) {
            (Some(f), Some(s)) => format!("{f} {s}"),
            (Some(f), None) => f.clone(),
            (None, Some(s)) => s.clone(),
            (None, None) => self
                .display_name
                .clone()
                .or_else(|| self.username.clone())
                .unwrap_or_default(),
        }
    }
}

/// Member fields a directory attribute can be mapped onto.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MemberField {
    Username,
    FirstName,
    Surname,
    Email,
    DisplayName,
    Title,
    Department,
    Company,
    Phone,
}

/// Optional profile values from one remote response.
///
/// `None` means "not present in this response" and never clears the stored
/// value; a partial directory response therefore cannot erase synced data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub surname: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub title: Option<String>,
    pub department: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub account_enabled: Option<bool>,
}

impl ProfilePatch {
    /// Set the value for a mapped field. Empty strings are treated as absent.
    pub fn set(&mut self, field: MemberField, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        let slot = match field {
            MemberField::Username => &mut self.username,
            MemberField::FirstName => &mut self.first_name,
            MemberField::Surname => &mut self.surname,
            MemberField::Email => &mut self.email,
            MemberField::DisplayName => &mut self.display_name,
            MemberField::Title => &mut self.title,
            MemberField::Department => &mut self.department,
            MemberField::Company => &mut self.company,
            MemberField::Phone => &mut self.phone,
        };
        *slot = Some(value);
    }

    /// Fill only the fields this patch does not already carry.
    pub fn or_set(&mut self, field: MemberField, value: Option<&str>) {
        let current = match field {
            MemberField::Username => &self.username,
            MemberField::FirstName => &self.first_name,
            MemberField::Surname => &self.surname,
            MemberField::Email => &self.email,
            MemberField::DisplayName => &self.display_name,
            MemberField::Title => &self.title,
            MemberField::Department => &self.department,
            MemberField::Company => &self.company,
            MemberField::Phone => &self.phone,
        };
        if current.is_none() {
            if let Some(v) = value {
                self.set(field, v);
            }
        }
    }

    /// Merge present values into `member`. Returns whether anything changed.
    pub fn apply_to(&self, member: &mut Member) -> bool {
        let mut changed = false;
        changed |= merge(&mut member.username, &self.username);
        changed |= merge(&mut member.first_name, &self.first_name);
        changed |= merge(&mut member.surname, &self.surname);
        changed |= merge(&mut member.email, &self.email);
        changed |= merge(&mut member.display_name, &self.display_name);
        changed |= merge(&mut member.title, &self.title);
        changed |= merge(&mut member.department, &self.department);
        changed |= merge(&mut member.company, &self.company);
        changed |= merge(&mut member.phone, &self.phone);
        if let Some(enabled) = self.account_enabled {
            if member.account_enabled != enabled {
                member.account_enabled = enabled;
                changed = true;
            }
        }
        changed
    }
}

fn merge(target: &mut Option<String>, incoming: &Option<String>) -> bool {
    match incoming {
        Some(value) if target.as_deref() != Some(value.as_str()) => {
            *target = Some(value.clone());
            true
        }
        _ => false,
    }
}
