//! Local groups and the administrator-managed mappings onto directory groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifier::StableIdentifier;

/// A local group, optionally linked to a directory group by `guid`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: Option<i64>,
    pub guid: Option<StableIdentifier>,
    pub title: String,
    pub description: Option<String>,
    pub dn: Option<String>,
    pub sam_account_name: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    /// An unsaved group carrying only its identifier.
    pub fn shell(guid: StableIdentifier) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            guid: Some(guid),
            title: String::new(),
            description: None,
            dn: None,
            sam_account_name: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A local-only group that no directory object backs.
    pub fn local(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            guid: None,
            title: title.into(),
            description: None,
            dn: None,
            sam_account_name: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn exists(&self) -> bool {
        self.id.is_some()
    }
}

/// How far below the mapped DN directory group membership is honored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MappingScope {
    /// Users within this group and all nested groups within.
    #[default]
    Subtree,
    /// Only users within this group.
    OneLevel,
}

impl MappingScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingScope::Subtree => "Subtree",
            MappingScope::OneLevel => "OneLevel",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "OneLevel" => MappingScope::OneLevel,
            _ => MappingScope::Subtree,
        }
    }
}

/// Binds a directory group DN to a local group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMapping {
    pub id: Option<i64>,
    pub group_id: i64,
    pub dn: String,
    #[serde(default)]
    pub scope: MappingScope,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_defaults_to_subtree() {
        assert_eq!(MappingScope::default(), MappingScope::Subtree);
    }

    #[test]
    fn scope_string_round_trip() {
        for scope in [MappingScope::Subtree, MappingScope::OneLevel] {
            assert_eq!(MappingScope::parse(scope.as_str()), scope);
        }
        assert_eq!(MappingScope::parse("garbage"), MappingScope::Subtree);
    }

    #[test]
    fn mapping_without_scope_deserializes_as_subtree() {
        let m: GroupMapping =
            serde_json::from_str(r#"{"id":null,"group_id":3,"dn":"CN=Staff,DC=example,DC=com"}"#)
                .unwrap();
        assert_eq!(m.scope, MappingScope::Subtree);
        assert_eq!(m.group_id, 3);
    }

    #[test]
    fn local_group_has_no_identifier() {
        let g = Group::local("Administrators");
        assert!(g.guid.is_none());
        assert!(!g.exists());
        assert_eq!(g.title, "Administrators");
    }
}
