//! Group membership reconciliation from `memberof` DNs and group mappings.

use std::collections::BTreeSet;

use dirsync_core::db::repository::MembershipRepository;
use dirsync_core::error::Result;
use dirsync_core::models::group::{GroupMapping, MappingScope};

/// Canonical comparison form of a DN: lower-case, no whitespace around
/// separators. Escaped separators (`\,`) stay inside their RDN.
pub fn normalize_dn(dn: &str) -> String {
    split_unescaped(dn, ',')
        .into_iter()
        .map(|rdn| {
            split_unescaped(rdn, '=')
                .into_iter()
                .map(|part| part.trim().to_lowercase())
                .collect::<Vec<_>>()
                .join("=")
        })
        .filter(|rdn| !rdn.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Whether a remote group DN falls under `mapping`.
///
/// `OneLevel` needs the same DN; `Subtree` also accepts any descendant.
pub fn mapping_matches(mapping: &GroupMapping, group_dn: &str) -> bool {
    let target = normalize_dn(&mapping.dn);
    let candidate = normalize_dn(group_dn);
    if target.is_empty() {
        return false;
    }
    match mapping.scope {
        MappingScope::OneLevel => candidate == target,
        MappingScope::Subtree => {
            candidate == target || candidate.ends_with(&format!(",{target}"))
        }
    }
}

/// Local group ids a user with these `memberof` DNs should belong to.
pub fn target_groups(member_of: &[String], mappings: &[GroupMapping]) -> BTreeSet<i64> {
    mappings
        .iter()
        .filter(|m| member_of.iter().any(|dn| mapping_matches(m, dn)))
        .map(|m| m.group_id)
        .collect()
}

/// Memberships added and removed by a reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipChange {
    pub added: Vec<i64>,
    pub removed: Vec<i64>,
}

impl MembershipChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Changes that bring `current` to exactly `target`.
///
/// Only groups that some mapping points at are managed here. Memberships in
/// groups with no mapping were granted locally and are never removed.
pub fn plan_memberships(
    current: &BTreeSet<i64>,
    target: &BTreeSet<i64>,
    mappings: &[GroupMapping],
) -> MembershipChange {
    let managed: BTreeSet<i64> = mappings.iter().map(|m| m.group_id).collect();
    MembershipChange {
        added: target.difference(current).copied().collect(),
        removed: current
            .difference(target)
            .filter(|id| managed.contains(id))
            .copied()
            .collect(),
    }
}

/// Current group ids of `member_id`, or none for a member not yet stored.
pub async fn current_groups<R>(repo: &R, member_id: Option<i64>) -> Result<BTreeSet<i64>>
where
    R: MembershipRepository + ?Sized,
{
    match member_id {
        Some(id) => Ok(repo
            .list_group_ids_for_member(id)
            .await?
            .into_iter()
            .collect()),
        None => Ok(BTreeSet::new()),
    }
}
