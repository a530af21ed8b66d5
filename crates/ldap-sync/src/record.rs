//! Resolve-and-apply for one normalized record.
//!
//! Shared by the full passes, the single-user sync and (through the resolver
//! and profile merge) the SAML assertion consumer.

use chrono::Utc;
use tracing::{debug, warn};

use dirsync_core::db::repository::DirsyncRepository;
use dirsync_core::error::{DirsyncError, Result};
use dirsync_core::models::directory::{DirectoryRecord, GroupRecord};
use dirsync_core::models::group::{Group, GroupMapping};
use dirsync_core::models::member::Member;

use crate::groups::{current_groups, plan_memberships, target_groups};
use crate::resolve::{resolve_group, resolve_member, Resolved};

/// What applying one record did to the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Created { id: i64, name: String },
    Updated { id: i64, name: String },
    Unchanged { id: i64, name: String },
}

impl RecordOutcome {
    pub fn id(&self) -> i64 {
        match self {
            RecordOutcome::Created { id, .. }
            | RecordOutcome::Updated { id, .. }
            | RecordOutcome::Unchanged { id, .. } => *id,
        }
    }
}

/// Create or update the member for `record` and reconcile its groups.
pub async fn sync_member_record<R>(
    repo: &R,
    mappings: &[GroupMapping],
    record: &DirectoryRecord,
) -> Result<RecordOutcome>
where
    R: DirsyncRepository + ?Sized,
{
    let resolved = resolve_member(repo, &record.identifier).await?;
    check_email_collision(repo, &resolved, record).await?;

    let is_new = resolved.is_new();
    let mut member = resolved.into_inner();
    let changed = record.profile.apply_to(&mut member);

    let target = target_groups(&record.member_of, mappings);
    let current = current_groups(repo, member.id).await?;
    let membership = plan_memberships(&current, &target, mappings);

    let now = Utc::now();
    if is_new || changed {
        member.last_synced_at = Some(now);
    }
    if !is_new && changed {
        member.updated_at = now;
    }
    let id = if is_new || changed || !membership.is_empty() {
        repo.save_member_with_groups(&member, &membership.added, &membership.removed)
            .await?
    } else {
        existing_id(member.id, "member")?
    };
    if !membership.is_empty() {
        debug!(
            member_id = id,
            added = ?membership.added,
            removed = ?membership.removed,
            "group memberships reconciled"
        );
    }
    let fields_changed = changed || !membership.is_empty();

    let name = member_label(&member, record);
    Ok(match (is_new, fields_changed) {
        (true, _) => RecordOutcome::Created { id, name },
        (false, true) => RecordOutcome::Updated { id, name },
        (false, false) => RecordOutcome::Unchanged { id, name },
    })
}

/// Refuse to let a second directory principal take over a local member's email.
async fn check_email_collision<R>(
    repo: &R,
    resolved: &Resolved<Member>,
    record: &DirectoryRecord,
) -> Result<()>
where
    R: DirsyncRepository + ?Sized,
{
    let Some(email) = record.email.as_deref() else {
        return Ok(());
    };
    let Some(holder) = repo.find_member_by_email(email).await? else {
        return Ok(());
    };
    if holder.id == resolved.get().id {
        return Ok(());
    }
    let holder_id = holder.id.unwrap_or_default();
    match holder.guid {
        Some(other) if other != record.identifier => {
            warn!(
                identifier = %record.identifier,
                other = %other,
                member_id = holder_id,
                "identifier collision on email"
            );
            Err(DirsyncError::IdentifierCollision {
                identifier: record.identifier.to_string(),
                detail: format!(
                    "email {email} already belongs to member {holder_id} linked to {other}"
                ),
            })
        }
        Some(_) => Ok(()),
        None => Err(DirsyncError::LocalWriteConflict(format!(
            "email {email} belongs to unlinked member {holder_id}; run migrate-members to link it"
        ))),
    }
}

/// Create or update the local group for `record`.
pub async fn sync_group_record<R>(repo: &R, record: &GroupRecord) -> Result<RecordOutcome>
where
    R: DirsyncRepository + ?Sized,
{
    let resolved = resolve_group(repo, &record.identifier).await?;
    let is_new = resolved.is_new();
    let mut group = resolved.into_inner();
    let changed = apply_group_fields(&mut group, record);

    let now = Utc::now();
    let name = group.title.clone();
    if is_new {
        group.last_synced_at = Some(now);
        let id = repo.insert_group(&group).await?;
        return Ok(RecordOutcome::Created { id, name });
    }

    let id = existing_id(group.id, "group")?;
    if changed {
        group.last_synced_at = Some(now);
        group.updated_at = now;
        repo.update_group(&group).await?;
        Ok(RecordOutcome::Updated { id, name })
    } else {
        debug!(group_id = id, "group unchanged");
        Ok(RecordOutcome::Unchanged { id, name })
    }
}

fn apply_group_fields(group: &mut Group, record: &GroupRecord) -> bool {
    let mut changed = false;
    let title = record
        .name
        .clone()
        .or_else(|| record.account_name.clone())
        .unwrap_or_else(|| record.dn.clone());
    if group.title != title {
        group.title = title;
        changed = true;
    }
    changed |= replace_if_present(&mut group.description, &record.description);
    changed |= replace_if_present(&mut group.sam_account_name, &record.account_name);
    if group.dn.as_deref() != Some(record.dn.as_str()) {
        group.dn = Some(record.dn.clone());
        changed = true;
    }
    changed
}

fn replace_if_present(target: &mut Option<String>, incoming: &Option<String>) -> bool {
    match incoming {
        Some(v) if target.as_deref() != Some(v.as_str()) => {
            *target = Some(v.clone());
            true
        }
        _ => false,
    }
}

fn existing_id(id: Option<i64>, what: &str) -> Result<i64> {
    id.ok_or_else(|| DirsyncError::NotFound(format!("resolved {what} has no id")))
}

fn member_label(member: &Member, record: &DirectoryRecord) -> String {
    let name = member.name();
    if !name.is_empty() {
        return name;
    }
    record
        .common_name
        .clone()
        .unwrap_or_else(|| record.identifier.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Normalizer;
    use crate::testing::{group_entry, guid, memory_repo, user_entry};
    use dirsync_core::config::LdapUsersConfig;
    use dirsync_core::db::repository::{
        GroupMappingRepository, GroupRepository, MemberRepository, MembershipRepository,
    };
    use dirsync_core::models::group::MappingScope;

    fn normalize(entry: dirsync_core::models::directory::RawEntry) -> DirectoryRecord {
        Normalizer::new(&LdapUsersConfig::default())
            .user(&entry)
            .unwrap()
    }

    #[tokio::test]
    async fn creates_joe_bloggs() {
        let repo = memory_repo().await;
        let record = normalize(user_entry(1, "Joe Bloggs", "jbloggs"));
        let outcome = sync_member_record(&repo, &[], &record).await.unwrap();
        let RecordOutcome::Created { id, .. } = outcome else {
            panic!("expected create, got {outcome:?}");
        };
        let m = repo.get_member(id).await.unwrap().unwrap();
        assert_eq!(m.guid, Some(guid(1)));
        assert_eq!(m.username.as_deref(), Some("jbloggs"));
        assert_eq!(m.display_name.as_deref(), Some("Joe Bloggs"));
        assert!(m.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn second_apply_is_unchanged() {
        let repo = memory_repo().await;
        let record = normalize(user_entry(1, "Joe Bloggs", "jbloggs").with("mail", "joe@bloggs.com"));
        sync_member_record(&repo, &[], &record).await.unwrap();
        let outcome = sync_member_record(&repo, &[], &record).await.unwrap();
        assert!(matches!(outcome, RecordOutcome::Unchanged { .. }));
    }

    #[tokio::test]
    async fn changed_field_is_updated_and_absent_field_kept() {
        let repo = memory_repo().await;
        let first = normalize(
            user_entry(1, "Joe Bloggs", "jbloggs")
                .with("mail", "joe@bloggs.com")
                .with("department", "Sales"),
        );
        let id = sync_member_record(&repo, &[], &first).await.unwrap().id();

        let second = normalize(user_entry(1, "Joe Bloggs", "jbloggs").with("mail", "joseph@bloggs.com"));
        let outcome = sync_member_record(&repo, &[], &second).await.unwrap();
        assert!(matches!(outcome, RecordOutcome::Updated { .. }));

        let m = repo.get_member(id).await.unwrap().unwrap();
        assert_eq!(m.email.as_deref(), Some("joseph@bloggs.com"));
        assert_eq!(m.department.as_deref(), Some("Sales"));
    }

    #[tokio::test]
    async fn membership_change_alone_counts_as_update() {
        let repo = memory_repo().await;
        let mut staff = Group::shell(guid(90));
        staff.title = "Staff".into();
        let group_id = repo.insert_group(&staff).await.unwrap();
        repo.insert_group_mapping(&GroupMapping {
            id: None,
            group_id,
            dn: "OU=Groups,DC=example,DC=com".into(),
            scope: MappingScope::Subtree,
        })
        .await
        .unwrap();
        let mappings = repo.list_group_mappings().await.unwrap();

        let plain = normalize(user_entry(1, "Joe", "joe"));
        let id = sync_member_record(&repo, &mappings, &plain).await.unwrap().id();

        let mut entry = user_entry(1, "Joe", "joe");
        entry.set_text("memberof", ["CN=Staff,OU=Groups,DC=example,DC=com"]);
        let outcome = sync_member_record(&repo, &mappings, &normalize(entry))
            .await
            .unwrap();
        assert!(matches!(outcome, RecordOutcome::Updated { .. }));
        assert_eq!(
            repo.list_group_ids_for_member(id).await.unwrap(),
            vec![group_id]
        );

        let outcome = sync_member_record(&repo, &mappings, &plain).await.unwrap();
        assert!(matches!(outcome, RecordOutcome::Updated { .. }));
        assert!(repo.list_group_ids_for_member(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_membership_write_leaves_no_member_behind() {
        let repo = memory_repo().await;
        let mappings = vec![GroupMapping {
            id: None,
            group_id: 9999,
            dn: "OU=Groups,DC=example,DC=com".into(),
            scope: MappingScope::Subtree,
        }];
        let mut entry = user_entry(1, "Joe", "joe");
        entry.set_text("memberof", ["CN=Staff,OU=Groups,DC=example,DC=com"]);

        let err = sync_member_record(&repo, &mappings, &normalize(entry))
            .await
            .unwrap_err();
        assert!(matches!(err, DirsyncError::Database(_)));
        assert_eq!(repo.count_members().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_membership_write_keeps_previous_profile() {
        let repo = memory_repo().await;
        let first = normalize(user_entry(1, "Joe", "joe").with("department", "Sales"));
        let id = sync_member_record(&repo, &[], &first).await.unwrap().id();

        let mappings = vec![GroupMapping {
            id: None,
            group_id: 9999,
            dn: "OU=Groups,DC=example,DC=com".into(),
            scope: MappingScope::Subtree,
        }];
        let mut entry = user_entry(1, "Joe", "joe").with("department", "Support");
        entry.set_text("memberof", ["CN=Staff,OU=Groups,DC=example,DC=com"]);
        assert!(sync_member_record(&repo, &mappings, &normalize(entry))
            .await
            .is_err());

        let m = repo.get_member(id).await.unwrap().unwrap();
        assert_eq!(m.department.as_deref(), Some("Sales"));
    }

    #[tokio::test]
    async fn email_held_by_other_identifier_is_collision() {
        let repo = memory_repo().await;
        let first = normalize(user_entry(1, "Joe Bloggs", "jbloggs").with("mail", "joe@bloggs.com"));
        let id = sync_member_record(&repo, &[], &first).await.unwrap().id();
        let before = repo.get_member(id).await.unwrap().unwrap();

        let intruder = normalize(user_entry(2, "Impostor", "imp").with("mail", "joe@bloggs.com"));
        let err = sync_member_record(&repo, &[], &intruder).await.unwrap_err();
        assert!(matches!(err, DirsyncError::IdentifierCollision { .. }));

        let after = repo.get_member(id).await.unwrap().unwrap();
        assert_eq!(after, before);
        assert!(repo.find_members_by_guid(&guid(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn email_held_by_unlinked_member_is_write_conflict() {
        let repo = memory_repo().await;
        let mut local = Member::shell(guid(9));
        local.guid = None;
        local.email = Some("joe@bloggs.com".into());
        repo.insert_member(&local).await.unwrap();

        let record = normalize(user_entry(1, "Joe Bloggs", "jbloggs").with("mail", "joe@bloggs.com"));
        let err = sync_member_record(&repo, &[], &record).await.unwrap_err();
        assert!(matches!(err, DirsyncError::LocalWriteConflict(_)));
        assert!(err.is_record_level());
    }

    #[tokio::test]
    async fn group_record_create_then_unchanged_then_update() {
        let repo = memory_repo().await;
        let norm = Normalizer::new(&LdapUsersConfig::default());
        let record = norm.group(&group_entry(40, "Staff")).unwrap();

        let created = sync_group_record(&repo, &record).await.unwrap();
        assert!(matches!(created, RecordOutcome::Created { .. }));
        let g = repo.get_group(created.id()).await.unwrap().unwrap();
        assert_eq!(g.title, "Staff");
        assert_eq!(g.sam_account_name.as_deref(), Some("staff"));

        let again = sync_group_record(&repo, &record).await.unwrap();
        assert!(matches!(again, RecordOutcome::Unchanged { .. }));

        let renamed = norm
            .group(&group_entry(40, "Staff").with("description", "Everyone"))
            .unwrap();
        let updated = sync_group_record(&repo, &renamed).await.unwrap();
        assert!(matches!(updated, RecordOutcome::Updated { .. }));
    }
}
