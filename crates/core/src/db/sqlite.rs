use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::{DirsyncError, Result};
use crate::models::{
    group::{Group, GroupMapping, MappingScope},
    identifier::StableIdentifier,
    member::Member,
    session::LoginSession,
    sync::{SyncKind, SyncLock, SyncRun, SyncRunStatus},
};

use super::repository::{
    DirsyncRepository, GroupMappingRepository, GroupRepository, LoginSessionRepository,
    MemberRepository, MembershipRepository, SyncLockRepository, SyncRunRepository,
};

#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl DirsyncRepository for SqliteRepository {}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn datetime_to_str(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_guid(s: Option<String>) -> Result<Option<StableIdentifier>> {
    s.map(|v| StableIdentifier::parse(&v).map_err(DirsyncError::from))
        .transpose()
}

/// Map a UNIQUE constraint violation to a record-level conflict.
fn write_error(err: sqlx::Error, what: &str) -> DirsyncError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            DirsyncError::LocalWriteConflict(format!("{what}: {}", db_err.message()))
        }
        _ => DirsyncError::Database(err),
    }
}

fn row_to_member(r: &SqliteRow) -> Result<Member> {
    let last_synced: Option<String> = r.get("last_synced_at");
    Ok(Member {
        id: Some(r.get("id")),
        guid: parse_guid(r.get("guid"))?,
        username: r.get("username"),
        first_name: r.get("first_name"),
        surname: r.get("surname"),
        email: r.get("email"),
        display_name: r.get("display_name"),
        title: r.get("title"),
        department: r.get("department"),
        company: r.get("company"),
        phone: r.get("phone"),
        account_enabled: r.get::<i32, _>("account_enabled") != 0,
        saml_session_index: r.get("saml_session_index"),
        last_synced_at: last_synced.map(|s| parse_datetime(&s)),
        created_at: parse_datetime(r.get("created_at")),
        updated_at: parse_datetime(r.get("updated_at")),
    })
}

fn row_to_group(r: &SqliteRow) -> Result<Group> {
    let last_synced: Option<String> = r.get("last_synced_at");
    Ok(Group {
        id: Some(r.get("id")),
        guid: parse_guid(r.get("guid"))?,
        title: r.get("title"),
        description: r.get("description"),
        dn: r.get("dn"),
        sam_account_name: r.get("sam_account_name"),
        last_synced_at: last_synced.map(|s| parse_datetime(&s)),
        created_at: parse_datetime(r.get("created_at")),
        updated_at: parse_datetime(r.get("updated_at")),
    })
}

fn row_to_identifier(r: &SqliteRow) -> Result<(i64, StableIdentifier)> {
    let guid: String = r.get("guid");
    Ok((r.get("id"), StableIdentifier::parse(&guid)?))
}

fn row_to_session(r: &SqliteRow) -> LoginSession {
    LoginSession {
        id: r.get("id"),
        member_id: r.get("member_id"),
        saml_session_index: r.get("saml_session_index"),
        created_at: parse_datetime(r.get("created_at")),
        expires_at: parse_datetime(r.get("expires_at")),
    }
}

fn row_to_sync_run(r: &SqliteRow) -> Result<SyncRun> {
    let kind: String = r.get("kind");
    let status: String = r.get("status");
    let completed: Option<String> = r.get("completed_at");
    Ok(SyncRun {
        id: r.get("id"),
        kind: SyncKind::parse(&kind)
            .ok_or_else(|| DirsyncError::Serialization(format!("unknown sync kind {kind}")))?,
        scope: r.get("scope"),
        status: SyncRunStatus::parse(&status).unwrap_or(SyncRunStatus::Running),
        started_at: parse_datetime(r.get("started_at")),
        completed_at: completed.map(|s| parse_datetime(&s)),
        created: r.get("created"),
        updated: r.get("updated"),
        unchanged: r.get("unchanged"),
        deleted: r.get("deleted"),
        failed: r.get("failed"),
        cleanup_ran: r.get::<i32, _>("cleanup_ran") != 0,
        error_details: r.get("error_details"),
    })
}

fn row_to_sync_lock(r: &SqliteRow) -> SyncLock {
    let expires: i64 = r.get("expires_at");
    SyncLock {
        scope: r.get("scope"),
        holder: r.get("holder"),
        acquired_at: parse_datetime(r.get("acquired_at")),
        expires_at: DateTime::from_timestamp(expires, 0).unwrap_or_default(),
    }
}

async fn insert_member_row(conn: &mut SqliteConnection, member: &Member) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO members (guid, username, first_name, surname, email, display_name, title, department, company, phone, account_enabled, saml_session_index, last_synced_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
    )
    .bind(member.guid.map(|g| g.to_string()))
    .bind(&member.username)
    .bind(&member.first_name)
    .bind(&member.surname)
    .bind(&member.email)
    .bind(&member.display_name)
    .bind(&member.title)
    .bind(&member.department)
    .bind(&member.company)
    .bind(&member.phone)
    .bind(member.account_enabled as i32)
    .bind(&member.saml_session_index)
    .bind(member.last_synced_at.as_ref().map(datetime_to_str))
    .bind(datetime_to_str(&member.created_at))
    .bind(datetime_to_str(&member.updated_at))
    .execute(&mut *conn)
    .await
    .map_err(|e| write_error(e, "insert member"))?;
    Ok(result.last_insert_rowid())
}

async fn update_member_row(conn: &mut SqliteConnection, member: &Member) -> Result<()> {
    let id = member
        .id
        .ok_or_else(|| DirsyncError::NotFound("cannot update an unsaved member".into()))?;
    let result = sqlx::query(
        "UPDATE members SET guid = ?2, username = ?3, first_name = ?4, surname = ?5, email = ?6, display_name = ?7, title = ?8, department = ?9, company = ?10, phone = ?11, account_enabled = ?12, saml_session_index = ?13, last_synced_at = ?14, updated_at = ?15
         WHERE id = ?1",
    )
    .bind(id)
    .bind(member.guid.map(|g| g.to_string()))
    .bind(&member.username)
    .bind(&member.first_name)
    .bind(&member.surname)
    .bind(&member.email)
    .bind(&member.display_name)
    .bind(&member.title)
    .bind(&member.department)
    .bind(&member.company)
    .bind(&member.phone)
    .bind(member.account_enabled as i32)
    .bind(&member.saml_session_index)
    .bind(member.last_synced_at.as_ref().map(datetime_to_str))
    .bind(datetime_to_str(&member.updated_at))
    .execute(&mut *conn)
    .await
    .map_err(|e| write_error(e, "update member"))?;
    if result.rows_affected() == 0 {
        return Err(DirsyncError::NotFound(format!("member {id}")));
    }
    Ok(())
}

#[async_trait]
impl MemberRepository for SqliteRepository {
    async fn find_members_by_guid(&self, guid: &StableIdentifier) -> Result<Vec<Member>> {
        let rows = sqlx::query("SELECT * FROM members WHERE guid = ?1")
            .bind(guid.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_member).collect()
    }

    async fn get_member(&self, id: i64) -> Result<Option<Member>> {
        let row = sqlx::query("SELECT * FROM members WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_member).transpose()
    }

    async fn find_member_by_email(&self, email: &str) -> Result<Option<Member>> {
        let row = sqlx::query("SELECT * FROM members WHERE email = ?1 COLLATE NOCASE LIMIT 1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_member).transpose()
    }

    async fn find_unlinked_member_by_email(&self, email: &str) -> Result<Option<Member>> {
        let row = sqlx::query(
            "SELECT * FROM members WHERE email = ?1 COLLATE NOCASE AND guid IS NULL LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_member).transpose()
    }

    async fn insert_member(&self, member: &Member) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        insert_member_row(&mut *conn, member).await
    }

    async fn update_member(&self, member: &Member) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        update_member_row(&mut *conn, member).await
    }

    async fn save_member_with_groups(
        &self,
        member: &Member,
        add_groups: &[i64],
        remove_groups: &[i64],
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = match member.id {
            Some(id) => {
                update_member_row(&mut *tx, member).await?;
                id
            }
            None => insert_member_row(&mut *tx, member).await?,
        };
        for group_id in add_groups {
            sqlx::query("INSERT OR IGNORE INTO group_members (member_id, group_id) VALUES (?1, ?2)")
                .bind(id)
                .bind(*group_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| write_error(e, "add membership"))?;
        }
        for group_id in remove_groups {
            sqlx::query("DELETE FROM group_members WHERE member_id = ?1 AND group_id = ?2")
                .bind(id)
                .bind(*group_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(id)
    }

    async fn delete_member(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM group_members WHERE member_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM login_sessions WHERE member_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM members WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_member_identifiers(&self) -> Result<Vec<(i64, StableIdentifier)>> {
        let rows = sqlx::query("SELECT id, guid FROM members WHERE guid IS NOT NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_identifier).collect()
    }

    async fn count_members(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM members")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

#[async_trait]
impl GroupRepository for SqliteRepository {
    async fn find_groups_by_guid(&self, guid: &StableIdentifier) -> Result<Vec<Group>> {
        let rows = sqlx::query("SELECT * FROM local_groups WHERE guid = ?1")
            .bind(guid.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_group).collect()
    }

    async fn get_group(&self, id: i64) -> Result<Option<Group>> {
        let row = sqlx::query("SELECT * FROM local_groups WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_group).transpose()
    }

    async fn insert_group(&self, group: &Group) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO local_groups (guid, title, description, dn, sam_account_name, last_synced_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(group.guid.map(|g| g.to_string()))
        .bind(&group.title)
        .bind(&group.description)
        .bind(&group.dn)
        .bind(&group.sam_account_name)
        .bind(group.last_synced_at.as_ref().map(datetime_to_str))
        .bind(datetime_to_str(&group.created_at))
        .bind(datetime_to_str(&group.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "insert group"))?;
        Ok(result.last_insert_rowid())
    }

    async fn update_group(&self, group: &Group) -> Result<()> {
        let id = group
            .id
            .ok_or_else(|| DirsyncError::NotFound("cannot update an unsaved group".into()))?;
        let result = sqlx::query(
            "UPDATE local_groups SET guid = ?2, title = ?3, description = ?4, dn = ?5, sam_account_name = ?6, last_synced_at = ?7, updated_at = ?8
             WHERE id = ?1",
        )
        .bind(id)
        .bind(group.guid.map(|g| g.to_string()))
        .bind(&group.title)
        .bind(&group.description)
        .bind(&group.dn)
        .bind(&group.sam_account_name)
        .bind(group.last_synced_at.as_ref().map(datetime_to_str))
        .bind(datetime_to_str(&group.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "update group"))?;
        if result.rows_affected() == 0 {
            return Err(DirsyncError::NotFound(format!("group {id}")));
        }
        Ok(())
    }

    async fn delete_group(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM group_mappings WHERE group_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM group_members WHERE group_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM local_groups WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_group_identifiers(&self) -> Result<Vec<(i64, StableIdentifier)>> {
        let rows =
            sqlx::query("SELECT id, guid FROM local_groups WHERE guid IS NOT NULL ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_identifier).collect()
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        let rows = sqlx::query("SELECT * FROM local_groups ORDER BY title")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_group).collect()
    }
}

#[async_trait]
impl GroupMappingRepository for SqliteRepository {
    async fn list_group_mappings(&self) -> Result<Vec<GroupMapping>> {
        let rows = sqlx::query("SELECT * FROM group_mappings ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| GroupMapping {
                id: Some(r.get("id")),
                group_id: r.get("group_id"),
                dn: r.get("dn"),
                scope: MappingScope::parse(r.get("scope")),
            })
            .collect())
    }

    async fn insert_group_mapping(&self, mapping: &GroupMapping) -> Result<i64> {
        let result =
            sqlx::query("INSERT INTO group_mappings (group_id, dn, scope) VALUES (?1, ?2, ?3)")
                .bind(mapping.group_id)
                .bind(&mapping.dn)
                .bind(mapping.scope.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| write_error(e, "insert group mapping"))?;
        Ok(result.last_insert_rowid())
    }

    async fn delete_group_mapping(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM group_mappings WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl MembershipRepository for SqliteRepository {
    async fn list_group_ids_for_member(&self, member_id: i64) -> Result<Vec<i64>> {
        let rows =
            sqlx::query("SELECT group_id FROM group_members WHERE member_id = ?1 ORDER BY group_id")
                .bind(member_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(|r| r.get("group_id")).collect())
    }

    async fn add_membership(&self, member_id: i64, group_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO group_members (member_id, group_id) VALUES (?1, ?2)")
            .bind(member_id)
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, "add membership"))?;
        Ok(())
    }

    async fn remove_membership(&self, member_id: i64, group_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM group_members WHERE member_id = ?1 AND group_id = ?2")
            .bind(member_id)
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl LoginSessionRepository for SqliteRepository {
    async fn create_login_session(&self, session: &LoginSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO login_sessions (id, member_id, saml_session_index, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&session.id)
        .bind(session.member_id)
        .bind(&session.saml_session_index)
        .bind(datetime_to_str(&session.created_at))
        .bind(datetime_to_str(&session.expires_at))
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "create login session"))?;
        Ok(())
    }

    async fn get_login_session(&self, id: &str) -> Result<Option<LoginSession>> {
        let row = sqlx::query("SELECT * FROM login_sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_session))
    }

    async fn delete_login_session(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM login_sessions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SyncRunRepository for SqliteRepository {
    async fn create_sync_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_runs (id, kind, scope, status, started_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&run.id)
        .bind(run.kind.as_str())
        .bind(&run.scope)
        .bind(run.status.as_str())
        .bind(datetime_to_str(&run.started_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_sync_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            "UPDATE sync_runs SET status = ?2, completed_at = ?3, created = ?4, updated = ?5, unchanged = ?6, deleted = ?7, failed = ?8, cleanup_ran = ?9, error_details = ?10 WHERE id = ?1",
        )
        .bind(&run.id)
        .bind(run.status.as_str())
        .bind(run.completed_at.as_ref().map(datetime_to_str))
        .bind(run.created)
        .bind(run.updated)
        .bind(run.unchanged)
        .bind(run.deleted)
        .bind(run.failed)
        .bind(run.cleanup_ran as i32)
        .bind(&run.error_details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_sync_run(&self, id: &str) -> Result<Option<SyncRun>> {
        let row = sqlx::query("SELECT * FROM sync_runs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_sync_run).transpose()
    }

    async fn get_latest_sync_run(&self, kind: SyncKind) -> Result<Option<SyncRun>> {
        let row = sqlx::query(
            "SELECT * FROM sync_runs WHERE kind = ?1 ORDER BY started_at DESC, rowid DESC LIMIT 1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_sync_run).transpose()
    }

    async fn list_sync_runs(&self, limit: i64) -> Result<Vec<SyncRun>> {
        let rows =
            sqlx::query("SELECT * FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_sync_run).collect()
    }
}

#[async_trait]
impl SyncLockRepository for SqliteRepository {
    async fn try_acquire_sync_lock(&self, lock: &SyncLock) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO sync_locks (scope, holder, acquired_at, expires_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(scope) DO UPDATE SET holder = excluded.holder, acquired_at = excluded.acquired_at, expires_at = excluded.expires_at
             WHERE sync_locks.expires_at <= ?5",
        )
        .bind(&lock.scope)
        .bind(&lock.holder)
        .bind(datetime_to_str(&lock.acquired_at))
        .bind(lock.expires_at.timestamp())
        .bind(lock.acquired_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_sync_lock(&self, scope: &str, holder: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_locks WHERE scope = ?1 AND holder = ?2")
            .bind(scope)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_sync_lock(&self, scope: &str) -> Result<Option<SyncLock>> {
        let row = sqlx::query("SELECT * FROM sync_locks WHERE scope = ?1")
            .bind(scope)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_sync_lock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabasePool;
    use crate::models::sync::{SyncEventKind, SyncOutcome};
    use chrono::Duration;

    async fn setup() -> SqliteRepository {
        DatabasePool::new_sqlite_memory()
            .await
            .unwrap()
            .into_repository()
    }

    fn guid(n: u8) -> StableIdentifier {
        let mut bytes = [0xA0u8; 16];
        bytes[15] = n;
        StableIdentifier::from_wire_bytes(&bytes).unwrap()
    }

    fn sample_member(n: u8) -> Member {
        let mut m = Member::shell(guid(n));
        m.username = Some(format!("user{n}"));
        m.first_name = Some("Joe".into());
        m.surname = Some("Bloggs".into());
        m.email = Some(format!("user{n}@example.com"));
        m
    }

    fn sample_group(n: u8) -> Group {
        let mut g = Group::shell(guid(100 + n));
        g.title = format!("Group {n}");
        g.dn = Some(format!("CN=Group {n},OU=Groups,DC=example,DC=com"));
        g
    }

    #[tokio::test]
    async fn member_insert_and_find_by_guid() {
        let repo = setup().await;
        let id = repo.insert_member(&sample_member(1)).await.unwrap();
        let found = repo.find_members_by_guid(&guid(1)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Some(id));
        assert_eq!(found[0].guid, Some(guid(1)));
        assert_eq!(found[0].username.as_deref(), Some("user1"));
        assert!(found[0].account_enabled);
        assert!(repo.find_members_by_guid(&guid(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn member_update_persists_fields() {
        let repo = setup().await;
        let id = repo.insert_member(&sample_member(1)).await.unwrap();
        let mut m = repo.get_member(id).await.unwrap().unwrap();
        m.department = Some("IT".into());
        m.account_enabled = false;
        repo.update_member(&m).await.unwrap();
        let back = repo.get_member(id).await.unwrap().unwrap();
        assert_eq!(back.department.as_deref(), Some("IT"));
        assert!(!back.account_enabled);
    }

    #[tokio::test]
    async fn update_unsaved_member_is_not_found() {
        let repo = setup().await;
        let err = repo.update_member(&sample_member(1)).await.unwrap_err();
        assert!(matches!(err, DirsyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_guid_is_write_conflict() {
        let repo = setup().await;
        repo.insert_member(&sample_member(1)).await.unwrap();
        let mut dup = sample_member(1);
        dup.email = Some("other@example.com".into());
        let err = repo.insert_member(&dup).await.unwrap_err();
        assert!(matches!(err, DirsyncError::LocalWriteConflict(_)));
        assert!(err.is_record_level());
    }

    #[tokio::test]
    async fn duplicate_email_is_write_conflict() {
        let repo = setup().await;
        repo.insert_member(&sample_member(1)).await.unwrap();
        let mut dup = sample_member(2);
        dup.email = Some("user1@example.com".into());
        let err = repo.insert_member(&dup).await.unwrap_err();
        assert!(matches!(err, DirsyncError::LocalWriteConflict(_)));
    }

    #[tokio::test]
    async fn email_lookup_ignores_case() {
        let repo = setup().await;
        repo.insert_member(&sample_member(1)).await.unwrap();
        let m = repo.find_member_by_email("USER1@example.com").await.unwrap();
        assert!(m.is_some());
    }

    #[tokio::test]
    async fn unlinked_lookup_skips_members_with_guid() {
        let repo = setup().await;
        repo.insert_member(&sample_member(1)).await.unwrap();
        let mut local = sample_member(2);
        local.guid = None;
        repo.insert_member(&local).await.unwrap();

        assert!(repo
            .find_unlinked_member_by_email("user1@example.com")
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .find_unlinked_member_by_email("user2@example.com")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn list_member_identifiers_skips_unlinked() {
        let repo = setup().await;
        repo.insert_member(&sample_member(1)).await.unwrap();
        let mut local = sample_member(2);
        local.guid = None;
        repo.insert_member(&local).await.unwrap();
        let ids = repo.list_member_identifiers().await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].1, guid(1));
        assert_eq!(repo.count_members().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_member_cascades_memberships_and_sessions() {
        let repo = setup().await;
        let member_id = repo.insert_member(&sample_member(1)).await.unwrap();
        let group_id = repo.insert_group(&sample_group(1)).await.unwrap();
        repo.add_membership(member_id, group_id).await.unwrap();
        let session = LoginSession::new(member_id, None, Duration::minutes(5));
        repo.create_login_session(&session).await.unwrap();

        assert!(repo.delete_member(member_id).await.unwrap());
        assert!(repo.get_member(member_id).await.unwrap().is_none());
        assert!(repo
            .list_group_ids_for_member(member_id)
            .await
            .unwrap()
            .is_empty());
        assert!(repo.get_login_session(&session.id).await.unwrap().is_none());
        assert!(!repo.delete_member(member_id).await.unwrap());
    }

    #[tokio::test]
    async fn group_crud() {
        let repo = setup().await;
        let id = repo.insert_group(&sample_group(1)).await.unwrap();
        let mut g = repo.get_group(id).await.unwrap().unwrap();
        assert_eq!(g.title, "Group 1");
        g.description = Some("All staff".into());
        repo.update_group(&g).await.unwrap();

        let found = repo.find_groups_by_guid(&guid(101)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].description.as_deref(), Some("All staff"));

        repo.insert_group(&Group::local("Local only")).await.unwrap();
        assert_eq!(repo.list_groups().await.unwrap().len(), 2);
        assert_eq!(repo.list_group_identifiers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_group_cascades_mappings_and_memberships() {
        let repo = setup().await;
        let member_id = repo.insert_member(&sample_member(1)).await.unwrap();
        let group_id = repo.insert_group(&sample_group(1)).await.unwrap();
        repo.insert_group_mapping(&GroupMapping {
            id: None,
            group_id,
            dn: "CN=Staff,DC=example,DC=com".into(),
            scope: MappingScope::OneLevel,
        })
        .await
        .unwrap();
        repo.add_membership(member_id, group_id).await.unwrap();

        assert!(repo.delete_group(group_id).await.unwrap());
        assert!(repo.list_group_mappings().await.unwrap().is_empty());
        assert!(repo
            .list_group_ids_for_member(member_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn mapping_scope_is_persisted() {
        let repo = setup().await;
        let group_id = repo.insert_group(&sample_group(1)).await.unwrap();
        let id = repo
            .insert_group_mapping(&GroupMapping {
                id: None,
                group_id,
                dn: "OU=Staff,DC=example,DC=com".into(),
                scope: MappingScope::OneLevel,
            })
            .await
            .unwrap();
        let mappings = repo.list_group_mappings().await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].id, Some(id));
        assert_eq!(mappings[0].scope, MappingScope::OneLevel);
        assert!(repo.delete_group_mapping(id).await.unwrap());
    }

    #[tokio::test]
    async fn membership_add_is_idempotent() {
        let repo = setup().await;
        let member_id = repo.insert_member(&sample_member(1)).await.unwrap();
        let g1 = repo.insert_group(&sample_group(1)).await.unwrap();
        let g2 = repo.insert_group(&sample_group(2)).await.unwrap();
        repo.add_membership(member_id, g1).await.unwrap();
        repo.add_membership(member_id, g1).await.unwrap();
        repo.add_membership(member_id, g2).await.unwrap();
        assert_eq!(
            repo.list_group_ids_for_member(member_id).await.unwrap(),
            vec![g1, g2]
        );
        assert!(repo.remove_membership(member_id, g1).await.unwrap());
        assert!(!repo.remove_membership(member_id, g1).await.unwrap());
        assert_eq!(
            repo.list_group_ids_for_member(member_id).await.unwrap(),
            vec![g2]
        );
    }

    #[tokio::test]
    async fn login_session_round_trip() {
        let repo = setup().await;
        let member_id = repo.insert_member(&sample_member(1)).await.unwrap();
        let session = LoginSession::new(member_id, Some("_sidx".into()), Duration::minutes(30));
        repo.create_login_session(&session).await.unwrap();
        let back = repo.get_login_session(&session.id).await.unwrap().unwrap();
        assert_eq!(back.member_id, member_id);
        assert_eq!(back.saml_session_index.as_deref(), Some("_sidx"));
        assert!(repo.delete_login_session(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn sync_run_lifecycle() {
        let repo = setup().await;
        let mut run = SyncRun::start(SyncKind::Members, "members:dc=example,dc=com");
        repo.create_sync_run(&run).await.unwrap();

        let mut outcome = SyncOutcome::new(SyncKind::Members);
        outcome.record(SyncEventKind::Created, None, "created");
        outcome.record(SyncEventKind::Failed, None, "bad identifier");
        run.complete(&outcome);
        repo.update_sync_run(&run).await.unwrap();

        let back = repo.get_sync_run(&run.id).await.unwrap().unwrap();
        assert_eq!(back.status, SyncRunStatus::Completed);
        assert_eq!(back.created, 1);
        assert_eq!(back.failed, 1);
        assert_eq!(back.error_details.as_deref(), Some("bad identifier"));

        let latest = repo
            .get_latest_sync_run(SyncKind::Members)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, run.id);
        assert!(repo
            .get_latest_sync_run(SyncKind::Groups)
            .await
            .unwrap()
            .is_none());
        assert_eq!(repo.list_sync_runs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_member_with_groups_inserts_and_reconciles() {
        let repo = setup().await;
        let g1 = repo.insert_group(&sample_group(1)).await.unwrap();
        let g2 = repo.insert_group(&sample_group(2)).await.unwrap();

        let id = repo
            .save_member_with_groups(&sample_member(1), &[g1], &[])
            .await
            .unwrap();
        assert_eq!(repo.list_group_ids_for_member(id).await.unwrap(), vec![g1]);

        let mut m = repo.get_member(id).await.unwrap().unwrap();
        m.title = Some("Manager".into());
        let same = repo.save_member_with_groups(&m, &[g2], &[g1]).await.unwrap();
        assert_eq!(same, id);
        assert_eq!(repo.list_group_ids_for_member(id).await.unwrap(), vec![g2]);
        assert_eq!(
            repo.get_member(id).await.unwrap().unwrap().title.as_deref(),
            Some("Manager")
        );
    }

    #[tokio::test]
    async fn failed_membership_write_rolls_back_new_member() {
        let repo = setup().await;
        let err = repo
            .save_member_with_groups(&sample_member(1), &[9999], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DirsyncError::Database(_)));
        assert_eq!(repo.count_members().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_membership_write_rolls_back_member_update() {
        let repo = setup().await;
        let id = repo.insert_member(&sample_member(1)).await.unwrap();
        let mut m = repo.get_member(id).await.unwrap().unwrap();
        m.department = Some("Sales".into());
        assert!(repo.save_member_with_groups(&m, &[9999], &[]).await.is_err());
        assert!(repo.get_member(id).await.unwrap().unwrap().department.is_none());
    }

    #[tokio::test]
    async fn sync_lock_excludes_second_holder_until_released() {
        let repo = setup().await;
        let scope = "members:dc=example,dc=com";
        let first = SyncLock::new(scope, Duration::hours(1));
        let second = SyncLock::new(scope, Duration::hours(1));

        assert!(repo.try_acquire_sync_lock(&first).await.unwrap());
        assert!(!repo.try_acquire_sync_lock(&second).await.unwrap());
        assert_eq!(
            repo.get_sync_lock(scope).await.unwrap().unwrap().holder,
            first.holder
        );

        assert!(!repo.release_sync_lock(scope, &second.holder).await.unwrap());
        assert!(repo.release_sync_lock(scope, &first.holder).await.unwrap());
        assert!(repo.get_sync_lock(scope).await.unwrap().is_none());
        assert!(repo.try_acquire_sync_lock(&second).await.unwrap());
    }

    #[tokio::test]
    async fn expired_sync_lock_is_taken_over() {
        let repo = setup().await;
        let scope = "groups:dc=example,dc=com";
        let mut stale = SyncLock::new(scope, Duration::minutes(5));
        stale.acquired_at -= Duration::minutes(10);
        stale.expires_at -= Duration::minutes(10);
        assert!(repo.try_acquire_sync_lock(&stale).await.unwrap());

        let fresh = SyncLock::new(scope, Duration::minutes(5));
        assert!(repo.try_acquire_sync_lock(&fresh).await.unwrap());
        let held = repo.get_sync_lock(scope).await.unwrap().unwrap();
        assert_eq!(held.holder, fresh.holder);
        assert_eq!(held.expires_at.timestamp(), fresh.expires_at.timestamp());

        // the old holder can no longer release it
        assert!(!repo.release_sync_lock(scope, &stale.holder).await.unwrap());
    }

    #[tokio::test]
    async fn sync_lock_is_shared_between_pools_on_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirsync.db");
        let path = path.to_str().unwrap();
        let a = DatabasePool::new_sqlite(path).await.unwrap().into_repository();
        let b = DatabasePool::new_sqlite(path).await.unwrap().into_repository();

        let scope = "members:dc=example,dc=com";
        let held = SyncLock::new(scope, Duration::hours(1));
        assert!(a.try_acquire_sync_lock(&held).await.unwrap());
        assert!(!b
            .try_acquire_sync_lock(&SyncLock::new(scope, Duration::hours(1)))
            .await
            .unwrap());
        assert!(a.release_sync_lock(scope, &held.holder).await.unwrap());
        assert!(b
            .try_acquire_sync_lock(&SyncLock::new(scope, Duration::hours(1)))
            .await
            .unwrap());
    }
}
