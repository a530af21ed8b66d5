pub mod repository;
pub mod sqlite;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

pub enum DatabasePool {
    Sqlite(SqlitePool),
}

impl DatabasePool {
    /// Open (creating if needed) a SQLite database file and run migrations.
    pub async fn new_sqlite(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::run_migrations(&pool).await?;
        Ok(DatabasePool::Sqlite(pool))
    }

    /// Create a new in-memory SQLite database pool and run migrations. Useful for testing.
    pub async fn new_sqlite_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")?.foreign_keys(true);
        // every connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(DatabasePool::Sqlite(pool))
    }

    pub fn into_repository(self) -> sqlite::SqliteRepository {
        match self {
            DatabasePool::Sqlite(pool) => sqlite::SqliteRepository::new(pool),
        }
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        let migrations: &[&str] = &[
            include_str!("../../../../migrations/sqlite/001_initial_schema.sql"),
            include_str!("../../../../migrations/sqlite/002_sync_locks.sql"),
        ];

        for migration_sql in migrations {
            for statement in migration_sql.split(';') {
                let trimmed = strip_comments(statement);
                if !trimmed.is_empty() {
                    sqlx::query(&trimmed).execute(pool).await?;
                }
            }
        }
        Ok(())
    }
}

fn strip_comments(statement: &str) -> String {
    statement
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pool_applies_schema() {
        let DatabasePool::Sqlite(pool) = DatabasePool::new_sqlite_memory().await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in [
            "group_mappings",
            "group_members",
            "local_groups",
            "login_sessions",
            "members",
            "sync_locks",
            "sync_runs",
        ] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn file_pool_is_created_and_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirsync.db");
        let path = path.to_str().unwrap();
        DatabasePool::new_sqlite(path).await.unwrap();
        // migrations are idempotent
        DatabasePool::new_sqlite(path).await.unwrap();
    }

    #[test]
    fn comments_are_stripped() {
        assert_eq!(strip_comments("-- header\nCREATE TABLE t (x)"), "CREATE TABLE t (x)");
        assert_eq!(strip_comments("\n-- only a comment\n"), "");
    }
}
