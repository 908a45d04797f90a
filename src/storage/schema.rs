use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

/// Both tables keep only this many of their most recent rows.
pub const RETENTION_LIMIT: i64 = 1000;

// ============================================================================
// Database
// ============================================================================

/// Handle to the post store.
///
/// Cloning is cheap: clones share one connection pool, so the poll loop and
/// the web view can each hold a handle. SQLite serializes writers and every
/// access checks out its own pooled connection.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `path` and set up the schema.
    ///
    /// `":memory:"` opens a private in-memory database shared by the pool.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock, `DatabaseError::Open` if the file cannot be opened or
    /// created, `DatabaseError::Migration` if the schema cannot be set up.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // The store holds account activity; keep it user-only on Unix
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                if let Err(e) = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                {
                    tracing::warn!(path = %path, error = %e, "Failed to pre-create database file");
                }
            }
        }

        // busy_timeout lets a writer wait out a concurrent reader instead of
        // failing immediately with SQLITE_BUSY. Applied to every pooled connection.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| DatabaseError::opening(path, e))?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::opening(path, e))?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| match DatabaseError::from_sqlx(e) {
            DatabaseError::Other(inner) => DatabaseError::Migration(inner.to_string()),
            locked => locked,
        })?;
        tracing::debug!(path = %path, "Database ready");
        Ok(db)
    }

    /// Create tables, indexes and retention triggers in one transaction.
    ///
    /// Every statement is `IF NOT EXISTS`, so running this on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posted (
                url   TEXT    NOT NULL PRIMARY KEY,
                title TEXT    NOT NULL,
                utc   INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // One row per successful post of a url; position preserves posting order
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS post_targets (
                url       TEXT    NOT NULL REFERENCES posted(url) ON DELETE CASCADE,
                position  INTEGER NOT NULL,
                subreddit TEXT    NOT NULL,
                permalink TEXT    NOT NULL,
                PRIMARY KEY (url, position)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                utc       INTEGER NOT NULL,
                url       TEXT    NOT NULL,
                title     TEXT    NOT NULL,
                permalink TEXT    NOT NULL,
                subreddit TEXT    NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posted_utc ON posted(utc DESC)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_utc ON history(utc DESC, id DESC)")
            .execute(&mut *tx)
            .await?;

        // Retention: keep the RETENTION_LIMIT most recent rows. Ties on utc are
        // broken by insertion order so exactly RETENTION_LIMIT rows survive.
        // Upserts that take the UPDATE path do not fire these.
        sqlx::query(&format!(
            r#"
            CREATE TRIGGER IF NOT EXISTS posted_retention AFTER INSERT ON posted BEGIN
                DELETE FROM posted WHERE rowid NOT IN (
                    SELECT rowid FROM posted ORDER BY utc DESC, rowid DESC LIMIT {RETENTION_LIMIT}
                );
            END
        "#
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TRIGGER IF NOT EXISTS history_retention AFTER INSERT ON history BEGIN
                DELETE FROM history WHERE id NOT IN (
                    SELECT id FROM history ORDER BY utc DESC, id DESC LIMIT {RETENTION_LIMIT}
                );
            END
        "#
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
