//! Import of databases written by the earlier alert bot.
//!
//! That bot kept `permalinks` and `subreddits` as `|`-joined strings in the
//! `posted` table, and a row posted only once held a bare value with no
//! separator. Both shapes are read as sequences here: a bare value is a
//! one-element sequence and an empty string is an empty one.

use std::str::FromStr;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};

use super::history::append_history_in;
use super::posted::upsert_posted_in;
use super::schema::Database;
use super::types::{DatabaseError, HistoryEvent, ImportReport, PostedItem};

const LEGACY_SEPARATOR: char = '|';

#[derive(Debug, sqlx::FromRow)]
struct LegacyPostedRow {
    url: String,
    title: String,
    utc: i64,
    permalinks: String,
    subreddits: String,
}

/// Splits a legacy list column into its elements.
pub fn split_legacy_list(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(LEGACY_SEPARATOR).map(str::to_string).collect()
}

impl Database {
    /// Merge a legacy database into this store.
    ///
    /// Urls already present here are left untouched. Legacy rows whose two
    /// lists have different lengths cannot be paired and are skipped. Rows are
    /// written oldest first so the retention cap keeps the newest.
    pub async fn import_legacy(&self, path: &str) -> Result<ImportReport, DatabaseError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))
            .map_err(|e| DatabaseError::opening(path, e))?
            .read_only(true);
        let mut legacy = SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| DatabaseError::opening(path, e))?;

        let posted: Vec<LegacyPostedRow> = sqlx::query_as(
            "SELECT url, title, utc, permalinks, subreddits FROM posted ORDER BY utc ASC",
        )
        .fetch_all(&mut legacy)
        .await?;
        let history: Vec<HistoryEvent> = sqlx::query_as(
            "SELECT utc, url, title, permalink, subreddit FROM history ORDER BY utc ASC",
        )
        .fetch_all(&mut legacy)
        .await?;
        legacy.close().await?;

        let mut report = ImportReport::default();
        let mut tx = self.pool.begin().await?;

        for row in posted {
            let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM posted WHERE url = ?")
                .bind(&row.url)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_some() {
                report.skipped += 1;
                continue;
            }

            let item = match PostedItem::from_parallel(
                row.url,
                row.title,
                row.utc,
                split_legacy_list(&row.subreddits),
                split_legacy_list(&row.permalinks),
            ) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping legacy row");
                    report.skipped += 1;
                    continue;
                }
            };
            upsert_posted_in(&mut tx, &item).await?;
            report.posted += 1;
        }

        for event in history {
            let duplicate: Option<(i64,)> = sqlx::query_as(
                "SELECT 1 FROM history WHERE utc = ? AND url = ? AND subreddit = ?",
            )
            .bind(event.timestamp)
            .bind(&event.url)
            .bind(&event.subreddit)
            .fetch_optional(&mut *tx)
            .await?;
            if duplicate.is_some() {
                report.skipped += 1;
                continue;
            }
            append_history_in(&mut tx, &event).await?;
            report.history += 1;
        }

        tx.commit().await?;
        tracing::info!(
            path = %path,
            posted = report.posted,
            history = report.history,
            skipped = report.skipped,
            "Imported legacy database"
        );
        Ok(report)
    }
}
