use sqlx::SqliteConnection;

use super::posted::upsert_posted_in;
use super::schema::Database;
use super::types::{DatabaseError, HistoryEvent, Page, PostedItem, Row, Table};

impl Database {
    // ========================================================================
    // Post History
    // ========================================================================

    /// Append one post event to the history log.
    pub async fn append_history(&self, event: &HistoryEvent) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        append_history_in(&mut conn, event).await
    }

    /// Persist an updated record together with the event that produced it.
    ///
    /// Both writes commit or neither does, so the history log never mentions
    /// a post the record does not know about.
    pub async fn record_post(
        &self,
        item: &PostedItem,
        event: &HistoryEvent,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        upsert_posted_in(&mut tx, item).await?;
        append_history_in(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    /// A window of history events, most recent first.
    pub async fn history_page(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Page<HistoryEvent>, DatabaseError> {
        let mut rows: Vec<HistoryEvent> = sqlx::query_as(
            r#"
            SELECT utc, url, title, permalink, subreddit FROM history
            ORDER BY utc DESC, id DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(i64::from(limit) + 1)
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        let is_last_page = rows.len() <= limit as usize;
        rows.truncate(limit as usize);
        Ok(Page { rows, is_last_page })
    }

    /// Number of rows in the history log.
    pub async fn history_count(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM history")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Range scan over either table, for callers that pick the table at runtime.
    pub async fn query_range(
        &self,
        table: Table,
        offset: u32,
        limit: u32,
    ) -> Result<Page<Row>, DatabaseError> {
        Ok(match table {
            Table::History => {
                let page = self.history_page(offset, limit).await?;
                Page {
                    rows: page.rows.into_iter().map(Row::History).collect(),
                    is_last_page: page.is_last_page,
                }
            }
            Table::Posted => {
                let page = self.posted_page(offset, limit).await?;
                Page {
                    rows: page.rows.into_iter().map(Row::Posted).collect(),
                    is_last_page: page.is_last_page,
                }
            }
        })
    }
}

pub(crate) async fn append_history_in(
    conn: &mut SqliteConnection,
    event: &HistoryEvent,
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO history (utc, url, title, permalink, subreddit)
        VALUES (?, ?, ?, ?, ?)
    "#,
    )
    .bind(event.timestamp)
    .bind(&event.url)
    .bind(&event.title)
    .bind(&event.permalink)
    .bind(&event.subreddit)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
