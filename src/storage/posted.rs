use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::schema::Database;
use super::types::{DatabaseError, Page, PostedItem};

/// Row of the `posted` table without its targets.
#[derive(Debug, sqlx::FromRow)]
struct PostedRow {
    url: String,
    title: String,
    utc: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct TargetRow {
    url: String,
    subreddit: String,
    permalink: String,
}

impl Database {
    // ========================================================================
    // Posted Items
    // ========================================================================

    /// Insert or replace the record for `item.url`, including all its targets.
    pub async fn upsert_posted(&self, item: &PostedItem) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        upsert_posted_in(&mut tx, item).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Look up the record for one url.
    pub async fn get_posted(&self, url: &str) -> Result<Option<PostedItem>, DatabaseError> {
        let mut items = self.get_many_posted(&[url]).await?;
        Ok(items.pop())
    }

    /// Look up the records for several urls. Missing urls are simply absent
    /// from the result; found records come back in the order of `urls`.
    pub async fn get_many_posted<S: AsRef<str>>(
        &self,
        urls: &[S],
    ) -> Result<Vec<PostedItem>, DatabaseError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT url, title, utc FROM posted WHERE url IN (");
        let mut separated = query.separated(", ");
        for url in urls {
            separated.push_bind(url.as_ref());
        }
        separated.push_unseparated(")");

        let rows: Vec<PostedRow> = query.build_query_as().fetch_all(&self.pool).await?;
        let mut items = self.attach_targets(rows).await?;

        let order: HashMap<&str, usize> = urls
            .iter()
            .enumerate()
            .map(|(i, u)| (u.as_ref(), i))
            .collect();
        items.sort_by_key(|item| order.get(item.url.as_str()).copied().unwrap_or(usize::MAX));
        Ok(items)
    }

    /// A window of posted records, most recently posted first.
    pub async fn posted_page(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Page<PostedItem>, DatabaseError> {
        let mut rows: Vec<PostedRow> = sqlx::query_as(
            r#"
            SELECT url, title, utc FROM posted
            ORDER BY utc DESC, rowid DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(i64::from(limit) + 1)
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        let is_last_page = rows.len() <= limit as usize;
        rows.truncate(limit as usize);
        let rows = self.attach_targets(rows).await?;
        Ok(Page { rows, is_last_page })
    }

    /// Number of rows in the posted table.
    pub async fn posted_count(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posted")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Load the targets of `rows` in one query and build full records,
    /// keeping the order of `rows`.
    async fn attach_targets(&self, rows: Vec<PostedRow>) -> Result<Vec<PostedItem>, DatabaseError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT url, subreddit, permalink FROM post_targets WHERE url IN (",
        );
        let mut separated = query.separated(", ");
        for row in &rows {
            separated.push_bind(row.url.as_str());
        }
        separated.push_unseparated(") ORDER BY url, position");

        let targets: Vec<TargetRow> = query.build_query_as().fetch_all(&self.pool).await?;
        let mut by_url: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for target in targets {
            by_url
                .entry(target.url)
                .or_default()
                .push((target.subreddit, target.permalink));
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let targets = by_url.remove(&row.url).unwrap_or_default();
                PostedItem::from_targets(row.url, row.title, row.utc, targets)
            })
            .collect())
    }
}

/// Write `item` on an open connection or transaction.
///
/// The parent row is upserted so an existing url keeps its rowid (an update
/// does not fire the retention trigger), then its targets are rewritten.
pub(crate) async fn upsert_posted_in(
    conn: &mut SqliteConnection,
    item: &PostedItem,
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO posted (url, title, utc) VALUES (?, ?, ?)
        ON CONFLICT(url) DO UPDATE SET title = excluded.title, utc = excluded.utc
    "#,
    )
    .bind(&item.url)
    .bind(&item.title)
    .bind(item.last_posted_at)
    .execute(&mut *conn)
    .await?;

    // A record older than every retained row is evicted by the trigger at once
    let kept: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM posted WHERE url = ?")
        .bind(&item.url)
        .fetch_optional(&mut *conn)
        .await?;
    if kept.is_none() {
        tracing::debug!(url = %item.url, "Record fell outside retention window, not stored");
        return Ok(());
    }

    sqlx::query("DELETE FROM post_targets WHERE url = ?")
        .bind(&item.url)
        .execute(&mut *conn)
        .await?;

    for (position, (subreddit, permalink)) in item.targets().enumerate() {
        sqlx::query(
            "INSERT INTO post_targets (url, position, subreddit, permalink) VALUES (?, ?, ?, ?)",
        )
        .bind(&item.url)
        .bind(position as i64)
        .bind(subreddit)
        .bind(permalink)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}
