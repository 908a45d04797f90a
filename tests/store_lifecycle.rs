//! Integration tests for the post store: recording posts, paging, retention
//! and legacy import working together.
//!
//! Each test creates its own database for isolation.

use alert_poster::storage::{Database, HistoryEvent, PostedItem, Row, Table, RETENTION_LIMIT};
use pretty_assertions::assert_eq;

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn event(item: &PostedItem, subreddit: &str, permalink: &str) -> HistoryEvent {
    HistoryEvent {
        timestamp: item.last_posted_at,
        url: item.url.clone(),
        title: item.title.clone(),
        permalink: permalink.to_string(),
        subreddit: subreddit.to_string(),
    }
}

// ============================================================================
// Recording
// ============================================================================

#[tokio::test]
async fn test_merge_appends_in_posting_order() {
    let db = test_db().await;

    let mut item = PostedItem::new("http://x", "T", 10);
    item.push_post("sub1", "p1");
    db.record_post(&item, &event(&item, "sub1", "p1")).await.unwrap();

    let mut item = db.get_posted("http://x").await.unwrap().unwrap();
    item.last_posted_at = 20;
    item.push_post("sub2", "p2");
    db.record_post(&item, &event(&item, "sub2", "p2")).await.unwrap();

    let loaded = db.get_posted("http://x").await.unwrap().unwrap();
    assert_eq!(loaded.subreddits(), ["sub1", "sub2"]);
    assert_eq!(loaded.permalinks(), ["p1", "p2"]);
    assert_eq!(loaded.last_posted_at, 20);
    assert_eq!(db.posted_count().await.unwrap(), 1);
    assert_eq!(db.history_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_query_range_orders_most_recent_first() {
    let db = test_db().await;
    for i in 0..3 {
        let mut item = PostedItem::new(format!("http://x/{i}"), "T", i);
        item.push_post("s", format!("p{i}"));
        db.record_post(&item, &event(&item, "s", &format!("p{i}")))
            .await
            .unwrap();
    }

    let page = db.query_range(Table::Posted, 0, 10).await.unwrap();
    let urls: Vec<_> = page
        .rows
        .iter()
        .map(|row| match row {
            Row::Posted(item) => item.url.clone(),
            Row::History(_) => panic!("history row from posted table"),
        })
        .collect();
    assert_eq!(urls, vec!["http://x/2", "http://x/1", "http://x/0"]);

    let page = db.query_range(Table::History, 1, 1).await.unwrap();
    match page.rows.as_slice() {
        [Row::History(e)] => assert_eq!(e.permalink, "p1"),
        other => panic!("unexpected rows {:?}", other),
    }
    assert!(!page.is_last_page);
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test]
async fn test_both_tables_keep_most_recent_rows() {
    let db = test_db().await;
    for i in 0..1500 {
        let mut item = PostedItem::new(format!("http://x/{i}"), "T", i);
        item.push_post("s", "p");
        db.record_post(&item, &event(&item, "s", "p")).await.unwrap();
    }

    assert_eq!(db.posted_count().await.unwrap(), RETENTION_LIMIT);
    assert_eq!(db.history_count().await.unwrap(), RETENTION_LIMIT);

    let newest = db.history_page(0, 1).await.unwrap();
    assert_eq!(newest.rows[0].url, "http://x/1499");
    let oldest = db.posted_page(999, 1).await.unwrap();
    assert_eq!(oldest.rows[0].url, "http://x/500");
    assert!(oldest.is_last_page);
}

#[tokio::test]
async fn test_merge_update_does_not_evict() {
    let db = test_db().await;
    for i in 0..1000 {
        let mut item = PostedItem::new(format!("http://x/{i}"), "T", i);
        item.push_post("s", "p");
        db.upsert_posted(&item).await.unwrap();
    }

    // Updating an existing url is not an insert, so the cap is not re-applied
    let mut item = db.get_posted("http://x/0").await.unwrap().unwrap();
    item.push_post("t", "q");
    db.upsert_posted(&item).await.unwrap();

    assert_eq!(db.posted_count().await.unwrap(), 1000);
    assert!(db.get_posted("http://x/0").await.unwrap().is_some());
}
