//! Read-only handlers over the post store.

use axum::{
    extract::{Query, State},
    response::Html,
    Json,
};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::storage::{Database, HistoryEvent, Page, PostedItem};

pub const DEFAULT_OFFSET: u32 = 0;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Marker in the page template replaced with the newest history rows.
const HISTORY_MARKER: &str = "{{history}}";
const INDEX_TEMPLATE: &str = include_str!("../../templates/index.html");

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub range: Option<String>,
}

/// One window of rows. `stop` is set when no rows follow this window.
#[derive(Debug, Serialize)]
pub struct PageBody<T> {
    pub stop: bool,
    pub data: Vec<T>,
}

impl<T> From<Page<T>> for PageBody<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            stop: page.is_last_page,
            data: page.rows,
        }
    }
}

/// Parse `<offset>-<limit>`. A missing range means the first page; the
/// limit is capped at [`MAX_LIMIT`].
pub fn parse_range(range: Option<&str>) -> Result<(u32, u32), ApiError> {
    let Some(range) = range else {
        return Ok((DEFAULT_OFFSET, DEFAULT_LIMIT));
    };

    let invalid = || ApiError::bad_request(format!("Invalid range '{}', expected <offset>-<limit>", range));
    let (offset, limit) = range.split_once('-').ok_or_else(invalid)?;
    let offset: u32 = offset.trim().parse().map_err(|_| invalid())?;
    let limit: u32 = limit.trim().parse().map_err(|_| invalid())?;
    if limit == 0 {
        return Err(ApiError::bad_request("Range limit must be at least 1"));
    }

    Ok((offset, limit.min(MAX_LIMIT)))
}

/// GET /api/history
pub async fn history(
    State(db): State<Database>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<PageBody<HistoryEvent>>, ApiError> {
    let (offset, limit) = parse_range(query.range.as_deref())?;
    let page = db.history_page(offset, limit).await?;
    Ok(Json(page.into()))
}

/// GET /api/posts
pub async fn posts(
    State(db): State<Database>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<PageBody<PostedItem>>, ApiError> {
    let (offset, limit) = parse_range(query.range.as_deref())?;
    let page = db.posted_page(offset, limit).await?;
    Ok(Json(page.into()))
}

/// GET /
pub async fn index(State(db): State<Database>) -> Result<Html<String>, ApiError> {
    let page: PageBody<HistoryEvent> = db
        .history_page(DEFAULT_OFFSET, DEFAULT_LIMIT)
        .await?
        .into();
    let json = serde_json::to_string(&page)
        .map_err(|e| ApiError::internal(format!("Failed to encode history: {}", e)))?;
    Ok(Html(render_index(&json)))
}

/// Embed `history_json`, a serialized first [`PageBody`] of history, in the
/// page template. `</` is escaped so row
/// content cannot close the surrounding script element.
pub fn render_index(history_json: &str) -> String {
    INDEX_TEMPLATE.replace(HISTORY_MARKER, &history_json.replace("</", "<\\/"))
}
