use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Store errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another instance of alert-poster appears to be using the database. Please stop it and try again.")]
    InstanceLocked,

    /// The database file could not be opened or created
    #[error("Cannot open database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },

    /// Schema setup failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Stored data violates an invariant (e.g. misaligned permalinks/subreddits)
    #[error("Corrupt record for {url}: {reason}")]
    Corrupt { url: String, reason: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

/// SQLITE_BUSY and SQLITE_LOCKED primary result codes.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl DatabaseError {
    /// Map a sqlx error, recognising lock contention
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_contention(&err) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }

    /// Map a failure to open the database at `path`. Anything other than
    /// lock contention is reported against the path.
    pub(crate) fn opening(path: &str, err: sqlx::Error) -> Self {
        match Self::from_sqlx(err) {
            DatabaseError::Other(source) => DatabaseError::Open {
                path: path.to_string(),
                source,
            },
            locked => locked,
        }
    }
}

fn is_lock_contention(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    // Extended result codes carry the primary code in the low byte
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

// ============================================================================
// Data Structures
// ============================================================================

/// One article url and every subreddit it has been posted to.
///
/// `permalinks[i]` is the post created in `subreddits[i]`. The two vectors
/// are only grown together through [`PostedItem::push_post`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostedItem {
    pub url: String,
    pub title: String,
    #[serde(rename = "utc")]
    pub last_posted_at: i64,
    permalinks: Vec<String>,
    subreddits: Vec<String>,
}

impl PostedItem {
    /// A record with no posts yet.
    pub fn new(url: impl Into<String>, title: impl Into<String>, last_posted_at: i64) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            last_posted_at,
            permalinks: Vec::new(),
            subreddits: Vec::new(),
        }
    }

    /// Builds a record from stored `(subreddit, permalink)` pairs, in order.
    pub fn from_targets(
        url: impl Into<String>,
        title: impl Into<String>,
        last_posted_at: i64,
        targets: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut item = Self::new(url, title, last_posted_at);
        for (subreddit, permalink) in targets {
            item.push_post(subreddit, permalink);
        }
        item
    }

    /// Builds a record from two parallel sequences, refusing misaligned input.
    pub fn from_parallel(
        url: impl Into<String>,
        title: impl Into<String>,
        last_posted_at: i64,
        subreddits: Vec<String>,
        permalinks: Vec<String>,
    ) -> Result<Self, DatabaseError> {
        let url = url.into();
        if subreddits.len() != permalinks.len() {
            return Err(DatabaseError::Corrupt {
                reason: format!(
                    "{} subreddits but {} permalinks",
                    subreddits.len(),
                    permalinks.len()
                ),
                url,
            });
        }
        Ok(Self::from_targets(
            url,
            title,
            last_posted_at,
            subreddits.into_iter().zip(permalinks),
        ))
    }

    /// Records a post made to `subreddit`, keeping both sequences aligned.
    pub fn push_post(&mut self, subreddit: impl Into<String>, permalink: impl Into<String>) {
        self.subreddits.push(subreddit.into());
        self.permalinks.push(permalink.into());
    }

    pub fn permalinks(&self) -> &[String] {
        &self.permalinks
    }

    pub fn subreddits(&self) -> &[String] {
        &self.subreddits
    }

    /// True if a post to `subreddit` is already recorded (case-insensitive).
    pub fn has_subreddit(&self, subreddit: &str) -> bool {
        self.subreddits
            .iter()
            .any(|s| s.eq_ignore_ascii_case(subreddit))
    }

    /// `(subreddit, permalink)` pairs in posting order.
    pub fn targets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.subreddits
            .iter()
            .map(String::as_str)
            .zip(self.permalinks.iter().map(String::as_str))
    }

    pub fn post_count(&self) -> usize {
        self.subreddits.len()
    }
}

/// A single successful post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct HistoryEvent {
    #[serde(rename = "utc")]
    #[sqlx(rename = "utc")]
    pub timestamp: i64,
    pub url: String,
    pub title: String,
    pub permalink: String,
    pub subreddit: String,
}

/// A window of rows, most recent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub rows: Vec<T>,
    /// No rows exist past this window
    pub is_last_page: bool,
}

/// Tables exposed through range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    History,
    Posted,
}

/// A row of either table, as returned by [`super::Database::query_range`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Row {
    History(HistoryEvent),
    Posted(PostedItem),
}

/// Counts from a legacy database import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub posted: usize,
    pub history: usize,
    pub skipped: usize,
}
