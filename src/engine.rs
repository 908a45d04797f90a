//! Deduplication and merging of feed candidates against post history.
//!
//! A url is posted to each of its configured subreddits at most once. When a
//! url comes back with a longer subreddit list, only the new subreddits are
//! posted and their permalinks are appended to the existing record.

use std::sync::Arc;

use thiserror::Error;

use crate::feed::FeedCandidate;
use crate::poster::{Poster, SubmitOutcome};
use crate::storage::{Database, DatabaseError, HistoryEvent, PostedItem};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Source of "now" for post timestamps, in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A candidate checked against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Subreddits still to post to, in candidate order.
    pub pending: Vec<String>,
    /// Subreddits from the candidate that the record already covers.
    pub already_posted: Vec<String>,
    /// Accumulator seeded with the stored posts, if any.
    pub record: PostedItem,
    pub is_new_url: bool,
}

impl Resolution {
    pub fn permalinks(&self) -> &[String] {
        self.record.permalinks()
    }

    pub fn subreddits(&self) -> &[String] {
        self.record.subreddits()
    }
}

/// Per-candidate tallies for the cycle summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateReport {
    pub posted: usize,
    /// Found on the platform already and adopted into the record
    pub already_submitted: usize,
    /// Skipped because the record already has them
    pub already_present: usize,
    pub rate_limited: usize,
    pub failed: usize,
}

impl CandidateReport {
    pub fn absorb(&mut self, other: CandidateReport) {
        self.posted += other.posted;
        self.already_submitted += other.already_submitted;
        self.already_present += other.already_present;
        self.rate_limited += other.rate_limited;
        self.failed += other.failed;
    }
}

pub struct Engine {
    db: Database,
    poster: Arc<dyn Poster>,
    clock: Arc<dyn Clock>,
    resubmit: bool,
}

impl Engine {
    pub fn new(db: Database, poster: Arc<dyn Poster>, resubmit: bool) -> Self {
        Self {
            db,
            poster,
            clock: Arc::new(SystemClock),
            resubmit,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Split a candidate's subreddits into already posted and pending.
    ///
    /// Subreddit names compare case-insensitively; a name repeated in the
    /// candidate list is considered once, under its first spelling.
    pub async fn resolve(&self, candidate: &FeedCandidate) -> Result<Resolution, EngineError> {
        let stored = self.db.get_posted(&candidate.url).await?;
        let is_new_url = stored.is_none();
        let record = stored
            .unwrap_or_else(|| PostedItem::new(&candidate.url, &candidate.title, self.clock.now()));

        let mut seen: Vec<&str> = Vec::with_capacity(candidate.subreddits.len());
        let mut pending = Vec::new();
        let mut already_posted = Vec::new();
        for subreddit in &candidate.subreddits {
            if seen.iter().any(|s| s.eq_ignore_ascii_case(subreddit)) {
                continue;
            }
            seen.push(subreddit);

            if record.has_subreddit(subreddit) {
                already_posted.push(subreddit.clone());
            } else {
                pending.push(subreddit.clone());
            }
        }

        Ok(Resolution {
            pending,
            already_posted,
            record,
            is_new_url,
        })
    }

    /// Post a candidate to its pending subreddits and record the results.
    ///
    /// Each successful post is persisted before the next is attempted.
    /// Rate-limited and failed subreddits are left for the next cycle.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the store rejects a write; posts
    /// made earlier for this candidate stay recorded.
    pub async fn process(&self, candidate: &FeedCandidate) -> Result<CandidateReport, EngineError> {
        let Resolution {
            pending,
            already_posted,
            mut record,
            is_new_url,
        } = self.resolve(candidate).await?;

        let mut report = CandidateReport {
            already_present: already_posted.len(),
            ..CandidateReport::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        tracing::debug!(
            url = %candidate.url,
            new = is_new_url,
            pending = ?pending,
            "Posting candidate"
        );

        for subreddit in pending {
            let outcome = self
                .poster
                .submit(&candidate.title, &candidate.url, &subreddit, self.resubmit)
                .await;

            match outcome {
                Ok(SubmitOutcome::Submitted { permalink }) => {
                    self.record_success(&mut record, candidate, &subreddit, permalink)
                        .await?;
                    report.posted += 1;
                }
                Ok(SubmitOutcome::AlreadySubmitted { permalink }) => {
                    tracing::info!(
                        url = %candidate.url,
                        subreddit = %subreddit,
                        "Link already submitted, adopting existing post"
                    );
                    self.record_success(&mut record, candidate, &subreddit, permalink)
                        .await?;
                    report.already_submitted += 1;
                }
                Ok(SubmitOutcome::RateLimited) => {
                    tracing::warn!(
                        url = %candidate.url,
                        subreddit = %subreddit,
                        "Rate limited, will retry next cycle"
                    );
                    report.rate_limited += 1;
                    if record.post_count() > 0 {
                        self.persist(&record).await?;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        url = %candidate.url,
                        subreddit = %subreddit,
                        error = %e,
                        "Submission failed"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn record_success(
        &self,
        record: &mut PostedItem,
        candidate: &FeedCandidate,
        subreddit: &str,
        permalink: String,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        record.title = candidate.title.clone();
        record.last_posted_at = now;
        record.push_post(subreddit, permalink.clone());

        let event = HistoryEvent {
            timestamp: now,
            url: candidate.url.clone(),
            title: candidate.title.clone(),
            permalink,
            subreddit: subreddit.to_string(),
        };
        if let Err(e) = self.db.record_post(record, &event).await {
            log_unsaved(record, &e);
            return Err(e.into());
        }

        tracing::info!(
            title = %event.title,
            url = %event.url,
            subreddit = %event.subreddit,
            permalink = %event.permalink,
            "Posted"
        );
        Ok(())
    }

    async fn persist(&self, record: &PostedItem) -> Result<(), EngineError> {
        if let Err(e) = self.db.upsert_posted(record).await {
            log_unsaved(record, &e);
            return Err(e.into());
        }
        Ok(())
    }
}

fn log_unsaved(record: &PostedItem, error: &DatabaseError) {
    tracing::error!(
        url = %record.url,
        subreddits = ?record.subreddits(),
        permalinks = ?record.permalinks(),
        error = %error,
        "Failed to persist post record"
    );
}
