//! Submission of links to a link aggregator.
//!
//! The engine only sees the [`Poster`] trait; [`RedditPoster`] is the
//! production implementation.

mod reddit;

use async_trait::async_trait;
use thiserror::Error;

pub use reddit::{RedditCredentials, RedditPoster, DEFAULT_API_BASE, DEFAULT_AUTH_BASE};

/// What happened to one submission.
///
/// Duplicates and throttling are expected outcomes of a polling bot, not
/// errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new post was created.
    Submitted { permalink: String },
    /// The url already had a post in the subreddit.
    AlreadySubmitted { permalink: String },
    /// The platform asked us to slow down; nothing was posted.
    RateLimited,
}

#[derive(Debug, Error)]
pub enum PosterError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("API rejected submission: {code}: {message}")]
    Api { code: String, message: String },
    #[error("Existing post for {url} in r/{subreddit} not found")]
    ExistingPostNotFound { url: String, subreddit: String },
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait Poster: Send + Sync {
    /// Submit `url` with `title` as a link post to `subreddit`.
    async fn submit(
        &self,
        title: &str,
        url: &str,
        subreddit: &str,
        resubmit: bool,
    ) -> Result<SubmitOutcome, PosterError>;
}
