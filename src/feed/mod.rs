//! Alert feed retrieval.
//!
//! - [`parser`] - Atom parsing with quick-xml and tracking-link unwrapping
//! - [`fetcher`] - Sequential HTTP retrieval of the configured feeds
//!
//! Each entry of a feed becomes a [`FeedCandidate`] carrying the full list of
//! subreddits configured for that feed.

mod fetcher;
mod parser;

pub use fetcher::{fetch_all, fetch_feed, FetchError};
pub use parser::{
    parse_alert_feed, strip_default_namespace, unwrap_redirect, AlertEntry, ParseError,
    ParseResult,
};

/// An article seen in a feed during one cycle, with its target subreddits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCandidate {
    pub title: String,
    pub url: String,
    pub subreddits: Vec<String>,
}
