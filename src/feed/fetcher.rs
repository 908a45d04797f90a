use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

use crate::config::FeedConfig;
use crate::feed::parser::{parse_alert_feed, ParseResult};
use crate::feed::FeedCandidate;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while fetching one alert feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Body was not a readable feed document
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Fetches every configured feed, one after another.
///
/// A feed that fails is logged and contributes nothing; the others are
/// unaffected. Candidates keep feed order, then entry order.
pub async fn fetch_all(client: &reqwest::Client, feeds: &[FeedConfig]) -> Vec<FeedCandidate> {
    let mut candidates = Vec::new();
    for feed in feeds {
        match fetch_feed(client, feed).await {
            Ok(found) => {
                tracing::debug!(feed = %feed.url, entries = found.len(), "Fetched feed");
                candidates.extend(found);
            }
            Err(e) => {
                tracing::warn!(feed = %feed.url, error = %e, "Feed fetch failed, skipping");
            }
        }
    }
    candidates
}

/// Fetches one feed and turns its entries into candidates for the feed's
/// subreddits.
///
/// # Errors
///
/// - [`FetchError::Network`] - Connection or TLS errors
/// - [`FetchError::Timeout`] - Request exceeded 30 seconds
/// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
/// - [`FetchError::ResponseTooLarge`] - Response exceeded 10MB
/// - [`FetchError::Parse`] - Body is not well-formed XML
pub async fn fetch_feed(
    client: &reqwest::Client,
    feed: &FeedConfig,
) -> Result<Vec<FeedCandidate>, FetchError> {
    let response = tokio::time::timeout(FETCH_TIMEOUT, client.get(&feed.url).send())
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Network)?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
    let body = String::from_utf8_lossy(&bytes);

    let ParseResult { entries, skipped } =
        parse_alert_feed(&body).map_err(|e| FetchError::Parse(e.to_string()))?;

    if skipped > 0 {
        tracing::warn!(
            feed = %feed.url,
            skipped = skipped,
            "Entries without a usable title or link skipped"
        );
    }

    Ok(entries
        .into_iter()
        .map(|entry| FeedCandidate {
            title: entry.title,
            url: entry.url,
            subreddits: feed.subreddits.clone(),
        })
        .collect())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
