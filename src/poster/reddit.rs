use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Poster, PosterError, SubmitOutcome};

pub const DEFAULT_AUTH_BASE: &str = "https://www.reddit.com";
pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";

/// Prefix for the site-relative permalinks the API returns.
const PERMALINK_BASE: &str = "https://www.reddit.com";

/// A cached token is dropped this long before Reddit says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Script-app credentials for the password grant.
#[derive(Debug)]
pub struct RedditCredentials {
    pub username: String,
    pub password: SecretString,
    pub client_id: String,
    pub client_secret: SecretString,
}

struct CachedToken {
    value: SecretString,
    expires_at: Instant,
}

/// Posts links through the Reddit OAuth API.
pub struct RedditPoster {
    client: reqwest::Client,
    credentials: RedditCredentials,
    auth_base: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct SubmitEnvelope {
    json: SubmitBody,
}

#[derive(Deserialize)]
struct SubmitBody {
    #[serde(default)]
    errors: Vec<Vec<Value>>,
    data: Option<SubmitData>,
}

#[derive(Deserialize)]
struct SubmitData {
    url: Option<String>,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Deserialize)]
struct Thing {
    data: LinkData,
}

#[derive(Deserialize)]
struct LinkData {
    subreddit: String,
    permalink: String,
}

impl RedditPoster {
    pub fn new(client: reqwest::Client, credentials: RedditCredentials) -> Self {
        Self {
            client,
            credentials,
            auth_base: DEFAULT_AUTH_BASE.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            token: Mutex::new(None),
        }
    }

    /// Point the poster at different hosts for token exchange and API calls.
    pub fn with_endpoints(mut self, auth_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.auth_base = auth_base.into().trim_end_matches('/').to_string();
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// `Authorization` header value, requesting a new token when needed.
    async fn bearer(&self) -> Result<String, PosterError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(format!("bearer {}", token.value.expose_secret()));
            }
        }

        let token = self.request_token().await?;
        let header = format!("bearer {}", token.value.expose_secret());
        *cached = Some(token);
        Ok(header)
    }

    async fn clear_token(&self) {
        *self.token.lock().await = None;
    }

    async fn request_token(&self) -> Result<CachedToken, PosterError> {
        let response = self
            .client
            .post(format!("{}/api/v1/access_token", self.auth_base))
            .basic_auth(
                &self.credentials.client_id,
                Some(self.credentials.client_secret.expose_secret()),
            )
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.expose_secret()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PosterError::Auth(format!(
                "token endpoint returned status {}",
                response.status().as_u16()
            )));
        }

        let body: TokenResponse = response.json().await?;
        let Some(access_token) = body.access_token else {
            return Err(PosterError::Auth(
                body.error.unwrap_or_else(|| "no access token in response".to_string()),
            ));
        };

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600));
        tracing::debug!(
            username = %self.credentials.username,
            expires_in_secs = lifetime.as_secs(),
            "Obtained Reddit access token"
        );
        Ok(CachedToken {
            value: SecretString::from(access_token),
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        })
    }

    /// Send an API request, renewing the token once if it is rejected.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, PosterError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut renewed = false;
        loop {
            let bearer = self.bearer().await?;
            let response = build(&bearer).send().await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            self.clear_token().await;
            if renewed {
                return Err(PosterError::Auth("API rejected a fresh token".to_string()));
            }
            tracing::debug!("Access token rejected, requesting a new one");
            renewed = true;
        }
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Permalink of the post that already carries `url` in `subreddit`.
    async fn find_existing(&self, url: &str, subreddit: &str) -> Result<String, PosterError> {
        let endpoint = format!("{}/api/info", self.api_base);
        let response = self
            .send_authorized(|bearer| {
                self.client
                    .get(&endpoint)
                    .header(AUTHORIZATION, bearer)
                    .query(&[("url", url)])
            })
            .await?;

        if !response.status().is_success() {
            return Err(PosterError::HttpStatus(response.status().as_u16()));
        }

        let listing: Listing = response.json().await?;
        listing
            .data
            .children
            .into_iter()
            .find(|thing| thing.data.subreddit.eq_ignore_ascii_case(subreddit))
            .map(|thing| absolute_permalink(&thing.data.permalink))
            .ok_or_else(|| PosterError::ExistingPostNotFound {
                url: url.to_string(),
                subreddit: subreddit.to_string(),
            })
    }
}

fn absolute_permalink(permalink: &str) -> String {
    if permalink.starts_with('/') {
        format!("{}{}", PERMALINK_BASE, permalink)
    } else {
        permalink.to_string()
    }
}

/// First error code and message in a `json.errors` list.
fn first_error(errors: &[Vec<Value>]) -> Option<(String, String)> {
    let entry = errors.first()?;
    let code = entry.first().and_then(Value::as_str).unwrap_or("UNKNOWN");
    let message = entry.get(1).and_then(Value::as_str).unwrap_or_default();
    Some((code.to_string(), message.to_string()))
}

#[async_trait]
impl Poster for RedditPoster {
    async fn submit(
        &self,
        title: &str,
        url: &str,
        subreddit: &str,
        resubmit: bool,
    ) -> Result<SubmitOutcome, PosterError> {
        let endpoint = format!("{}/api/submit", self.api_base);
        let resubmit = if resubmit { "true" } else { "false" };
        let response = self
            .send_authorized(|bearer| {
                self.client
                    .post(&endpoint)
                    .header(AUTHORIZATION, bearer)
                    .form(&[
                        ("api_type", "json"),
                        ("kind", "link"),
                        ("sr", subreddit),
                        ("title", title),
                        ("url", url),
                        ("resubmit", resubmit),
                    ])
            })
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Ok(SubmitOutcome::RateLimited);
        }
        if !response.status().is_success() {
            return Err(PosterError::HttpStatus(response.status().as_u16()));
        }

        let envelope: SubmitEnvelope = response.json().await?;
        if let Some((code, message)) = first_error(&envelope.json.errors) {
            return match code.as_str() {
                "RATELIMIT" => {
                    tracing::debug!(subreddit = %subreddit, message = %message, "Reddit rate limit");
                    Ok(SubmitOutcome::RateLimited)
                }
                "ALREADY_SUB" => {
                    let permalink = self.find_existing(url, subreddit).await?;
                    Ok(SubmitOutcome::AlreadySubmitted { permalink })
                }
                _ => Err(PosterError::Api { code, message }),
            };
        }

        envelope
            .json
            .data
            .and_then(|data| data.url)
            .map(|permalink| SubmitOutcome::Submitted {
                permalink: absolute_permalink(&permalink),
            })
            .ok_or_else(|| PosterError::InvalidResponse("submission without a post url".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn poster(server: &MockServer) -> RedditPoster {
        let credentials = RedditCredentials {
            username: "alertbot".into(),
            password: SecretString::from("hunter2".to_string()),
            client_id: "client-id".into(),
            client_secret: SecretString::from("client-secret".to_string()),
        };
        RedditPoster::new(reqwest::Client::new(), credentials)
            .with_endpoints(server.uri(), server.uri())
    }

    async fn mount_token(server: &MockServer, token: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .and(basic_auth("client-id", "client-secret"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=alertbot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": token,
                "token_type": "bearer",
                "expires_in": 3600,
                "scope": "*"
            })))
            .expect(times)
            .mount(server)
            .await;
    }

    fn submit_errors(code: &str, message: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "json": { "errors": [[code, message, "url"]] }
        }))
    }

    #[tokio::test]
    async fn test_submit_success_reuses_token() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1", 1).await;
        Mock::given(method("POST"))
            .and(path("/api/submit"))
            .and(header("authorization", "bearer tok-1"))
            .and(body_string_contains("kind=link"))
            .and(body_string_contains("sr=rust"))
            .and(body_string_contains("resubmit=false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "json": {
                    "errors": [],
                    "data": {
                        "url": "https://www.reddit.com/r/rust/comments/abc/tokio_10/",
                        "id": "abc",
                        "name": "t3_abc"
                    }
                }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let poster = poster(&server);
        for _ in 0..2 {
            let outcome = poster
                .submit("Tokio 1.0", "https://tokio.example/", "rust", false)
                .await
                .unwrap();
            assert_eq!(
                outcome,
                SubmitOutcome::Submitted {
                    permalink: "https://www.reddit.com/r/rust/comments/abc/tokio_10/".into()
                }
            );
        }
    }

    #[tokio::test]
    async fn test_already_submitted_looks_up_existing_post() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1", 1).await;
        Mock::given(method("POST"))
            .and(path("/api/submit"))
            .respond_with(submit_errors("ALREADY_SUB", "that link has already been submitted"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/info"))
            .and(query_param("url", "https://tokio.example/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "Listing",
                "data": { "children": [
                    { "kind": "t3", "data": { "subreddit": "programming", "permalink": "/r/programming/comments/p1/x/" } },
                    { "kind": "t3", "data": { "subreddit": "Rust", "permalink": "/r/Rust/comments/r1/x/" } }
                ] }
            })))
            .mount(&server)
            .await;

        let outcome = poster(&server)
            .submit("Tokio 1.0", "https://tokio.example/", "rust", false)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::AlreadySubmitted {
                permalink: "https://www.reddit.com/r/Rust/comments/r1/x/".into()
            }
        );
    }

    #[tokio::test]
    async fn test_already_submitted_without_match_is_an_error() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1", 1).await;
        Mock::given(method("POST"))
            .and(path("/api/submit"))
            .respond_with(submit_errors("ALREADY_SUB", "that link has already been submitted"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "Listing",
                "data": { "children": [] }
            })))
            .mount(&server)
            .await;

        let result = poster(&server)
            .submit("Tokio 1.0", "https://tokio.example/", "rust", false)
            .await;
        assert!(matches!(result, Err(PosterError::ExistingPostNotFound { .. })));
    }

    #[tokio::test]
    async fn test_rate_limit_outcomes() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1", 1).await;
        Mock::given(method("POST"))
            .and(path("/api/submit"))
            .and(body_string_contains("sr=busy"))
            .respond_with(submit_errors("RATELIMIT", "you are doing that too much"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/submit"))
            .and(body_string_contains("sr=throttled"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let poster = poster(&server);
        for sr in ["busy", "throttled"] {
            let outcome = poster
                .submit("Title", "https://x.example/", sr, true)
                .await
                .unwrap();
            assert_eq!(outcome, SubmitOutcome::RateLimited);
        }
    }

    #[tokio::test]
    async fn test_rejected_token_is_renewed_once() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1", 2).await;
        Mock::given(method("POST"))
            .and(path("/api/submit"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "json": { "errors": [], "data": { "url": "/r/rust/comments/abc/x/" } }
            })))
            .mount(&server)
            .await;

        let outcome = poster(&server)
            .submit("Title", "https://x.example/", "rust", false)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Submitted {
                permalink: "https://www.reddit.com/r/rust/comments/abc/x/".into()
            }
        );
    }

    #[tokio::test]
    async fn test_other_api_errors_are_errors() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1", 1).await;
        Mock::given(method("POST"))
            .and(path("/api/submit"))
            .respond_with(submit_errors("SUBREDDIT_NOEXIST", "that subreddit doesn't exist"))
            .mount(&server)
            .await;

        let result = poster(&server)
            .submit("Title", "https://x.example/", "nope", false)
            .await;
        match result {
            Err(PosterError::Api { code, .. }) => assert_eq!(code, "SUBREDDIT_NOEXIST"),
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;

        let result = poster(&server)
            .submit("Title", "https://x.example/", "rust", false)
            .await;
        match result {
            Err(PosterError::Auth(reason)) => assert_eq!(reason, "invalid_grant"),
            other => panic!("Expected Auth error, got {:?}", other),
        }
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let credentials = RedditCredentials {
            username: "alertbot".into(),
            password: SecretString::from("hunter2".to_string()),
            client_id: "client-id".into(),
            client_secret: SecretString::from("client-secret".to_string()),
        };
        let debug = format!("{:?}", credentials);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("client-secret"));
    }
}
