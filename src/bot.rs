//! One polling cycle: fetch every feed, then post what is new.

use async_trait::async_trait;

use crate::config::FeedConfig;
use crate::engine::{CandidateReport, Engine, EngineError};
use crate::feed::fetch_all;
use crate::scheduler::CycleTask;

/// Totals for one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub candidates: usize,
    pub report: CandidateReport,
}

pub struct Bot {
    client: reqwest::Client,
    feeds: Vec<FeedConfig>,
    engine: Engine,
}

impl Bot {
    pub fn new(client: reqwest::Client, feeds: Vec<FeedConfig>, engine: Engine) -> Self {
        Self {
            client,
            feeds,
            engine,
        }
    }

    /// Fetch all feeds and process every candidate in feed order.
    ///
    /// Stops at the first store error; candidates after it wait for the
    /// next cycle.
    pub async fn cycle(&self) -> Result<CycleSummary, EngineError> {
        let candidates = fetch_all(&self.client, &self.feeds).await;
        let mut summary = CycleSummary {
            candidates: candidates.len(),
            ..CycleSummary::default()
        };

        for candidate in &candidates {
            let report = self.engine.process(candidate).await?;
            summary.report.absorb(report);
        }

        tracing::info!(
            feeds = self.feeds.len(),
            candidates = summary.candidates,
            posted = summary.report.posted,
            already_submitted = summary.report.already_submitted,
            already_present = summary.report.already_present,
            rate_limited = summary.report.rate_limited,
            failed = summary.report.failed,
            "Cycle summary"
        );
        Ok(summary)
    }
}

#[async_trait]
impl CycleTask for Bot {
    type Error = EngineError;

    async fn run_cycle(&self) -> Result<(), EngineError> {
        self.cycle().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poster::{Poster, PosterError, SubmitOutcome};
    use crate::storage::Database;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>First story</title>
    <link href="https://www.google.com/url?rct=j&amp;url=https://news.example/1&amp;ct=ga"/>
  </entry>
  <entry>
    <title>Second story</title>
    <link href="https://www.google.com/url?rct=j&amp;url=https://news.example/2&amp;ct=ga"/>
  </entry>
</feed>"#;

    struct EchoPoster;

    #[async_trait]
    impl Poster for EchoPoster {
        async fn submit(
            &self,
            _title: &str,
            url: &str,
            subreddit: &str,
            _resubmit: bool,
        ) -> Result<SubmitOutcome, PosterError> {
            Ok(SubmitOutcome::Submitted {
                permalink: format!("https://www.reddit.com/r/{subreddit}/{url}"),
            })
        }
    }

    #[tokio::test]
    async fn test_cycle_posts_then_skips_on_repeat() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let engine = Engine::new(db.clone(), Arc::new(EchoPoster), false);
        let feeds = vec![FeedConfig {
            url: format!("{}/alerts", server.uri()),
            subreddits: vec!["news".into(), "tech".into()],
        }];
        let bot = Bot::new(reqwest::Client::new(), feeds, engine);

        let first = bot.cycle().await.unwrap();
        assert_eq!(first.candidates, 2);
        assert_eq!(first.report.posted, 4);
        assert_eq!(db.history_count().await.unwrap(), 4);

        let second = bot.cycle().await.unwrap();
        assert_eq!(second.report.posted, 0);
        assert_eq!(second.report.already_present, 4);
        assert_eq!(db.history_count().await.unwrap(), 4);
    }
}
