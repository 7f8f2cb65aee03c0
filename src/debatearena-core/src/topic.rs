//! Topic rotation: live feeds first, curated list as the floor.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cleanup::{collapse_whitespace, truncate};
use crate::config::{FeedConfig, TopicSettings};
use crate::error::{DebateError, TopicError};

/// Longest background text kept from a feed item.
const MAX_CONTEXT_CHARS: usize = 500;

static HTML_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]*>").ok());

/// One headline pulled from a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub headline: String,
    pub summary: Option<String>,
}

/// A live source of headlines.
#[async_trait]
pub trait TopicFeed: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<FeedItem, TopicError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicOrigin {
    Feed(String),
    Curated,
}

/// A debate subject with optional background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub topic: String,
    pub context: Option<String>,
    pub origin: TopicOrigin,
}

/// RSS 2.0 feed fetched over HTTP.
#[derive(Debug)]
pub struct RssFeed {
    name: String,
    url: String,
    bearer: Option<String>,
    http: reqwest::Client,
}

impl RssFeed {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self, DebateError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                DebateError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            bearer: None,
            http,
        })
    }

    /// Build from config. An unset bearer variable just means no credential.
    pub fn from_config(config: &FeedConfig) -> Result<Self, DebateError> {
        let feed = Self::new(&config.name, &config.url)?;
        let bearer = config
            .bearer_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|token| !token.trim().is_empty());
        Ok(match bearer {
            Some(token) => feed.with_bearer(token),
            None => feed,
        })
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

#[async_trait]
impl TopicFeed for RssFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<FeedItem, TopicError> {
        let mut request = self.http.get(&self.url);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TopicError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TopicError::HttpStatus(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TopicError::Transport(e.to_string()))?;
        parse_rss(&body)
    }
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Take the first item with a non-empty title.
pub fn parse_rss(xml: &str) -> Result<FeedItem, TopicError> {
    let rss: Rss = quick_xml::de::from_str(xml).map_err(|e| TopicError::Malformed(e.to_string()))?;

    rss.channel
        .items
        .into_iter()
        .find_map(|item| {
            let headline = collapse_whitespace(&strip_html(item.title.as_deref()?));
            if headline.is_empty() {
                return None;
            }
            let summary = item
                .description
                .as_deref()
                .map(|d| truncate(&collapse_whitespace(&strip_html(d)), MAX_CONTEXT_CHARS))
                .filter(|d| !d.is_empty());
            Some(FeedItem { headline, summary })
        })
        .ok_or(TopicError::NoItems)
}

fn strip_html(text: &str) -> String {
    let text = match HTML_TAG.as_ref() {
        Some(re) => re.replace_all(text, " ").to_string(),
        None => text.to_string(),
    };
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Picks the next topic. Never fails once constructed.
#[derive(Debug, Clone)]
pub struct TopicSource {
    feeds: Vec<Arc<dyn TopicFeed>>,
    curated: Vec<String>,
    question_template: String,
    feed_timeout: Duration,
}

impl TopicSource {
    pub fn new(
        feeds: Vec<Arc<dyn TopicFeed>>,
        curated: Vec<String>,
        question_template: impl Into<String>,
        feed_timeout: Duration,
    ) -> Result<Self, DebateError> {
        let curated: Vec<String> = curated
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if curated.is_empty() {
            return Err(DebateError::NoTopicAvailable);
        }

        Ok(Self {
            feeds,
            curated,
            question_template: question_template.into(),
            feed_timeout,
        })
    }

    /// Build from config. Feeds that cannot be set up are skipped.
    pub fn from_config(settings: &TopicSettings) -> Result<Self, DebateError> {
        let feeds = settings
            .feeds
            .iter()
            .filter_map(|f| match RssFeed::from_config(f) {
                Ok(feed) => Some(Arc::new(feed) as Arc<dyn TopicFeed>),
                Err(e) => {
                    warn!(feed = %f.name, error = %e, "Skipping topic feed");
                    None
                }
            })
            .collect();

        Self::new(
            feeds,
            settings.curated.clone(),
            settings.question_template.clone(),
            Duration::from_secs(settings.feed_timeout_secs),
        )
    }

    /// Topic shown before the first start.
    pub fn default_topic(&self) -> &str {
        &self.curated[0]
    }

    /// Next topic, different from `avoid` whenever that is possible.
    pub async fn next_topic(&self, avoid: Option<&str>) -> Topic {
        for feed in &self.feeds {
            let outcome = tokio::time::timeout(self.feed_timeout, feed.fetch())
                .await
                .unwrap_or(Err(TopicError::Timeout(self.feed_timeout)));

            match outcome {
                Ok(item) => {
                    let topic = self.to_question(&item.headline);
                    if avoid == Some(topic.as_str()) {
                        debug!(feed = %feed.name(), "Feed repeated the current topic");
                        continue;
                    }
                    return Topic {
                        topic,
                        context: item.summary,
                        origin: TopicOrigin::Feed(feed.name().to_string()),
                    };
                }
                Err(e) => {
                    warn!(feed = %feed.name(), error = %e, "Topic feed failed");
                }
            }
        }

        self.curated_topic(avoid, &mut rand::thread_rng())
    }

    /// Uniform pick from the curated list, skipping `avoid` when another
    /// topic exists.
    pub fn curated_topic<R: Rng + ?Sized>(&self, avoid: Option<&str>, rng: &mut R) -> Topic {
        let candidates: Vec<&String> = self
            .curated
            .iter()
            .filter(|t| Some(t.as_str()) != avoid)
            .collect();

        let topic = if candidates.is_empty() {
            self.curated[0].clone()
        } else {
            candidates[rng.gen_range(0..candidates.len())].clone()
        };

        Topic {
            topic,
            context: None,
            origin: TopicOrigin::Curated,
        }
    }

    /// Turn a headline into a debate question.
    pub fn to_question(&self, headline: &str) -> String {
        let headline = headline.trim();
        if headline.ends_with('?') {
            headline.to_string()
        } else {
            let headline = headline.trim_end_matches(['.', '!', ':', ';']);
            self.question_template.replace("{headline}", headline)
        }
    }
}
