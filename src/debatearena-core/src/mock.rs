//! Scripted providers and feeds for tests and offline runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ProviderError, TopicError};
use crate::persona::RenderedPrompt;
use crate::provider::TextProvider;
use crate::topic::{FeedItem, TopicFeed};

/// A provider that plays back scripted outcomes, cycling through them.
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    outcomes: Vec<Result<String, ProviderError>>,
    index: AtomicUsize,
    latency: Duration,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, outcomes: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            name: name.into(),
            outcomes,
            index: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    /// A provider that always answers with `text`.
    pub fn always_ok(name: impl Into<String>, text: &str) -> Self {
        Self::new(name, vec![Ok(text.to_string())])
    }

    /// A provider that always fails with `error`.
    pub fn always_err(name: impl Into<String>, error: ProviderError) -> Self {
        Self::new(name, vec![Err(error)])
    }

    /// Simulate network latency before each answer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of times `generate` has been called.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        _prompt: &RenderedPrompt,
        _timeout: Duration,
    ) -> Result<String, ProviderError> {
        let idx = self.index.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.outcomes.is_empty() {
            return Err(ProviderError::Empty);
        }
        self.outcomes[idx % self.outcomes.len()].clone()
    }
}

/// A topic feed that always returns the same outcome.
#[derive(Debug)]
pub struct ScriptedFeed {
    name: String,
    outcome: Result<FeedItem, TopicError>,
    calls: AtomicUsize,
    latency: Duration,
}

impl ScriptedFeed {
    pub fn headline(name: impl Into<String>, headline: &str, summary: Option<&str>) -> Self {
        Self {
            name: name.into(),
            outcome: Ok(FeedItem {
                headline: headline.to_string(),
                summary: summary.map(str::to_string),
            }),
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    pub fn failing(name: impl Into<String>, error: TopicError) -> Self {
        Self {
            name: name.into(),
            outcome: Err(error),
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopicFeed for ScriptedFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<FeedItem, TopicError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.outcome.clone()
    }
}
