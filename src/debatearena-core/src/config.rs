//! Configuration module for loading TOML config files.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::DebateError;
use crate::persona::{Persona, SYSTEM_SPEAKER};
use crate::selector::TurnRule;

const DEFAULT_CONFIG_TOML: &str = include_str!("../default_config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ArenaConfig {
    #[serde(default)]
    pub debate: DebateSettings,
    #[serde(default)]
    pub viewers: ViewerSettings,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub scoring: ScoringSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    pub topics: TopicSettings,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub turns: Vec<TurnRule>,
}

/// Pacing of the debate itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    /// Maximum number of utterances kept in the transcript.
    pub transcript_limit: usize,
    /// Seconds each topic stays up before rotation.
    pub topic_duration_secs: u32,
    pub utterance_interval_min_secs: u64,
    pub utterance_interval_max_secs: u64,
    /// Number of earlier persona lines handed to providers.
    pub context_lines: usize,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            transcript_limit: 40,
            topic_duration_secs: 1800,
            utterance_interval_min_secs: 8,
            utterance_interval_max_secs: 12,
            context_lines: 4,
        }
    }
}

/// Simulated audience gauge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub initial: u32,
    pub min: u32,
    pub max: u32,
    /// Largest change applied per utterance, in either direction.
    pub max_step: u32,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            initial: 1247,
            min: 800,
            max: 4000,
            max_step: 12,
        }
    }
}

/// Viewer chat handling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Probability that a chat message gets a persona reply.
    pub reply_probability: f64,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    /// Maximum number of chat replies in flight at once.
    pub max_pending: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            reply_probability: 0.5,
            delay_min_ms: 1500,
            delay_max_ms: 3000,
            max_pending: 4,
        }
    }
}

/// What the fallback chain does once every provider has failed.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Answer from the persona's canned lines. Never fails.
    #[default]
    Canned,
    /// Surface the failure; the orchestrator posts a system placeholder.
    Placeholder,
}

/// Text generation limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Per-provider request timeout.
    pub timeout_secs: u64,
    pub on_exhaustion: ExhaustionPolicy,
    pub min_chars: usize,
    pub min_words: usize,
    pub max_chars: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            on_exhaustion: ExhaustionPolicy::Canned,
            min_chars: 6,
            min_words: 3,
            max_chars: 280,
        }
    }
}

impl GenerationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScoringKind {
    #[default]
    Length,
    Random,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub policy: ScoringKind,
    pub random_min: u32,
    pub random_max: u32,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            policy: ScoringKind::Length,
            random_min: 1,
            random_max: 5,
        }
    }
}

/// Viewer connection housekeeping.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub ping_interval_secs: u64,
    pub idle_timeout_secs: u64,
    /// Events queued per viewer before it is considered stalled and dropped.
    pub subscriber_buffer: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            idle_timeout_secs: 90,
            subscriber_buffer: 256,
        }
    }
}

/// Topic rotation sources.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicSettings {
    /// Fallback topics. Must not be empty.
    pub curated: Vec<String>,
    /// Turns a feed headline into a question. Supports `{headline}`.
    #[serde(default = "default_question_template")]
    pub question_template: String,
    #[serde(default = "default_feed_timeout")]
    pub feed_timeout_secs: u64,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

fn default_question_template() -> String {
    "{headline}: progress or a problem?".to_string()
}

fn default_feed_timeout() -> u64 {
    8
}

/// A live RSS feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    /// Environment variable holding an optional bearer token.
    #[serde(default)]
    pub bearer_env: Option<String>,
}

/// An OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Base URL including the version segment, e.g. `https://api.openai.com/v1`.
    pub api_base: String,
    pub model: String,
    /// Environment variable holding the API key. `None` means no credential.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    80
}

fn default_temperature() -> f32 {
    0.9
}

impl ProviderConfig {
    /// Resolve the API key from the environment.
    ///
    /// Returns `Ok(None)` for providers that need no credential and an error
    /// when the configured variable is unset.
    pub fn api_key(&self) -> Result<Option<String>, DebateError> {
        match &self.api_key_env {
            None => Ok(None),
            Some(var) => std::env::var(var)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .map(Some)
                .ok_or_else(|| {
                    DebateError::ConfigError(format!(
                        "provider '{}' needs {} to be set",
                        self.name, var
                    ))
                }),
        }
    }
}

impl ArenaConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, DebateError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DebateError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a persona by id.
    pub fn persona(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), DebateError> {
        let invalid = |msg: String| Err(DebateError::ConfigError(msg));

        if self.personas.is_empty() {
            return invalid("at least one persona is required".to_string());
        }
        let mut ids = HashSet::new();
        for persona in &self.personas {
            if persona.id.trim().is_empty() {
                return invalid("persona id must not be empty".to_string());
            }
            if persona.id == SYSTEM_SPEAKER {
                return invalid(format!("persona id '{SYSTEM_SPEAKER}' is reserved"));
            }
            if !ids.insert(persona.id.as_str()) {
                return invalid(format!("duplicate persona id '{}'", persona.id));
            }
            if self.generation.on_exhaustion == ExhaustionPolicy::Canned
                && persona.canned.general.iter().all(|l| l.trim().is_empty())
            {
                return invalid(format!(
                    "persona '{}' needs at least one general canned line",
                    persona.id
                ));
            }
        }
        for persona in &self.personas {
            let unknown = persona
                .canned
                .rebuttals
                .keys()
                .find(|k| !ids.contains(k.as_str()));
            if let Some(unknown) = unknown {
                return invalid(format!(
                    "persona '{}' has a rebuttal for unknown persona '{}'",
                    persona.id, unknown
                ));
            }
        }

        let mut rule_sources = HashSet::new();
        for rule in &self.turns {
            if !ids.contains(rule.from.as_str()) {
                return invalid(format!("turn rule for unknown persona '{}'", rule.from));
            }
            if !rule_sources.insert(rule.from.as_str()) {
                return invalid(format!("duplicate turn rule for '{}'", rule.from));
            }
            if rule.responders.is_empty() {
                return invalid(format!("turn rule for '{}' has no responders", rule.from));
            }
            for responder in &rule.responders {
                if !ids.contains(responder.persona.as_str()) {
                    return invalid(format!(
                        "turn rule for '{}' names unknown persona '{}'",
                        rule.from, responder.persona
                    ));
                }
                if !(responder.weight.is_finite() && responder.weight > 0.0) {
                    return invalid(format!(
                        "turn rule for '{}' has a non-positive weight",
                        rule.from
                    ));
                }
            }
        }

        let d = &self.debate;
        if d.transcript_limit == 0 {
            return invalid("debate.transcript_limit must be at least 1".to_string());
        }
        if d.topic_duration_secs == 0 {
            return invalid("debate.topic_duration_secs must be at least 1".to_string());
        }
        if d.utterance_interval_min_secs == 0
            || d.utterance_interval_min_secs > d.utterance_interval_max_secs
        {
            return invalid("debate utterance interval must satisfy 1 <= min <= max".to_string());
        }

        let v = &self.viewers;
        if !(v.min <= v.initial && v.initial <= v.max) {
            return invalid("viewers must satisfy min <= initial <= max".to_string());
        }

        let c = &self.chat;
        if !(0.0..=1.0).contains(&c.reply_probability) {
            return invalid("chat.reply_probability must be within [0, 1]".to_string());
        }
        if c.delay_min_ms > c.delay_max_ms {
            return invalid("chat delay must satisfy min <= max".to_string());
        }
        if c.max_pending == 0 {
            return invalid("chat.max_pending must be at least 1".to_string());
        }

        let g = &self.generation;
        if g.timeout_secs == 0 {
            return invalid("generation.timeout_secs must be at least 1".to_string());
        }
        if g.max_chars == 0 || g.min_chars > g.max_chars {
            return invalid("generation must satisfy min_chars <= max_chars".to_string());
        }

        let s = &self.scoring;
        if s.random_min == 0 || s.random_min > s.random_max {
            return invalid("scoring must satisfy 1 <= random_min <= random_max".to_string());
        }

        let gw = &self.gateway;
        if gw.subscriber_buffer == 0 || gw.ping_interval_secs == 0 {
            return invalid("gateway buffer and ping interval must be at least 1".to_string());
        }
        if gw.idle_timeout_secs <= gw.ping_interval_secs {
            return invalid("gateway.idle_timeout_secs must exceed the ping interval".to_string());
        }

        let t = &self.topics;
        if t.curated.iter().all(|topic| topic.trim().is_empty()) {
            return invalid("topics.curated must contain at least one topic".to_string());
        }
        if !t.question_template.contains("{headline}") {
            return invalid("topics.question_template must contain {headline}".to_string());
        }

        for provider in &self.providers {
            if provider.model.trim().is_empty() || provider.api_base.trim().is_empty() {
                return invalid(format!(
                    "provider '{}' needs a model and an api_base",
                    provider.name
                ));
            }
        }

        Ok(())
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Result<ArenaConfig, DebateError> {
    ArenaConfig::from_str(DEFAULT_CONFIG_TOML)
}
