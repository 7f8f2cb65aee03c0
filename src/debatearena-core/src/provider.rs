//! Text-generation provider clients.
//!
//! A provider turns a rendered prompt into raw text. [`generate_line`] wraps
//! any provider with the request timeout and the output filter, so every
//! source fails the same way: with a [`ProviderError`].

use std::time::Duration;

use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse,
};
use async_trait::async_trait;

use crate::cleanup::OutputFilter;
use crate::config::ProviderConfig;
use crate::error::{DebateError, ProviderError};
use crate::persona::{Persona, RenderedPrompt};

/// One external text-generation endpoint.
#[async_trait]
pub trait TextProvider: Send + Sync + std::fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Generate raw text for `prompt`. No retries; the fallback chain
    /// decides what happens next.
    async fn generate(&self, prompt: &RenderedPrompt, timeout: Duration)
    -> Result<String, ProviderError>;
}

/// Call `provider` under `timeout` and run the result through `filter`.
pub async fn generate_line(
    provider: &dyn TextProvider,
    prompt: &RenderedPrompt,
    persona: &Persona,
    filter: &OutputFilter,
    timeout: Duration,
) -> Result<String, ProviderError> {
    let raw = tokio::time::timeout(timeout, provider.generate(prompt, timeout))
        .await
        .map_err(|_| ProviderError::Timeout(timeout))??;

    filter
        .accept(&raw, prompt, persona)
        .ok_or(ProviderError::Empty)
}

/// Any endpoint speaking the OpenAI chat completions protocol.
#[derive(Debug)]
pub struct OpenAiCompatibleProvider {
    name: String,
    api_base: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    http: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        name: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, DebateError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                DebateError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            name: name.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            max_tokens: 80,
            temperature: 0.9,
            http,
        })
    }

    /// Build from config, resolving the API key from the environment.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, DebateError> {
        let api_key = config.api_key()?;
        let mut provider = Self::new(&config.name, &config.api_base, &config.model)?
            .with_sampling(config.max_tokens, config.temperature);
        provider.api_key = api_key;
        Ok(provider)
    }

    /// Set the bearer credential.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

#[async_trait]
impl TextProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &RenderedPrompt,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: prompt.system.clone().into(),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: prompt.user.clone().into(),
                name: None,
            }),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(self.max_tokens)
            .temperature(self.temperature)
            .messages(messages)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let mut builder = self.http.post(self.endpoint()).timeout(timeout).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::HttpStatus(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| classify(e, timeout))?;
        let parsed: CreateChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let choice = parsed
            .choices
            .first()
            .ok_or_else(|| ProviderError::Malformed("response has no choices".to_string()))?;

        match choice.message.content.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(ProviderError::Empty),
        }
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if let Some(status) = error.status() {
        ProviderError::HttpStatus(status.as_u16())
    } else if error.is_decode() {
        ProviderError::Malformed(error.to_string())
    } else {
        ProviderError::Transport(error.to_string())
    }
}
