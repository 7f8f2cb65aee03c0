//! Error types for the debate arena.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebateError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Debate is not live")]
    NotLive,

    #[error("Chat message is empty")]
    EmptyChatMessage,

    #[error("All providers exhausted for persona '{persona}'")]
    AllProvidersExhausted { persona: String },

    #[error("No topic available")]
    NoTopicAvailable,

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),
}

/// Failure of a single text-generation provider call.
///
/// Every variant is recoverable: the fallback chain logs it and moves on to
/// the next candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider returned HTTP {0}")]
    HttpStatus(u16),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider returned no usable text")]
    Empty,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not build request: {0}")]
    Request(String),
}

/// Failure of a live topic feed. Recovered by the curated topic list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("feed timed out after {0:?}")]
    Timeout(Duration),

    #[error("feed returned HTTP {0}")]
    HttpStatus(u16),

    #[error("feed transport error: {0}")]
    Transport(String),

    #[error("malformed feed: {0}")]
    Malformed(String),

    #[error("feed has no usable items")]
    NoItems,
}
