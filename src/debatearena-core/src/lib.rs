//! Debate Arena Core Library
//!
//! Runs a live debate between scripted personas: turn-taking, text
//! generation through a chain of unreliable providers, topic rotation and
//! event fan-out to viewers.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod fallback;
pub mod mock;
pub mod orchestrator;
pub mod persona;
pub mod provider;
pub mod publisher;
pub mod scoring;
pub mod selector;
pub mod session;
pub mod topic;

pub use config::{ArenaConfig, ExhaustionPolicy, default_config};
pub use error::{DebateError, ProviderError, TopicError};
pub use fallback::{FallbackChain, Resolution, ResponseSource, UtteranceRequest};
pub use orchestrator::{ChatAck, DebateOrchestrator};
pub use persona::Persona;
pub use provider::{OpenAiCompatibleProvider, TextProvider};
pub use publisher::{DebateEvent, Publisher, Subscription};
pub use session::{Phase, SessionSnapshot, Utterance};
pub use topic::{Topic, TopicFeed, TopicOrigin, TopicSource};
