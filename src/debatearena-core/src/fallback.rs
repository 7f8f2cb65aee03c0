//! The fallback chain behind every persona line.
//!
//! Providers are tried in order under a bounded timeout; the first usable
//! answer wins and later providers are never queried. When all of them fail
//! the chain either answers from the persona's canned lines or reports
//! exhaustion, depending on [`ExhaustionPolicy`].

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::cleanup::{OutputFilter, polish};
use crate::config::{ArenaConfig, ExhaustionPolicy};
use crate::error::DebateError;
use crate::persona::{ContextLine, Persona};
use crate::provider::{OpenAiCompatibleProvider, TextProvider, generate_line};

/// Said when a persona has no canned line that fits at all.
const LAST_RESORT_LINE: &str = "I want to hear more before I take a side on this.";

/// Everything needed to produce one line for one persona.
#[derive(Debug, Clone)]
pub struct UtteranceRequest {
    pub persona: Persona,
    pub topic: String,
    pub topic_context: Option<String>,
    /// Earlier lines, oldest first.
    pub context: Vec<ContextLine>,
    /// Persona id of the previous speaker, if any.
    pub last_speaker: Option<String>,
}

/// Where a resolved line came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    Provider(String),
    Canned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub text: String,
    pub source: ResponseSource,
}

/// Ordered providers followed by the canned pool.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    providers: Vec<Arc<dyn TextProvider>>,
    filter: OutputFilter,
    timeout: Duration,
    policy: ExhaustionPolicy,
}

impl FallbackChain {
    pub fn new(providers: Vec<Arc<dyn TextProvider>>, timeout: Duration) -> Self {
        Self {
            providers,
            filter: OutputFilter::default(),
            timeout,
            policy: ExhaustionPolicy::Canned,
        }
    }

    /// Build the chain from config. Providers whose credential is missing
    /// are skipped with a warning.
    pub fn from_config(config: &ArenaConfig) -> Self {
        let providers = config
            .providers
            .iter()
            .filter_map(|p| match OpenAiCompatibleProvider::from_config(p) {
                Ok(provider) => Some(Arc::new(provider) as Arc<dyn TextProvider>),
                Err(e) => {
                    warn!(provider = %p.name, error = %e, "Skipping provider");
                    None
                }
            })
            .collect();

        Self::new(providers, config.generation.timeout())
            .with_filter(OutputFilter::from(&config.generation))
            .with_policy(config.generation.on_exhaustion)
    }

    pub fn with_filter(mut self, filter: OutputFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ExhaustionPolicy {
        self.policy
    }

    /// Names of the configured providers, in order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Produce a line for `request`.
    ///
    /// Under [`ExhaustionPolicy::Canned`] this never returns an error.
    pub async fn resolve(&self, request: &UtteranceRequest) -> Result<Resolution, DebateError> {
        let persona = &request.persona;
        let prompt = persona.render_prompt(
            &request.topic,
            request.topic_context.as_deref(),
            &request.context,
        );

        for provider in &self.providers {
            match generate_line(provider.as_ref(), &prompt, persona, &self.filter, self.timeout)
                .await
            {
                Ok(text) => {
                    debug!(persona = %persona.id, provider = %provider.name(), "Provider answered");
                    return Ok(Resolution {
                        text: polish(&text, persona),
                        source: ResponseSource::Provider(provider.name().to_string()),
                    });
                }
                Err(e) => {
                    warn!(
                        persona = %persona.id,
                        provider = %provider.name(),
                        error = %e,
                        "Provider failed, trying next candidate"
                    );
                }
            }
        }

        match self.policy {
            ExhaustionPolicy::Canned => {
                let line = canned_line(
                    persona,
                    &request.topic,
                    request.last_speaker.as_deref(),
                    &mut rand::thread_rng(),
                );
                debug!(persona = %persona.id, "Answering from canned lines");
                Ok(Resolution {
                    text: polish(&line, persona),
                    source: ResponseSource::Canned,
                })
            }
            ExhaustionPolicy::Placeholder => Err(DebateError::AllProvidersExhausted {
                persona: persona.id.clone(),
            }),
        }
    }
}

/// All canned lines that fit the current topic and previous speaker.
pub fn canned_candidates<'a>(
    persona: &'a Persona,
    topic: &str,
    last_speaker: Option<&str>,
) -> Vec<&'a str> {
    let canned = &persona.canned;
    let mut candidates: Vec<&str> = canned.general.iter().map(String::as_str).collect();

    candidates.extend(
        canned
            .keyword_lines
            .iter()
            .filter(|k| mentions(topic, &k.keyword))
            .map(|k| k.line.as_str()),
    );

    if let Some(lines) = last_speaker.and_then(|s| canned.rebuttals.get(s)) {
        candidates.extend(lines.iter().map(String::as_str));
    }

    candidates.retain(|line| !line.trim().is_empty());
    candidates
}

/// Pick a canned line uniformly from the fitting candidates.
pub fn canned_line<R: Rng + ?Sized>(
    persona: &Persona,
    topic: &str,
    last_speaker: Option<&str>,
    rng: &mut R,
) -> String {
    let candidates = canned_candidates(persona, topic, last_speaker);
    if candidates.is_empty() {
        return LAST_RESORT_LINE.to_string();
    }
    candidates[rng.gen_range(0..candidates.len())].to_string()
}

/// Whole-word, case-insensitive match of `keyword` in `topic`.
fn mentions(topic: &str, keyword: &str) -> bool {
    let keyword = keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return false;
    }
    let topic = topic.to_lowercase();
    topic.match_indices(&keyword).any(|(start, _)| {
        let before = topic[..start].chars().next_back();
        let after = topic[start + keyword.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::mock::ScriptedProvider;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rex() -> Persona {
        Persona::new("rex", "Rex", "The Skeptic")
            .with_prompt("You are {name}, {role}.")
            .with_line("What are the unintended consequences here?")
            .with_line("This sounds too good to be true. What's the catch?")
            .with_keyword_line("ai", "Who is liable when the AI is wrong?")
            .with_rebuttal("luna", "Good intentions don't guarantee good outcomes.")
    }

    fn request(topic: &str, last: Option<&str>) -> UtteranceRequest {
        UtteranceRequest {
            persona: rex(),
            topic: topic.to_string(),
            topic_context: None,
            context: vec![ContextLine::new("Luna", "Rights for everyone.")],
            last_speaker: last.map(str::to_string),
        }
    }

    fn chain(providers: &[Arc<ScriptedProvider>]) -> FallbackChain {
        FallbackChain::new(
            providers
                .iter()
                .map(|p| p.clone() as Arc<dyn TextProvider>)
                .collect(),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_short_circuits_on_first_success() {
        let providers = vec![
            Arc::new(ScriptedProvider::always_err("a", ProviderError::HttpStatus(503))),
            Arc::new(ScriptedProvider::always_err("b", ProviderError::Malformed("x".into()))),
            Arc::new(ScriptedProvider::always_ok("c", "Regulation always has a hidden cost.")),
            Arc::new(ScriptedProvider::always_ok("d", "This line must never be requested.")),
        ];
        let resolution = chain(&providers).resolve(&request("t", None)).await.unwrap();

        assert_eq!(resolution.text, "Regulation always has a hidden cost.");
        assert_eq!(resolution.source, ResponseSource::Provider("c".to_string()));
        let calls: Vec<usize> = providers.iter().map(|p| p.calls()).collect();
        assert_eq!(calls, vec![1, 1, 1, 0]);
    }

    #[tokio::test]
    async fn test_all_providers_down_uses_canned_pool() {
        let timeout = ProviderError::Timeout(Duration::from_secs(10));
        let providers = vec![
            Arc::new(ScriptedProvider::always_err("a", timeout.clone())),
            Arc::new(ScriptedProvider::always_err("b", timeout)),
        ];
        let req = request("Should AI have rights?", Some("luna"));
        let pool = canned_candidates(&req.persona, &req.topic, Some("luna"));

        for _ in 0..20 {
            let resolution = chain(&providers).resolve(&req).await.unwrap();
            assert_eq!(resolution.source, ResponseSource::Canned);
            assert!(!resolution.text.is_empty());
            assert!(pool.contains(&resolution.text.as_str()), "{}", resolution.text);
        }
        assert_eq!(providers[0].calls(), 20);
        assert_eq!(providers[1].calls(), 20);
    }

    #[tokio::test]
    async fn test_no_providers_goes_straight_to_canned() {
        let resolution = chain(&[]).resolve(&request("t", None)).await.unwrap();
        assert_eq!(resolution.source, ResponseSource::Canned);
    }

    #[tokio::test]
    async fn test_rejected_output_moves_to_next_provider() {
        let providers = vec![
            Arc::new(ScriptedProvider::always_ok("echo", "Rex:")),
            Arc::new(ScriptedProvider::always_ok("good", "Show me the failure modes first.")),
        ];
        let resolution = chain(&providers).resolve(&request("t", None)).await.unwrap();
        assert_eq!(resolution.source, ResponseSource::Provider("good".to_string()));
    }

    #[tokio::test]
    async fn test_placeholder_policy_reports_exhaustion() {
        let providers = vec![Arc::new(ScriptedProvider::always_err(
            "a",
            ProviderError::Transport("refused".into()),
        ))];
        let err = chain(&providers)
            .with_policy(ExhaustionPolicy::Placeholder)
            .resolve(&request("t", None))
            .await
            .unwrap_err();
        assert!(matches!(err, DebateError::AllProvidersExhausted { persona } if persona == "rex"));
    }

    #[tokio::test]
    async fn test_polish_applies_to_canned_lines() {
        let persona =
            Persona::new("rex", "Rex", "The Skeptic").with_line("As Rex, I doubt every promise.");
        let req = UtteranceRequest {
            persona,
            ..request("t", None)
        };
        let resolution = chain(&[]).resolve(&req).await.unwrap();
        assert_eq!(resolution.text, "I doubt every promise.");
    }

    #[test]
    fn test_candidates_follow_topic_and_last_speaker() {
        let persona = rex();
        assert_eq!(canned_candidates(&persona, "Is privacy dead?", None).len(), 2);
        assert_eq!(canned_candidates(&persona, "Should AI have rights?", None).len(), 3);
        assert_eq!(canned_candidates(&persona, "Should AI have rights?", Some("luna")).len(), 4);
        // "ai" inside another word is not a mention.
        assert_eq!(canned_candidates(&persona, "Is this fair to workers?", None).len(), 2);
    }

    #[test]
    fn test_canned_line_without_lines_still_answers() {
        let persona = Persona::new("mute", "Mute", "The Silent");
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(canned_line(&persona, "t", None, &mut rng), LAST_RESORT_LINE);
    }

    #[test]
    fn test_mentions_multiword_keyword() {
        assert!(mentions("Should social media be regulated?", "Social Media"));
        assert!(!mentions("Should socialmedia be regulated?", "social media"));
    }
}
