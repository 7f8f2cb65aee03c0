//! Turn-taking rules.
//!
//! The selector encodes the rhetorical shape of the debate: each persona has
//! a small set of likely responders (the idealist draws the skeptic or the
//! pragmatist, and so on). Personas without a rule are answered by anyone.

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use serde::Deserialize;

/// Number of most recent speakers a "respond to anyone" pick tries to avoid.
const AVOID_RECENT: usize = 2;

/// A weighted candidate to speak after [`TurnRule::from`].
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Responder {
    pub persona: String,
    pub weight: f64,
}

/// Who is likely to respond after `from` speaks.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TurnRule {
    pub from: String,
    pub responders: Vec<Responder>,
}

impl TurnRule {
    pub fn new(from: impl Into<String>, responders: &[(&str, f64)]) -> Self {
        Self {
            from: from.into(),
            responders: responders
                .iter()
                .map(|(persona, weight)| Responder {
                    persona: persona.to_string(),
                    weight: *weight,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    from: String,
    responders: Vec<String>,
    weights: WeightedIndex<f64>,
}

/// Picks the next speaker from a static adjacency table.
#[derive(Debug, Clone)]
pub struct SpeakerSelector {
    personas: Vec<String>,
    rules: Vec<CompiledRule>,
}

impl SpeakerSelector {
    /// Build a selector. Rules with unusable weights are skipped, so the
    /// affected persona falls back to "anyone responds".
    pub fn new(personas: Vec<String>, rules: &[TurnRule]) -> Self {
        let rules = rules
            .iter()
            .filter_map(|rule| {
                let weights =
                    WeightedIndex::new(rule.responders.iter().map(|r| r.weight)).ok()?;
                Some(CompiledRule {
                    from: rule.from.clone(),
                    responders: rule.responders.iter().map(|r| r.persona.clone()).collect(),
                    weights,
                })
            })
            .collect();

        Self { personas, rules }
    }

    pub fn personas(&self) -> &[String] {
        &self.personas
    }

    /// Pick the next speaker.
    ///
    /// `history` lists recent speakers, oldest first. Given the same RNG
    /// state the result is always the same.
    pub fn next<R: Rng + ?Sized>(
        &self,
        last: Option<&str>,
        history: &[String],
        rng: &mut R,
    ) -> &str {
        let Some(last) = last else {
            return self.uniform(rng);
        };

        if let Some(rule) = self.rules.iter().find(|r| r.from == last) {
            return &rule.responders[rule.weights.sample(rng)];
        }

        let others: Vec<&String> = self.personas.iter().filter(|p| *p != last).collect();
        if others.is_empty() {
            return self.uniform(rng);
        }

        let recent = &history[history.len().saturating_sub(AVOID_RECENT)..];
        let fresh: Vec<&String> = others
            .iter()
            .copied()
            .filter(|p| !recent.iter().any(|r| r == *p))
            .collect();
        let pool = if fresh.is_empty() { others } else { fresh };

        pool[rng.gen_range(0..pool.len())]
    }

    fn uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.personas[rng.gen_range(0..self.personas.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn default_selector() -> SpeakerSelector {
        SpeakerSelector::new(
            ["alex", "luna", "rex", "sage"].iter().map(|s| s.to_string()).collect(),
            &[
                TurnRule::new("luna", &[("rex", 1.0), ("alex", 1.0)]),
                TurnRule::new("alex", &[("luna", 1.0), ("rex", 1.0)]),
                TurnRule::new("rex", &[("sage", 1.0), ("luna", 1.0)]),
            ],
        )
    }

    #[test]
    fn test_same_seed_same_speaker() {
        let selector = default_selector();
        for seed in 0..50 {
            let a = selector
                .next(Some("luna"), &[], &mut StdRng::seed_from_u64(seed))
                .to_string();
            let b = selector
                .next(Some("luna"), &[], &mut StdRng::seed_from_u64(seed))
                .to_string();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_rule_only_picks_listed_responders() {
        let selector = default_selector();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let next = selector.next(Some("luna"), &[], &mut rng);
            assert!(next == "rex" || next == "alex", "unexpected responder {next}");
        }
    }

    #[test]
    fn test_distribution_matches_weights() {
        let selector = default_selector();
        let trials = 10_000;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for seed in 0..trials {
            let next = selector.next(Some("rex"), &[], &mut StdRng::seed_from_u64(seed as u64));
            *counts.entry(next.to_string()).or_default() += 1;
        }
        let sage = counts.get("sage").copied().unwrap_or(0) as f64 / trials as f64;
        let luna = counts.get("luna").copied().unwrap_or(0) as f64 / trials as f64;
        assert!((sage - 0.5).abs() < 0.03, "sage share {sage}");
        assert!((luna - 0.5).abs() < 0.03, "luna share {luna}");
    }

    #[test]
    fn test_uneven_weights() {
        let selector = SpeakerSelector::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            &[TurnRule::new("a", &[("b", 3.0), ("c", 1.0)])],
        );
        let mut rng = StdRng::seed_from_u64(42);
        let b = (0..8_000)
            .filter(|_| selector.next(Some("a"), &[], &mut rng) == "b")
            .count() as f64
            / 8_000.0;
        assert!((b - 0.75).abs() < 0.03, "b share {b}");
    }

    #[test]
    fn test_no_last_speaker_covers_everyone() {
        let selector = default_selector();
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen: Vec<String> = (0..400)
            .map(|_| selector.next(None, &[], &mut rng).to_string())
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen, vec!["alex", "luna", "rex", "sage"]);
    }

    #[test]
    fn test_mediator_hands_off_to_someone_else() {
        let selector = default_selector();
        let mut rng = StdRng::seed_from_u64(11);
        let history = vec!["alex".to_string(), "sage".to_string()];
        for _ in 0..200 {
            let next = selector.next(Some("sage"), &history, &mut rng);
            assert_ne!(next, "sage");
            assert_ne!(next, "alex", "recent speaker should be avoided");
        }
    }

    #[test]
    fn test_single_persona_answers_itself() {
        let selector = SpeakerSelector::new(vec!["solo".to_string()], &[]);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(selector.next(Some("solo"), &[], &mut rng), "solo");
    }
}
