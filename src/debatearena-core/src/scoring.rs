//! Score increments awarded per utterance.

use rand::{Rng, RngCore};

use crate::config::{ScoringKind, ScoringSettings};

/// Decides how many points an utterance earns. Always at least 1.
pub trait ScoringPolicy: Send + Sync + std::fmt::Debug {
    fn points(&self, text: &str, rng: &mut dyn RngCore) -> u32;
}

/// Rewards substantive output: longer utterances earn more.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthScoring;

impl ScoringPolicy for LengthScoring {
    fn points(&self, text: &str, _rng: &mut dyn RngCore) -> u32 {
        match text.chars().count() {
            n if n > 80 => 3,
            n if n > 40 => 2,
            _ => 1,
        }
    }
}

/// Uniform increment in `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct RandomScoring {
    min: u32,
    max: u32,
}

impl RandomScoring {
    pub fn new(min: u32, max: u32) -> Self {
        let min = min.max(1);
        Self {
            min,
            max: max.max(min),
        }
    }
}

impl ScoringPolicy for RandomScoring {
    fn points(&self, _text: &str, rng: &mut dyn RngCore) -> u32 {
        rng.gen_range(self.min..=self.max)
    }
}

/// Build the configured policy.
pub fn from_settings(settings: &ScoringSettings) -> Box<dyn ScoringPolicy> {
    match settings.policy {
        ScoringKind::Length => Box::new(LengthScoring),
        ScoringKind::Random => {
            Box::new(RandomScoring::new(settings.random_min, settings.random_max))
        }
    }
}
