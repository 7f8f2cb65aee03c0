//! Mutable state of one debate.
//!
//! A [`Session`] knows nothing about locking or timers; the orchestrator
//! owns it behind a mutex and is its only writer.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{DebateSettings, ViewerSettings};
use crate::persona::SYSTEM_SPEAKER;

/// How many recent speakers the selector gets to see.
const RECENT_SPEAKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Stopped,
    Starting,
    Live,
}

/// One published line of dialogue. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    pub id: u64,
    /// Persona id, or `"system"`.
    #[serde(rename = "ai")]
    pub speaker: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub reactions: u32,
    pub is_response: bool,
}

impl Utterance {
    pub fn is_system(&self) -> bool {
        self.speaker == SYSTEM_SPEAKER
    }
}

/// Read-only copy of the session handed to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub topic: String,
    pub topic_context: Option<String>,
    pub messages: Vec<Utterance>,
    pub scores: BTreeMap<String, u32>,
    pub is_live: bool,
    pub viewers: u32,
    pub topic_timer: u32,
    pub status: Phase,
}

#[derive(Debug)]
pub struct Session {
    phase: Phase,
    topic: String,
    topic_context: Option<String>,
    transcript: VecDeque<Utterance>,
    transcript_limit: usize,
    scores: BTreeMap<String, u32>,
    viewers: u32,
    viewer_min: u32,
    viewer_max: u32,
    countdown: u32,
    topic_duration: u32,
    recent_speakers: VecDeque<String>,
    generation: u64,
    /// Bumped on every topic change, including starts.
    topic_epoch: u64,
    next_id: u64,
}

impl Session {
    pub fn new(
        persona_ids: &[String],
        default_topic: impl Into<String>,
        debate: &DebateSettings,
        viewers: &ViewerSettings,
    ) -> Self {
        Self {
            phase: Phase::Stopped,
            topic: default_topic.into(),
            topic_context: None,
            transcript: VecDeque::with_capacity(debate.transcript_limit),
            transcript_limit: debate.transcript_limit.max(1),
            scores: persona_ids.iter().map(|id| (id.clone(), 0)).collect(),
            viewers: viewers.initial.clamp(viewers.min, viewers.max),
            viewer_min: viewers.min,
            viewer_max: viewers.max,
            countdown: debate.topic_duration_secs,
            topic_duration: debate.topic_duration_secs,
            recent_speakers: VecDeque::with_capacity(RECENT_SPEAKERS),
            generation: 0,
            topic_epoch: 0,
            next_id: 1,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn is_live(&self) -> bool {
        self.phase == Phase::Live
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while the debate started as `generation` is still running.
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_live() && self.generation == generation
    }

    pub fn topic_epoch(&self) -> u64 {
        self.topic_epoch
    }

    /// True while `generation` is running and still on the topic of `topic_epoch`.
    pub fn is_current_topic(&self, generation: u64, topic_epoch: u64) -> bool {
        self.is_current(generation) && self.topic_epoch == topic_epoch
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn topic_context(&self) -> Option<&str> {
        self.topic_context.as_deref()
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn viewers(&self) -> u32 {
        self.viewers
    }

    pub fn scores(&self) -> &BTreeMap<String, u32> {
        &self.scores
    }

    pub fn transcript(&self) -> &VecDeque<Utterance> {
        &self.transcript
    }

    /// Persona id of the latest speaker since start or the last rotation.
    pub fn last_speaker(&self) -> Option<&str> {
        self.recent_speakers.back().map(String::as_str)
    }

    /// Recent speakers, oldest first.
    pub fn recent_speakers(&self) -> Vec<String> {
        self.recent_speakers.iter().cloned().collect()
    }

    /// Begin a new debate on `topic`. Returns the new generation.
    pub fn reset_for_start(&mut self, topic: String, topic_context: Option<String>) -> u64 {
        self.topic = topic;
        self.topic_context = topic_context;
        self.transcript.clear();
        self.scores.values_mut().for_each(|s| *s = 0);
        self.recent_speakers.clear();
        self.countdown = self.topic_duration;
        self.topic_epoch += 1;
        self.generation += 1;
        self.generation
    }

    /// End the debate: not live, all scores zero.
    pub fn stop(&mut self) {
        self.phase = Phase::Stopped;
        self.scores.values_mut().for_each(|s| *s = 0);
    }

    /// Append to the transcript, dropping the oldest entries past the limit.
    pub fn append(
        &mut self,
        speaker: &str,
        text: impl Into<String>,
        reactions: u32,
        is_response: bool,
    ) -> Utterance {
        let utterance = Utterance {
            id: self.next_id,
            speaker: speaker.to_string(),
            text: text.into(),
            timestamp: Utc::now(),
            reactions,
            is_response,
        };
        self.next_id += 1;

        self.transcript.push_back(utterance.clone());
        while self.transcript.len() > self.transcript_limit {
            self.transcript.pop_front();
        }
        utterance
    }

    /// Add points to a persona. Unknown ids are ignored.
    pub fn award(&mut self, persona: &str, points: u32) -> bool {
        match self.scores.get_mut(persona) {
            Some(score) => {
                *score = score.saturating_add(points);
                true
            }
            None => false,
        }
    }

    /// Shift the viewer gauge by `delta`, clamped to the configured bounds.
    pub fn walk_viewers(&mut self, delta: i64) -> u32 {
        let next = (i64::from(self.viewers) + delta)
            .clamp(i64::from(self.viewer_min), i64::from(self.viewer_max));
        self.viewers = u32::try_from(next).unwrap_or(self.viewer_min);
        self.viewers
    }

    /// One second passes. Returns what is left.
    pub fn tick_countdown(&mut self) -> u32 {
        self.countdown = self.countdown.saturating_sub(1);
        self.countdown
    }

    /// Switch to a new topic and restart its countdown.
    pub fn rotate_topic(&mut self, topic: String, topic_context: Option<String>) {
        self.topic = topic;
        self.topic_context = topic_context;
        self.countdown = self.topic_duration;
        self.recent_speakers.clear();
        self.topic_epoch += 1;
    }

    pub fn record_speaker(&mut self, persona: &str) {
        if self.recent_speakers.len() == RECENT_SPEAKERS {
            self.recent_speakers.pop_front();
        }
        self.recent_speakers.push_back(persona.to_string());
    }

    /// The last `n` persona utterances, oldest first.
    pub fn recent_utterances(&self, n: usize) -> Vec<Utterance> {
        let mut lines: Vec<Utterance> = self
            .transcript
            .iter()
            .rev()
            .filter(|u| !u.is_system())
            .take(n)
            .cloned()
            .collect();
        lines.reverse();
        lines
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            topic: self.topic.clone(),
            topic_context: self.topic_context.clone(),
            messages: self.transcript.iter().cloned().collect(),
            scores: self.scores.clone(),
            is_live: self.is_live(),
            viewers: self.viewers,
            topic_timer: self.countdown,
            status: self.phase,
        }
    }
}
