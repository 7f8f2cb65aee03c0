//! Persona definitions.
//!
//! Represents the scripted debaters, their prompt templates and the canned
//! lines they fall back on when no provider answers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Speaker id reserved for arena announcements.
pub const SYSTEM_SPEAKER: &str = "system";

/// A line the persona says when the topic mentions `keyword`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordLine {
    pub keyword: String,
    pub line: String,
}

/// Static replies used when every provider has failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CannedLines {
    /// Lines that fit any topic. At least one is required.
    #[serde(default)]
    pub general: Vec<String>,
    /// Lines keyed on words in the topic.
    #[serde(default)]
    pub keyword_lines: Vec<KeywordLine>,
    /// Replies keyed by the id of the persona who spoke last.
    #[serde(default)]
    pub rebuttals: BTreeMap<String, Vec<String>>,
}

/// A debater in the arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Stable id used in scores and on the wire (e.g. "rex").
    pub id: String,
    /// Display name (e.g. "Rex").
    pub name: String,
    /// Short description of the debating stance (e.g. "The Skeptic").
    pub role: String,
    /// System prompt template. Supports `{name}`, `{role}` and `{topic}`.
    pub prompt: String,
    #[serde(default)]
    pub canned: CannedLines,
}

impl Persona {
    /// Create a new persona with an empty prompt and no canned lines.
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: role.into(),
            prompt: String::new(),
            canned: CannedLines::default(),
        }
    }

    /// Set the system prompt template.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Add a general canned line.
    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.canned.general.push(line.into());
        self
    }

    /// Add a canned reply to a specific previous speaker.
    pub fn with_rebuttal(mut self, to: impl Into<String>, line: impl Into<String>) -> Self {
        self.canned
            .rebuttals
            .entry(to.into())
            .or_default()
            .push(line.into());
        self
    }

    /// Add a canned line for topics containing `keyword`.
    pub fn with_keyword_line(
        mut self,
        keyword: impl Into<String>,
        line: impl Into<String>,
    ) -> Self {
        self.canned.keyword_lines.push(KeywordLine {
            keyword: keyword.into(),
            line: line.into(),
        });
        self
    }

    /// Get the full display name with role.
    pub fn display_name_with_role(&self) -> String {
        format!("{} ({})", self.name, self.role)
    }

    /// Render the prompt for one turn.
    pub fn render_prompt(
        &self,
        topic: &str,
        topic_context: Option<&str>,
        context: &[ContextLine],
    ) -> RenderedPrompt {
        let system = self
            .prompt
            .replace("{name}", &self.name)
            .replace("{role}", &self.role)
            .replace("{topic}", topic);

        let mut user = format!("Topic: {topic}\n");
        if let Some(background) = topic_context.filter(|c| !c.trim().is_empty()) {
            user.push_str(&format!("Background: {}\n", background.trim()));
        }
        if context.is_empty() {
            user.push_str("\nNobody has spoken yet. Open the debate.\n");
        } else {
            user.push_str("\nRecent conversation:\n");
            for line in context {
                user.push_str(&format!("{}: {}\n", line.speaker, line.text));
            }
        }
        user.push_str(&format!("\n{}:", self.name));

        RenderedPrompt { system, user }
    }
}

/// One earlier line of dialogue handed to a provider as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLine {
    /// Display name of whoever said it.
    pub speaker: String,
    pub text: String,
}

impl ContextLine {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

/// A fully rendered prompt: persona instructions plus the turn itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl RenderedPrompt {
    /// The prompt as a single block of text, as a completion model would see it.
    pub fn full_text(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}
