//! Post-processing of generated text.
//!
//! Providers echo prompts, leak reasoning tags, introduce themselves and open
//! with filler. Everything that deals with those quirks lives here so the
//! selection and scoring code only ever sees clean lines.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::GenerationSettings;
use crate::persona::{Persona, RenderedPrompt};

/// Reasoning/internal tags stripped together with their content.
const REASONING_TAGS: [&str; 15] = [
    "thinking",
    "think",
    "reflection",
    "reflect",
    "internal",
    "reasoning",
    "thought",
    "scratch",
    "scratchpad",
    "plan",
    "analysis",
    "analyze",
    "consider",
    "pondering",
    "deliberation",
];

static REASONING_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    REASONING_TAGS
        .iter()
        .filter_map(|tag| Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>")).ok())
        .collect()
});

static ORPHAN_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"</?[\w]+[^>]*>").ok());

static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

static AI_DISCLAIMER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*as an ai(?:\s+(?:language\s+)?model)?\s*,\s*").ok()
});

static GENERIC_OPENER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:great|good|excellent|interesting|fair)\s+(?:question|point)|well|indeed|absolutely|honestly|look|okay|ok|so)\s*[,!.:]\s*",
    )
    .ok()
});

/// Remove reasoning blocks, leftover tags and markdown emphasis.
///
/// Line breaks survive so callers can still pick out the first line.
pub fn strip_reasoning(response: &str) -> String {
    let mut result = response.to_string();

    for re in REASONING_BLOCKS.iter() {
        result = re.replace_all(&result, "").to_string();
    }

    if let Some(re) = ORPHAN_TAG.as_ref() {
        result = re.replace_all(&result, "").to_string();
    }

    result.replace('*', "")
}

/// Collapse runs of whitespace into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    match WHITESPACE.as_ref() {
        Some(re) => re.replace_all(text, " ").trim().to_string(),
        None => text.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

/// Remove an echoed prompt and the trailing `Name:` cue, keeping the first
/// non-empty line of what remains.
pub fn strip_echo(raw: &str, prompt: &RenderedPrompt, speaker_name: &str) -> String {
    let mut text = raw.to_string();
    for echoed in [prompt.full_text(), prompt.user.clone(), prompt.system.clone()] {
        if !echoed.trim().is_empty() {
            text = text.replace(echoed.trim(), "");
        }
    }

    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();

    strip_name_cue(line, speaker_name).to_string()
}

fn strip_name_cue<'a>(line: &'a str, speaker_name: &str) -> &'a str {
    let mut rest = line.trim_start();
    loop {
        let Some(prefix) = rest.get(..speaker_name.len()) else {
            return rest;
        };
        if !prefix.eq_ignore_ascii_case(speaker_name) {
            return rest;
        }
        match rest[speaker_name.len()..].trim_start().strip_prefix(':') {
            Some(after) => rest = after.trim_start(),
            None => return rest,
        }
    }
}

/// Strip self-referential leakage such as "My name is Rex" or
/// "As Luna (The Idealist), ...".
pub fn strip_self_reference(text: &str, persona: &Persona) -> String {
    let name = regex::escape(&persona.name);
    let role = regex::escape(&persona.role);
    let patterns = [
        format!(r"(?i)^\s*{name}\s*(?:\([^)]*\))?\s*:\s*"),
        format!(r"(?i)\s*\bmy name is {name}\b\s*[,.!;]?\s*"),
        format!(r"(?i)^\s*(?:i am|i'm)\s+{name}\b\s*[,.!;]?\s*"),
        format!(r"(?i)^\s*as\s+{name}\b\s*(?:\([^)]*\))?\s*(?:,\s*(?:the\s+)?{role}\s*)?,\s*"),
        format!(r"(?i)^\s*as\s+(?:the\s+)?{role}\s*,\s*"),
    ];

    let mut result = text.to_string();
    for pattern in &patterns {
        if let Ok(re) = Regex::new(pattern) {
            result = re.replace_all(&result, " ").to_string();
        }
    }
    if let Some(re) = AI_DISCLAIMER.as_ref() {
        result = re.replace(&result, "").to_string();
    }

    capitalize_first(&collapse_whitespace(&result))
}

/// Strip filler openers ("Great question!", "Well,", "Indeed,").
pub fn strip_generic_openers(text: &str) -> String {
    let Some(re) = GENERIC_OPENER.as_ref() else {
        return text.trim().to_string();
    };

    let mut result = text.trim().to_string();
    // Openers stack ("Well, indeed, ..."), so strip until nothing matches.
    for _ in 0..4 {
        let stripped = re.replace(&result, "").to_string();
        if stripped == result {
            break;
        }
        result = stripped;
    }
    capitalize_first(result.trim())
}

/// Cleanup applied to every line regardless of where it came from.
///
/// Falls back to the trimmed input when cleanup would leave nothing.
pub fn polish(text: &str, persona: &Persona) -> String {
    let cleaned = strip_generic_openers(&strip_self_reference(text, persona));
    if cleaned.is_empty() {
        collapse_whitespace(text)
    } else {
        cleaned
    }
}

/// Cut `text` to at most `max_chars` characters, preferring a sentence end.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let prefix: String = text.chars().take(max_chars).collect();
    let sentence_end = prefix
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .filter(|end| prefix[..*end].chars().count() > max_chars / 2)
        .last();
    if let Some(end) = sentence_end {
        return prefix[..end].to_string();
    }

    // Leave room for the ellipsis.
    let budget: String = prefix.chars().take(max_chars.saturating_sub(1)).collect();
    match budget.rfind(char::is_whitespace) {
        Some(space) if space > 0 => format!("{}…", budget[..space].trim_end()),
        _ => format!("{}…", budget.trim_end()),
    }
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_lowercase() => first.to_uppercase().chain(chars).collect(),
        _ => text.to_string(),
    }
}

/// Length limits applied to provider output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFilter {
    pub min_chars: usize,
    pub min_words: usize,
    pub max_chars: usize,
}

impl Default for OutputFilter {
    fn default() -> Self {
        Self::from(&GenerationSettings::default())
    }
}

impl From<&GenerationSettings> for OutputFilter {
    fn from(settings: &GenerationSettings) -> Self {
        Self {
            min_chars: settings.min_chars,
            min_words: settings.min_words,
            max_chars: settings.max_chars,
        }
    }
}

impl OutputFilter {
    /// Run the full pipeline on raw provider output.
    ///
    /// Returns `None` when what is left is too short to publish.
    pub fn accept(&self, raw: &str, prompt: &RenderedPrompt, persona: &Persona) -> Option<String> {
        let text = strip_reasoning(raw);
        let line = strip_echo(&text, prompt, &persona.name);
        let polished = strip_generic_openers(&strip_self_reference(&line, persona));
        let text = truncate(&polished, self.max_chars);

        let long_enough = text.chars().count() >= self.min_chars
            && text.split_whitespace().count() >= self.min_words;
        long_enough.then_some(text)
    }
}
