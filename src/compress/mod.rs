//! Entity-neighborhood context compression.
//!
//! LLM arbiter prompts carry a slice of the raw source text around the
//! entity under discussion, not the whole chunk. The compressor reduces a
//! source text to the neighborhoods of an entity name, with three modes
//! trading fidelity against size.

use once_cell::sync::Lazy;
use regex::Regex;

/// Compression mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMode {
    /// Character windows around each occurrence, merged when overlapping.
    Window,
    /// Whole sentences containing the entity name or a name token.
    Sentence,
    /// `Window` for long inputs, `Sentence` for medium, passthrough for
    /// short.
    #[default]
    Adaptive,
}

impl CompressionMode {
    /// Returns the mode as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Window => "window",
            Self::Sentence => "sentence",
            Self::Adaptive => "adaptive",
        }
    }
}

/// Configuration for the context compressor.
#[derive(Debug, Clone)]
pub struct CompressorConfig {
    /// Maximum occurrences expanded in `Window` mode.
    pub max_snippets: usize,
    /// Characters taken on each side of an occurrence in `Window` mode.
    pub window_chars: usize,
    /// Total output budget in `Window` mode.
    pub max_total_chars: usize,
    /// Maximum sentences selected in `Sentence` mode.
    pub max_sentences: usize,
    /// Whether to pad each selected sentence with one neighbor on each
    /// side.
    pub pad_sentences: bool,
    /// Inputs no longer than this pass through unchanged in `Adaptive`
    /// mode.
    pub short_threshold: usize,
    /// Inputs longer than this use `Window` in `Adaptive` mode; between
    /// the thresholds, `Sentence`.
    pub medium_threshold: usize,
    /// Leading-text budget when the entity is not found at all.
    pub fallback_chars: usize,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            max_snippets: 5,
            window_chars: 160,
            max_total_chars: 1_200,
            max_sentences: 6,
            pad_sentences: true,
            short_threshold: 400,
            medium_threshold: 2_000,
            fallback_chars: 300,
        }
    }
}

/// Compresses raw source text to entity-neighborhood snippets.
///
/// Never returns an empty string for non-empty input: when no occurrence
/// of the entity is found in any mode, the leading `fallback_chars`
/// characters are returned instead.
pub struct ContextCompressor {
    mode: CompressionMode,
    config: CompressorConfig,
}

static SENTENCE_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    // Sentence end: terminal punctuation followed by whitespace. Keeps the
    // punctuation with the preceding sentence.
    Regex::new(r"(?s)(.*?[.!?])(?:\s+|\z)").expect("sentence boundary regex is valid")
});

impl ContextCompressor {
    /// Creates a compressor with the given mode and configuration.
    #[must_use]
    pub const fn new(mode: CompressionMode, config: CompressorConfig) -> Self {
        Self { mode, config }
    }

    /// Creates an adaptive compressor with default settings.
    #[must_use]
    pub fn adaptive() -> Self {
        Self::new(CompressionMode::Adaptive, CompressorConfig::default())
    }

    /// Compresses `source_text` to the neighborhoods of `entity_name`.
    #[must_use]
    pub fn compress(&self, source_text: &str, entity_name: &str) -> String {
        if source_text.is_empty() {
            return String::new();
        }
        let compressed = match self.mode {
            CompressionMode::Window => self.window(source_text, entity_name),
            CompressionMode::Sentence => self.sentence(source_text, entity_name),
            CompressionMode::Adaptive => {
                let len = source_text.chars().count();
                if len > self.config.medium_threshold {
                    self.window(source_text, entity_name)
                } else if len > self.config.short_threshold {
                    self.sentence(source_text, entity_name)
                } else {
                    Some(source_text.to_string())
                }
            },
        };
        compressed.unwrap_or_else(|| leading_chars(source_text, self.config.fallback_chars))
    }

    /// Window mode: expand each occurrence to a character window, snap to
    /// word boundaries, merge overlapping ranges, cap the total.
    fn window(&self, text: &str, entity_name: &str) -> Option<String> {
        let occurrences = find_occurrences(text, entity_name, self.config.max_snippets);
        if occurrences.is_empty() {
            return None;
        }

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for (start, end) in occurrences {
            let window_start =
                snap_to_word_start(text, start.saturating_sub(self.config.window_chars));
            let window_end =
                snap_to_word_end(text, (end + self.config.window_chars).min(text.len()));
            if window_start >= window_end {
                continue;
            }
            match ranges.last_mut() {
                Some(last) if window_start <= last.1 => last.1 = last.1.max(window_end),
                _ => ranges.push((window_start, window_end)),
            }
        }
        if ranges.is_empty() {
            return None;
        }

        let mut out = String::new();
        for (start, end) in ranges {
            if !out.is_empty() {
                out.push_str(" ... ");
            }
            out.push_str(text[start..end].trim());
            if out.chars().count() >= self.config.max_total_chars {
                return Some(leading_chars(&out, self.config.max_total_chars));
            }
        }
        Some(out)
    }

    /// Sentence mode: select sentences containing the name or any name
    /// token of three or more characters, optionally padded by one
    /// sentence on each side.
    fn sentence(&self, text: &str, entity_name: &str) -> Option<String> {
        let sentences: Vec<&str> = SENTENCE_BOUNDARY
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .collect();
        if sentences.is_empty() {
            return contains_any_token(text, entity_name).then(|| text.trim().to_string());
        }

        let mut selected = vec![false; sentences.len()];
        let mut hits = 0;
        for (i, sentence) in sentences.iter().enumerate() {
            if hits >= self.config.max_sentences {
                break;
            }
            if contains_any_token(sentence, entity_name) {
                selected[i] = true;
                hits += 1;
                if self.config.pad_sentences {
                    if i > 0 {
                        selected[i - 1] = true;
                    }
                    if i + 1 < sentences.len() {
                        selected[i + 1] = true;
                    }
                }
            }
        }
        if hits == 0 {
            return None;
        }

        let mut out = String::new();
        for (i, sentence) in sentences.iter().enumerate() {
            if selected[i] {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(sentence);
            }
        }
        Some(out)
    }
}

/// Finds up to `max` case-insensitive occurrences of `name`, returned as
/// byte ranges in the original text.
fn find_occurrences(text: &str, name: &str, max: usize) -> Vec<(usize, usize)> {
    if name.is_empty() {
        return Vec::new();
    }
    let haystack = text.to_lowercase();
    let needle = name.to_lowercase();
    // Lowercasing can shift byte offsets for non-ASCII text; fall back to
    // token scanning when the lengths diverge.
    if haystack.len() != text.len() {
        return Vec::new();
    }
    let mut occurrences = Vec::new();
    let mut from = 0;
    while occurrences.len() < max {
        match haystack[from..].find(&needle) {
            Some(offset) => {
                let start = from + offset;
                occurrences.push((start, start + needle.len()));
                from = start + needle.len();
            },
            None => break,
        }
    }
    occurrences
}

/// True if the text contains the full name or any name token of three or
/// more characters, case-insensitively.
fn contains_any_token(text: &str, name: &str) -> bool {
    let lower = text.to_lowercase();
    let name_lower = name.to_lowercase();
    if lower.contains(&name_lower) {
        return true;
    }
    name_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .any(|token| lower.contains(token))
}

/// Moves a byte offset back onto a char boundary, then forward past a
/// partial word so windows never open mid-token.
fn snap_to_word_start(text: &str, mut offset: usize) -> usize {
    while offset > 0 && !text.is_char_boundary(offset) {
        offset -= 1;
    }
    if offset == 0 {
        return 0;
    }
    match text[offset..].find(char::is_whitespace) {
        Some(ws) => {
            let candidate = offset + ws;
            text[candidate..]
                .char_indices()
                .find(|(_, c)| !c.is_whitespace())
                .map_or(text.len(), |(i, _)| candidate + i)
        },
        None => offset,
    }
}

/// Moves a byte offset onto a char boundary, then back to the end of the
/// last complete word.
fn snap_to_word_end(text: &str, mut offset: usize) -> usize {
    while offset < text.len() && !text.is_char_boundary(offset) {
        offset += 1;
    }
    if offset >= text.len() {
        return text.len();
    }
    text[..offset].rfind(char::is_whitespace).unwrap_or(offset)
}

/// Returns the first `max_chars` characters on a char boundary.
fn leading_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
