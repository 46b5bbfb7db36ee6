//! Name normalization and matching strategies.
//!
//! Shared by the escalating searcher chain and the session resolver, so
//! every resolver agrees on what counts as the "same name".

use once_cell::sync::Lazy;
use regex::Regex;

static TITLE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(mr|mrs|ms|dr|prof)\.?\s+").expect("title prefix regex is valid")
});

static SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[,\s]+(jr|sr|ii|iii|iv)\.?$").expect("suffix regex is valid")
});

/// Normalizes a personal or organizational name for comparison.
///
/// Strips honorific titles (`Mr`, `Mrs`, `Ms`, `Dr`, `Prof`, with an
/// optional trailing dot) and generational suffixes (`Jr`, `Sr`, `II`,
/// `III`, `IV`), collapses whitespace, and lowercases.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    let without_title = TITLE_PREFIX.replace(trimmed, "");
    let without_suffix = SUFFIX.replace(&without_title, "");
    without_suffix
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Splits a normalized name into tokens.
#[must_use]
pub fn name_tokens(name: &str) -> Vec<String> {
    normalize_name(name)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Returns true if the two names are equal after normalization.
#[must_use]
pub fn normalized_equal(a: &str, b: &str) -> bool {
    let a = normalize_name(a);
    !a.is_empty() && a == normalize_name(b)
}

/// Partial-name match: a single-token name against a multi-token name.
///
/// Matches when the single token appears among the multi-token name's
/// tokens and both compared tokens are at least `min_part_length` long.
/// Two single-token or two multi-token names never partially match; the
/// exact and fuzzy strategies cover those.
#[must_use]
pub fn partial_name_match(a: &str, b: &str, min_part_length: usize) -> bool {
    let tokens_a = name_tokens(a);
    let tokens_b = name_tokens(b);
    let (single, multi) = match (tokens_a.len(), tokens_b.len()) {
        (1, n) if n > 1 => (&tokens_a[0], &tokens_b),
        (n, 1) if n > 1 => (&tokens_b[0], &tokens_a),
        _ => return false,
    };
    if single.chars().count() < min_part_length {
        return false;
    }
    multi
        .iter()
        .any(|token| token == single && token.chars().count() >= min_part_length)
}

/// Fuzzy match by Levenshtein distance.
///
/// Distance threshold is `⌊min(len_a, len_b) * max_distance_ratio⌋` on
/// the normalized forms. Skipped entirely when either normalized name is
/// shorter than `min_length_for_fuzzy`, so short names cannot alias each
/// other by a single edit.
#[must_use]
pub fn fuzzy_name_match(
    a: &str,
    b: &str,
    max_distance_ratio: f64,
    min_length_for_fuzzy: usize,
) -> bool {
    let a = normalize_name(a);
    let b = normalize_name(b);
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a < min_length_for_fuzzy || len_b < min_length_for_fuzzy {
        return false;
    }
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let threshold = (len_a.min(len_b) as f64 * max_distance_ratio).floor() as usize;
    strsim::levenshtein(&a, &b) <= threshold
}
