//! Deterministic cache keys for translation requests.
//!
//! A fingerprint is `blake3(target_lang ‖ category ‖ char_count ‖ sample)`.
//! Short texts are hashed whole; long texts only contribute a prefix, a
//! middle slice and a suffix, which bounds hashing cost. The character count
//! is always included so two long texts sharing all three slices still differ
//! when their lengths do.

use blake3::Hasher;
use regex::Regex;
use std::sync::OnceLock;

/// Texts up to this many characters are hashed in full.
pub const FULL_SAMPLE_CHARS: usize = 2000;

/// Length of each slice sampled from longer texts.
pub const SLICE_CHARS: usize = 500;

const SEPARATOR: &[u8] = &[0x1f];

/// Coarse content category; part of the fingerprint so the same words in a
/// different structural context do not share an entry.
pub fn detect_category(text: &str) -> &'static str {
    static MARKUP: OnceLock<Option<Regex>> = OnceLock::new();
    static INTERPOLATED: OnceLock<Option<Regex>> = OnceLock::new();

    let markup = MARKUP.get_or_init(|| Regex::new(r"</?[A-Za-z][^<>]*>").ok());
    let interpolated = INTERPOLATED.get_or_init(|| {
        Regex::new(r"\{\{?\s*[\w.]+\s*\}\}?|%[sd]|%\(\w+\)[sd]|\$\{[\w.]+\}").ok()
    });

    if markup.as_ref().is_some_and(|re| re.is_match(text)) {
        "markup"
    } else if interpolated.as_ref().is_some_and(|re| re.is_match(text)) {
        "interpolated"
    } else {
        "plain"
    }
}

/// Compute the cache fingerprint (64 lowercase hex chars).
pub fn fingerprint(text: &str, target_lang: &str, category: &str) -> String {
    let char_count = text.chars().count();

    let mut hasher = Hasher::new();
    hasher.update(target_lang.as_bytes());
    hasher.update(SEPARATOR);
    hasher.update(category.as_bytes());
    hasher.update(SEPARATOR);
    hasher.update(char_count.to_string().as_bytes());
    hasher.update(SEPARATOR);

    if char_count <= FULL_SAMPLE_CHARS {
        hasher.update(text.as_bytes());
    } else {
        let mid_start = char_count / 2 - SLICE_CHARS / 2;
        for start in [0, mid_start, char_count - SLICE_CHARS] {
            hasher.update(char_slice(text, start, SLICE_CHARS).as_bytes());
            hasher.update(SEPARATOR);
        }
    }

    hasher.finalize().to_hex().to_string()
}

/// `len` characters starting at character `start`, clamped to the text.
fn char_slice(text: &str, start: usize, len: usize) -> &str {
    let mut indices = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len()));
    let begin = indices.nth(start).unwrap_or(text.len());
    let end = indices.nth(len.saturating_sub(1)).unwrap_or(text.len());
    &text[begin..end]
}
