//! Glossary term protection.
//!
//! Before dispatch, configured terms are swapped for opaque tokens so no
//! backend can mistranslate them; after dispatch, tokens are swapped back for
//! the target-language term, with capitalisation adjusted to how the term
//! appeared in the source and where the token landed in the translation.
//!
//! A term without an entry for the target language is do-not-translate: the
//! source spelling is restored verbatim.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::GlossaryConfig;

/// Glossary construction errors.
#[derive(Debug, Error)]
pub enum GlossaryError {
    /// A term could not be compiled into a matcher.
    #[error("invalid glossary term {term:?}: {source}")]
    InvalidTerm {
        /// The offending source term.
        term: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },
}

/// One protected occurrence, carried from protection to restoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedTerm {
    /// Opaque token inserted into the text.
    pub token: String,
    /// Text exactly as it appeared in the source.
    pub matched: String,
    /// Target-language term, or `None` for do-not-translate.
    pub replacement: Option<String>,
}

struct Entry {
    pattern: Regex,
    targets: BTreeMap<String, String>,
}

/// Compiled glossary.
pub struct Glossary {
    entries: Vec<Entry>,
    token_pattern: Option<Regex>,
}

impl std::fmt::Debug for Glossary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Glossary")
            .field("terms", &self.entries.len())
            .finish()
    }
}

fn token(n: usize) -> String {
    format!("__GLS{n}__")
}

impl Glossary {
    /// Compile every configured term into a case-insensitive whole-word matcher.
    ///
    /// Longer terms are matched first so "Sign in page" wins over "Sign in".
    pub fn from_config(config: &GlossaryConfig) -> Result<Self, GlossaryError> {
        let mut terms: Vec<_> = config
            .terms
            .iter()
            .filter(|t| !t.source.trim().is_empty())
            .collect();
        terms.sort_by_key(|t| std::cmp::Reverse(t.source.chars().count()));

        let mut entries = Vec::with_capacity(terms.len());
        for term in terms {
            let source = term.source.trim();
            let lead = if source.starts_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
            let trail = if source.ends_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
            let pattern = Regex::new(&format!("(?i){lead}{}{trail}", regex::escape(source)))
                .map_err(|source_err| GlossaryError::InvalidTerm {
                    term: term.source.clone(),
                    source: source_err,
                })?;
            entries.push(Entry {
                pattern,
                targets: term.targets.clone(),
            });
        }

        Ok(Self {
            entries,
            token_pattern: Regex::new(r"(?i)__\s*GLS\s*(\d+)\s*__").ok(),
        })
    }

    /// Glossary with no terms.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            token_pattern: None,
        }
    }

    /// Number of configured terms.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no terms are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace every glossary term in `text` with an opaque token.
    pub fn protect(&self, text: &str, target_lang: &str) -> (String, Vec<ProtectedTerm>) {
        let mut protected = Vec::new();
        let mut out = text.to_string();

        for entry in &self.entries {
            let replacement = entry.targets.get(target_lang).cloned();
            let replaced = entry.pattern.replace_all(&out, |caps: &Captures<'_>| {
                let tok = token(protected.len());
                protected.push(ProtectedTerm {
                    token: tok.clone(),
                    matched: caps[0].to_string(),
                    replacement: replacement.clone(),
                });
                tok
            });
            out = replaced.into_owned();
        }

        (out, protected)
    }

    /// Swap tokens back for their terms.
    ///
    /// Tokens are matched leniently (case, inner whitespace) since backends
    /// sometimes touch them. Unknown tokens are left in place.
    pub fn restore(&self, text: &str, terms: &[ProtectedTerm]) -> String {
        if terms.is_empty() {
            return text.to_string();
        }
        let Some(pattern) = &self.token_pattern else {
            return text.to_string();
        };

        pattern
            .replace_all(text, |caps: &Captures<'_>| {
                let Some(term) = caps[1].parse::<usize>().ok().and_then(|i| terms.get(i)) else {
                    return caps[0].to_string();
                };
                match &term.replacement {
                    None => term.matched.clone(),
                    Some(target) => {
                        let start = caps.get(0).map_or(0, |m| m.start());
                        match_case(&term.matched, target, is_sentence_initial(text, start))
                    }
                }
            })
            .into_owned()
    }
}

/// `true` if `pos` starts the text or follows sentence-ending punctuation.
fn is_sentence_initial(text: &str, pos: usize) -> bool {
    let before = text[..pos].trim_end();
    before.is_empty() || before.ends_with(['.', '!', '?', '\n'])
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Apply the capitalisation pattern of `original` to `target`.
fn match_case(original: &str, target: &str, sentence_initial: bool) -> String {
    let letters: Vec<char> = original.chars().filter(|c| c.is_alphabetic()).collect();
    let all_caps = letters.len() > 1 && letters.iter().all(|c| c.is_uppercase());
    let title = letters.first().is_some_and(|c| c.is_uppercase());

    if all_caps {
        target.to_uppercase()
    } else if title || sentence_initial {
        capitalize(target)
    } else {
        target.to_string()
    }
}
