//! Post-translation quality checks.
//!
//! [`QualityChecker::check`] compares a translation with its source and
//! returns the (possibly auto-fixed) text plus any issues found. Issues are
//! diagnostics, never failures.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use crate::config::QualityConfig;

/// A quality finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityIssue {
    /// A source placeholder is absent from the translation.
    MissingPlaceholder {
        /// The placeholder as written in the source.
        placeholder: String,
    },
    /// The translation has a placeholder the source does not.
    UnexpectedPlaceholder {
        /// The stray placeholder.
        placeholder: String,
    },
    /// Opening and closing tags do not pair up.
    UnbalancedTag {
        /// Tag name.
        tag: String,
        /// Opening tags found.
        open: usize,
        /// Closing tags found.
        close: usize,
    },
    /// Translation length is implausible relative to the source.
    LengthRatio {
        /// `translation chars / source chars`.
        ratio: f64,
    },
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPlaceholder { placeholder } => {
                write!(f, "missing placeholder {placeholder}")
            }
            Self::UnexpectedPlaceholder { placeholder } => {
                write!(f, "unexpected placeholder {placeholder}")
            }
            Self::UnbalancedTag { tag, open, close } => {
                write!(f, "unbalanced <{tag}>: {open} open, {close} close")
            }
            Self::LengthRatio { ratio } => write!(f, "length ratio {ratio:.2} out of bounds"),
        }
    }
}

/// Outcome of a quality check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// Translation after auto-fixes.
    pub text: String,
    /// Problems that could not be fixed.
    pub issues: Vec<QualityIssue>,
    /// Human-readable description of each applied fix.
    pub fixes: Vec<String>,
}

impl QualityReport {
    /// `true` when no issues remain.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

fn placeholder_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"\{\{?\s*[\w.]+\s*\}\}?|%\(\w+\)[sd]|%[sd]|\$\{[\w.]+\}").ok()
        })
        .as_ref()
}

fn tag_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"<(/?)([A-Za-z][\w-]*)[^<>]*?(/?)>").ok())
        .as_ref()
}

fn placeholders(text: &str) -> Vec<String> {
    placeholder_pattern().map_or_else(Vec::new, |re| {
        re.find_iter(text).map(|m| m.as_str().to_string()).collect()
    })
}

/// Stateless translation checker.
#[derive(Debug, Clone)]
pub struct QualityChecker {
    config: QualityConfig,
}

impl QualityChecker {
    /// Checker with the given thresholds.
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Check `translation` against `source`, auto-fixing what is safe to fix.
    pub fn check(&self, source: &str, translation: &str) -> QualityReport {
        let mut text = translation.to_string();
        let mut issues = Vec::new();
        let mut fixes = Vec::new();

        self.fix_whitespace(source, &mut text, &mut fixes);
        self.check_placeholders(source, &mut text, &mut issues, &mut fixes);
        self.check_tags(&text, &mut issues);
        self.check_length(source, &text, &mut issues);

        QualityReport {
            text,
            issues,
            fixes,
        }
    }

    /// Carry the source's leading/trailing whitespace over to the translation.
    fn fix_whitespace(&self, source: &str, text: &mut String, fixes: &mut Vec<String>) {
        let lead = &source[..source.len() - source.trim_start().len()];
        let trail = &source[source.trim_end().len()..];
        let fixed = format!("{lead}{}{trail}", text.trim());
        if fixed != *text {
            fixes.push("normalised surrounding whitespace".to_string());
            *text = fixed;
        }
    }

    fn check_placeholders(
        &self,
        source: &str,
        text: &mut String,
        issues: &mut Vec<QualityIssue>,
        fixes: &mut Vec<String>,
    ) {
        let expected = placeholders(source);
        if expected.is_empty() && placeholders(text).is_empty() {
            return;
        }

        // Case drift ({UserName} -> {username}) is repaired in place.
        for want in &expected {
            if text.contains(want.as_str()) {
                continue;
            }
            let drifted = placeholders(text)
                .into_iter()
                .find(|got| got.eq_ignore_ascii_case(want) && !expected.contains(got));
            if let Some(got) = drifted {
                *text = text.replacen(&got, want, 1);
                fixes.push(format!("restored placeholder case {want}"));
            }
        }

        let mut want_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for p in &expected {
            *want_counts.entry(p.as_str()).or_default() += 1;
        }
        let found = placeholders(text);
        let mut got_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for p in &found {
            *got_counts.entry(p.as_str()).or_default() += 1;
        }

        for (p, want) in &want_counts {
            if got_counts.get(p).copied().unwrap_or(0) < *want {
                issues.push(QualityIssue::MissingPlaceholder {
                    placeholder: (*p).to_string(),
                });
            }
        }
        for p in got_counts.keys() {
            if !want_counts.contains_key(p) {
                issues.push(QualityIssue::UnexpectedPlaceholder {
                    placeholder: (*p).to_string(),
                });
            }
        }
    }

    fn check_tags(&self, text: &str, issues: &mut Vec<QualityIssue>) {
        let Some(re) = tag_pattern() else {
            return;
        };

        let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for caps in re.captures_iter(text) {
            let self_closing = caps.get(3).is_some_and(|m| !m.as_str().is_empty());
            if self_closing {
                continue;
            }
            let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
            let name = caps.get(2).map_or("", |m| m.as_str()).to_ascii_lowercase();
            let entry = counts.entry(name).or_default();
            if closing {
                entry.1 += 1;
            } else {
                entry.0 += 1;
            }
        }

        for (tag, (open, close)) in counts {
            if open != close && !is_void_element(&tag) {
                issues.push(QualityIssue::UnbalancedTag { tag, open, close });
            }
        }
    }

    fn check_length(&self, source: &str, text: &str, issues: &mut Vec<QualityIssue>) {
        let source_chars = source.trim().chars().count();
        if source_chars < self.config.ratio_min_source_chars || source_chars == 0 {
            return;
        }
        let ratio = text.trim().chars().count() as f64 / source_chars as f64;
        if ratio < self.config.min_length_ratio || ratio > self.config.max_length_ratio {
            issues.push(QualityIssue::LengthRatio { ratio });
        }
    }
}

fn is_void_element(tag: &str) -> bool {
    matches!(
        tag,
        "br" | "hr" | "img" | "input" | "meta" | "link" | "area" | "base" | "col" | "wbr"
    )
}
