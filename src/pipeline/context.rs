//! Per-request state carried through the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::admission::Priority;
use crate::backend::BackendOptions;
use crate::cache::RefreshClaim;
use crate::confidence::{ReviewDecision, ScoreReport};
use crate::glossary::ProtectedTerm;

/// Caller-controlled knobs for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Skip the cache read (the fingerprint is still computed and written).
    pub skip_cache_read: bool,
    /// Override the length-derived admission priority.
    pub priority: Option<Priority>,
    /// Override the detected content category.
    pub category: Option<String>,
    /// Forwarded verbatim to the backend.
    pub backend_options: BackendOptions,
    /// Forwarded to the confidence scorer. A `priority` entry names the
    /// admission priority when `priority` is unset.
    pub metadata: BTreeMap<String, String>,
}

/// One unit of work submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRequest {
    /// Message key (e.g. `settings.save_button`).
    pub key: String,
    /// Text to translate.
    pub text: String,
    /// Source language code.
    pub source_lang: String,
    /// Target language code.
    pub target_lang: String,
    /// Per-request options.
    #[serde(default)]
    pub options: RequestOptions,
}

impl TranslationRequest {
    /// Request with default options.
    pub fn new(
        key: impl Into<String>,
        text: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            options: RequestOptions::default(),
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// Value stored in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTranslation {
    /// Final translated text.
    pub text: String,
    /// Backend that produced it.
    pub backend: Option<String>,
}

/// Final outcome of one pipeline execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranslationResult {
    /// Request correlation id.
    pub request_id: String,
    /// Message key.
    pub key: String,
    /// Translated text; `None` on failure.
    pub translated: Option<String>,
    /// Whether `translated` is usable.
    pub success: bool,
    /// Error description on failure.
    pub error: Option<String>,
    /// Served from the cache.
    pub from_cache: bool,
    /// Served from a stale cache entry.
    pub stale: bool,
    /// Backend that produced the translation.
    pub backend: Option<String>,
    /// Confidence gate outcome, if scored.
    pub decision: Option<ReviewDecision>,
    /// Confidence score, if scored.
    pub confidence: Option<f64>,
    /// Non-fatal findings (quality issues, scorer failures, fixes).
    pub diagnostics: Vec<String>,
}

/// Mutable state owned by exactly one pipeline execution.
#[derive(Debug)]
pub struct RequestContext {
    /// Trace correlation id.
    pub request_id: Uuid,
    /// Message key.
    pub key: String,
    /// Original text.
    pub source_text: String,
    /// Source language code.
    pub source_lang: String,
    /// Target language code.
    pub target_lang: String,
    /// Per-request options.
    pub options: RequestOptions,

    /// Source text with glossary terms tokenised.
    pub protected_text: Option<String>,
    /// Tokens inserted by glossary protection.
    pub protected_terms: Vec<ProtectedTerm>,
    /// Working translation between dispatch and completion.
    pub translated: Option<String>,
    /// Cache key computed by the cache-read step.
    pub fingerprint: Option<String>,
    /// Scorer output.
    pub confidence: Option<ScoreReport>,
    /// Set when this execution won the right to refresh a stale entry.
    pub pending_refresh: Option<RefreshClaim>,

    /// Outcome handed back to the caller.
    pub result: TranslationResult,
}

impl RequestContext {
    /// Fresh context with a new request id.
    pub fn new(request: TranslationRequest) -> Self {
        let request_id = Uuid::new_v4();
        let result = TranslationResult {
            request_id: request_id.to_string(),
            key: request.key.clone(),
            ..TranslationResult::default()
        };
        Self {
            request_id,
            key: request.key,
            source_text: request.text,
            source_lang: request.source_lang,
            target_lang: request.target_lang,
            options: request.options,
            protected_text: None,
            protected_terms: Vec::new(),
            translated: None,
            fingerprint: None,
            confidence: None,
            pending_refresh: None,
            result,
        }
    }

    /// Text to send to the backend.
    pub fn dispatch_text(&self) -> &str {
        self.protected_text.as_deref().unwrap_or(&self.source_text)
    }

    /// Finish successfully with `text` (used by short-circuiting steps).
    pub fn succeed_with(&mut self, text: impl Into<String>) {
        self.result.translated = Some(text.into());
        self.result.success = true;
        self.result.error = None;
    }

    /// Finish with a failure.
    pub fn fail(&mut self, error: impl ToString) {
        self.result.translated = None;
        self.result.success = false;
        self.result.error = Some(error.to_string());
        self.pending_refresh = None;
    }

    /// Rebuild the request this context was created from, for a refresh re-run.
    pub fn to_request(&self) -> TranslationRequest {
        TranslationRequest {
            key: self.key.clone(),
            text: self.source_text.clone(),
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
            options: self.options.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_links_result_to_request_id() {
        let ctx = RequestContext::new(TranslationRequest::new("k", "Hello", "en", "de"));
        assert_eq!(ctx.result.request_id, ctx.request_id.to_string());
        assert_eq!(ctx.result.key, "k");
        assert!(!ctx.result.success);
    }

    #[test]
    fn test_dispatch_text_prefers_protected_text() {
        let mut ctx = RequestContext::new(TranslationRequest::new("k", "Hello", "en", "de"));
        assert_eq!(ctx.dispatch_text(), "Hello");
        ctx.protected_text = Some("__GLS0__".into());
        assert_eq!(ctx.dispatch_text(), "__GLS0__");
    }

    #[test]
    fn test_fail_clears_translation() {
        let mut ctx = RequestContext::new(TranslationRequest::new("k", "Hello", "en", "de"));
        ctx.succeed_with("Hallo");
        ctx.fail("boom");
        assert!(!ctx.result.success);
        assert!(ctx.result.translated.is_none());
        assert_eq!(ctx.result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_request_options_deserialize_with_defaults() {
        let opts: RequestOptions =
            serde_json::from_str(r#"{"priority":"high"}"#).expect("test: parse options");
        assert_eq!(opts.priority, Some(Priority::High));
        assert!(!opts.skip_cache_read);
    }
}
