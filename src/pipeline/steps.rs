//! The standard translation steps.
//!
//! | Step | Halts when | Fails when |
//! |------|------------|------------|
//! | `validate` | text empty, same language | key empty/too long, text too long |
//! | `cache-read` | fresh or stale hit | never |
//! | `glossary-protect` | never | never |
//! | `dispatch` | never | every backend failed |
//! | `glossary-restore` | never | never |
//! | `quality` | never | never |
//! | `confidence` | never | never |
//! | `cache-write` | never | never |
//!
//! Source and translated text are never logged; spans carry the request id
//! and step name only.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{CachedTranslation, Flow, PipelineError, RequestContext, Step};
use crate::admission::Priority;
use crate::cache::{self, Lookup, SwrCache};
use crate::confidence::{ConfidenceScorer, ReviewDecision, Thresholds};
use crate::config::PipelineLimits;
use crate::glossary::Glossary;
use crate::quality::QualityChecker;
use crate::review::{ReviewQueue, ReviewRecord};
use crate::routing::BackendRouter;

// ============================================================================
// Validate
// ============================================================================

/// Rejects malformed requests and short-circuits trivial ones.
#[derive(Debug, Clone)]
pub struct Validate {
    limits: PipelineLimits,
}

impl Validate {
    /// Validator enforcing `limits`.
    pub fn new(limits: PipelineLimits) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl Step for Validate {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, PipelineError> {
        if ctx.key.trim().is_empty() {
            return Err(PipelineError::Validation("key is empty".into()));
        }
        let key_chars = ctx.key.chars().count();
        if key_chars > self.limits.max_key_length {
            return Err(PipelineError::Validation(format!(
                "key is {key_chars} chars, limit {}",
                self.limits.max_key_length
            )));
        }
        let text_chars = ctx.source_text.chars().count();
        if text_chars > self.limits.max_text_length {
            return Err(PipelineError::Validation(format!(
                "text is {text_chars} chars, limit {}",
                self.limits.max_text_length
            )));
        }

        if ctx.source_text.trim().is_empty() {
            debug!(request_id = %ctx.request_id, "empty text, nothing to translate");
            let text = ctx.source_text.clone();
            ctx.succeed_with(text);
            return Ok(Flow::Halt);
        }
        if ctx.source_lang.eq_ignore_ascii_case(&ctx.target_lang) {
            debug!(request_id = %ctx.request_id, "source and target language match");
            let text = ctx.source_text.clone();
            ctx.succeed_with(text);
            return Ok(Flow::Halt);
        }
        Ok(Flow::Continue)
    }
}

// ============================================================================
// Cache read / write
// ============================================================================

/// Computes the fingerprint and serves fresh or stale cache hits.
pub struct CacheRead {
    cache: Arc<SwrCache<CachedTranslation>>,
}

impl CacheRead {
    /// Step reading from `cache`.
    pub fn new(cache: Arc<SwrCache<CachedTranslation>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Step for CacheRead {
    fn name(&self) -> &'static str {
        "cache-read"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, PipelineError> {
        let category = ctx
            .options
            .category
            .clone()
            .unwrap_or_else(|| cache::detect_category(&ctx.source_text).to_string());
        let key = cache::fingerprint(&ctx.source_text, &ctx.target_lang, &category);

        let lookup = if ctx.options.skip_cache_read {
            Lookup::Miss
        } else {
            self.cache.get(&key)
        };
        ctx.fingerprint = Some(key);

        match lookup {
            Lookup::Fresh(hit) => {
                ctx.succeed_with(hit.text);
                ctx.result.from_cache = true;
                ctx.result.backend = hit.backend;
                Ok(Flow::Halt)
            }
            Lookup::Stale { value, claim } => {
                ctx.succeed_with(value.text);
                ctx.result.from_cache = true;
                ctx.result.stale = true;
                ctx.result.backend = value.backend;
                ctx.pending_refresh = claim;
                Ok(Flow::Halt)
            }
            Lookup::Miss => Ok(Flow::Continue),
        }
    }
}

/// Stores successful, non-rejected translations under the request fingerprint.
pub struct CacheWrite {
    cache: Arc<SwrCache<CachedTranslation>>,
}

impl CacheWrite {
    /// Step writing to `cache`.
    pub fn new(cache: Arc<SwrCache<CachedTranslation>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Step for CacheWrite {
    fn name(&self) -> &'static str {
        "cache-write"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, PipelineError> {
        if !ctx.result.success
            || ctx.result.from_cache
            || ctx.result.decision == Some(ReviewDecision::Rejected)
        {
            return Ok(Flow::Continue);
        }
        if let (Some(key), Some(text)) = (&ctx.fingerprint, &ctx.translated) {
            self.cache.set(
                key.clone(),
                CachedTranslation {
                    text: text.clone(),
                    backend: ctx.result.backend.clone(),
                },
            );
        }
        Ok(Flow::Continue)
    }
}

// ============================================================================
// Glossary
// ============================================================================

/// Swaps glossary terms for opaque tokens before dispatch.
#[derive(Debug)]
pub struct GlossaryProtect {
    glossary: Arc<Glossary>,
}

impl GlossaryProtect {
    /// Step protecting terms from `glossary`.
    pub fn new(glossary: Arc<Glossary>) -> Self {
        Self { glossary }
    }
}

#[async_trait]
impl Step for GlossaryProtect {
    fn name(&self) -> &'static str {
        "glossary-protect"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, PipelineError> {
        if self.glossary.is_empty() {
            return Ok(Flow::Continue);
        }
        let (text, terms) = self.glossary.protect(&ctx.source_text, &ctx.target_lang);
        if !terms.is_empty() {
            ctx.protected_text = Some(text);
            ctx.protected_terms = terms;
        }
        Ok(Flow::Continue)
    }
}

/// Puts target-language terms back in place of the tokens.
#[derive(Debug)]
pub struct GlossaryRestore {
    glossary: Arc<Glossary>,
}

impl GlossaryRestore {
    /// Step restoring terms protected by the same `glossary`.
    pub fn new(glossary: Arc<Glossary>) -> Self {
        Self { glossary }
    }
}

#[async_trait]
impl Step for GlossaryRestore {
    fn name(&self) -> &'static str {
        "glossary-restore"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, PipelineError> {
        if ctx.protected_terms.is_empty() {
            return Ok(Flow::Continue);
        }
        if let Some(text) = ctx.translated.take() {
            ctx.translated = Some(self.glossary.restore(&text, &ctx.protected_terms));
        }
        Ok(Flow::Continue)
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Sends the (protected) text through the failover router.
pub struct Dispatch {
    router: Arc<BackendRouter>,
}

impl Dispatch {
    /// Step dispatching through `router`.
    pub fn new(router: Arc<BackendRouter>) -> Self {
        Self { router }
    }
}

/// Explicit option first, then a `priority` metadata tag, then text length.
fn admission_priority(ctx: &RequestContext) -> Priority {
    ctx.options
        .priority
        .or_else(|| {
            ctx.options
                .metadata
                .get("priority")
                .and_then(|name| Priority::from_name(name))
        })
        .unwrap_or_else(|| Priority::for_text(&ctx.source_text))
}

#[async_trait]
impl Step for Dispatch {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, PipelineError> {
        let priority = admission_priority(ctx);

        let dispatched = self
            .router
            .dispatch_with_priority(
                ctx.dispatch_text(),
                &ctx.source_lang,
                &ctx.target_lang,
                &ctx.options.backend_options,
                priority,
            )
            .await?;

        info!(
            request_id = %ctx.request_id,
            backend = %dispatched.backend,
            attempts = dispatched.attempts,
            elapsed_ms = dispatched.elapsed.as_millis() as u64,
            "translated"
        );
        ctx.translated = Some(dispatched.text);
        ctx.result.backend = Some(dispatched.backend);
        ctx.result.success = true;
        ctx.result.error = None;
        Ok(Flow::Continue)
    }
}

// ============================================================================
// Quality
// ============================================================================

/// Runs the quality checker; fixes are applied, issues become diagnostics.
#[derive(Debug)]
pub struct Quality {
    checker: QualityChecker,
}

impl Quality {
    /// Step wrapping `checker`.
    pub fn new(checker: QualityChecker) -> Self {
        Self { checker }
    }
}

#[async_trait]
impl Step for Quality {
    fn name(&self) -> &'static str {
        "quality"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, PipelineError> {
        let Some(text) = ctx.translated.as_deref() else {
            return Ok(Flow::Continue);
        };
        let report = self.checker.check(&ctx.source_text, text);

        if !report.is_clean() {
            debug!(
                request_id = %ctx.request_id,
                issues = report.issues.len(),
                "quality issues found"
            );
        }
        ctx.result
            .diagnostics
            .extend(report.fixes.iter().map(|f| format!("fixed: {f}")));
        ctx.result
            .diagnostics
            .extend(report.issues.iter().map(|i| format!("quality: {i}")));
        ctx.translated = Some(report.text);
        Ok(Flow::Continue)
    }
}

// ============================================================================
// Confidence
// ============================================================================

/// Scores the translation and applies the approve / review / reject gate.
pub struct Confidence {
    scorer: Arc<dyn ConfidenceScorer>,
    thresholds: Thresholds,
    review: Arc<ReviewQueue>,
}

impl Confidence {
    /// Gate using `scorer`, parking mid-confidence results on `review`.
    pub fn new(
        scorer: Arc<dyn ConfidenceScorer>,
        thresholds: Thresholds,
        review: Arc<ReviewQueue>,
    ) -> Self {
        Self {
            scorer,
            thresholds,
            review,
        }
    }
}

#[async_trait]
impl Step for Confidence {
    fn name(&self) -> &'static str {
        "confidence"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, PipelineError> {
        let Some(text) = ctx.translated.clone() else {
            return Ok(Flow::Continue);
        };

        let report = match self
            .scorer
            .score(&ctx.source_text, &text, &ctx.options.metadata)
        {
            Ok(report) => report,
            Err(e) => {
                warn!(request_id = %ctx.request_id, "confidence scoring failed");
                ctx.result.diagnostics.push(e.to_string());
                return Ok(Flow::Continue);
            }
        };

        let decision = self.thresholds.decide(report.score);
        ctx.result.confidence = Some(report.score);
        ctx.result.decision = Some(decision);

        match decision {
            ReviewDecision::Approved => self.review.record_approved(),
            ReviewDecision::Rejected => {
                warn!(
                    request_id = %ctx.request_id,
                    score = report.score,
                    "translation rejected, serving source text"
                );
                self.review.record_rejected();
                ctx.translated = Some(ctx.source_text.clone());
            }
            ReviewDecision::NeedsReview => {
                self.review.push(ReviewRecord {
                    request_id: ctx.request_id.to_string(),
                    key: ctx.key.clone(),
                    source_text: ctx.source_text.clone(),
                    translation: text,
                    target_lang: ctx.target_lang.clone(),
                    score: report.score,
                    level: report.level,
                    issues: report.issues.clone(),
                    queued_at: chrono::Utc::now(),
                });
            }
        }
        ctx.confidence = Some(report);
        Ok(Flow::Continue)
    }
}
