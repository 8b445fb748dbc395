//! # Translation Pipeline
//!
//! ## Responsibility
//! Run an ordered list of [`Step`]s over one [`RequestContext`]. Each step
//! either continues, halts the pipeline with the context's result standing as
//! final, or fails it.
//!
//! ## Guarantees
//! - Steps run strictly in registration order
//! - After [`Flow::Halt`] no later step runs and `context.result` is untouched
//! - A [`PipelineError`] always leaves a failed result on the context
//! - One [`Pipeline`] serves any number of concurrent executions
//!
//! ## NOT Responsible For
//! - Retry or failover (that belongs to `routing`)
//! - Spawning background refreshes (that belongs to `orchestrator`)
//!
//! ## Standard sequence
//!
//! ```text
//! validate → cache-read → glossary-protect → dispatch → glossary-restore
//!          → quality → confidence → cache-write
//! ```

pub mod context;
pub mod steps;

pub use context::{
    CachedTranslation, RequestContext, RequestOptions, TranslationRequest, TranslationResult,
};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{field, info_span, warn, Instrument};

use crate::backend::BackendError;
use crate::cache::SwrCache;
use crate::confidence::ConfidenceScorer;
use crate::config::OrchestratorConfig;
use crate::glossary::{Glossary, GlossaryError};
use crate::metrics;
use crate::quality::QualityChecker;
use crate::review::ReviewQueue;
use crate::routing::{BackendRouter, DispatchError};

/// What the executor does after a step returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next step.
    Continue,
    /// Stop; `context.result` is final.
    Halt,
}

/// Terminal pipeline failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request is malformed. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Dispatch to the backends failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A backend call outside the router failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A custom step failed.
    #[error("step {step} failed: {message}")]
    Step {
        /// Step name.
        step: &'static str,
        /// Failure description.
        message: String,
    },
}

impl PipelineError {
    /// Short label for logs and spans.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Dispatch(DispatchError::AllBackendsFailed { .. }) => "all_backends_failed",
            Self::Dispatch(DispatchError::NoCapableBackend) => "no_capable_backend",
            Self::Dispatch(DispatchError::UnknownBackend(_)) => "unknown_backend",
            Self::Dispatch(DispatchError::ShuttingDown) => "shutting_down",
            Self::Backend(e) => e.kind(),
            Self::Step { .. } => "step",
        }
    }
}

/// One pipeline stage.
///
/// Implementations must be stateless or hold only thread-safe collaborators;
/// the same step instance runs concurrently for many requests.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable name used in spans.
    fn name(&self) -> &'static str;

    /// Process `ctx`.
    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, PipelineError>;
}

/// Ordered, short-circuiting step executor.
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn Step>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Collaborators the standard step sequence is built from.
pub struct StandardParts {
    /// Failover router used by the dispatch step.
    pub router: Arc<BackendRouter>,
    /// Result cache.
    pub cache: Arc<SwrCache<CachedTranslation>>,
    /// Injected confidence scorer.
    pub scorer: Arc<dyn ConfidenceScorer>,
    /// Queue for mid-confidence results.
    pub review: Arc<ReviewQueue>,
}

impl Pipeline {
    /// Empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step (builder form).
    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Append an already shared step.
    pub fn push_step(&mut self, step: Arc<dyn Step>) {
        self.steps.push(step);
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// The full translation sequence.
    ///
    /// # Errors
    ///
    /// Returns [`GlossaryError`] if a configured glossary term cannot be compiled.
    pub fn standard(parts: StandardParts, config: &OrchestratorConfig) -> Result<Self, GlossaryError> {
        let glossary = Arc::new(Glossary::from_config(&config.glossary)?);

        Ok(Self::new()
            .with_step(steps::Validate::new(config.pipeline.clone()))
            .with_step(steps::CacheRead::new(Arc::clone(&parts.cache)))
            .with_step(steps::GlossaryProtect::new(Arc::clone(&glossary)))
            .with_step(steps::Dispatch::new(parts.router))
            .with_step(steps::GlossaryRestore::new(glossary))
            .with_step(steps::Quality::new(QualityChecker::new(config.quality.clone())))
            .with_step(steps::Confidence::new(
                parts.scorer,
                crate::confidence::Thresholds::from_config(&config.confidence),
                parts.review,
            ))
            .with_step(steps::CacheWrite::new(parts.cache)))
    }

    /// Run every step over `ctx` in order.
    ///
    /// On success the working translation becomes `ctx.result.translated`.
    /// On error `ctx.result` is marked failed and the error is also returned.
    pub async fn execute(&self, ctx: &mut RequestContext) -> Result<(), PipelineError> {
        let started = Instant::now();
        let outcome = self.run_steps(ctx).await;

        match &outcome {
            Ok(Flow::Continue) => {
                if let Some(text) = ctx.translated.take() {
                    ctx.result.translated = Some(text);
                }
            }
            Ok(Flow::Halt) => {}
            Err(e) => {
                warn!(
                    target: "translation::pipeline",
                    request_id = %ctx.request_id,
                    error_kind = e.kind(),
                    "pipeline failed"
                );
                ctx.fail(e);
            }
        }

        metrics::record_pipeline_duration(started.elapsed());
        metrics::inc_request(result_label(&ctx.result));
        outcome.map(|_| ())
    }

    async fn run_steps(&self, ctx: &mut RequestContext) -> Result<Flow, PipelineError> {
        for step in &self.steps {
            let span = info_span!(
                "pipeline.step",
                request_id = %ctx.request_id,
                step = step.name(),
                outcome = field::Empty,
                duration_ms = field::Empty,
            );
            let t0 = Instant::now();
            let flow = step.run(ctx).instrument(span.clone()).await;
            span.record("duration_ms", t0.elapsed().as_millis() as u64);

            match flow {
                Ok(Flow::Continue) => {
                    span.record("outcome", "continue");
                }
                Ok(Flow::Halt) => {
                    span.record("outcome", "halt");
                    return Ok(Flow::Halt);
                }
                Err(e) => {
                    span.record("outcome", e.kind());
                    return Err(e);
                }
            }
        }
        Ok(Flow::Continue)
    }
}

fn result_label(result: &TranslationResult) -> &'static str {
    match (result.success, result.from_cache, result.stale) {
        (false, _, _) => "failed",
        (true, true, true) => "stale",
        (true, true, false) => "cached",
        (true, false, _) => "ok",
    }
}
