//! # Orchestrator
//!
//! ## Responsibility
//! Wire admission, routing, cache and pipeline together behind one handle;
//! run single and batched translations; spawn stale-entry refreshes; own the
//! shutdown sequence.
//!
//! ## Guarantees
//! - `translate` never returns an error: failures come back as a failed
//!   [`TranslationResult`]
//! - `translate_batch` returns results in input order, one per request
//! - At most one refresh per cache key is in flight, and a refresh never
//!   schedules another
//! - After [`Orchestrator::shutdown`] no new backend work is admitted
//!
//! ## NOT Responsible For
//! - Backend implementations (see [`crate::backend`])
//! - Config file loading (see [`crate::config::loader`])

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionQueue, LaneStatus};
use crate::backend::{BackendDescriptor, BackendOptions};
use crate::cache::{CacheStats, RefreshClaim, SwrCache};
use crate::confidence::{BaselineScorer, ConfidenceScorer, Thresholds};
use crate::config::{validation, OrchestratorConfig};
use crate::pipeline::{
    CachedTranslation, Pipeline, RequestContext, StandardParts, TranslationRequest,
    TranslationResult,
};
use crate::review::{ReviewError, ReviewQueue};
use crate::routing::{BackendHealth, BackendRouter, DispatchError, Dispatched};
use crate::OrchestratorError;

/// Confidence gate section of [`OrchestratorStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceStatus {
    /// Active thresholds.
    pub thresholds: Thresholds,
    /// Records awaiting human review.
    pub review_queue_size: usize,
    /// Translations approved without review.
    pub auto_approved: u64,
    /// Translations rejected and reverted.
    pub rejected: u64,
}

/// Point-in-time view of the whole orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    /// Cache counters.
    pub cache: CacheStats,
    /// Per-backend admission lanes.
    pub queue: BTreeMap<String, LaneStatus>,
    /// Default per-backend concurrency.
    pub concurrency_limit: usize,
    /// Backend health, healthiest first.
    pub backends: Vec<BackendHealth>,
    /// Confidence gate counters.
    pub confidence: ConfidenceStatus,
}

/// What [`Orchestrator::shutdown`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// All admitted work finished before the timeout.
    pub drained: bool,
    /// Queued entries rejected after the timeout.
    pub cleared: usize,
    /// Background refreshes aborted.
    pub refreshes_aborted: usize,
    /// Review records written, if a review file is configured.
    pub reviews_saved: Option<usize>,
}

/// Translation dispatch façade.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use tokio_translation_orchestrator::{
/// #     backend::{BackendDescriptor, EchoBackend}, config::OrchestratorConfig,
/// #     orchestrator::Orchestrator, pipeline::TranslationRequest,
/// # };
/// # async fn example() -> Result<(), tokio_translation_orchestrator::OrchestratorError> {
/// let orchestrator = Orchestrator::new(
///     OrchestratorConfig::default(),
///     vec![BackendDescriptor::new("echo", Arc::new(EchoBackend::new()))],
/// )?;
/// let result = orchestrator
///     .translate(TranslationRequest::new("greeting", "Hello", "en", "de"))
///     .await;
/// assert!(result.success);
/// orchestrator.shutdown().await?;
/// # Ok(()) }
/// ```
pub struct Orchestrator {
    config: OrchestratorConfig,
    router: Arc<BackendRouter>,
    cache: Arc<SwrCache<CachedTranslation>>,
    review: Arc<ReviewQueue>,
    pipeline: Arc<Pipeline>,
    refreshes: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backends", &self.router.backend_count())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl Orchestrator {
    /// Orchestrator scoring with [`BaselineScorer`].
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::Config`] if `config` fails validation.
    /// - [`OrchestratorError::Glossary`] if a glossary term does not compile.
    pub fn new(
        config: OrchestratorConfig,
        backends: Vec<BackendDescriptor>,
    ) -> Result<Self, OrchestratorError> {
        Self::with_scorer(config, backends, Arc::new(BaselineScorer))
    }

    /// Orchestrator with an injected confidence scorer.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn with_scorer(
        config: OrchestratorConfig,
        backends: Vec<BackendDescriptor>,
        scorer: Arc<dyn ConfidenceScorer>,
    ) -> Result<Self, OrchestratorError> {
        validation::validate(&config).map_err(|errors| {
            OrchestratorError::Config(validation::ConfigError::Validation(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ))
        })?;

        let queue = AdmissionQueue::new(config.queue.clone());
        let router = Arc::new(BackendRouter::new(backends, queue, config.router.clone()));
        let cache = Arc::new(SwrCache::new(&config.cache));
        let review = Arc::new(ReviewQueue::new(config.confidence.review_queue_capacity));
        let pipeline = Pipeline::standard(
            StandardParts {
                router: Arc::clone(&router),
                cache: Arc::clone(&cache),
                scorer,
                review: Arc::clone(&review),
            },
            &config,
        )?;

        info!(
            backends = router.backend_count(),
            steps = pipeline.step_names().len(),
            "orchestrator ready"
        );

        Ok(Self {
            config,
            router,
            cache,
            review,
            pipeline: Arc::new(pipeline),
            refreshes: Mutex::new(JoinSet::new()),
        })
    }

    /// Translate one request.
    ///
    /// A stale cache hit is returned immediately; if this call won the
    /// refresh claim a background re-run replaces the entry.
    pub async fn translate(&self, request: TranslationRequest) -> TranslationResult {
        let mut ctx = RequestContext::new(request);
        if let Err(e) = self.pipeline.execute(&mut ctx).await {
            debug!(request_id = %ctx.request_id, error_kind = e.kind(), "translation failed");
        }

        if let Some(claim) = ctx.pending_refresh.take() {
            self.spawn_refresh(ctx.to_request(), claim);
        }
        ctx.result
    }

    fn spawn_refresh(&self, mut request: TranslationRequest, claim: RefreshClaim) {
        request.options.skip_cache_read = true;
        let pipeline = Arc::clone(&self.pipeline);

        let mut refreshes = self.refreshes.lock();
        reap_finished(&mut refreshes);
        refreshes.spawn(async move {
            let mut ctx = RequestContext::new(request);
            match pipeline.execute(&mut ctx).await {
                Ok(()) => debug!(request_id = %ctx.request_id, "stale entry refreshed"),
                Err(e) => warn!(
                    request_id = %ctx.request_id,
                    error_kind = e.kind(),
                    "cache refresh failed"
                ),
            }
            drop(claim);
        });
    }

    /// Translate many requests through a bounded pool of concurrent
    /// pipeline executions. Results keep input order.
    pub async fn translate_batch(&self, requests: Vec<TranslationRequest>) -> Vec<TranslationResult> {
        let total = requests.len();
        let results: Vec<TranslationResult> = stream::iter(requests)
            .map(|request| self.translate(request))
            .buffered(self.config.runtime.batch_concurrency.max(1))
            .collect()
            .await;

        let failed = results.iter().filter(|r| !r.success).count();
        info!(total = total, failed = failed, "batch complete");
        results
    }

    /// Free-form analysis on an analysis-capable backend.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NoCapableBackend`] if no backend supports analysis,
    /// otherwise as [`BackendRouter::analyze`].
    pub async fn analyze(
        &self,
        prompt: &str,
        options: &BackendOptions,
    ) -> Result<Dispatched, DispatchError> {
        self.router.analyze(prompt, options).await
    }

    /// Current cache, queue, backend and confidence state.
    pub fn status(&self) -> OrchestratorStatus {
        let queue = self.router.queue();
        let counts = self.review.counts();
        OrchestratorStatus {
            cache: self.cache.stats(),
            queue: queue.status(),
            concurrency_limit: queue.concurrency_limit(),
            backends: self.router.stats_snapshot(),
            confidence: ConfidenceStatus {
                thresholds: Thresholds::from_config(&self.config.confidence),
                review_queue_size: counts.review_queue_size,
                auto_approved: counts.auto_approved,
                rejected: counts.rejected,
            },
        }
    }

    /// Backend router, for health inspection and manual quarantine reset.
    pub fn router(&self) -> &BackendRouter {
        &self.router
    }

    /// Review queue handle.
    pub fn review_queue(&self) -> &ReviewQueue {
        &self.review
    }

    /// Write the review queue to `path` as JSON.
    ///
    /// # Errors
    ///
    /// [`ReviewError`] on I/O or serialization failure.
    pub async fn save_review_queue(&self, path: &Path) -> Result<usize, ReviewError> {
        self.review.save(path).await
    }

    /// Whether new backend work is still admitted.
    pub fn is_accepting(&self) -> bool {
        self.router.queue().is_accepting()
    }

    /// Stop admitting work, drain for up to `runtime.shutdown_timeout_ms`,
    /// abort pending refreshes, persist the review queue if a path is
    /// configured, and flush the cache.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Review`] if the review file could not be written.
    /// Every other shutdown step has still run.
    pub async fn shutdown(&self) -> Result<ShutdownReport, OrchestratorError> {
        info!("orchestrator shutting down");
        let drain = self
            .router
            .queue()
            .drain(self.config.runtime.shutdown_timeout())
            .await;

        let refreshes_aborted = {
            let mut pending = std::mem::take(&mut *self.refreshes.lock());
            reap_finished(&mut pending);
            let n = pending.len();
            drop(pending);
            n
        };

        let saved = match &self.config.confidence.review_queue_path {
            Some(path) => Some(self.review.save(Path::new(path)).await),
            None => None,
        };

        self.cache.clear();

        let reviews_saved = saved.transpose()?;
        let report = ShutdownReport {
            drained: drain.completed,
            cleared: drain.cleared,
            refreshes_aborted,
            reviews_saved,
        };
        info!(
            drained = report.drained,
            cleared = report.cleared,
            refreshes_aborted = report.refreshes_aborted,
            "orchestrator stopped"
        );
        Ok(report)
    }
}

/// Collect refresh tasks that have already completed.
fn reap_finished(refreshes: &mut JoinSet<()>) {
    while let Some(done) = refreshes.try_join_next() {
        if let Err(e) = done {
            if e.is_panic() {
                warn!("cache refresh task panicked");
            }
        }
    }
}
