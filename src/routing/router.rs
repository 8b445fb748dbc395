//! Health-ranked failover router.
//!
//! [`BackendRouter`] owns the backend registry and a mutex-protected
//! `RouterState` (ranking order, per-backend stats, rotating cursor, call
//! counter). Every attempt is admitted through the shared
//! [`AdmissionQueue`](crate::admission::AdmissionQueue); the router alone
//! decides which backend to try next and when to give up.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::stats::{redact, BackendHealth, BackendStats};
use crate::admission::{AdmissionError, AdmissionQueue, Priority};
use crate::backend::{BackendDescriptor, BackendError, BackendOptions, TranslationBackend};
use crate::config::RouterConfig;
use crate::metrics;

/// One failed attempt in a dispatch trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// Backend the attempt went to.
    pub backend: String,
    /// Redacted error description.
    pub error: String,
    /// Generic error kind (see [`BackendError::kind`]).
    pub kind: &'static str,
    /// Zero-based attempt index within the dispatch.
    pub attempt: usize,
}

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Every attempt failed.
    #[error("all backends failed after {} attempts in {elapsed:?}", .attempts.len())]
    AllBackendsFailed {
        /// Ordered attempt trail.
        attempts: Vec<AttemptRecord>,
        /// Wall time spent across all attempts.
        elapsed: Duration,
    },

    /// No registered backend offers the requested capability.
    #[error("no backend supports the requested operation")]
    NoCapableBackend,

    /// The admission queue has no lane for this backend.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// The admission queue is draining.
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

/// A successful dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatched {
    /// Backend output.
    pub text: String,
    /// Backend that produced it.
    pub backend: String,
    /// Attempts made, including the successful one.
    pub attempts: usize,
    /// Wall time from first attempt to success.
    pub elapsed: Duration,
}

/// Mutable routing state, guarded by one mutex.
#[derive(Debug)]
struct RouterState {
    /// Indices into the backend registry, healthiest first.
    order: Vec<usize>,
    /// Stats aligned with the backend registry.
    stats: Vec<BackendStats>,
    /// Position in `order` where the next dispatch starts.
    cursor: usize,
    calls: u64,
}

impl RouterState {
    fn maybe_rerank(&mut self, config: &RouterConfig) {
        self.calls += 1;
        if config.rerank_interval == 0 || self.calls % config.rerank_interval != 0 {
            return;
        }
        // Cold start: too little signal to reorder on.
        if !self
            .stats
            .iter()
            .any(|s| s.successes > config.min_successes_for_rerank)
        {
            return;
        }

        let scores: Vec<f64> = self.stats.iter().map(BackendStats::score).collect();
        self.order.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));
        self.cursor = 0;
        debug!(calls = self.calls, "router: backends re-ranked");
    }

    /// Non-quarantined backends in ranking order, rotated to the cursor.
    fn candidates(&mut self, eligible: impl Fn(usize) -> bool, now: Instant) -> Vec<usize> {
        for stats in &mut self.stats {
            stats.expire_quarantine(now);
        }

        let n = self.order.len();
        let rotated: Vec<usize> = (0..n)
            .map(|i| self.order[(self.cursor + i) % n])
            .filter(|idx| eligible(*idx))
            .collect();

        let healthy: Vec<usize> = rotated
            .iter()
            .copied()
            .filter(|idx| !self.stats[*idx].is_quarantined(now))
            .collect();

        if healthy.is_empty() && !rotated.is_empty() {
            info!(
                quarantined = rotated.len(),
                "router: every candidate quarantined, clearing quarantine"
            );
            for idx in &rotated {
                self.stats[*idx].quarantined_until = None;
            }
            return rotated;
        }
        healthy
    }

    /// Move the shared cursor past `failed` if it still points at it.
    fn advance_past(&mut self, failed: usize) {
        let n = self.order.len();
        if n > 0 && self.order[self.cursor % n] == failed {
            self.cursor = (self.cursor + 1) % n;
        }
    }
}

/// Operation a dispatch performs against each candidate.
enum Call<'a> {
    Translate {
        text: &'a str,
        source_lang: &'a str,
        target_lang: &'a str,
        options: &'a BackendOptions,
    },
    Analyze {
        prompt: &'a str,
        options: &'a BackendOptions,
    },
}

impl Call<'_> {
    async fn run(&self, backend: &dyn TranslationBackend) -> Result<String, BackendError> {
        match self {
            Call::Translate {
                text,
                source_lang,
                target_lang,
                options,
            } => {
                backend
                    .translate(text, source_lang, target_lang, options)
                    .await
            }
            Call::Analyze { prompt, options } => backend.analyze(prompt, options).await,
        }
    }
}

/// Health-ranked failover router over a fixed backend registry.
///
/// Shared across tasks behind an `Arc`; all mutable state lives in one
/// [`parking_lot::Mutex`] that is never held across an `.await`.
///
/// # Fairness
///
/// Each dispatch takes its starting position from the shared cursor and then
/// walks its own candidate snapshot in order. Failures advance the shared
/// cursor only if it still points at the failed backend, so concurrent
/// dispatches that fail on the same backend advance it once. Selection under
/// load is best-effort fair, not strict round-robin.
pub struct BackendRouter {
    backends: Vec<BackendDescriptor>,
    state: Mutex<RouterState>,
    queue: AdmissionQueue,
    config: RouterConfig,
}

impl std::fmt::Debug for BackendRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRouter")
            .field("backends", &self.backends)
            .field("config", &self.config)
            .finish()
    }
}

impl BackendRouter {
    /// Build a router and register one admission lane per backend.
    ///
    /// The initial ranking is registration order.
    pub fn new(backends: Vec<BackendDescriptor>, queue: AdmissionQueue, config: RouterConfig) -> Self {
        for descriptor in &backends {
            queue.register(descriptor.name());
        }

        let state = RouterState {
            order: (0..backends.len()).collect(),
            stats: vec![BackendStats::default(); backends.len()],
            cursor: 0,
            calls: 0,
        };

        Self {
            backends,
            state: Mutex::new(state),
            queue,
            config,
        }
    }

    /// The admission queue attempts are submitted through.
    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    /// Translate with priority derived from text length.
    pub async fn dispatch(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        options: &BackendOptions,
    ) -> Result<Dispatched, DispatchError> {
        self.dispatch_with_priority(text, source_lang, target_lang, options, Priority::for_text(text))
            .await
    }

    /// Translate, failing over across healthy backends in ranking order.
    ///
    /// Makes at most `candidates × (max_retries_per_backend + 1)` attempts.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::AllBackendsFailed`] with the full attempt trail.
    /// - [`DispatchError::NoCapableBackend`] if the registry is empty.
    /// - [`DispatchError::UnknownBackend`] / [`DispatchError::ShuttingDown`]
    ///   for admission faults, without further attempts.
    pub async fn dispatch_with_priority(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        options: &BackendOptions,
        priority: Priority,
    ) -> Result<Dispatched, DispatchError> {
        let call = Call::Translate {
            text,
            source_lang,
            target_lang,
            options,
        };
        self.run(&call, priority, |_| true).await
    }

    /// Run a free-form analysis on a backend registered with analysis support.
    ///
    /// # Errors
    ///
    /// Fails fast with [`DispatchError::NoCapableBackend`] if no registered
    /// backend supports analysis; otherwise as [`dispatch`](Self::dispatch).
    pub async fn analyze(
        &self,
        prompt: &str,
        options: &BackendOptions,
    ) -> Result<Dispatched, DispatchError> {
        let call = Call::Analyze { prompt, options };
        let backends = &self.backends;
        self.run(&call, Priority::for_text(prompt), |idx| {
            backends[idx].capability().supports_analysis()
        })
        .await
    }

    async fn run(
        &self,
        call: &Call<'_>,
        priority: Priority,
        eligible: impl Fn(usize) -> bool,
    ) -> Result<Dispatched, DispatchError> {
        let candidates = {
            let mut state = self.state.lock();
            state.maybe_rerank(&self.config);
            state.candidates(&eligible, Instant::now())
        };

        if candidates.is_empty() {
            return Err(DispatchError::NoCapableBackend);
        }

        let max_attempts = candidates.len() * (self.config.max_retries_per_backend + 1);
        let started = Instant::now();
        let mut trail = Vec::with_capacity(max_attempts);

        for attempt in 0..max_attempts {
            let idx = candidates[attempt % candidates.len()];
            let descriptor = &self.backends[idx];
            let backend = descriptor.backend();

            let outcome = self
                .queue
                .enqueue(descriptor.name(), priority, || async {
                    let t0 = Instant::now();
                    call.run(backend.as_ref())
                        .await
                        .map(|text| (text, t0.elapsed()))
                })
                .await;

            match outcome {
                Ok((text, latency)) => {
                    self.state.lock().stats[idx].record_success(latency);
                    metrics::inc_attempt("ok");
                    return Ok(Dispatched {
                        text,
                        backend: descriptor.name().to_string(),
                        attempts: attempt + 1,
                        elapsed: started.elapsed(),
                    });
                }
                Err(AdmissionError::Failed(err)) => {
                    let record = self.record_failure(idx, attempt, &err);
                    trail.push(record);
                }
                Err(AdmissionError::UnknownBackend(name)) => {
                    return Err(DispatchError::UnknownBackend(name));
                }
                Err(AdmissionError::Closed) | Err(AdmissionError::Cleared) => {
                    return Err(DispatchError::ShuttingDown);
                }
            }
        }

        Err(DispatchError::AllBackendsFailed {
            attempts: trail,
            elapsed: started.elapsed(),
        })
    }

    fn record_failure(&self, idx: usize, attempt: usize, err: &BackendError) -> AttemptRecord {
        let redacted = redact(&err.to_string());
        let kind = err.kind();

        warn!(attempt = attempt, kind = kind, "backend attempt failed");
        metrics::inc_attempt("failed");
        metrics::inc_backend_error(kind);

        let name = self.backends[idx].name();
        if let BackendError::RateLimit {
            retry_after: Some(wait),
        } = err
        {
            self.queue.backoff(name, *wait);
        }

        let quarantined = {
            let mut state = self.state.lock();
            let quarantined = state.stats[idx].record_failure(
                redacted.clone(),
                self.config.quarantine_threshold,
                self.config.quarantine_cooldown(),
                Instant::now(),
            );
            state.advance_past(idx);
            quarantined
        };
        if quarantined {
            warn!(
                cooldown_s = self.config.quarantine_cooldown_s,
                "router: backend quarantined after consecutive failures"
            );
        }

        AttemptRecord {
            backend: name.to_string(),
            error: redacted,
            kind,
            attempt,
        }
    }

    /// Health of every backend, in current ranking order.
    pub fn stats_snapshot(&self) -> Vec<BackendHealth> {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .order
            .iter()
            .map(|idx| BackendHealth::from_stats(self.backends[*idx].name(), &state.stats[*idx], now))
            .collect()
    }

    /// Backend names, healthiest first.
    pub fn ranking(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .map(|idx| self.backends[*idx].name().to_string())
            .collect()
    }

    /// Lift every quarantine immediately.
    pub fn reset_quarantine(&self) {
        let mut state = self.state.lock();
        for stats in &mut state.stats {
            stats.quarantined_until = None;
        }
        info!("router: quarantine reset");
    }

    /// Registered backend count.
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }
}
