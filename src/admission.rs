//! Admission Queue
//!
//! Per-backend priority queues in front of per-backend concurrency gates.
//!
//! Every registered backend gets an independent *lane*: a limit on in-flight
//! operations, a priority heap of waiters, and an adaptive throttle fed by the
//! lane's recent outcomes. Slots are handed to waiters as RAII permits, so a
//! waiter whose future is dropped never leaks capacity.
//!
//! ## Usage
//!
//! ```no_run
//! use tokio_translation_orchestrator::admission::{AdmissionQueue, Priority};
//! use tokio_translation_orchestrator::config::QueueConfig;
//! # #[tokio::main]
//! # async fn main() {
//! let queue = AdmissionQueue::new(QueueConfig::default());
//! queue.register("deepl");
//!
//! let out = queue
//!     .enqueue("deepl", Priority::High, || async { Ok::<_, String>("Hallo") })
//!     .await;
//! assert_eq!(out.ok(), Some("Hallo"));
//! # }
//! ```

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{QueueConfig, ThrottleConfig};
use crate::metrics;

/// Texts up to this many characters are dispatched at [`Priority::High`].
pub const SHORT_TEXT_CHARS: usize = 100;

/// Texts up to this many characters are dispatched at [`Priority::Normal`].
pub const MEDIUM_TEXT_CHARS: usize = 500;

/// Request priority levels
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Long texts and background refreshes.
    Low = 0,
    /// Medium-length texts.
    #[default]
    Normal = 1,
    /// Short texts; cheap to serve, so they jump the line.
    High = 2,
    /// Explicitly escalated requests.
    Critical = 3,
}

impl Priority {
    /// Parse a priority level from a name string (`"low"`, `"normal"`, `"high"`, `"critical"`).
    ///
    /// Returns `None` for unrecognised strings.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }

    /// Coarse length tiering: short texts first, long texts last.
    pub fn for_text(text: &str) -> Self {
        let chars = text.chars().count();
        if chars <= SHORT_TEXT_CHARS {
            Priority::High
        } else if chars <= MEDIUM_TEXT_CHARS {
            Priority::Normal
        } else {
            Priority::Low
        }
    }
}

/// Admission errors.
///
/// `Failed` carries the operation's own error untouched.
#[derive(Debug, Error)]
pub enum AdmissionError<E> {
    /// No lane was registered under this name.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
    /// The queue is draining and accepts no new work.
    #[error("admission queue is closed")]
    Closed,
    /// The entry was still queued when the queues were cleared.
    #[error("queued operation was cleared before it started")]
    Cleared,
    /// The operation itself failed.
    #[error("operation failed: {0}")]
    Failed(E),
}

/// Per-lane occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneStatus {
    /// Waiters not yet granted a slot.
    pub queued: usize,
    /// Operations currently holding a slot.
    pub in_flight: usize,
    /// Configured concurrency limit.
    pub limit: usize,
}

/// Outcome of [`AdmissionQueue::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// `true` if every lane went idle before the timeout.
    pub completed: bool,
    /// Queued entries rejected after the timeout.
    pub cleared: usize,
}

// ── Lanes ──────────────────────────────────────────────────────────────────

enum Grant {
    Slot(Permit),
    Cleared,
}

struct Waiter {
    priority: Priority,
    sequence: u64, // For FIFO within same priority
    grant: oneshot::Sender<Grant>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence (FIFO)
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other => other,
        }
    }
}

#[derive(Default)]
struct Throttle {
    recent: VecDeque<(bool, Duration)>,
    backoff_until: Option<Instant>,
}

impl Throttle {
    fn record(&mut self, ok: bool, latency: Duration, window: usize) {
        self.recent.push_back((ok, latency));
        while self.recent.len() > window.max(1) {
            self.recent.pop_front();
        }
    }

    /// Delay to insert before the next operation, always `<= max_delay`.
    fn delay(&mut self, now: Instant, config: &ThrottleConfig) -> Duration {
        let max = config.max_delay();
        let mut delay = Duration::ZERO;

        if let Some(until) = self.backoff_until {
            if until > now {
                delay = until - now;
            } else {
                self.backoff_until = None;
            }
        }

        if config.enabled && !self.recent.is_empty() && self.recent.len() >= config.min_samples {
            let samples = self.recent.len() as f64;
            let errors = self.recent.iter().filter(|(ok, _)| !ok).count() as f64;
            let avg_latency_ms = self
                .recent
                .iter()
                .map(|(_, l)| l.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / samples;

            let error_pressure = (errors / samples) / config.error_rate_threshold;
            let latency_pressure = avg_latency_ms / config.latency_threshold_ms.max(1) as f64;
            let pressure = error_pressure.max(latency_pressure);

            if pressure >= 1.0 {
                let base = config.base_delay().mul_f64(pressure.min(64.0));
                let jitter_cap = (base.as_millis() / 10) as u64;
                let jitter = if jitter_cap > 0 {
                    rand::thread_rng().gen_range(0..jitter_cap)
                } else {
                    0
                };
                delay = delay.max(base + Duration::from_millis(jitter));
            }
        }

        delay.min(max)
    }
}

struct LaneState {
    limit: usize,
    in_flight: usize,
    waiting: BinaryHeap<Waiter>,
    next_sequence: u64,
    throttle: Throttle,
}

impl LaneState {
    fn live_waiters(&self) -> usize {
        self.waiting.iter().filter(|w| !w.grant.is_closed()).count()
    }
}

struct Lane {
    name: String,
    state: Mutex<LaneState>,
    idle: Arc<Notify>,
}

impl Lane {
    /// Hand free slots to the highest-priority live waiters.
    fn grant_waiting(self: &Arc<Self>, state: &mut LaneState) {
        while state.in_flight < state.limit {
            let Some(waiter) = state.waiting.pop() else {
                break;
            };
            state.in_flight += 1;
            let permit = Permit {
                lane: Arc::clone(self),
                armed: true,
            };
            if let Err(Grant::Slot(mut returned)) = waiter.grant.send(Grant::Slot(permit)) {
                // Waiter gave up; reclaim without re-entering the lock.
                returned.armed = false;
                state.in_flight -= 1;
            }
        }
        metrics::set_queue_depth(&self.name, state.waiting.len() as i64);
    }

    fn release(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            self.grant_waiting(&mut state);
        }
        self.idle.notify_waiters();
    }
}

/// A held concurrency slot; dropping it frees the slot.
struct Permit {
    lane: Arc<Lane>,
    armed: bool,
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.armed {
            self.lane.release();
        }
    }
}

// ── Queue ──────────────────────────────────────────────────────────────────

struct Inner {
    lanes: DashMap<String, Arc<Lane>>,
    config: Mutex<QueueConfig>,
    accepting: AtomicBool,
    idle: Arc<Notify>,
}

/// Per-backend priority admission queue.
///
/// Cheap to clone; clones share the same lanes.
#[derive(Clone)]
pub struct AdmissionQueue {
    inner: Arc<Inner>,
}

impl AdmissionQueue {
    /// Create an empty queue. Backends must be [`register`](Self::register)ed.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                lanes: DashMap::new(),
                config: Mutex::new(config),
                accepting: AtomicBool::new(true),
                idle: Arc::new(Notify::new()),
            }),
        }
    }

    /// Register a lane for `backend` using its configured limit.
    ///
    /// Registering an existing backend is a no-op.
    pub fn register(&self, backend: &str) {
        let limit = self.inner.config.lock().limit_for(backend);
        self.inner
            .lanes
            .entry(backend.to_string())
            .or_insert_with(|| {
                debug!(limit = limit, "admission lane registered");
                Arc::new(Lane {
                    name: backend.to_string(),
                    state: Mutex::new(LaneState {
                        limit,
                        in_flight: 0,
                        waiting: BinaryHeap::new(),
                        next_sequence: 0,
                        throttle: Throttle::default(),
                    }),
                    idle: Arc::clone(&self.inner.idle),
                })
            });
    }

    /// Whether a lane exists for `backend`.
    pub fn is_registered(&self, backend: &str) -> bool {
        self.inner.lanes.contains_key(backend)
    }

    /// Run `operation` once a slot on `backend`'s lane is available.
    ///
    /// Runs immediately when the lane has spare capacity and nobody is
    /// waiting; otherwise waits behind higher-priority and earlier
    /// equal-priority entries. Never retries.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::UnknownBackend`] if the lane was never registered.
    /// - [`AdmissionError::Closed`] once [`drain`](Self::drain) has begun.
    /// - [`AdmissionError::Cleared`] if the entry was rejected while queued.
    /// - [`AdmissionError::Failed`] with the operation's own error.
    pub async fn enqueue<F, Fut, T, E>(
        &self,
        backend: &str,
        priority: Priority,
        operation: F,
    ) -> Result<T, AdmissionError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.inner.accepting.load(AtomicOrdering::SeqCst) {
            return Err(AdmissionError::Closed);
        }

        let lane = self
            .inner
            .lanes
            .get(backend)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AdmissionError::UnknownBackend(backend.to_string()))?;

        let permit = self.acquire(&lane, priority).await?;

        let throttle_config = self.inner.config.lock().throttle.clone();
        let delay = lane.state.lock().throttle.delay(Instant::now(), &throttle_config);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "admission: throttling lane");
            tokio::time::sleep(delay).await;
        }

        let started = Instant::now();
        let result = operation().await;
        lane.state
            .lock()
            .throttle
            .record(result.is_ok(), started.elapsed(), throttle_config.window);

        drop(permit);
        result.map_err(AdmissionError::Failed)
    }

    async fn acquire<E>(
        &self,
        lane: &Arc<Lane>,
        priority: Priority,
    ) -> Result<Permit, AdmissionError<E>> {
        let rx = {
            let mut state = lane.state.lock();
            if state.in_flight < state.limit && state.waiting.is_empty() {
                state.in_flight += 1;
                return Ok(Permit {
                    lane: Arc::clone(lane),
                    armed: true,
                });
            }

            let (tx, rx) = oneshot::channel();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.waiting.push(Waiter {
                priority,
                sequence,
                grant: tx,
            });

            debug!(
                priority = ?priority,
                sequence = sequence,
                queued = state.waiting.len(),
                "admission: entry queued"
            );
            // Abandoned waiters may be all that blocked the fast path.
            lane.grant_waiting(&mut state);
            rx
        };

        match rx.await {
            Ok(Grant::Slot(permit)) => Ok(permit),
            Ok(Grant::Cleared) | Err(_) => Err(AdmissionError::Cleared),
        }
    }

    /// Delay further operations on `backend` by up to `retry_after`.
    ///
    /// The wait is capped at the throttle's `max_delay_ms`.
    pub fn backoff(&self, backend: &str, retry_after: Duration) {
        let max = self.inner.config.lock().throttle.max_delay();
        if let Some(lane) = self.inner.lanes.get(backend) {
            let until = Instant::now() + retry_after.min(max);
            let mut state = lane.state.lock();
            state.throttle.backoff_until = Some(match state.throttle.backoff_until {
                Some(existing) if existing > until => existing,
                _ => until,
            });
        }
    }

    /// Waiters on `backend`'s lane, or 0 for unknown backends.
    pub fn queue_size(&self, backend: &str) -> usize {
        self.inner
            .lanes
            .get(backend)
            .map_or(0, |lane| lane.state.lock().live_waiters())
    }

    /// Per-backend occupancy, sorted by backend name.
    pub fn status(&self) -> BTreeMap<String, LaneStatus> {
        self.inner
            .lanes
            .iter()
            .map(|entry| {
                let state = entry.value().state.lock();
                (
                    entry.key().clone(),
                    LaneStatus {
                        queued: state.live_waiters(),
                        in_flight: state.in_flight,
                        limit: state.limit,
                    },
                )
            })
            .collect()
    }

    /// Default per-lane concurrency limit.
    pub fn concurrency_limit(&self) -> usize {
        self.inner.config.lock().default_concurrency
    }

    /// Replace per-backend limits; raised limits take effect immediately.
    ///
    /// Backends missing from `limits` keep their current limit.
    pub fn update_limits(&self, limits: &HashMap<String, usize>) {
        {
            let mut config = self.inner.config.lock();
            for (backend, limit) in limits {
                config.per_backend.insert(backend.clone(), (*limit).max(1));
            }
        }

        for (backend, limit) in limits {
            if let Some(lane) = self.inner.lanes.get(backend) {
                let lane = Arc::clone(lane.value());
                let mut state = lane.state.lock();
                state.limit = (*limit).max(1);
                lane.grant_waiting(&mut state);
                info!(limit = state.limit, "admission: lane limit updated");
            }
        }
    }

    /// Reject every queued entry with [`AdmissionError::Cleared`].
    ///
    /// In-flight operations are unaffected. Returns the number rejected.
    pub fn clear_all_queues(&self) -> usize {
        let mut cleared = 0;
        for entry in self.inner.lanes.iter() {
            let waiters: Vec<Waiter> = {
                let mut state = entry.value().state.lock();
                state.waiting.drain().collect()
            };
            for waiter in waiters {
                if waiter.grant.send(Grant::Cleared).is_ok() {
                    cleared += 1;
                }
            }
            metrics::set_queue_depth(entry.key(), 0);
        }
        self.inner.idle.notify_waiters();
        cleared
    }

    /// Whether new entries are accepted.
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(AtomicOrdering::SeqCst)
    }

    fn is_idle(&self) -> bool {
        self.inner.lanes.iter().all(|entry| {
            let state = entry.value().state.lock();
            state.in_flight == 0 && state.live_waiters() == 0
        })
    }

    /// Stop accepting, let queued and in-flight work finish for up to
    /// `timeout`, then reject whatever is still queued.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        self.inner.accepting.store(false, AtomicOrdering::SeqCst);
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                info!("admission: drained cleanly");
                return DrainReport {
                    completed: true,
                    cleared: 0,
                };
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let cleared = self.clear_all_queues();
        warn!(cleared = cleared, "admission: drain timed out, queued entries rejected");
        DrainReport {
            completed: false,
            cleared,
        }
    }
}
