//! Prometheus metrics for translation dispatch.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_request`, `inc_attempt`, …) are no-ops if `init_metrics` was never
//! called, so the orchestrator is always safe to run and observability simply
//! degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `translation_requests_total` | Counter | `outcome` |
//! | `translation_attempts_total` | Counter | `outcome` |
//! | `translation_backend_errors_total` | Counter | `kind` |
//! | `translation_cache_lookups_total` | Counter | `result` |
//! | `translation_queue_depth` | Gauge | `backend` |
//! | `translation_pipeline_duration_seconds` | Histogram | none |

use crate::OrchestratorError;
use prometheus::{
    core::Collector, CounterVec, Encoder, Histogram, HistogramOpts, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the orchestrator, bundled together so they can
/// be stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Finished translation requests by outcome (`ok`, `cached`, `stale`, `failed`).
    pub requests_total: CounterVec,
    /// Individual backend attempts by outcome (`ok`, `failed`).
    pub attempts_total: CounterVec,
    /// Backend failures by generic error kind.
    pub backend_errors_total: CounterVec,
    /// Cache lookups by result (`fresh`, `stale`, `miss`).
    pub cache_lookups_total: CounterVec,
    /// Entries waiting for an admission slot, per backend lane.
    pub queue_depth: IntGaugeVec,
    /// End-to-end pipeline latency.
    pub pipeline_duration: Histogram,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> OrchestratorError {
    OrchestratorError::Other(format!("metrics init failed: {e}"))
}

fn register<C>(registry: &Registry, collector: C) -> Result<C, OrchestratorError>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| OrchestratorError::Other(format!("metrics registration failed: {e}")))?;
    Ok(collector)
}

fn build(registry: Registry, prefix: &str) -> Result<Metrics, OrchestratorError> {
    let name = |suffix: &str| format!("{prefix}_{suffix}");

    let requests_total = register(
        &registry,
        CounterVec::new(
            Opts::new(name("requests_total"), "Finished translation requests"),
            &["outcome"],
        )
        .map_err(init_err)?,
    )?;

    let attempts_total = register(
        &registry,
        CounterVec::new(
            Opts::new(name("attempts_total"), "Backend attempts by outcome"),
            &["outcome"],
        )
        .map_err(init_err)?,
    )?;

    let backend_errors_total = register(
        &registry,
        CounterVec::new(
            Opts::new(name("backend_errors_total"), "Backend failures by kind"),
            &["kind"],
        )
        .map_err(init_err)?,
    )?;

    let cache_lookups_total = register(
        &registry,
        CounterVec::new(
            Opts::new(name("cache_lookups_total"), "Cache lookups by result"),
            &["result"],
        )
        .map_err(init_err)?,
    )?;

    let queue_depth = register(
        &registry,
        IntGaugeVec::new(
            Opts::new(name("queue_depth"), "Entries waiting for an admission slot"),
            &["backend"],
        )
        .map_err(init_err)?,
    )?;

    let pipeline_duration = register(
        &registry,
        Histogram::with_opts(HistogramOpts::new(
            name("pipeline_duration_seconds"),
            "End-to-end pipeline duration",
        ))
        .map_err(init_err)?,
    )?;

    Ok(Metrics {
        registry,
        requests_total,
        attempts_total,
        backend_errors_total,
        cache_lookups_total,
        queue_depth,
        pipeline_duration,
    })
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let bundle = build(Registry::new(), "translation")?;

    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(bundle);

    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

fn inc(counter: impl Fn(&Metrics) -> &CounterVec, label: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = counter(m).get_metric_with_label_values(&[label]) {
            c.inc();
        }
    }
}

/// Count a finished request. No-op if metrics have not been initialised.
pub fn inc_request(outcome: &str) {
    inc(|m| &m.requests_total, outcome);
}

/// Count one backend attempt. No-op if metrics have not been initialised.
pub fn inc_attempt(outcome: &str) {
    inc(|m| &m.attempts_total, outcome);
}

/// Count a backend failure by its generic kind (never the backend name).
pub fn inc_backend_error(kind: &str) {
    inc(|m| &m.backend_errors_total, kind);
}

/// Count a cache lookup result.
pub fn inc_cache_lookup(result: &str) {
    inc(|m| &m.cache_lookups_total, result);
}

/// Set the waiting-entry gauge for one backend lane.
///
/// # Panics
///
/// This function never panics.
pub fn set_queue_depth(backend: &str, depth: i64) {
    if let Some(m) = metrics() {
        if let Ok(g) = m.queue_depth.get_metric_with_label_values(&[backend]) {
            g.set(depth);
        }
    }
}

/// Record end-to-end pipeline latency.
pub fn record_pipeline_duration(d: Duration) {
    if let Some(m) = metrics() {
        m.pipeline_duration.observe(d.as_secs_f64());
    }
}

/// Gather all registered metrics as a raw list of metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// A structured snapshot of the request and attempt counters.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Request counts keyed by outcome.
    pub requests_total: HashMap<String, u64>,
    /// Attempt counts keyed by outcome.
    pub attempts_total: HashMap<String, u64>,
    /// Backend error counts keyed by kind.
    pub backend_errors_total: HashMap<String, u64>,
}

fn collect_by_label(counter: &CounterVec, label: &str) -> HashMap<String, u64> {
    let mut out = HashMap::new();
    for family in counter.collect() {
        for metric in family.get_metric() {
            let key = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == label)
                .map_or("unknown", |l| l.get_value());
            out.insert(key.to_string(), metric.get_counter().get_value() as u64);
        }
    }
    out
}

/// Return a structured summary of current counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been initialised.
pub fn get_metrics_summary() -> MetricsSummary {
    let Some(m) = metrics() else {
        return MetricsSummary::default();
    };

    MetricsSummary {
        requests_total: collect_by_label(&m.requests_total, "outcome"),
        attempts_total: collect_by_label(&m.attempts_total, "outcome"),
        backend_errors_total: collect_by_label(&m.backend_errors_total, "kind"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global OnceLock cannot be reset between tests, so exact-value
    // assertions use an isolated bundle.
    fn make_test_metrics() -> Metrics {
        build(Registry::new(), "t").expect("test: build isolated metrics")
    }

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok(), "second call must be a no-op");
    }

    #[test]
    fn test_helpers_before_init_do_not_panic() {
        inc_request("ok");
        inc_backend_error("timeout");
        record_pipeline_duration(Duration::from_millis(5));
        set_queue_depth("deepl", 3);
    }

    #[test]
    fn test_attempt_counter_counts_by_outcome() {
        let m = make_test_metrics();
        for _ in 0..2 {
            m.attempts_total
                .get_metric_with_label_values(&["failed"])
                .expect("test: label ok")
                .inc();
        }
        let summary = collect_by_label(&m.attempts_total, "outcome");
        assert_eq!(summary.get("failed"), Some(&2));
    }

    #[test]
    fn test_queue_depth_gauge_set_to_exact_value() {
        let m = make_test_metrics();
        m.queue_depth
            .get_metric_with_label_values(&["deepl"])
            .expect("test: label ok")
            .set(42);

        let families = m.registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "t_queue_depth")
            .expect("test: family must exist");
        let value = family.get_metric()[0].get_gauge().get_value();
        assert!((value - 42.0).abs() < f64::EPSILON, "gauge must be 42, got {value}");
    }

    #[test]
    fn test_pipeline_histogram_records_observation() {
        let m = make_test_metrics();
        m.pipeline_duration.observe(0.01);
        let families = m.registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "t_pipeline_duration_seconds")
            .expect("test: histogram family must be present");
        assert_eq!(family.get_metric()[0].get_histogram().get_sample_count(), 1);
    }

    #[test]
    fn test_gather_metrics_exposes_translation_prefix_after_init() {
        let _ = init_metrics();
        inc_request("gather-test");
        let text = gather_metrics();
        assert!(text.contains("translation_requests_total"));
    }
}
