//! # Declarative Orchestrator Configuration
//!
//! ## Responsibility
//! Define, parse, and validate the TOML configuration that sizes every
//! component: admission lanes, router thresholds, cache bounds, pipeline
//! limits, quality and confidence gates, the glossary, and runtime knobs.
//!
//! ## Guarantees
//! - Every field has a documented serde default, so an empty file is valid
//! - Validated: semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building components from config (that belongs to `orchestrator`)
//! - Command-line handling

pub mod loader;
pub mod validation;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

fn default_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_throttle_window() -> usize {
    20
}

fn default_throttle_min_samples() -> usize {
    5
}

fn default_error_rate_threshold() -> f64 {
    0.5
}

fn default_latency_threshold_ms() -> u64 {
    5000
}

fn default_throttle_base_delay_ms() -> u64 {
    250
}

fn default_throttle_max_delay_ms() -> u64 {
    2000
}

fn default_rerank_interval() -> u64 {
    10
}

fn default_min_successes_for_rerank() -> u64 {
    2
}

fn default_max_retries_per_backend() -> usize {
    1
}

fn default_quarantine_threshold() -> u32 {
    5
}

fn default_quarantine_cooldown_s() -> u64 {
    120
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_ttl_s() -> u64 {
    3600
}

fn default_cache_max_stale_s() -> u64 {
    86_400
}

fn default_max_key_length() -> usize {
    500
}

fn default_max_text_length() -> usize {
    10_000
}

fn default_min_length_ratio() -> f64 {
    0.2
}

fn default_max_length_ratio() -> f64 {
    4.0
}

fn default_ratio_min_source_chars() -> usize {
    10
}

fn default_auto_approve() -> f64 {
    0.9
}

fn default_auto_reject() -> f64 {
    0.3
}

fn default_review_capacity() -> usize {
    10_000
}

fn default_batch_concurrency() -> usize {
    8
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for an orchestrator instance.
///
/// # Example
///
/// ```toml
/// [queue]
/// default_concurrency = 2
///
/// [queue.per_backend]
/// deepl = 4
///
/// [router]
/// max_retries_per_backend = 1
///
/// [[glossary.terms]]
/// source = "Dashboard"
/// targets = { de = "Übersicht" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OrchestratorConfig {
    /// Admission queue sizing and throttling.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Backend health routing and quarantine.
    #[serde(default)]
    pub router: RouterConfig,
    /// Stale-while-revalidate cache.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Input limits enforced by the validation step.
    #[serde(default)]
    pub pipeline: PipelineLimits,
    /// Post-translation quality checks.
    #[serde(default)]
    pub quality: QualityConfig,
    /// Confidence gating thresholds and review queue.
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    /// Protected terminology.
    #[serde(default)]
    pub glossary: GlossaryConfig,
    /// Batch and shutdown settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

// ── Queue ────────────────────────────────────────────────────────────────

/// Admission queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct QueueConfig {
    /// Concurrency limit for backends without an explicit override.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,
    /// Per-backend concurrency overrides keyed by backend name.
    #[serde(default)]
    pub per_backend: BTreeMap<String, usize>,
    /// Adaptive throttling.
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            per_backend: BTreeMap::new(),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Effective limit for `backend`.
    pub fn limit_for(&self, backend: &str) -> usize {
        self.per_backend
            .get(backend)
            .copied()
            .unwrap_or(self.default_concurrency)
            .max(1)
    }
}

/// Adaptive throttling configuration.
///
/// When a lane's recent error rate or average latency crosses its threshold,
/// a delay proportional to the overshoot (capped at `max_delay_ms`) is
/// inserted before each operation on that lane.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ThrottleConfig {
    /// Whether adaptive throttling is active.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of recent outcomes kept per lane.
    #[serde(default = "default_throttle_window")]
    pub window: usize,
    /// Outcomes required before throttling can kick in.
    #[serde(default = "default_throttle_min_samples")]
    pub min_samples: usize,
    /// Error rate (0.0–1.0) at which throttling starts.
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    /// Average latency (ms) at which throttling starts.
    #[serde(default = "default_latency_threshold_ms")]
    pub latency_threshold_ms: u64,
    /// Delay (ms) applied at exactly the threshold.
    #[serde(default = "default_throttle_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound (ms) for any throttle or backoff delay.
    #[serde(default = "default_throttle_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            window: default_throttle_window(),
            min_samples: default_throttle_min_samples(),
            error_rate_threshold: default_error_rate_threshold(),
            latency_threshold_ms: default_latency_threshold_ms(),
            base_delay_ms: default_throttle_base_delay_ms(),
            max_delay_ms: default_throttle_max_delay_ms(),
        }
    }
}

impl ThrottleConfig {
    /// Delay applied at the threshold.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Ceiling for any delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// ── Router ───────────────────────────────────────────────────────────────

/// Backend health router configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RouterConfig {
    /// Re-rank backends every N dispatch calls.
    #[serde(default = "default_rerank_interval")]
    pub rerank_interval: u64,
    /// Re-ranking is skipped until some backend has more than this many successes.
    #[serde(default = "default_min_successes_for_rerank")]
    pub min_successes_for_rerank: u64,
    /// Extra attempts per candidate within one dispatch.
    #[serde(default = "default_max_retries_per_backend")]
    pub max_retries_per_backend: usize,
    /// Consecutive failures that quarantine a backend.
    #[serde(default = "default_quarantine_threshold")]
    pub quarantine_threshold: u32,
    /// Quarantine cool-down in seconds.
    #[serde(default = "default_quarantine_cooldown_s")]
    pub quarantine_cooldown_s: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rerank_interval: default_rerank_interval(),
            min_successes_for_rerank: default_min_successes_for_rerank(),
            max_retries_per_backend: default_max_retries_per_backend(),
            quarantine_threshold: default_quarantine_threshold(),
            quarantine_cooldown_s: default_quarantine_cooldown_s(),
        }
    }
}

impl RouterConfig {
    /// Quarantine cool-down as a [`Duration`].
    pub fn quarantine_cooldown(&self) -> Duration {
        Duration::from_secs(self.quarantine_cooldown_s)
    }
}

// ── Cache ────────────────────────────────────────────────────────────────

/// Stale-while-revalidate cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CacheConfig {
    /// Whether the cache steps take part in the pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of entries before LRU eviction.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Freshness window in seconds.
    #[serde(default = "default_cache_ttl_s")]
    pub ttl_s: u64,
    /// How long past `ttl_s` an entry may still be served stale.
    #[serde(default = "default_cache_max_stale_s")]
    pub max_stale_s: u64,
    /// Fresh reads restart the entry's freshness window.
    #[serde(default)]
    pub update_age_on_get: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            capacity: default_cache_capacity(),
            ttl_s: default_cache_ttl_s(),
            max_stale_s: default_cache_max_stale_s(),
            update_age_on_get: false,
        }
    }
}

impl CacheConfig {
    /// Freshness window.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_s)
    }

    /// Stale-serving window past the TTL.
    pub fn max_stale(&self) -> Duration {
        Duration::from_secs(self.max_stale_s)
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Input limits for the validation step.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PipelineLimits {
    /// Longest accepted key, in characters.
    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,
    /// Longest accepted source text, in characters.
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_key_length: default_max_key_length(),
            max_text_length: default_max_text_length(),
        }
    }
}

// ── Quality ──────────────────────────────────────────────────────────────

/// Quality check configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct QualityConfig {
    /// Translation/source length ratio below which an issue is raised.
    #[serde(default = "default_min_length_ratio")]
    pub min_length_ratio: f64,
    /// Translation/source length ratio above which an issue is raised.
    #[serde(default = "default_max_length_ratio")]
    pub max_length_ratio: f64,
    /// Sources shorter than this are exempt from the ratio check.
    #[serde(default = "default_ratio_min_source_chars")]
    pub ratio_min_source_chars: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_length_ratio: default_min_length_ratio(),
            max_length_ratio: default_max_length_ratio(),
            ratio_min_source_chars: default_ratio_min_source_chars(),
        }
    }
}

// ── Confidence ───────────────────────────────────────────────────────────

/// Confidence gating configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ConfidenceConfig {
    /// Scores at or above this are approved without review.
    #[serde(default = "default_auto_approve")]
    pub auto_approve: f64,
    /// Scores below this are rejected and fall back to the source text.
    #[serde(default = "default_auto_reject")]
    pub auto_reject: f64,
    /// Where the review queue is written on shutdown. `None` keeps it in memory.
    #[serde(default)]
    pub review_queue_path: Option<String>,
    /// Maximum review records held in memory; the oldest are dropped first.
    #[serde(default = "default_review_capacity")]
    pub review_queue_capacity: usize,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            auto_approve: default_auto_approve(),
            auto_reject: default_auto_reject(),
            review_queue_path: None,
            review_queue_capacity: default_review_capacity(),
        }
    }
}

// ── Glossary ─────────────────────────────────────────────────────────────

/// Protected terminology.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GlossaryConfig {
    /// Terms protected from the backend and restored afterwards.
    #[serde(default)]
    pub terms: Vec<GlossaryTerm>,
}

/// One glossary entry.
///
/// A term with no `targets` is a do-not-translate term: it is restored
/// verbatim in every language.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GlossaryTerm {
    /// Source-language spelling, matched case-insensitively on word boundaries.
    pub source: String,
    /// Target-language spellings keyed by language code.
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

// ── Runtime ──────────────────────────────────────────────────────────────

/// Batch and lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RuntimeConfig {
    /// Pipeline executions running at once during batch submission.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    /// How long shutdown waits for in-flight work before force-clearing.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: default_batch_concurrency(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl RuntimeConfig {
    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Export the JSON Schema for [`OrchestratorConfig`].
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(OrchestratorConfig);
    serde_json::to_string_pretty(&schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config: OrchestratorConfig = toml::from_str("").expect("test: empty toml");
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.queue.default_concurrency, 4);
        assert_eq!(config.router.quarantine_threshold, 5);
        assert_eq!(config.router.quarantine_cooldown(), Duration::from_secs(120));
        assert_eq!(config.router.rerank_interval, 10);
    }

    #[test]
    fn test_limit_for_uses_override_then_default() {
        let mut queue = QueueConfig::default();
        queue.per_backend.insert("deepl".into(), 9);
        assert_eq!(queue.limit_for("deepl"), 9);
        assert_eq!(queue.limit_for("other"), 4);
    }

    #[test]
    fn test_limit_for_never_returns_zero() {
        let mut queue = QueueConfig::default();
        queue.per_backend.insert("broken".into(), 0);
        assert_eq!(queue.limit_for("broken"), 1);
    }

    #[test]
    fn test_glossary_terms_parse_from_array_of_tables() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
[[glossary.terms]]
source = "Dashboard"
targets = { de = "Übersicht", fr = "Tableau de bord" }

[[glossary.terms]]
source = "Acme"
"#,
        )
        .expect("test: glossary toml");
        assert_eq!(config.glossary.terms.len(), 2);
        assert_eq!(config.glossary.terms[0].targets["de"], "Übersicht");
        assert!(config.glossary.terms[1].targets.is_empty());
    }

    #[test]
    fn test_export_schema_produces_valid_json() {
        let schema = export_schema().expect("test: schema export");
        let parsed: serde_json::Value =
            serde_json::from_str(&schema).expect("test: schema is valid JSON");
        assert!(parsed.get("properties").is_some() || parsed.get("$ref").is_some());
    }
}
