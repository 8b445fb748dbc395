//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`OrchestratorConfig`] that the
//! type system cannot express (range checks, cross-field ordering).
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::OrchestratorConfig;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "router.quarantine_threshold").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: impl Into<String>, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on an [`OrchestratorConfig`].
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
pub fn validate(config: &OrchestratorConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Queue ────────────────────────────────────────────────────────
    if config.queue.default_concurrency == 0 {
        errors.push(invalid(
            "queue.default_concurrency",
            0,
            "must be at least 1",
        ));
    }

    for (backend, limit) in &config.queue.per_backend {
        if *limit == 0 {
            errors.push(invalid(
                format!("queue.per_backend.{backend}"),
                0,
                "must be at least 1",
            ));
        }
    }

    let throttle = &config.queue.throttle;
    if !(0.0..=1.0).contains(&throttle.error_rate_threshold) || throttle.error_rate_threshold == 0.0
    {
        errors.push(invalid(
            "queue.throttle.error_rate_threshold",
            throttle.error_rate_threshold,
            "must be in (0.0, 1.0]",
        ));
    }

    if throttle.latency_threshold_ms == 0 {
        errors.push(invalid(
            "queue.throttle.latency_threshold_ms",
            0,
            "must be at least 1ms",
        ));
    }

    if throttle.base_delay_ms > throttle.max_delay_ms {
        errors.push(invalid(
            "queue.throttle.base_delay_ms",
            throttle.base_delay_ms,
            "must be \u{2264} max_delay_ms",
        ));
    }

    if throttle.window == 0 || throttle.min_samples > throttle.window {
        errors.push(invalid(
            "queue.throttle.min_samples",
            throttle.min_samples,
            "window must be at least 1 and \u{2265} min_samples",
        ));
    }

    // ── Router ───────────────────────────────────────────────────────
    if config.router.rerank_interval == 0 {
        errors.push(invalid("router.rerank_interval", 0, "must be at least 1"));
    }

    if config.router.quarantine_threshold == 0 {
        errors.push(invalid(
            "router.quarantine_threshold",
            0,
            "must be at least 1",
        ));
    }

    if config.router.quarantine_cooldown_s == 0 {
        errors.push(invalid(
            "router.quarantine_cooldown_s",
            0,
            "must be at least 1 second",
        ));
    }

    // ── Cache ────────────────────────────────────────────────────────
    if config.cache.enabled && config.cache.capacity == 0 {
        errors.push(invalid(
            "cache.capacity",
            0,
            "must be at least 1 when the cache is enabled",
        ));
    }

    if config.cache.enabled && config.cache.ttl_s == 0 {
        errors.push(invalid(
            "cache.ttl_s",
            0,
            "must be at least 1 second when the cache is enabled",
        ));
    }

    // ── Pipeline limits ──────────────────────────────────────────────
    if config.pipeline.max_key_length == 0 {
        errors.push(invalid("pipeline.max_key_length", 0, "must be at least 1"));
    }

    if config.pipeline.max_text_length == 0 {
        errors.push(invalid("pipeline.max_text_length", 0, "must be at least 1"));
    }

    // ── Quality ──────────────────────────────────────────────────────
    let quality = &config.quality;
    if quality.min_length_ratio < 0.0 || quality.min_length_ratio >= quality.max_length_ratio {
        errors.push(invalid(
            "quality.min_length_ratio",
            quality.min_length_ratio,
            "must be \u{2265} 0.0 and < max_length_ratio",
        ));
    }

    // ── Confidence ───────────────────────────────────────────────────
    let confidence = &config.confidence;
    if !(0.0..=1.0).contains(&confidence.auto_approve) {
        errors.push(invalid(
            "confidence.auto_approve",
            confidence.auto_approve,
            "must be between 0.0 and 1.0",
        ));
    }

    if !(0.0..=1.0).contains(&confidence.auto_reject) {
        errors.push(invalid(
            "confidence.auto_reject",
            confidence.auto_reject,
            "must be between 0.0 and 1.0",
        ));
    }

    if confidence.auto_reject > confidence.auto_approve {
        errors.push(invalid(
            "confidence.auto_reject",
            confidence.auto_reject,
            "must be \u{2264} auto_approve",
        ));
    }

    // ── Glossary ─────────────────────────────────────────────────────
    for (i, term) in config.glossary.terms.iter().enumerate() {
        if term.source.trim().is_empty() {
            errors.push(invalid(
                format!("glossary.terms[{i}].source"),
                "",
                "glossary source term must not be empty",
            ));
        }
    }

    // ── Runtime ──────────────────────────────────────────────────────
    if config.runtime.batch_concurrency == 0 {
        errors.push(invalid(
            "runtime.batch_concurrency",
            0,
            "must be at least 1",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
