//! # tokio-translation-orchestrator
//!
//! Resilient multi-backend translation dispatch over Tokio.
//!
//! ## Architecture
//!
//! Every request runs through one ordered step pipeline:
//! ```text
//! validate → cache-read → glossary-protect → dispatch → glossary-restore
//!          → quality → confidence → cache-write
//! ```
//!
//! The dispatch step hands the text to a [`routing::BackendRouter`], which
//! walks healthy backends in ranking order and submits each attempt through a
//! per-backend [`admission::AdmissionQueue`] lane. Cache reads are
//! stale-while-revalidate: a stale entry is served immediately while one
//! background refresh replaces it.

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod admission;
pub mod backend;
pub mod cache;
pub mod confidence;
pub mod config;
pub mod glossary;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod quality;
pub mod review;
pub mod routing;

// Re-exports for convenience
pub use admission::{AdmissionError, AdmissionQueue, Priority};
pub use backend::{BackendDescriptor, BackendError, Capability, EchoBackend, TranslationBackend};
pub use cache::SwrCache;
pub use config::validation::ConfigError;
pub use config::OrchestratorConfig;
pub use orchestrator::{Orchestrator, OrchestratorStatus, ShutdownReport};
pub use pipeline::{Pipeline, PipelineError, TranslationRequest, TranslationResult};
pub use routing::{BackendRouter, DispatchError};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Example
///
/// ```no_run
/// # use tokio_translation_orchestrator::{init_tracing, OrchestratorError};
/// # fn example() -> Result<(), OrchestratorError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), OrchestratorError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level orchestrator errors.
///
/// Module errors convert into this type with `?`.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dispatch to the backends failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A pipeline execution failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The review queue could not be persisted.
    #[error(transparent)]
    Review(#[from] review::ReviewError),

    /// A glossary term could not be compiled.
    #[error(transparent)]
    Glossary(#[from] glossary::GlossaryError),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
