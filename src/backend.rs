//! Translation backend abstraction
//!
//! Provides the [`TranslationBackend`] trait every remote translation service
//! is adapted to, the typed [`BackendError`] those adapters fail with, and the
//! [`BackendDescriptor`] the router keeps in its registry.
//!
//! Concrete network adapters live outside this crate. [`EchoBackend`] is a
//! deterministic in-process backend used by the demo binary, the tests, and
//! the benchmarks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Free-form per-request options forwarded to a backend (formality, model, ...).
pub type BackendOptions = HashMap<String, String>;

/// Errors a backend adapter may return.
///
/// The router fails over on every variant; credentials are per-backend, so an
/// [`BackendError::Auth`] on one backend says nothing about the others.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum BackendError {
    /// The backend asked the caller to slow down.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimit {
        /// Server-suggested wait before the next request, when provided.
        retry_after: Option<Duration>,
    },

    /// The backend answered with a 5xx-class status.
    #[error("server error (status {status})")]
    Server {
        /// HTTP-like status code.
        status: u16,
    },

    /// Credentials were rejected.
    #[error("authentication failed (status {status})")]
    Auth {
        /// HTTP-like status code.
        status: u16,
    },

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The call did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The backend does not implement the requested capability.
    #[error("operation not supported by backend")]
    Unsupported,

    /// Anything the adapter could not classify.
    #[error("unknown backend error: {0}")]
    Unknown(String),
}

impl BackendError {
    /// Generic, backend-agnostic label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimit { .. } => "rate_limit",
            Self::Server { .. } => "server",
            Self::Auth { .. } => "auth",
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::Unsupported => "unsupported",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Uniform contract every translation backend implements.
///
/// Implementations must be `Send + Sync`; the router shares them across tasks
/// behind `Arc<dyn TranslationBackend>`.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Translate `text` from `source_lang` into `target_lang`.
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        options: &BackendOptions,
    ) -> Result<String, BackendError>;

    /// Free-form analysis (glossary extraction, tone checks, ...).
    ///
    /// Only called on backends registered with
    /// [`Capability::TranslateAndAnalyze`].
    async fn analyze(&self, _prompt: &str, _options: &BackendOptions) -> Result<String, BackendError> {
        Err(BackendError::Unsupported)
    }
}

/// What a registered backend can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Translation only.
    Translate,
    /// Translation plus the secondary `analyze` entry point.
    TranslateAndAnalyze,
}

impl Capability {
    /// Whether [`TranslationBackend::analyze`] may be routed to this backend.
    pub fn supports_analysis(self) -> bool {
        matches!(self, Self::TranslateAndAnalyze)
    }
}

/// Immutable registry entry: a stable name plus the backend handle.
#[derive(Clone)]
pub struct BackendDescriptor {
    name: String,
    capability: Capability,
    backend: Arc<dyn TranslationBackend>,
}

impl BackendDescriptor {
    /// Register a translate-only backend.
    pub fn new(name: impl Into<String>, backend: Arc<dyn TranslationBackend>) -> Self {
        Self {
            name: name.into(),
            capability: Capability::Translate,
            backend,
        }
    }

    /// Register a backend that also serves `analyze`.
    pub fn with_analysis(name: impl Into<String>, backend: Arc<dyn TranslationBackend>) -> Self {
        Self {
            name: name.into(),
            capability: Capability::TranslateAndAnalyze,
            backend,
        }
    }

    /// Stable backend name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared capability.
    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Shared backend handle.
    pub fn backend(&self) -> Arc<dyn TranslationBackend> {
        Arc::clone(&self.backend)
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("name", &self.name)
            .field("capability", &self.capability)
            .finish()
    }
}

// ============================================================================
// Echo Backend
// ============================================================================

/// Deterministic backend that tags the input with the target language.
///
/// `"Hello"` translated to `de` becomes `"[de] Hello"`. Useful for smoke tests
/// and demos without network access.
pub struct EchoBackend {
    /// Simulated call latency.
    pub delay_ms: u64,
}

impl EchoBackend {
    /// Echo backend with a 10ms simulated latency.
    pub fn new() -> Self {
        Self { delay_ms: 10 }
    }

    /// Echo backend with a custom latency.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranslationBackend for EchoBackend {
    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        target_lang: &str,
        _options: &BackendOptions,
    ) -> Result<String, BackendError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(format!("[{target_lang}] {text}"))
    }

    async fn analyze(&self, prompt: &str, _options: &BackendOptions) -> Result<String, BackendError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(format!("analysis: {} chars", prompt.chars().count()))
    }
}
