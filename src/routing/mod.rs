//! # Backend Routing
//!
//! ## Responsibility
//! Pick which translation backend serves each attempt, fail over to the next
//! healthy backend on error, and keep the rolling health statistics that drive
//! the ranking.
//!
//! ## Guarantees
//! - Bounded: a dispatch makes at most `candidates × (max_retries_per_backend + 1)`
//!   attempts.
//! - Self-healing: quarantine is a stored deadline checked lazily at selection
//!   time; no background timers.
//! - Never hard-fails on quarantine alone: if every candidate is quarantined,
//!   the quarantine is lifted and the full list is used.
//! - Discreet: failure logs carry only the attempt index and a generic error
//!   kind; stored error text is passed through [`redact`].
//!
//! ## NOT Responsible For
//! - Concurrency limits and throttling (that belongs to `admission`)
//! - Talking to remote services (that belongs to backend adapters)

pub mod router;
pub mod stats;

pub use router::{AttemptRecord, BackendRouter, DispatchError, Dispatched};
pub use stats::{redact, BackendHealth, BackendStats};
