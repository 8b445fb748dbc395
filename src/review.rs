//! Human review queue.
//!
//! Translations whose confidence lands between the auto-reject and
//! auto-approve thresholds are parked here as [`ReviewRecord`]s. The queue is
//! in-memory and bounded; [`ReviewQueue::save`] writes it out as a JSON array
//! on demand.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{info, warn};

use crate::confidence::ConfidenceLevel;

/// Review queue persistence errors.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// Reading or writing the review file failed.
    #[error("review queue I/O on {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The review file is not a valid JSON array of records.
    #[error("review queue serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One translation awaiting human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Correlates with the request's trace span.
    pub request_id: String,
    /// Caller-supplied message key.
    pub key: String,
    /// Source text.
    pub source_text: String,
    /// Proposed translation.
    pub translation: String,
    /// Target language.
    pub target_lang: String,
    /// Confidence score.
    pub score: f64,
    /// Confidence band.
    pub level: ConfidenceLevel,
    /// Scorer findings.
    pub issues: Vec<String>,
    /// When the record was queued.
    pub queued_at: DateTime<Utc>,
}

/// Counters and size, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReviewCounts {
    /// Records currently queued.
    pub review_queue_size: usize,
    /// Translations approved without review.
    pub auto_approved: u64,
    /// Translations rejected and reverted to source.
    pub rejected: u64,
}

/// Bounded in-memory review queue. Oldest records are dropped when full.
#[derive(Debug)]
pub struct ReviewQueue {
    records: Mutex<VecDeque<ReviewRecord>>,
    capacity: usize,
    auto_approved: AtomicU64,
    rejected: AtomicU64,
}

impl ReviewQueue {
    /// Empty queue holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            auto_approved: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Queue a record for review.
    pub fn push(&self, record: ReviewRecord) {
        let mut records = self.records.lock();
        if records.len() >= self.capacity {
            records.pop_front();
            warn!(capacity = self.capacity, "review queue full, dropping oldest record");
        }
        records.push_back(record);
    }

    /// Count an auto-approved translation.
    pub fn record_approved(&self) {
        self.auto_approved.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rejected translation.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records currently queued.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// `true` when nothing awaits review.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all queued records, oldest first.
    pub fn snapshot(&self) -> Vec<ReviewRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Size and counters.
    pub fn counts(&self) -> ReviewCounts {
        ReviewCounts {
            review_queue_size: self.len(),
            auto_approved: self.auto_approved.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Write all queued records to `path` as a pretty-printed JSON array.
    ///
    /// Returns the number of records written.
    pub async fn save(&self, path: &Path) -> Result<usize, ReviewError> {
        let records = self.snapshot();
        let body = serde_json::to_vec_pretty(&records)?;
        tokio::fs::write(path, body)
            .await
            .map_err(|source| ReviewError::Io {
                path: path.display().to_string(),
                source,
            })?;
        info!(records = records.len(), "review queue saved");
        Ok(records.len())
    }

    /// Append records previously written by [`save`](Self::save).
    pub async fn load(&self, path: &Path) -> Result<usize, ReviewError> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|source| ReviewError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let loaded: Vec<ReviewRecord> = serde_json::from_slice(&body)?;
        let count = loaded.len();
        for record in loaded {
            self.push(record);
        }
        Ok(count)
    }
}
