//! Aggregated report of one completed batch run.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BarrageError, Result};
use crate::operation::{ClientIndex, OperationResult, Outcome};

/// Unique identifier for a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        BatchId(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for BatchId {
    fn from(uuid: Uuid) -> Self {
        BatchId(uuid)
    }
}

impl std::ops::Deref for BatchId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Result of reading one written entity back from the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadBack {
    /// Operation that wrote the entity
    pub client_index: ClientIndex,
    pub entity_type: String,
    pub entity_id: String,
    pub outcome: Outcome,
}

impl ReadBack {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }
}

/// Outcome of one batch run.
///
/// Always holds one result per queued operation, sorted by client index.
/// `success_count + failure_count == total_count` by construction.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    /// Name of the strategy that executed the batch
    pub strategy: String,
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub results: Vec<OperationResult>,
    /// Entities read back after the push, in client-index order. Empty unless the
    /// runner has read-back enabled.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub read_back: Vec<ReadBack>,
}

impl BatchSummary {
    /// Build a summary from a strategy's results.
    ///
    /// # Errors
    /// Returns [`BarrageError::IncompleteResults`] if the results do not cover exactly
    /// `expected` distinct operations.
    pub fn from_results(
        batch_id: BatchId,
        strategy: &str,
        expected: usize,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        elapsed: Duration,
        mut results: Vec<OperationResult>,
    ) -> Result<Self> {
        let distinct: HashSet<_> = results.iter().map(|r| r.client_index).collect();
        if results.len() != expected || distinct.len() != expected {
            return Err(BarrageError::IncompleteResults {
                expected,
                actual: distinct.len(),
            });
        }

        results.sort_by_key(|r| r.client_index);
        let success_count = results.iter().filter(|r| r.is_success()).count();

        Ok(Self {
            batch_id,
            strategy: strategy.to_string(),
            total_count: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            started_at,
            finished_at,
            elapsed,
            results,
            read_back: Vec::new(),
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| r.is_failure())
    }

    pub fn successes(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn read_back_failures(&self) -> impl Iterator<Item = &ReadBack> {
        self.read_back.iter().filter(|r| !r.is_success())
    }

    pub fn is_complete_success(&self) -> bool {
        self.failure_count == 0
    }
}
