//! Metrics for batch runs.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the embedding
//! application installs a recorder.
//!
//! - `barrage_operations_total{strategy, outcome, failure}`: one per executed operation
//! - `barrage_batches_total{strategy}`: completed batches
//! - `barrage_batch_duration_seconds{strategy}`: wall time of each completed batch
//! - `barrage_batches_aborted_total{strategy}`: batches that hit a fatal error
//! - `barrage_read_backs_total{strategy, outcome}`: entities read back after a push

use ::metrics::{counter, histogram};

use crate::batch::BatchSummary;
use crate::operation::Outcome;

/// Record the per-operation and batch-level metrics for a completed batch.
pub fn record_batch(summary: &BatchSummary) {
    let strategy = summary.strategy.clone();

    for result in &summary.results {
        match &result.outcome {
            Outcome::Success(_) => counter!(
                "barrage_operations_total",
                "strategy" => strategy.clone(),
                "outcome" => "success"
            )
            .increment(1),
            Outcome::Failure { kind, .. } => counter!(
                "barrage_operations_total",
                "strategy" => strategy.clone(),
                "outcome" => "failure",
                "failure" => kind.as_str()
            )
            .increment(1),
        }
    }

    for read in &summary.read_back {
        let outcome = if read.is_success() { "success" } else { "failure" };
        counter!(
            "barrage_read_backs_total",
            "strategy" => strategy.clone(),
            "outcome" => outcome
        )
        .increment(1);
    }

    counter!("barrage_batches_total", "strategy" => strategy.clone()).increment(1);
    histogram!("barrage_batch_duration_seconds", "strategy" => strategy)
        .record(summary.elapsed.as_secs_f64());
}

/// Record a batch that ended in a fatal error.
pub fn record_aborted(strategy: &'static str) {
    counter!("barrage_batches_aborted_total", "strategy" => strategy).increment(1);
}
