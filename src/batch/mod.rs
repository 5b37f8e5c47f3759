//! Batch runner - queues operations and executes them through a strategy.
//!
//! ```ignore
//! let mut runner = BatchRunner::new(Arc::new(ConcurrentStrategy::new()), submitter);
//! runner.enqueue(OperationKind::Create, "posts", None, payload);
//! runner.enqueue(OperationKind::Delete, "posts", Some("7".into()), Payload::new());
//! let summary = runner.push().await?;
//! println!("{} of {} succeeded", summary.success_count, summary.total_count);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};

use crate::error::{BarrageError, Result};
use crate::http::Submitter;
use crate::operation::{ClientIndex, EntityOperation, FailureKind, OperationKind, Outcome, Payload};
use crate::strategy::{ExecutionStrategy, StrategyConfig};

mod summary;

pub use summary::{BatchId, BatchSummary, ReadBack};

/// Orchestrates one or more batch runs against a submitter.
///
/// The strategy is injected at construction. [`BatchRunner::from_env`] builds it
/// from environment configuration instead; explicit injection always wins since it
/// never consults the environment.
pub struct BatchRunner {
    strategy: Arc<dyn ExecutionStrategy>,
    submitter: Arc<dyn Submitter>,
    queue: Vec<EntityOperation>,
    read_back: bool,
}

impl BatchRunner {
    pub fn new(strategy: Arc<dyn ExecutionStrategy>, submitter: Arc<dyn Submitter>) -> Self {
        Self {
            strategy,
            submitter,
            queue: Vec::new(),
            read_back: false,
        }
    }

    /// Read every created or updated entity back from the API after each push.
    ///
    /// Reads go through [`Submitter::fetch`] with the strategy's concurrency bound.
    /// A failed read is recorded in [`BatchSummary::read_back`] and never fails the
    /// batch.
    pub fn with_read_back(mut self, enabled: bool) -> Self {
        self.read_back = enabled;
        self
    }

    /// Build a runner with the strategy named by the environment.
    ///
    /// # Errors
    /// Returns an error if the strategy configuration is invalid.
    pub fn from_env(submitter: Arc<dyn Submitter>) -> Result<Self> {
        Self::from_config(&StrategyConfig::from_env()?, submitter)
    }

    pub fn from_config(config: &StrategyConfig, submitter: Arc<dyn Submitter>) -> Result<Self> {
        Ok(Self::new(Arc::new(config.build()?), submitter))
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Queue up an operation; its client index is its position in the queue.
    pub fn enqueue(
        &mut self,
        kind: OperationKind,
        entity_type: impl Into<String>,
        target_id: Option<String>,
        payload: Payload,
    ) -> ClientIndex {
        let client_index = ClientIndex(self.queue.len());
        self.queue.push(EntityOperation::new(
            kind,
            entity_type,
            target_id,
            payload,
            client_index,
        ));
        client_index
    }

    /// Queue up a prebuilt operation, keeping its own client index.
    pub fn enqueue_operation(&mut self, operation: EntityOperation) {
        self.queue.push(operation);
    }

    pub fn queued(&self) -> &[EntityOperation] {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn validate_queue(&self) -> Result<()> {
        if self.queue.is_empty() {
            return Err(BarrageError::EmptyQueue);
        }

        let mut seen = HashSet::with_capacity(self.queue.len());
        for operation in &self.queue {
            operation.validate()?;
            if !seen.insert(operation.client_index()) {
                return Err(BarrageError::DuplicateIndex(operation.client_index()));
            }
        }
        Ok(())
    }

    /// Push every queued operation to the API and report the outcome.
    ///
    /// A batch where some operations failed is still a completed batch: the summary
    /// carries a non-zero `failure_count` and the per-operation errors. The queue is
    /// cleared once a summary has been produced.
    ///
    /// # Errors
    /// Returns an error with no summary if the queue is empty, an operation is
    /// malformed, two operations share a client index, or the strategy hits a fatal
    /// error. The queue is left intact in that case.
    #[tracing::instrument(skip(self), fields(strategy = self.strategy.name(), operations = self.queue.len()))]
    pub async fn push(&mut self) -> Result<BatchSummary> {
        if let Err(e) = self.validate_queue() {
            tracing::error!(error = %e, "Rejected batch before execution");
            crate::metrics::record_aborted(self.strategy.name());
            return Err(e);
        }

        let batch_id = BatchId::new();
        tracing::info!(batch_id = %batch_id, "Starting batch");

        let started_at = chrono::Utc::now();
        let start = Instant::now();

        let results = match self
            .strategy
            .execute(&self.queue, self.submitter.clone())
            .await
        {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(batch_id = %batch_id, error = %e, "Batch aborted");
                crate::metrics::record_aborted(self.strategy.name());
                return Err(e);
            }
        };

        let elapsed = start.elapsed();
        let mut summary = BatchSummary::from_results(
            batch_id,
            self.strategy.name(),
            self.queue.len(),
            started_at,
            chrono::Utc::now(),
            elapsed,
            results,
        )?;

        tracing::info!(
            batch_id = %batch_id,
            total = summary.total_count,
            succeeded = summary.success_count,
            failed = summary.failure_count,
            elapsed_ms = elapsed_millis(elapsed),
            "Batch completed"
        );
        if self.read_back {
            summary.read_back = self.read_back_entities(&summary).await;
            tracing::info!(
                batch_id = %batch_id,
                read = summary.read_back.len(),
                failed = summary.read_back_failures().count(),
                "Read back written entities"
            );
        }

        crate::metrics::record_batch(&summary);

        self.queue.clear();
        Ok(summary)
    }
}

impl BatchRunner {
    /// Fetch the entities written by the successful creates and updates of a batch.
    ///
    /// A create is read back under the id the API assigned; an update under its
    /// target id. Deletes have nothing to read.
    async fn read_back_entities(&self, summary: &BatchSummary) -> Vec<ReadBack> {
        let operations: HashMap<ClientIndex, &EntityOperation> = self
            .queue
            .iter()
            .map(|op| (op.client_index(), op))
            .collect();

        let targets: Vec<(ClientIndex, String, String)> = summary
            .successes()
            .filter_map(|result| {
                let operation = operations.get(&result.client_index)?;
                let entity_id = match operation.kind() {
                    OperationKind::Create => result.response()?.entity_id.clone()?,
                    OperationKind::Update => operation.target_id()?.to_string(),
                    OperationKind::Delete => return None,
                };
                Some((
                    result.client_index,
                    operation.entity_type().to_string(),
                    entity_id,
                ))
            })
            .collect();

        let limit = self
            .strategy
            .max_in_flight()
            .unwrap_or(targets.len())
            .max(1);

        stream::iter(targets)
            .map(|(client_index, entity_type, entity_id)| {
                let submitter = self.submitter.clone();
                async move {
                    let outcome = match submitter.fetch(&entity_type, &entity_id).await {
                        Ok(response) => Outcome::Success(response),
                        Err(e) => {
                            tracing::warn!(
                                client_index = %client_index,
                                entity = %format!("{entity_type}/{entity_id}"),
                                error = %e,
                                "Read-back failed"
                            );
                            Outcome::Failure {
                                kind: FailureKind::from_error(&e),
                                message: e.to_string(),
                            }
                        }
                    };
                    ReadBack {
                        client_index,
                        entity_type,
                        entity_id,
                        outcome,
                    }
                }
            })
            .buffered(limit)
            .collect()
            .await
    }
}

/// Whole milliseconds for logging, saturating instead of wrapping.
fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
