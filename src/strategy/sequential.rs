//! Strategy that submits operations one at a time, in queue order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ExecutionStrategy, submit_one};
use crate::error::Result;
use crate::http::Submitter;
use crate::operation::{EntityOperation, OperationResult};

/// Basic strategy that loops over each operation one at a time.
///
/// Completion order equals input order and total wall time is roughly the sum of the
/// individual call latencies. Useful against rate-limited APIs and as a baseline.
#[derive(Debug, Clone, Default)]
pub struct SequentialStrategy {
    call_timeout: Option<Duration>,
}

impl SequentialStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up on any single call after `timeout`, recording it as a timeout failure.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl ExecutionStrategy for SequentialStrategy {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn max_in_flight(&self) -> Option<usize> {
        Some(1)
    }

    #[tracing::instrument(skip_all, fields(strategy = "sequential", operations = operations.len()))]
    async fn execute(
        &self,
        operations: &[EntityOperation],
        submitter: Arc<dyn Submitter>,
    ) -> Result<Vec<OperationResult>> {
        let mut results = Vec::with_capacity(operations.len());

        for operation in operations {
            let result = submit_one(submitter.as_ref(), operation, self.call_timeout)
                .await
                .inspect_err(|e| {
                    tracing::error!(
                        client_index = %operation.client_index(),
                        error = %e,
                        "Fatal error, aborting batch"
                    );
                })?;

            if result.is_failure() {
                tracing::warn!(
                    client_index = %result.client_index,
                    kind = %operation.kind(),
                    entity_type = %operation.entity_type(),
                    "Operation failed"
                );
            } else {
                tracing::debug!(client_index = %result.client_index, "Operation succeeded");
            }

            results.push(result);
        }

        // Input order is already client order unless the caller built the queue by hand
        results.sort_by_key(|r| r.client_index);
        Ok(results)
    }
}
