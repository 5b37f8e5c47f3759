//! Strategy that submits operations in parallel behind a bounded pool.
//!
//! # Coordination
//!
//! ```text
//! operations ──(in client order)──> acquire permit ──> spawn unit ──┐
//!                                        ▲                          │ submit
//!                                        └──── permit released <────┤
//!                                                                   ▼
//!                     slots[0..n] <── join_next_with_id() <── (slot, OperationResult)
//! ```
//!
//! - A semaphore caps in-flight submissions. The dispatcher walks the queue in order
//!   and takes a permit before spawning each unit, so admission order is input order.
//! - Each unit owns one operation and one slot. Panics inside `submit` are caught at
//!   the unit boundary; a `JoinError` that still escapes is mapped back to its slot
//!   through the task id.
//! - The join waits for every unit. Slots are pre-sized and written once, so the
//!   returned results are in input order regardless of completion order.
//! - A fatal error from any unit aborts the remaining units and fails the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};

use super::{ExecutionStrategy, panic_message, submit_one};
use crate::error::{BarrageError, Result};
use crate::http::Submitter;
use crate::operation::{ClientIndex, EntityOperation, FailureKind, OperationResult};

/// Output of one execution unit: its slot and what happened.
type UnitOutput = Result<(usize, OperationResult)>;

/// Concurrently process all operations.
///
/// By default every operation gets its own slot ("fire all at once"). Set
/// [`with_max_concurrency`](Self::with_max_concurrency) to bound the number of
/// submissions in flight.
#[derive(Debug, Clone, Default)]
pub struct ConcurrentStrategy {
    max_concurrency: Option<usize>,
    call_timeout: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
}

impl ConcurrentStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of submissions in flight at once.
    ///
    /// # Errors
    /// Returns [`BarrageError::Config`] if `limit` is zero, since no operation could
    /// ever be admitted.
    pub fn with_max_concurrency(mut self, limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(BarrageError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        self.max_concurrency = Some(limit);
        Ok(self)
    }

    /// Give up on any single call after `timeout`, recording it as a timeout failure.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    /// Number of units currently executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn pool_size(&self, operations: usize) -> usize {
        self.max_concurrency
            .unwrap_or(operations)
            .min(operations)
            .max(1)
    }
}

/// Pre-sized result storage, one slot per input position.
struct ResultSlots {
    slots: Vec<Option<OperationResult>>,
    client_indices: Vec<ClientIndex>,
    task_slots: HashMap<Id, usize>,
}

impl ResultSlots {
    fn new(operations: &[EntityOperation]) -> Self {
        Self {
            slots: (0..operations.len()).map(|_| None).collect(),
            client_indices: operations.iter().map(|op| op.client_index()).collect(),
            task_slots: HashMap::with_capacity(operations.len()),
        }
    }

    fn track(&mut self, task: Id, slot: usize) {
        self.task_slots.insert(task, slot);
    }

    fn fill(&mut self, slot: usize, result: OperationResult) {
        // Each slot is owned by exactly one unit; keep the first write
        if let Some(existing) = &self.slots[slot] {
            tracing::error!(
                client_index = %existing.client_index,
                "Duplicate result for operation, discarding"
            );
            return;
        }
        self.slots[slot] = Some(result);
    }

    /// Record one joined unit.
    ///
    /// # Errors
    /// Hands back the fatal error a unit returned.
    fn record(&mut self, joined: std::result::Result<(Id, UnitOutput), JoinError>) -> Result<()> {
        match joined {
            Ok((task, Ok((slot, result)))) => {
                self.task_slots.remove(&task);
                if result.is_failure() {
                    tracing::warn!(
                        client_index = %result.client_index,
                        failure = result.failure_kind().map(FailureKind::as_str).unwrap_or_default(),
                        "Operation failed"
                    );
                } else {
                    tracing::debug!(client_index = %result.client_index, "Operation succeeded");
                }
                self.fill(slot, result);
                Ok(())
            }
            Ok((task, Err(e))) => {
                self.task_slots.remove(&task);
                Err(e)
            }
            Err(join_error) => {
                let Some(slot) = self.task_slots.remove(&join_error.id()) else {
                    tracing::error!(error = %join_error, "Unknown task terminated");
                    return Ok(());
                };
                let client_index = self.client_indices[slot];
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic().as_ref())
                } else {
                    join_error.to_string()
                };
                tracing::error!(
                    client_index = %client_index,
                    error = %message,
                    "Execution unit terminated"
                );
                self.fill(
                    slot,
                    OperationResult::failure(
                        client_index,
                        FailureKind::TaskTerminated,
                        format!("Execution unit terminated: {message}"),
                        Duration::ZERO,
                    ),
                );
                Ok(())
            }
        }
    }

    /// Produce the final results in input order.
    ///
    /// Every slot has been filled by the time the join completes; any that has not is
    /// recorded as a terminated unit rather than dropped.
    fn finish(self) -> Vec<OperationResult> {
        let mut results: Vec<OperationResult> = self
            .slots
            .into_iter()
            .zip(self.client_indices)
            .map(|(slot, client_index)| {
                slot.unwrap_or_else(|| {
                    tracing::error!(client_index = %client_index, "No result recorded for operation");
                    OperationResult::failure(
                        client_index,
                        FailureKind::TaskTerminated,
                        "Execution unit produced no result",
                        Duration::ZERO,
                    )
                })
            })
            .collect();
        results.sort_by_key(|r| r.client_index);
        results
    }
}

#[async_trait]
impl ExecutionStrategy for ConcurrentStrategy {
    fn name(&self) -> &'static str {
        "concurrent"
    }

    fn max_in_flight(&self) -> Option<usize> {
        self.max_concurrency
    }

    #[tracing::instrument(skip_all, fields(strategy = "concurrent", operations = operations.len(), max_concurrency = ?self.max_concurrency))]
    async fn execute(
        &self,
        operations: &[EntityOperation],
        submitter: Arc<dyn Submitter>,
    ) -> Result<Vec<OperationResult>> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }

        let pool_size = self.pool_size(operations.len());
        let semaphore = Arc::new(Semaphore::new(pool_size));
        let mut slots = ResultSlots::new(operations);
        let mut join_set: JoinSet<UnitOutput> = JoinSet::new();

        tracing::debug!(pool_size, "Dispatching operations");

        for (slot, operation) in operations.iter().enumerate() {
            // Drain finished units while waiting for a permit so fatal errors surface early
            let permit = loop {
                tokio::select! {
                    biased;
                    Some(joined) = join_set.join_next_with_id(), if !join_set.is_empty() => {
                        if let Err(e) = slots.record(joined) {
                            tracing::error!(error = %e, "Fatal error, aborting batch");
                            join_set.shutdown().await;
                            return Err(e);
                        }
                    }
                    permit = semaphore.clone().acquire_owned() => {
                        break permit.map_err(|e| {
                            BarrageError::Other(anyhow::anyhow!("Concurrency pool closed: {e}"))
                        })?;
                    }
                }
            };

            let operation = operation.clone();
            let submitter = submitter.clone();
            let call_timeout = self.call_timeout;
            let in_flight = self.in_flight.clone();

            let handle = join_set.spawn(async move {
                // Permit is held for the duration of this unit
                let _permit = permit;

                in_flight.fetch_add(1, Ordering::Relaxed);
                let _guard = scopeguard::guard((), |_| {
                    in_flight.fetch_sub(1, Ordering::Relaxed);
                });

                tracing::trace!(client_index = %operation.client_index(), "Submitting operation");

                let result = submit_one(submitter.as_ref(), &operation, call_timeout).await?;
                Ok((slot, result))
            });
            slots.track(handle.id(), slot);
        }

        // Join all units
        while let Some(joined) = join_set.join_next_with_id().await {
            if let Err(e) = slots.record(joined) {
                tracing::error!(error = %e, "Fatal error, aborting batch");
                join_set.shutdown().await;
                return Err(e);
            }
        }

        Ok(slots.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ApiResponse, MockSubmitter};
    use crate::operation::Payload;

    fn operations(n: usize) -> Vec<EntityOperation> {
        (0..n)
            .map(|i| EntityOperation::create(i, "posts", Payload::new()))
            .collect()
    }

    fn indices(results: &[OperationResult]) -> Vec<usize> {
        results.iter().map(|r| r.client_index.0).collect()
    }

    #[test_log::test(tokio::test)]
    async fn test_concurrent_reassembles_in_client_order() {
        let mock = MockSubmitter::new();
        // Earlier operations finish last
        for i in 0..5 {
            mock.delay_index(i, Duration::from_millis(10 * (5 - i as u64)));
        }

        let results = ConcurrentStrategy::new()
            .execute(&operations(5), Arc::new(mock.clone()))
            .await
            .unwrap();

        assert_eq!(indices(&results), vec![0, 1, 2, 3, 4]);
        for result in &results {
            assert_eq!(
                result.response().and_then(|r| r.entity_id.clone()),
                Some(result.client_index.0.to_string())
            );
        }
        assert_eq!(mock.call_count(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_unbounded_dispatches_everything_at_once() {
        let mock = MockSubmitter::new();
        let ok = |body: &str| ApiResponse {
            status: 200,
            body: body.to_string(),
            entity_id: None,
        };
        let triggers: Vec<_> = (0..4)
            .map(|i| mock.respond_with_trigger(i, ok(&format!("r{i}"))))
            .collect();

        let strategy = ConcurrentStrategy::new();
        let ops = operations(4);
        let submitter: Arc<dyn Submitter> = Arc::new(mock.clone());
        let strategy_clone = strategy.clone();
        let handle =
            tokio::spawn(async move { strategy_clone.execute(&ops, submitter).await });

        let start = tokio::time::Instant::now();
        while mock.in_flight_count() < 4 && start.elapsed() < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(mock.in_flight_count(), 4);
        assert_eq!(strategy.in_flight_count(), 4);

        // Release in reverse order
        for trigger in triggers.into_iter().rev() {
            trigger.send(()).unwrap();
        }

        let results = handle.await.unwrap().unwrap();
        assert_eq!(indices(&results), vec![0, 1, 2, 3]);
        assert_eq!(results[2].response().unwrap().body, "r2");
        assert_eq!(strategy.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_respects_max_concurrency() {
        let mock = MockSubmitter::new().with_delay(Duration::from_millis(15));

        let results = ConcurrentStrategy::new()
            .with_max_concurrency(3)
            .unwrap()
            .execute(&operations(12), Arc::new(mock.clone()))
            .await
            .unwrap();

        assert_eq!(results.len(), 12);
        assert_eq!(mock.call_count(), 12);
        assert!(
            mock.peak_in_flight() <= 3,
            "Concurrency limit violated: peak {}",
            mock.peak_in_flight()
        );
        assert_eq!(mock.peak_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_admission_follows_client_order() {
        let mock = MockSubmitter::new();
        mock.delay_index(0, Duration::from_millis(30));
        mock.delay_index(2, Duration::from_millis(20));

        ConcurrentStrategy::new()
            .with_max_concurrency(1)
            .unwrap()
            .execute(&operations(6), Arc::new(mock.clone()))
            .await
            .unwrap();

        assert_eq!(mock.call_order(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(mock.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_isolates_panicking_unit() {
        let mock = MockSubmitter::new();
        mock.panic_index(3, "simulated crash");
        mock.fail_index(5, 502, "bad gateway");

        let results = ConcurrentStrategy::new()
            .execute(&operations(8), Arc::new(mock.clone()))
            .await
            .unwrap();

        assert_eq!(results.len(), 8);
        assert_eq!(results[3].failure_kind(), Some(&FailureKind::TaskTerminated));
        assert!(matches!(
            results[5].failure_kind(),
            Some(FailureKind::Rejected { status: 502, .. })
        ));
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 6);
        assert_eq!(mock.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_aborts_on_fatal_error() {
        let mock = MockSubmitter::new();
        mock.fatal_index(0, "malformed payload");
        for i in 1..4 {
            mock.delay_index(i, Duration::from_secs(30));
        }

        let strategy = ConcurrentStrategy::new();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            strategy.execute(&operations(4), Arc::new(mock.clone())),
        )
        .await
        .expect("fatal error should abort without waiting for slow units")
        .unwrap_err();

        assert!(matches!(err, BarrageError::InvalidOperation(_)));
        assert_eq!(strategy.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_call_timeout() {
        let mock = MockSubmitter::new();
        mock.delay_index(2, Duration::from_secs(10));

        let results = ConcurrentStrategy::new()
            .with_call_timeout(Duration::from_millis(25))
            .execute(&operations(4), Arc::new(mock.clone()))
            .await
            .unwrap();

        assert_eq!(results[2].failure_kind(), Some(&FailureKind::Timeout));
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 3);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        assert!(matches!(
            ConcurrentStrategy::new().with_max_concurrency(0),
            Err(BarrageError::Config(_))
        ));
    }

    #[test]
    fn test_pool_size() {
        let unbounded = ConcurrentStrategy::new();
        assert_eq!(unbounded.pool_size(7), 7);
        let bounded = ConcurrentStrategy::new().with_max_concurrency(3).unwrap();
        assert_eq!(bounded.pool_size(7), 3);
        assert_eq!(bounded.pool_size(2), 2);
    }

    #[test]
    fn test_result_slots_fill_gaps_on_finish() {
        let ops = operations(3);
        let mut slots = ResultSlots::new(&ops);
        slots.fill(
            1,
            OperationResult::success(
                ClientIndex(1),
                MockSubmitter::default_response(ClientIndex(1)),
                Duration::ZERO,
            ),
        );
        // Second write to the same slot is ignored
        slots.fill(
            1,
            OperationResult::failure(
                ClientIndex(1),
                FailureKind::Other,
                "late duplicate",
                Duration::ZERO,
            ),
        );

        let results = slots.finish();
        assert_eq!(indices(&results), vec![0, 1, 2]);
        assert!(results[1].is_success());
        assert_eq!(results[0].failure_kind(), Some(&FailureKind::TaskTerminated));
        assert_eq!(results[2].failure_kind(), Some(&FailureKind::TaskTerminated));
    }

    async fn crash() -> UnitOutput {
        panic!("unit crashed")
    }

    #[tokio::test]
    async fn test_result_slots_map_dead_units_back_to_their_slot() {
        let ops = operations(3);
        let mut slots = ResultSlots::new(&ops);
        let mut join_set: JoinSet<UnitOutput> = JoinSet::new();

        let finished = join_set.spawn(async {
            Ok((
                0,
                OperationResult::success(
                    ClientIndex(0),
                    MockSubmitter::default_response(ClientIndex(0)),
                    Duration::ZERO,
                ),
            ))
        });
        slots.track(finished.id(), 0);

        // Dies outside submit_one, so nothing catches the panic
        let crashed = join_set.spawn(crash());
        slots.track(crashed.id(), 1);

        let aborted = join_set.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok((
                2,
                OperationResult::success(
                    ClientIndex(2),
                    MockSubmitter::default_response(ClientIndex(2)),
                    Duration::ZERO,
                ),
            ))
        });
        slots.track(aborted.id(), 2);
        aborted.abort();

        while let Some(joined) = join_set.join_next_with_id().await {
            slots.record(joined).unwrap();
        }
        assert!(slots.task_slots.is_empty());

        let results = slots.finish();
        assert_eq!(indices(&results), vec![0, 1, 2]);
        assert!(results[0].is_success());
        assert_eq!(results[1].failure_kind(), Some(&FailureKind::TaskTerminated));
        assert!(matches!(
            &results[1].outcome,
            crate::operation::Outcome::Failure { message, .. } if message.contains("unit crashed")
        ));
        assert_eq!(results[2].failure_kind(), Some(&FailureKind::TaskTerminated));
    }
}
