//! Mock submitter for tests.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;

use super::{ApiResponse, Submitter};
use crate::error::{BarrageError, Result};
use crate::operation::{ClientIndex, EntityOperation, OperationKind};

/// Mock submitter for testing.
///
/// Every operation succeeds with a deterministic response unless a behavior has been
/// scripted for its client index. Behaviors are replayed on every call, so the same
/// mock can drive several batches and produce identical results.
///
/// # Example
/// ```ignore
/// let mock = MockSubmitter::new();
/// mock.fail_index(2, 500, "internal error");
/// mock.delay_index(0, Duration::from_millis(50));
/// ```
#[derive(Clone, Default)]
pub struct MockSubmitter {
    behaviors: Arc<Mutex<HashMap<ClientIndex, MockBehavior>>>,
    delays: Arc<Mutex<HashMap<ClientIndex, Duration>>>,
    default_delay: Arc<Mutex<Option<Duration>>>,
    random_delay: Arc<Mutex<Option<Range<Duration>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    fetch_failures: Arc<Mutex<HashMap<String, (u16, String)>>>,
    fetches: Arc<Mutex<Vec<(String, String)>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// Scripted behavior for one client index.
#[derive(Clone)]
enum MockBehavior {
    Respond(ApiResponse),
    Reject { status: u16, body: String },
    NetworkError(String),
    Panic(String),
    Fatal(String),
    /// Waits for the trigger before answering; only the first call waits
    Triggered {
        response: ApiResponse,
        trigger: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
    },
}

/// Record of a call made to the mock submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub client_index: ClientIndex,
    pub kind: OperationKind,
    pub entity_type: String,
    pub target_id: Option<String>,
}

impl MockSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the operation at `index` with `response`.
    pub fn respond(&self, index: usize, response: ApiResponse) {
        self.script(index, MockBehavior::Respond(response));
    }

    /// Have the remote API reject the operation at `index`.
    pub fn fail_index(&self, index: usize, status: u16, body: &str) {
        self.script(
            index,
            MockBehavior::Reject {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Fail the operation at `index` with a transport-level error.
    pub fn network_error(&self, index: usize, message: &str) {
        self.script(index, MockBehavior::NetworkError(message.to_string()));
    }

    /// Panic inside `submit` for the operation at `index`.
    pub fn panic_index(&self, index: usize, message: &str) {
        self.script(index, MockBehavior::Panic(message.to_string()));
    }

    /// Report the operation at `index` as malformed, which aborts the batch.
    pub fn fatal_index(&self, index: usize, message: &str) {
        self.script(index, MockBehavior::Fatal(message.to_string()));
    }

    /// Hold the operation at `index` until the returned sender fires (or is dropped).
    pub fn respond_with_trigger(&self, index: usize, response: ApiResponse) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script(
            index,
            MockBehavior::Triggered {
                response,
                trigger: Arc::new(Mutex::new(Some(rx))),
            },
        );
        tx
    }

    /// Sleep for `delay` before answering the operation at `index`.
    pub fn delay_index(&self, index: usize, delay: Duration) {
        self.delays.lock().insert(ClientIndex(index), delay);
    }

    /// Sleep for `delay` before answering any operation without its own delay.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.default_delay.lock() = Some(delay);
        self
    }

    /// Sleep for a random time in `range` before answering any operation without its
    /// own delay. Takes precedence over [`with_delay`](Self::with_delay).
    pub fn with_random_delay(self, range: Range<Duration>) -> Self {
        *self.random_delay.lock() = Some(range);
        self
    }

    fn delay_for(&self, index: ClientIndex) -> Option<Duration> {
        if let Some(delay) = self.delays.lock().get(&index).copied() {
            return Some(delay);
        }
        if let Some(range) = self.random_delay.lock().clone() {
            if range.is_empty() {
                return Some(range.start);
            }
            return Some(rand::thread_rng().gen_range(range));
        }
        *self.default_delay.lock()
    }

    fn script(&self, index: usize, behavior: MockBehavior) {
        self.behaviors.lock().insert(ClientIndex(index), behavior);
    }

    /// Have reads of `entity_id` rejected by the API.
    pub fn fail_fetch(&self, entity_id: &str, status: u16, body: &str) {
        self.fetch_failures
            .lock()
            .insert(entity_id.to_string(), (status, body.to_string()));
    }

    /// `(entity_type, entity_id)` of every read, in call order.
    pub fn get_fetches(&self) -> Vec<(String, String)> {
        self.fetches.lock().clone()
    }

    /// All calls made so far, in the order they started.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Client indices in the order their calls started.
    pub fn call_order(&self) -> Vec<usize> {
        self.calls.lock().iter().map(|c| c.client_index.0).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of calls made for one client index.
    pub fn calls_for(&self, index: usize) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.client_index.0 == index)
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of calls currently executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls ever executing at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// The response an unscripted operation receives.
    pub fn default_response(index: ClientIndex) -> ApiResponse {
        ApiResponse::from_body(200, format!(r#"{{"id":{}}}"#, index.0))
    }
}

#[async_trait]
impl Submitter for MockSubmitter {
    async fn submit(&self, operation: &EntityOperation) -> Result<ApiResponse> {
        let index = operation.client_index();

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        // Guard to ensure we decrement even if cancelled/panicked
        let _guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
        };

        self.calls.lock().push(MockCall {
            client_index: index,
            kind: operation.kind(),
            entity_type: operation.entity_type().to_string(),
            target_id: operation.target_id().map(str::to_string),
        });

        if let Some(delay) = self.delay_for(index) {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.behaviors.lock().get(&index).cloned();
        match behavior {
            None => Ok(Self::default_response(index)),
            Some(MockBehavior::Respond(response)) => Ok(response),
            Some(MockBehavior::Reject { status, body }) => {
                Err(BarrageError::Rejected { status, body })
            }
            Some(MockBehavior::NetworkError(message)) => Err(BarrageError::Network(message)),
            Some(MockBehavior::Panic(message)) => panic!("{message}"),
            Some(MockBehavior::Fatal(message)) => Err(BarrageError::InvalidOperation(message)),
            Some(MockBehavior::Triggered { response, trigger }) => {
                let rx = trigger.lock().take();
                if let Some(rx) = rx {
                    // Proceed whether the trigger fired or was dropped
                    let _ = rx.await;
                }
                Ok(response)
            }
        }
    }

    async fn fetch(&self, entity_type: &str, entity_id: &str) -> Result<ApiResponse> {
        self.fetches
            .lock()
            .push((entity_type.to_string(), entity_id.to_string()));

        if let Some((status, body)) = self.fetch_failures.lock().get(entity_id).cloned() {
            return Err(BarrageError::Rejected { status, body });
        }
        Ok(ApiResponse::from_body(
            200,
            serde_json::json!({ "id": entity_id }).to_string(),
        ))
    }
}

/// Guard that decrements the in-flight counter when dropped.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
