//! Execution strategies for running a queue of operations against a submitter.
//!
//! A strategy decides *how* operations reach the API: one after another
//! ([`SequentialStrategy`]) or in parallel behind a bounded pool
//! ([`ConcurrentStrategy`]). Either way the contract is the same: one
//! [`OperationResult`] per input operation, ordered by client index, with individual
//! failures recorded rather than raised.
//!
//! The strategy in use is picked from configuration through [`StrategyConfig`]:
//!
//! ```ignore
//! let strategy = StrategyConfig::from_env()?.build()?;
//! let results = strategy.execute(&operations, submitter).await?;
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::{BarrageError, Result};
use crate::http::Submitter;
use crate::operation::{EntityOperation, FailureKind, OperationResult};

mod concurrent;
mod sequential;

pub use concurrent::ConcurrentStrategy;
pub use sequential::SequentialStrategy;

/// Environment variable naming the strategy to use.
pub const STRATEGY_ENV: &str = "BARRAGE_STRATEGY";
/// Environment variable capping in-flight submissions for the concurrent strategy.
pub const MAX_CONCURRENCY_ENV: &str = "BARRAGE_MAX_CONCURRENCY";
/// Environment variable setting a per-call timeout in milliseconds.
pub const CALL_TIMEOUT_ENV: &str = "BARRAGE_CALL_TIMEOUT_MS";

/// Trait for running a sequence of operations against a submitter.
///
/// Implementations must:
/// - return exactly one result per input operation, sorted by client index
/// - record a failed submission as a failed result and carry on
/// - only return `Err` for fatal conditions (see [`BarrageError::is_fatal`])
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Configuration name of this strategy (e.g. "sequential").
    fn name(&self) -> &'static str;

    /// Most calls this strategy keeps in flight at once. None means no bound.
    fn max_in_flight(&self) -> Option<usize> {
        None
    }

    async fn execute(
        &self,
        operations: &[EntityOperation],
        submitter: Arc<dyn Submitter>,
    ) -> Result<Vec<OperationResult>>;
}

/// Submit one operation and turn whatever happens into an [`OperationResult`].
///
/// Timeouts, submitter errors and panics raised inside `submit` all become a failed
/// result. Only fatal errors come back as `Err`.
pub(crate) async fn submit_one(
    submitter: &dyn Submitter,
    operation: &EntityOperation,
    call_timeout: Option<Duration>,
) -> Result<OperationResult> {
    let client_index = operation.client_index();
    let started = Instant::now();

    let call = AssertUnwindSafe(async {
        match call_timeout {
            Some(limit) => match tokio::time::timeout(limit, submitter.submit(operation)).await {
                Ok(submission) => submission,
                Err(_) => Err(BarrageError::Timeout(limit)),
            },
            None => submitter.submit(operation).await,
        }
    })
    .catch_unwind()
    .await;

    match call {
        Ok(submission) => {
            OperationResult::from_submission(client_index, submission, started.elapsed())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                client_index = %client_index,
                panic = %message,
                "Submit panicked, recording as failure"
            );
            Ok(OperationResult::failure(
                client_index,
                FailureKind::TaskTerminated,
                format!("Execution unit terminated: {message}"),
                started.elapsed(),
            ))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The known execution strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Sequential,
    Concurrent,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Sequential => "sequential",
            StrategyKind::Concurrent => "concurrent",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = BarrageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(StrategyKind::Sequential),
            "concurrent" => Ok(StrategyKind::Concurrent),
            _ => Err(BarrageError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Configuration for selecting and building a strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Which strategy to run
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Maximum in-flight submissions for the concurrent strategy.
    /// None means one slot per operation. Ignored by the sequential strategy.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Per-call timeout in milliseconds. None means a hung submit hangs the batch.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

impl StrategyConfig {
    /// Read configuration from the process environment.
    ///
    /// Unset variables fall back to defaults.
    ///
    /// # Errors
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let strategy = match value(STRATEGY_ENV) {
            Some(name) => name.parse()?,
            None => StrategyKind::default(),
        };

        let max_concurrency = value(MAX_CONCURRENCY_ENV)
            .map(|raw| {
                raw.trim().parse::<usize>().map_err(|e| {
                    BarrageError::Config(format!("{MAX_CONCURRENCY_ENV}='{raw}': {e}"))
                })
            })
            .transpose()?;

        let call_timeout_ms = value(CALL_TIMEOUT_ENV)
            .map(|raw| {
                raw.trim().parse::<u64>().map_err(|e| {
                    BarrageError::Config(format!("{CALL_TIMEOUT_ENV}='{raw}': {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            strategy,
            max_concurrency,
            call_timeout_ms,
        })
    }

    /// Build the configured strategy.
    ///
    /// # Errors
    /// Returns [`BarrageError::Config`] if `max_concurrency` is zero.
    pub fn build(&self) -> Result<Strategy> {
        let call_timeout = self.call_timeout_ms.map(Duration::from_millis);

        let strategy = match self.strategy {
            StrategyKind::Sequential => {
                let mut strategy = SequentialStrategy::new();
                if let Some(timeout) = call_timeout {
                    strategy = strategy.with_call_timeout(timeout);
                }
                Strategy::Sequential(strategy)
            }
            StrategyKind::Concurrent => {
                let mut strategy = ConcurrentStrategy::new();
                if let Some(limit) = self.max_concurrency {
                    strategy = strategy.with_max_concurrency(limit)?;
                }
                if let Some(timeout) = call_timeout {
                    strategy = strategy.with_call_timeout(timeout);
                }
                Strategy::Concurrent(strategy)
            }
        };

        tracing::debug!(
            strategy = %self.strategy,
            max_concurrency = ?self.max_concurrency,
            call_timeout_ms = ?self.call_timeout_ms,
            "Built execution strategy"
        );

        Ok(strategy)
    }
}

/// A strategy selected at runtime.
pub enum Strategy {
    Sequential(SequentialStrategy),
    Concurrent(ConcurrentStrategy),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Sequential(_) => StrategyKind::Sequential,
            Strategy::Concurrent(_) => StrategyKind::Concurrent,
        }
    }
}

impl From<SequentialStrategy> for Strategy {
    fn from(strategy: SequentialStrategy) -> Self {
        Strategy::Sequential(strategy)
    }
}

impl From<ConcurrentStrategy> for Strategy {
    fn from(strategy: ConcurrentStrategy) -> Self {
        Strategy::Concurrent(strategy)
    }
}

#[async_trait]
impl ExecutionStrategy for Strategy {
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn max_in_flight(&self) -> Option<usize> {
        match self {
            Strategy::Sequential(strategy) => strategy.max_in_flight(),
            Strategy::Concurrent(strategy) => strategy.max_in_flight(),
        }
    }

    async fn execute(
        &self,
        operations: &[EntityOperation],
        submitter: Arc<dyn Submitter>,
    ) -> Result<Vec<OperationResult>> {
        match self {
            Strategy::Sequential(strategy) => strategy.execute(operations, submitter).await,
            Strategy::Concurrent(strategy) => strategy.execute(operations, submitter).await,
        }
    }
}
