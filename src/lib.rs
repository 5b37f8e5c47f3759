//! Batch submission of entity operations to a remote API.
//!
//! Callers queue create/update/delete operations on a [`BatchRunner`] and push them.
//! Each operation becomes exactly one API call, made through a [`Submitter`]. How the
//! calls are scheduled is decided by a pluggable [`ExecutionStrategy`] chosen from
//! configuration: one at a time ([`SequentialStrategy`]), or in parallel behind a
//! bounded pool ([`ConcurrentStrategy`]).
//!
//! Whatever the strategy, a push yields a [`BatchSummary`] holding one
//! [`OperationResult`] per queued operation, in queue order. A failed call is recorded
//! in its result and never aborts its siblings; only setup problems and errors a
//! submitter flags as fatal fail the whole batch.

pub mod batch;
pub mod error;
pub mod http;
pub mod metrics;
pub mod operation;
pub mod strategy;

// Re-export commonly used types
pub use batch::{BatchId, BatchRunner, BatchSummary, ReadBack};
pub use error::{BarrageError, Result};
pub use http::{ApiResponse, MockSubmitter, ReqwestSubmitter, Submitter, SubmitterConfig};
pub use operation::{
    ClientIndex, EntityOperation, FailureKind, OperationKind, OperationResult, Outcome, Payload,
};
pub use strategy::{
    ConcurrentStrategy, ExecutionStrategy, SequentialStrategy, Strategy, StrategyConfig,
    StrategyKind,
};
