//! Operation model - queued entity operations and their per-operation results.

mod types;

pub use types::{
    ClientIndex, EntityOperation, FailureKind, OperationKind, OperationResult, Outcome, Payload,
};
