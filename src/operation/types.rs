//! Entity operations and their results.
//!
//! An [`EntityOperation`] is one queued create/update/delete instruction. Executing it
//! yields exactly one [`OperationResult`], tied back to the operation by its
//! [`ClientIndex`] no matter in which order operations complete.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BarrageError, Result};
use crate::http::ApiResponse;

/// Opaque key-value body carried by an operation.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Position of an operation in the queue it was submitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIndex(pub usize);

impl std::fmt::Display for ClientIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<usize> for ClientIndex {
    fn from(index: usize) -> Self {
        ClientIndex(index)
    }
}

impl std::ops::Deref for ClientIndex {
    type Target = usize;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// What an operation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Update and Delete address an existing entity and need its identity.
    pub fn requires_target(&self) -> bool {
        matches!(self, OperationKind::Update | OperationKind::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued instruction against a remote entity.
///
/// Operations are immutable once built: strategies only ever see them through a
/// shared slice and clone them into the unit that submits them.
///
/// # Example
/// ```ignore
/// let mut payload = Payload::new();
/// payload.insert("title".into(), "hello".into());
/// let op = EntityOperation::create(0, "posts", payload);
/// assert_eq!(op.kind(), OperationKind::Create);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityOperation {
    kind: OperationKind,
    entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_id: Option<String>,
    #[serde(default)]
    payload: Payload,
    client_index: ClientIndex,
}

impl EntityOperation {
    pub fn new(
        kind: OperationKind,
        entity_type: impl Into<String>,
        target_id: Option<String>,
        payload: Payload,
        client_index: impl Into<ClientIndex>,
    ) -> Self {
        Self {
            kind,
            entity_type: entity_type.into(),
            target_id,
            payload,
            client_index: client_index.into(),
        }
    }

    pub fn create(
        client_index: impl Into<ClientIndex>,
        entity_type: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self::new(
            OperationKind::Create,
            entity_type,
            None,
            payload,
            client_index,
        )
    }

    pub fn update(
        client_index: impl Into<ClientIndex>,
        entity_type: impl Into<String>,
        target_id: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self::new(
            OperationKind::Update,
            entity_type,
            Some(target_id.into()),
            payload,
            client_index,
        )
    }

    pub fn delete(
        client_index: impl Into<ClientIndex>,
        entity_type: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self::new(
            OperationKind::Delete,
            entity_type,
            Some(target_id.into()),
            Payload::new(),
            client_index,
        )
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn client_index(&self) -> ClientIndex {
        self.client_index
    }

    /// Check that the operation can be turned into a request at all.
    ///
    /// # Errors
    /// Returns [`BarrageError::InvalidOperation`] if the entity type is blank, or if
    /// an update or delete has no target identity.
    pub fn validate(&self) -> Result<()> {
        if self.entity_type.trim().is_empty() {
            return Err(BarrageError::InvalidOperation(format!(
                "operation {} has an empty entity type",
                self.client_index
            )));
        }
        if self.kind.requires_target()
            && self.target_id.as_deref().is_none_or(|id| id.trim().is_empty())
        {
            return Err(BarrageError::InvalidOperation(format!(
                "{} of {} at {} has no target id",
                self.kind, self.entity_type, self.client_index
            )));
        }
        Ok(())
    }
}

/// Why a single operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum FailureKind {
    /// The remote API answered with a non-success status.
    Rejected { status: u16, body: String },
    /// Connection, DNS, TLS or other transport-level failure.
    NetworkError,
    /// The call exceeded its deadline.
    Timeout,
    /// The execution unit crashed before producing an outcome.
    TaskTerminated,
    /// The request could not be built from the operation.
    InvalidOperation,
    /// Anything else the submitter reported.
    Other,
}

impl FailureKind {
    /// Classify a recoverable submitter error.
    pub fn from_error(error: &BarrageError) -> Self {
        match error {
            BarrageError::Rejected { status, body } => FailureKind::Rejected {
                status: *status,
                body: body.clone(),
            },
            BarrageError::Timeout(_) => FailureKind::Timeout,
            BarrageError::TaskTerminated(_) => FailureKind::TaskTerminated,
            BarrageError::Http(e) if e.is_timeout() => FailureKind::Timeout,
            BarrageError::Http(e) if e.is_builder() => FailureKind::InvalidOperation,
            BarrageError::Http(_) | BarrageError::Network(_) => FailureKind::NetworkError,
            BarrageError::InvalidOperation(_) => FailureKind::InvalidOperation,
            _ => FailureKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Rejected { .. } => "rejected",
            FailureKind::NetworkError => "network_error",
            FailureKind::Timeout => "timeout",
            FailureKind::TaskTerminated => "task_terminated",
            FailureKind::InvalidOperation => "invalid_operation",
            FailureKind::Other => "other",
        }
    }
}

/// Success or failure of one submitted operation.
///
/// Serialized as `{"status": "success" | "failure", "detail": ...}`. The response
/// carries its own HTTP `status`, so the variant data sits under `detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Success(ApiResponse),
    Failure { kind: FailureKind, message: String },
}

/// The result of executing one [`EntityOperation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub client_index: ClientIndex,
    pub outcome: Outcome,
    /// Time spent inside the submit call
    pub elapsed: Duration,
}

impl OperationResult {
    pub fn success(client_index: ClientIndex, response: ApiResponse, elapsed: Duration) -> Self {
        Self {
            client_index,
            outcome: Outcome::Success(response),
            elapsed,
        }
    }

    pub fn failure(
        client_index: ClientIndex,
        kind: FailureKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            client_index,
            outcome: Outcome::Failure {
                kind,
                message: message.into(),
            },
            elapsed,
        }
    }

    /// Fold a submitter result into an operation result.
    ///
    /// # Errors
    /// Fatal errors are handed back unchanged so the strategy can abort the batch.
    pub fn from_submission(
        client_index: ClientIndex,
        submission: Result<ApiResponse>,
        elapsed: Duration,
    ) -> Result<Self> {
        match submission {
            Ok(response) => Ok(Self::success(client_index, response, elapsed)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(Self::failure(
                client_index,
                FailureKind::from_error(&e),
                e.to_string(),
                elapsed,
            )),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn response(&self) -> Option<&ApiResponse> {
        match &self.outcome {
            Outcome::Success(response) => Some(response),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<&FailureKind> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure { kind, .. } => Some(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(title: &str) -> Payload {
        let mut payload = Payload::new();
        payload.insert("title".to_string(), title.into());
        payload
    }

    #[test]
    fn test_validate_accepts_well_formed_operations() {
        assert!(EntityOperation::create(0, "posts", payload("a")).validate().is_ok());
        assert!(
            EntityOperation::update(1, "comments", "42", payload("b"))
                .validate()
                .is_ok()
        );
        assert!(EntityOperation::delete(2, "posts", "7").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_target() {
        let op = EntityOperation::new(OperationKind::Delete, "posts", None, Payload::new(), 4);
        let err = op.validate().unwrap_err();
        assert!(matches!(err, BarrageError::InvalidOperation(_)));
        assert!(err.to_string().contains("#4"));

        let blank = EntityOperation::update(5, "posts", "  ", Payload::new());
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_entity_type() {
        let op = EntityOperation::create(0, "", Payload::new());
        assert!(matches!(
            op.validate(),
            Err(BarrageError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_from_submission_classifies_errors() {
        let rejected = OperationResult::from_submission(
            ClientIndex(1),
            Err(BarrageError::Rejected {
                status: 404,
                body: "missing".to_string(),
            }),
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(
            rejected.failure_kind(),
            Some(&FailureKind::Rejected {
                status: 404,
                body: "missing".to_string()
            })
        );

        let timed_out = OperationResult::from_submission(
            ClientIndex(2),
            Err(BarrageError::Timeout(Duration::from_secs(1))),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(timed_out.failure_kind(), Some(&FailureKind::Timeout));

        let fatal = OperationResult::from_submission(
            ClientIndex(3),
            Err(BarrageError::InvalidOperation("bad".to_string())),
            Duration::ZERO,
        );
        assert!(fatal.is_err());
    }

    #[test]
    fn test_outcome_serialization_shape() {
        let result = OperationResult::failure(
            ClientIndex(2),
            FailureKind::Rejected {
                status: 500,
                body: "down".to_string(),
            },
            "API rejected operation",
            Duration::from_millis(5),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["client_index"], 2);
        assert_eq!(json["outcome"]["status"], "failure");
        assert_eq!(json["outcome"]["detail"]["kind"]["type"], "Rejected");
        assert_eq!(json["outcome"]["detail"]["kind"]["details"]["status"], 500);
        assert_eq!(json["outcome"]["detail"]["message"], "API rejected operation");
    }

    #[test]
    fn test_success_outcome_keeps_response_status() {
        let result = OperationResult::success(
            ClientIndex(1),
            ApiResponse::from_body(201, r#"{"id":42}"#.to_string()),
            Duration::from_millis(3),
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"]["status"], "success");
        assert_eq!(json["outcome"]["detail"]["status"], 201);
        assert_eq!(json["outcome"]["detail"]["entity_id"], "42");

        let text = serde_json::to_string(&result).unwrap();
        let parsed: OperationResult = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, result);
    }
}
