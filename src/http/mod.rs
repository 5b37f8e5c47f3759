//! API submitter abstraction for pushing single entity operations.
//!
//! This module defines the `Submitter` trait that strategies call once per operation,
//! enabling testability with mock implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BarrageError, Result};
use crate::operation::EntityOperation;

mod client;
mod mock;

pub use client::{ReqwestSubmitter, SubmitterConfig};
pub use mock::{MockCall, MockSubmitter};

/// Response returned by the remote API for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as a string
    pub body: String,
    /// Identity the API assigned to (or reported for) the entity, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl ApiResponse {
    /// Build a response, picking the entity id out of a JSON body's `id` field.
    pub fn from_body(status: u16, body: String) -> Self {
        let entity_id = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| match value.get("id")? {
                serde_json::Value::String(id) => Some(id.clone()),
                serde_json::Value::Number(id) => Some(id.to_string()),
                _ => None,
            });
        Self {
            status,
            body,
            entity_id,
        }
    }
}

/// Trait for submitting one entity operation to the remote API.
///
/// Strategies may call `submit` from many tasks at once, so implementations must be
/// safe to share. Any needed serialization of calls is the implementation's concern.
///
/// # Errors
/// Errors for which [`BarrageError::is_fatal`](crate::BarrageError::is_fatal) is false
/// are recorded as a failed result for that operation only. Fatal errors abort the
/// batch.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, operation: &EntityOperation) -> Result<ApiResponse>;

    /// Read one entity back from the API.
    ///
    /// Used by the optional read-back pass after a push. Submitters without a read
    /// path keep the default, which reports them as unavailable.
    async fn fetch(&self, entity_type: &str, entity_id: &str) -> Result<ApiResponse> {
        Err(BarrageError::SubmitterUnavailable(format!(
            "cannot read back {entity_type}/{entity_id}: submitter has no read path"
        )))
    }
}
