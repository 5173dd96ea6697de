//! Best-effort audit trail.
//!
//! The engine hands entries to an [`AuditNotifier`] only after the unit of
//! work they describe has committed. A notifier failure is logged and
//! dropped; it never reaches the caller and never undoes the operation.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stockledger_core::{AggregateId, UserId};

pub use memory::{InMemoryAuditLog, TracingAuditNotifier};
pub use postgres::PostgresAuditLog;

/// Transport details of the request that caused a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Who changed what: one row of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor: UserId,
    /// Domain event type, e.g. `invoicing.invoice.issued` or `payment.override`.
    pub action: String,
    pub entity_type: String,
    pub entity_id: AggregateId,
    pub old_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
    pub request: Option<RequestMeta>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: UserId,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: AggregateId,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            actor,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id,
            old_value: None,
            new_value: None,
            request: None,
            recorded_at: Utc::now(),
        }
    }

    /// Snapshot before the change. Values that fail to serialize are omitted.
    pub fn with_old<T: Serialize>(mut self, value: &T) -> Self {
        self.old_value = serde_json::to_value(value).ok();
        self
    }

    pub fn with_new<T: Serialize>(mut self, value: &T) -> Self {
        self.new_value = serde_json::to_value(value).ok();
        self
    }

    pub fn with_request(mut self, request: Option<RequestMeta>) -> Self {
        self.request = request;
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("audit entry rejected: {0}")]
    Rejected(String),
}

/// Fire-and-forget recorder of committed changes.
#[async_trait]
pub trait AuditNotifier: Send + Sync {
    async fn notify(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

#[async_trait]
impl<N> AuditNotifier for Arc<N>
where
    N: AuditNotifier + ?Sized,
{
    async fn notify(&self, entry: AuditEntry) -> Result<(), AuditError> {
        (**self).notify(entry).await
    }
}
