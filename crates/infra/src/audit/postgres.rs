use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use super::{AuditEntry, AuditError, AuditNotifier};

/// Inserts entries into `audit_logs`, outside any ledger transaction.
#[derive(Debug, Clone)]
pub struct PostgresAuditLog {
    pool: Arc<PgPool>,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl AuditNotifier for PostgresAuditLog {
    async fn notify(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let request = entry.request.unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, actor, action, entity_type, entity_id, old_value, new_value,
                ip_address, user_agent, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.actor.as_uuid())
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id.as_uuid())
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(&request.ip_address)
        .bind(&request.user_agent)
        .bind(entry.recorded_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) => AuditError::Rejected(db.message().to_string()),
            other => AuditError::Unavailable(other.to_string()),
        })?;
        Ok(())
    }
}
