use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{AuditEntry, AuditError, AuditNotifier};

/// Collects entries in memory. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    failing: AtomicBool,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that rejects every entry.
    pub fn failing() -> Self {
        Self {
            entries: Mutex::default(),
            failing: AtomicBool::new(true),
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.action).collect()
    }
}

#[async_trait]
impl AuditNotifier for InMemoryAuditLog {
    async fn notify(&self, entry: AuditEntry) -> Result<(), AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("audit log is failing".to_string()));
        }
        self.entries
            .lock()
            .map_err(|_| AuditError::Unavailable("lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}

/// Writes each entry as one structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditNotifier;

#[async_trait]
impl AuditNotifier for TracingAuditNotifier {
    async fn notify(&self, entry: AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "audit",
            audit_id = %entry.id,
            actor = %entry.actor,
            action = %entry.action,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            old_value = ?entry.old_value,
            new_value = ?entry.new_value,
            ip_address = entry.request.as_ref().and_then(|r| r.ip_address.as_deref()),
            "audit"
        );
        Ok(())
    }
}
