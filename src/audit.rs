//! Audit log service
//!
//! Best-effort append with query access for the operator endpoints. A failed
//! audit write is logged and swallowed; it never fails the business
//! operation that produced it.

use std::sync::Arc;

use crate::errors::LedgerError;
use crate::models::{AuditAction, AuditLog, EntityType};
use crate::persistence::{AuditLogRepository, NewAuditLog};

pub struct AuditLogService {
    repo: Arc<dyn AuditLogRepository>,
}

impl AuditLogService {
    pub fn new(repo: Arc<dyn AuditLogRepository>) -> Self {
        Self { repo }
    }

    /// Best-effort append.
    pub async fn record(
        &self,
        entity_type: EntityType,
        entity_id: i64,
        action: AuditAction,
        details: String,
    ) {
        let entry = NewAuditLog {
            entity_type,
            entity_id,
            action,
            details,
        };
        if let Err(err) = self.repo.create(&entry).await {
            tracing::error!(
                entity_type = entity_type.as_str(),
                entity_id,
                error = %err,
                "Audit log write failed"
            );
        }
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<AuditLog>, LedgerError> {
        self.repo.list(limit, offset).await
    }

    pub async fn list_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: i64,
    ) -> Result<Vec<AuditLog>, LedgerError> {
        self.repo.list_by_entity(entity_type, entity_id).await
    }
}
