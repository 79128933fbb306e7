//! Audit log repository
//!
//! Append-only. Writes are issued best-effort by the services; read paths
//! exist for the operator endpoints.

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::errors::LedgerError;
use crate::models::{AuditAction, AuditLog, EntityType};

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub action: AuditAction,
    pub details: String,
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn create(&self, entry: &NewAuditLog) -> Result<(), LedgerError>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<AuditLog>, LedgerError>;

    async fn list_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: i64,
    ) -> Result<Vec<AuditLog>, LedgerError>;
}

pub struct PgAuditLogRepository {
    pool: PgPool,
}

impl PgAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_log(row: &PgRow) -> Result<AuditLog, LedgerError> {
        let entity_type: String = row.get("entity_type");
        let action: String = row.get("action");

        let entity_type = EntityType::from_str(&entity_type).ok_or_else(|| {
            sqlx::Error::ColumnDecode {
                index: "entity_type".into(),
                source: format!("unknown entity type: {}", entity_type).into(),
            }
        })?;
        let action = AuditAction::from_str(&action).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "action".into(),
            source: format!("unknown audit action: {}", action).into(),
        })?;

        Ok(AuditLog {
            id: row.get("id"),
            entity_type,
            entity_id: row.get("entity_id"),
            action,
            details: row.get::<Option<String>, _>("details").unwrap_or_default(),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl AuditLogRepository for PgAuditLogRepository {
    async fn create(&self, entry: &NewAuditLog) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (entity_type, entity_id, action, details, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(entry.entity_type.as_str())
        .bind(entry.entity_id)
        .bind(entry.action.as_str())
        .bind(&entry.details)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<AuditLog>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, entity_type, entity_id, action, details, created_at
            FROM audit_logs
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_log).collect()
    }

    async fn list_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: i64,
    ) -> Result<Vec<AuditLog>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, entity_type, entity_id, action, details, created_at
            FROM audit_logs
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_log).collect()
    }
}
