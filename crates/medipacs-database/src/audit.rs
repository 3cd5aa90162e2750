//! 审计日志记录

use crate::connection::DatabasePool;
use medipacs_core::{AuditLog, PacsError, Result};
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

/// 一条待写入的审计事件
///
/// details由调用方负责脱敏（见`medipacs_core::redact`），
/// 本层不再检查内容。
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            user_id: None,
            action: action.into(),
            resource_type: None,
            resource_id: None,
            ip_address: None,
            user_agent: None,
            details: None,
        }
    }

    pub fn actor(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// 在给定执行器上写入一条审计记录
///
/// 级联删除事务复用本函数，使审计写入与业务删除同生共死。
pub(crate) async fn insert_audit<'e, E>(executor: E, event: &AuditEvent) -> Result<Uuid>
where
    E: PgExecutor<'e>,
{
    let id = Uuid::new_v4();
    sqlx::query(r#"
        INSERT INTO audit_logs (id, user_id, action, resource_type, resource_id, ip_address, user_agent, details)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    "#)
    .bind(id)
    .bind(event.user_id)
    .bind(&event.action)
    .bind(&event.resource_type)
    .bind(&event.resource_id)
    .bind(&event.ip_address)
    .bind(&event.user_agent)
    .bind(&event.details)
    .execute(executor)
    .await
    .map_err(|e| PacsError::Database(e.to_string()))?;

    Ok(id)
}

/// 审计日志记录器
pub struct AuditRecorder<'a> {
    pool: &'a DatabasePool,
}

impl<'a> AuditRecorder<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 追加一条审计记录，返回其ID
    ///
    /// 只追加不修改；写入失败直接上抛，不做重试。
    pub async fn record(&self, event: AuditEvent) -> Result<Uuid> {
        let id = insert_audit(self.pool.pool(), &event).await?;
        tracing::debug!("Audit event recorded: {} ({})", event.action, id);
        Ok(id)
    }

    /// 分页列出审计记录（仅管理员入口使用，按时间倒序）
    pub async fn list(&self, skip: i64, limit: i64) -> Result<Vec<AuditLog>> {
        let results = sqlx::query_as::<_, crate::models::DbAuditLog>(
            "SELECT * FROM audit_logs ORDER BY timestamp DESC OFFSET $1 LIMIT $2",
        )
        .bind(skip)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(results.into_iter().map(AuditLog::from).collect())
    }
}
