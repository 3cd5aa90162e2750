//! 管理端点：用户、诊断中心与审计日志

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use medipacs_access::require_roles;
use medipacs_core::{PacsError, User, UserRole};
use medipacs_database::{
    AuditRecorder, DatabaseQueries, NewDiagnosticCenter, NewUser, UserUpdate,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::{hash_password, UserInfo};
use crate::response::ApiResult;
use crate::server::AppState;

fn require_admin(user: &User) -> medipacs_core::Result<()> {
    require_roles(user, &[UserRole::Admin], "Admin access required")
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    fn bounds(&self) -> (i64, i64) {
        (self.skip.unwrap_or(0).max(0), self.limit.unwrap_or(50).clamp(1, 200))
    }
}

// ========== 用户管理 ==========

pub async fn list_users(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    require_admin(&user)?;
    let (skip, limit) = page.bounds();

    let users = DatabaseQueries::new(&state.pool).list_users(skip, limit).await?;
    let views: Vec<UserInfo> = users.iter().map(UserInfo::from).collect();
    Ok(Json(json!({ "users": views, "total": views.len() })))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub password: String,
    pub role: String,
    pub diagnostic_center_id: Option<Uuid>,
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&user)?;

    let role = UserRole::parse(&request.role)
        .ok_or_else(|| PacsError::Validation(format!("unknown role: {}", request.role)))?;
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(
            PacsError::Validation("Username and password are required".to_string()).into(),
        );
    }

    let queries = DatabaseQueries::new(&state.pool);
    if queries.user_exists(&request.username, &request.email).await? {
        return Err(PacsError::Conflict("Username or email already taken".to_string()).into());
    }

    let created = queries
        .create_user(&NewUser {
            email: request.email,
            username: request.username,
            full_name: request.full_name,
            hashed_password: hash_password(&request.password),
            role,
            diagnostic_center_id: request.diagnostic_center_id,
        })
        .await?;

    info!("User {} created with role {}", created.username, created.role.as_str());
    Ok((StatusCode::CREATED, Json(json!(UserInfo::from(&created)))))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    // 缺省保持不变，显式null表示摘除所属中心
    #[serde(default)]
    pub diagnostic_center_id: Option<Option<Uuid>>,
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<Json<Value>> {
    require_admin(&user)?;

    let role = match &request.role {
        Some(raw) => Some(
            UserRole::parse(raw)
                .ok_or_else(|| PacsError::Validation(format!("unknown role: {}", raw)))?,
        ),
        None => None,
    };

    let updated = DatabaseQueries::new(&state.pool)
        .update_user(
            id,
            &UserUpdate {
                full_name: request.full_name,
                role,
                diagnostic_center_id: request.diagnostic_center_id,
                is_active: request.is_active,
            },
        )
        .await?
        .ok_or_else(|| PacsError::not_found("user", id))?;

    Ok(Json(json!(UserInfo::from(&updated))))
}

/// 停用用户（不做物理删除，保留审计与归属关系）
pub async fn deactivate_user(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    require_admin(&user)?;
    if id == user.id {
        return Err(PacsError::Validation("Cannot deactivate yourself".to_string()).into());
    }

    let deactivated = DatabaseQueries::new(&state.pool).deactivate_user(id).await?;
    if !deactivated {
        return Err(PacsError::not_found("user", id).into());
    }
    Ok(Json(json!({ "deactivated": id })))
}

// ========== 诊断中心管理 ==========

pub async fn list_centers(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    require_admin(&user)?;
    let (skip, limit) = page.bounds();

    let centers = DatabaseQueries::new(&state.pool).list_centers(skip, limit).await?;
    let total = centers.len();
    Ok(Json(json!({ "centers": centers, "total": total })))
}

#[derive(Debug, Deserialize)]
pub struct CreateCenterRequest {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub storage_quota_gb: Option<i64>,
}

pub async fn create_center(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateCenterRequest>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&user)?;
    if request.name.trim().is_empty() {
        return Err(PacsError::Validation("Center name is required".to_string()).into());
    }

    let center = DatabaseQueries::new(&state.pool)
        .create_center(&NewDiagnosticCenter {
            name: request.name,
            address: request.address,
            phone: request.phone,
            email: request.email,
            storage_quota_gb: request.storage_quota_gb.unwrap_or(100),
        })
        .await?;

    info!("Diagnostic center {} created", center.name);
    Ok((StatusCode::CREATED, Json(json!(center))))
}

pub async fn get_center(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    require_admin(&user)?;

    let center = DatabaseQueries::new(&state.pool)
        .get_center_by_id(id)
        .await?
        .ok_or_else(|| PacsError::not_found("diagnostic_center", id))?;
    Ok(Json(json!(center)))
}

pub async fn toggle_center_status(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    require_admin(&user)?;

    let is_active = DatabaseQueries::new(&state.pool)
        .toggle_center_status(id)
        .await?
        .ok_or_else(|| PacsError::not_found("diagnostic_center", id))?;
    Ok(Json(json!({ "id": id, "is_active": is_active })))
}

#[derive(Debug, Deserialize)]
pub struct StorageAllocationRequest {
    pub storage_quota_gb: i64,
}

/// 调整诊断中心存储配额（只记账，不做使用量强制）
pub async fn allocate_center_storage(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(request): Json<StorageAllocationRequest>,
) -> ApiResult<Json<Value>> {
    require_admin(&user)?;
    if request.storage_quota_gb < 0 {
        return Err(PacsError::Validation("Quota must be non-negative".to_string()).into());
    }

    let updated = DatabaseQueries::new(&state.pool)
        .update_center_quota(id, request.storage_quota_gb)
        .await?;
    if !updated {
        return Err(PacsError::not_found("diagnostic_center", id).into());
    }
    Ok(Json(json!({ "id": id, "storage_quota_gb": request.storage_quota_gb })))
}

// ========== 审计日志 ==========

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    require_admin(&user)?;
    let (skip, limit) = page.bounds();

    let logs = AuditRecorder::new(&state.pool).list(skip, limit).await?;
    let total = logs.len();
    Ok(Json(json!({ "audit_logs": logs, "total": total })))
}
