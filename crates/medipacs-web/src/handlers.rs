//! 检查流转HTTP处理器

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use medipacs_access::{
    can_view_study, check_administrative_access, check_medical_access, evaluator::forbidden,
    require_roles, study_scope, AccessLevel,
};
use medipacs_core::{
    redact::anonymize_phi, PacsError, Result, Study, StudyStatus, User, UserRole,
};
use medipacs_database::{
    AuditEvent, AuditRecorder, DatabasePool, DatabaseQueries, NewDicomFile, NewStudy,
};
use medipacs_storage::StorageManager;
use medipacs_workflow::{
    check_request_allowed, resolve_intake, resolve_request, validate_reason, Actor,
    ReportGenerator, ReportRequest, Resolution, StudyAction, StudyStateMachine, UploadForm,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::client_meta;
use crate::response::ApiResult;
use crate::server::AppState;

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "MediPACS API",
        "version": "1.0.0",
        "status": "running",
        "endpoints": {
            "health": "/health",
            "auth": "/auth",
            "api": "/api/v1"
        }
    }))
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": "1.0.0"
    }))
}

/// 检查的通用JSON视图
fn study_json(study: &Study) -> Value {
    json!({
        "id": study.id,
        "study_uid": study.study_uid,
        "patient_id": study.patient_id,
        "diagnostic_center_id": study.diagnostic_center_id,
        "uploaded_by_id": study.uploaded_by_id,
        "assigned_doctor_id": study.assigned_doctor_id,
        "radiologist_id": study.radiologist_id,
        "study_date": study.study_date,
        "modality": study.modality,
        "body_part": study.body_part,
        "description": study.description,
        "priority": study.priority,
        "status": study.status,
        "ai_report": study.ai_report,
        "doctor_report": study.doctor_report,
        "radiologist_report": study.radiologist_report,
        "final_report": study.final_report,
        "version": study.version,
        "created_at": study.created_at,
        "updated_at": study.updated_at,
    })
}

async fn record_audit(pool: &DatabasePool, event: AuditEvent) {
    if let Err(e) = AuditRecorder::new(pool).record(event).await {
        tracing::error!("Failed to record audit event: {}", e);
    }
}

async fn load_study(queries: &DatabaseQueries<'_>, uid: &str) -> Result<Study> {
    queries
        .get_study_by_uid(uid)
        .await?
        .ok_or_else(|| PacsError::not_found("study", uid))
}

fn view_access(user: &User, study: &Study) -> Result<()> {
    if can_view_study(user, study) {
        return Ok(());
    }
    Err(forbidden(
        "No access to this study",
        AccessLevel::MedicalView,
        user,
        Some(study.diagnostic_center_id),
        Some(study.study_uid.clone()),
    ))
}

// ========== 上传 ==========

/// 上传检查（multipart：表单字段 + DICOM文件）
pub async fn upload_study(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    StudyStateMachine::check_upload_permitted(&user)?;
    let center_id = user.diagnostic_center_id.ok_or_else(|| {
        PacsError::Validation("Uploader has no diagnostic center".to_string())
    })?;

    // 解析multipart表单
    let mut form = UploadForm::default();
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PacsError::Validation(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if field.file_name().is_some() || name == "files" {
            let filename = field
                .file_name()
                .map(|f| f.to_string())
                .unwrap_or_default();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| PacsError::Validation(format!("invalid file field: {}", e)))?;
            files.push((filename, bytes.to_vec()));
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| PacsError::Validation(format!("invalid form field: {}", e)))?;
            match name.as_str() {
                "patient_id" => form.patient_id = Some(value),
                "first_name" => form.first_name = Some(value),
                "last_name" => form.last_name = Some(value),
                "date_of_birth" => form.date_of_birth = Some(value),
                "gender" => form.gender = Some(value),
                "phone" => form.phone = Some(value),
                "email" => form.email = Some(value),
                "address" => form.address = Some(value),
                "description" => form.description = Some(value),
                "priority" => form.priority = Some(value),
                _ => warn!("Ignoring unknown upload field: {}", name),
            }
        }
    }

    if files.is_empty() {
        return Err(PacsError::Validation("At least one file is required".to_string()).into());
    }

    // 表单 → DICOM元数据 → 占位值
    let extracted = state.metadata_extractor.extract(&files[0].1);
    let (patient_intake, study_intake) = resolve_intake(&form, extracted.as_ref());

    let queries = DatabaseQueries::new(&state.pool);

    // 患者按编号复用，补充空缺的人口学字段
    let patient = match queries
        .get_patient_by_patient_id(&patient_intake.patient_id)
        .await?
    {
        Some(existing) => {
            queries
                .merge_patient(
                    existing.id,
                    patient_intake.date_of_birth,
                    patient_intake.gender.as_deref(),
                    patient_intake.phone.as_deref(),
                    patient_intake.email.as_deref(),
                    patient_intake.address.as_deref(),
                )
                .await?;
            existing
        }
        None => {
            queries
                .create_patient(
                    &patient_intake.patient_id,
                    &patient_intake.first_name,
                    &patient_intake.last_name,
                    patient_intake.date_of_birth,
                    patient_intake.gender.as_deref(),
                    patient_intake.phone.as_deref(),
                    patient_intake.email.as_deref(),
                    patient_intake.address.as_deref(),
                )
                .await?
        }
    };

    let study_uid = queries.allocate_study_uid().await?;
    let study = queries
        .create_study(&NewStudy {
            study_uid: study_uid.clone(),
            patient_id: patient.id,
            diagnostic_center_id: center_id,
            uploaded_by_id: user.id,
            study_date: Some(chrono::Utc::now()),
            modality: study_intake.modality.clone(),
            body_part: study_intake.body_part.clone(),
            description: study_intake.description.clone(),
            priority: study_intake.priority.clone(),
            status: StudyStateMachine::initial_status(),
        })
        .await?;

    // 文件落盘并登记
    let mut total_bytes: i64 = 0;
    for (index, (filename, bytes)) in files.iter().enumerate() {
        let safe_name = if filename.is_empty() {
            format!("slice_{:03}.dcm", index + 1)
        } else {
            filename.replace(['/', '\\'], "_")
        };
        let relative = format!("{}/{}", StorageManager::study_dir(&study.study_uid), safe_name);
        state.storage.store_file(bytes, &relative).await?;

        let meta = extracted.as_ref();
        queries
            .create_dicom_file(&NewDicomFile {
                study_id: study.id,
                series_uid: format!("{}.1", study.study_uid),
                instance_uid: Uuid::new_v4().to_string(),
                file_path: relative,
                file_size: bytes.len() as i64,
                slice_number: Some(index as i32 + 1),
                patient_name: meta.and_then(|m| m.patient_name.clone()),
                patient_id_dicom: meta.and_then(|m| m.patient_id.clone()),
                study_date_dicom: meta.and_then(|m| m.study_date.clone()),
                modality_dicom: meta.and_then(|m| m.modality.clone()),
                body_part_dicom: meta.and_then(|m| m.body_part.clone()),
            })
            .await?;
        total_bytes += bytes.len() as i64;
    }

    // 存储统计只记账不拦截，失败不影响上传
    if let Err(e) = queries.adjust_center_storage(center_id, total_bytes).await {
        tracing::error!("Failed to adjust storage accounting: {}", e);
    }

    let (ip, user_agent) = client_meta(&headers);
    let details = anonymize_phi(&json!({
        "study_uid": study.study_uid,
        "patient_id": patient_intake.patient_id,
        "file_count": files.len(),
        "total_bytes": total_bytes,
    }));
    record_audit(
        &state.pool,
        AuditEvent::new("study_upload")
            .actor(user.id)
            .resource("study", study.study_uid.clone())
            .client(ip, user_agent)
            .details(details),
    )
    .await;

    // 富化钩子在后台推进 queued → processing → uploaded
    spawn_enrichment(&state, study.clone());

    info!("Study {} uploaded with {} files", study.study_uid, files.len());
    Ok((StatusCode::CREATED, Json(study_json(&study))))
}

fn spawn_enrichment(state: &AppState, study: Study) {
    let pool = state.pool.clone();
    let generator = state.report_generator.clone();
    tokio::spawn(async move {
        if let Err(e) = run_enrichment(&pool, generator, study).await {
            tracing::error!("Enrichment hook failed: {}", e);
        }
    });
}

async fn run_enrichment(
    pool: &DatabasePool,
    generator: Arc<dyn ReportGenerator>,
    study: Study,
) -> Result<()> {
    let queries = DatabaseQueries::new(pool);
    let machine = StudyStateMachine::new();

    let next = machine.transition(&study, StudyAction::EnrichmentStarted, Actor::System)?;
    let study = queries
        .update_study_status(study.id, next, study.version)
        .await?;

    let request = ReportRequest {
        study_uid: study.study_uid.clone(),
        modality: study.modality.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
        body_part: study.body_part.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
        description: study.description.clone().unwrap_or_default(),
        dicom_path: Some(StorageManager::study_dir(&study.study_uid)),
    };
    let report = generator.generate(&request).await?;
    queries.set_ai_report(study.id, &report).await?;

    let next = machine.transition(&study, StudyAction::EnrichmentFinished, Actor::System)?;
    queries
        .update_study_status(study.id, next, study.version)
        .await?;

    info!("Enrichment finished for study {}", study.study_uid);
    Ok(())
}

// ========== 查询 ==========

#[derive(Debug, Deserialize)]
pub struct StudyListQuery {
    pub status: Option<String>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

/// 按角色范围分页列出检查
pub async fn list_studies(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(params): Query<StudyListQuery>,
) -> ApiResult<Json<Value>> {
    check_medical_access(&user)?;

    let status_filter = match &params.status {
        Some(raw) => Some(
            StudyStatus::parse(raw)
                .ok_or_else(|| PacsError::Validation(format!("unknown status: {}", raw)))?,
        ),
        None => None,
    };
    let skip = params.skip.unwrap_or(0).max(0);
    let limit = params.limit.unwrap_or(50).clamp(1, 200);

    let scope = study_scope(&user);
    let queries = DatabaseQueries::new(&state.pool);
    let studies = queries
        .list_studies(&scope, status_filter, skip, limit)
        .await?;
    let total = queries.count_studies(&scope, status_filter).await?;

    Ok(Json(json!({
        "studies": studies.iter().map(study_json).collect::<Vec<_>>(),
        "total": total,
        "skip": skip,
        "limit": limit,
    })))
}

/// 检查详情（含患者信息）
pub async fn get_study(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(uid): Path<String>,
) -> ApiResult<Json<Value>> {
    let queries = DatabaseQueries::new(&state.pool);
    let study = load_study(&queries, &uid).await?;
    view_access(&user, &study)?;

    let patient = queries.get_patient_by_id(study.patient_id).await?;
    let files = queries.list_dicom_files_for_study(study.id).await?;

    let mut body = study_json(&study);
    body["patient"] = json!(patient);
    body["file_count"] = json!(files.len());
    Ok(Json(body))
}

/// 检查状态时间线视图
pub async fn get_study_status(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(uid): Path<String>,
) -> ApiResult<Json<Value>> {
    let queries = DatabaseQueries::new(&state.pool);
    let study = load_study(&queries, &uid).await?;
    view_access(&user, &study)?;

    Ok(Json(json!({
        "study_uid": study.study_uid,
        "status": study.status,
        "version": study.version,
        "assigned_doctor_id": study.assigned_doctor_id,
        "radiologist_id": study.radiologist_id,
        "has_ai_report": study.ai_report.is_some(),
        "has_doctor_report": study.doctor_report.is_some(),
        "has_radiologist_report": study.radiologist_report.is_some(),
        "created_at": study.created_at,
        "updated_at": study.updated_at,
    })))
}

/// 读取DICOM文件字节
pub async fn get_dicom_file(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let queries = DatabaseQueries::new(&state.pool);
    let file = queries
        .get_dicom_file_by_id(id)
        .await?
        .ok_or_else(|| PacsError::not_found("dicom_file", id))?;
    let study = queries
        .get_study_by_id(file.study_id)
        .await?
        .ok_or_else(|| PacsError::not_found("study", file.study_id))?;
    view_access(&user, &study)?;

    let bytes = state.storage.read_file(&file.file_path).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/dicom")],
        bytes,
    ))
}

// ========== 分配与报告 ==========

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub doctor_id: Uuid,
}

/// 分配医生
pub async fn assign_study(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Json<Value>> {
    let queries = DatabaseQueries::new(&state.pool);
    let study = load_study(&queries, &uid).await?;
    check_administrative_access(&user, Some(study.diagnostic_center_id))?;

    let doctor = queries
        .get_user_by_id(request.doctor_id)
        .await?
        .filter(|d| d.is_active && d.role == UserRole::Doctor)
        .ok_or_else(|| PacsError::Validation("Assignee must be an active doctor".to_string()))?;

    let machine = StudyStateMachine::new();
    let next = machine.transition(&study, StudyAction::AssignDoctor, Actor::User(&user))?;
    let updated = queries
        .assign_doctor(study.id, doctor.id, next, study.version)
        .await?;

    let (ip, user_agent) = client_meta(&headers);
    record_audit(
        &state.pool,
        AuditEvent::new("study_assign")
            .actor(user.id)
            .resource("study", updated.study_uid.clone())
            .client(ip, user_agent)
            .details(json!({ "doctor_id": doctor.id })),
    )
    .await;

    Ok(Json(study_json(&updated)))
}

/// 放射科医生自行认领
pub async fn assign_to_self(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Path(uid): Path<String>,
) -> ApiResult<Json<Value>> {
    let queries = DatabaseQueries::new(&state.pool);
    let study = load_study(&queries, &uid).await?;
    view_access(&user, &study)?;

    let machine = StudyStateMachine::new();
    let next = machine.transition(&study, StudyAction::SelfAssign, Actor::User(&user))?;
    let updated = queries
        .self_assign_radiologist(study.id, user.id, next, study.version)
        .await?;

    let (ip, user_agent) = client_meta(&headers);
    record_audit(
        &state.pool,
        AuditEvent::new("study_self_assign")
            .actor(user.id)
            .resource("study", updated.study_uid.clone())
            .client(ip, user_agent),
    )
    .await;

    Ok(Json(study_json(&updated)))
}

#[derive(Debug, Deserialize)]
pub struct ReportBody {
    pub report: String,
    pub final_report: Option<String>,
}

/// 写入报告：医生 → completed，放射科医生/管理员 → reviewed
pub async fn write_report(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(body): Json<ReportBody>,
) -> ApiResult<Json<Value>> {
    if body.report.trim().is_empty() {
        return Err(PacsError::Validation("Report text must not be empty".to_string()).into());
    }

    let queries = DatabaseQueries::new(&state.pool);
    let study = load_study(&queries, &uid).await?;
    view_access(&user, &study)?;

    let machine = StudyStateMachine::new();
    let updated = match user.role {
        UserRole::Doctor => {
            let next =
                machine.transition(&study, StudyAction::WriteDoctorReport, Actor::User(&user))?;
            queries
                .set_doctor_report(study.id, &body.report, next, study.version)
                .await?
        }
        _ => {
            let next = machine.transition(
                &study,
                StudyAction::WriteRadiologistReport,
                Actor::User(&user),
            )?;
            let final_report = body.final_report.as_deref().unwrap_or(&body.report);
            queries
                .set_radiologist_report(
                    study.id,
                    &body.report,
                    Some(final_report),
                    next,
                    study.version,
                )
                .await?
        }
    };

    let (ip, user_agent) = client_meta(&headers);
    record_audit(
        &state.pool,
        AuditEvent::new("study_report")
            .actor(user.id)
            .resource("study", updated.study_uid.clone())
            .client(ip, user_agent)
            .details(json!({ "role": user.role, "new_status": updated.status })),
    )
    .await;

    Ok(Json(study_json(&updated)))
}

// ========== 删除 ==========

/// 管理员级联删除检查
///
/// 行删除、脱敏审计快照与存储统计在同一事务内提交；
/// 文件字节在提交后尽力清理。
pub async fn delete_study(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Path(uid): Path<String>,
) -> ApiResult<Json<Value>> {
    require_roles(&user, &[UserRole::Admin], "Only admins can delete studies")?;

    let queries = DatabaseQueries::new(&state.pool);
    let study = load_study(&queries, &uid).await?;
    let files = queries.list_dicom_files_for_study(study.id).await?;
    let freed_bytes: i64 = files.iter().map(|f| f.file_size).sum();

    // 删除前的脱敏快照进入审计
    let patient = queries.get_patient_by_id(study.patient_id).await?;
    let snapshot = anonymize_phi(&json!({
        "study_uid": study.study_uid,
        "status": study.status,
        "patient_id": patient.as_ref().map(|p| p.patient_id.clone()),
        "first_name": patient.as_ref().map(|p| p.first_name.clone()),
        "last_name": patient.as_ref().map(|p| p.last_name.clone()),
        "file_count": files.len(),
        "freed_bytes": freed_bytes,
    }));

    let (ip, user_agent) = client_meta(&headers);
    let audit = AuditEvent::new("study_delete")
        .actor(user.id)
        .resource("study", study.study_uid.clone())
        .client(ip, user_agent)
        .details(snapshot);

    queries.delete_study_cascade(&study, freed_bytes, &audit).await?;

    // 事务提交后清理文件字节，失败只记录日志
    state
        .storage
        .delete_study_dir_best_effort(&study.study_uid)
        .await;

    Ok(Json(json!({
        "deleted": study.study_uid,
        "freed_bytes": freed_bytes,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeletionRequestBody {
    pub study_uid: String,
    pub reason: String,
}

/// 发起删除请求（技师/医生）
pub async fn create_deletion_request(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Json(body): Json<DeletionRequestBody>,
) -> ApiResult<impl IntoResponse> {
    check_request_allowed(&user)?;
    validate_reason(&body.reason)?;

    let queries = DatabaseQueries::new(&state.pool);
    let study = load_study(&queries, &body.study_uid).await?;
    view_access(&user, &study)?;

    let request = queries
        .create_deletion_request(study.id, user.id, body.reason.trim())
        .await?;

    let (ip, user_agent) = client_meta(&headers);
    record_audit(
        &state.pool,
        AuditEvent::new("deletion_request_create")
            .actor(user.id)
            .resource("deletion_request", request.id.to_string())
            .client(ip, user_agent)
            .details(json!({ "study_uid": study.study_uid })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(json!(request))))
}

/// 删除请求列表：管理员看全部，其余角色只看自己发起的
pub async fn list_deletion_requests(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<Value>> {
    let queries = DatabaseQueries::new(&state.pool);
    let requests = if user.role == UserRole::Admin {
        queries.list_deletion_requests().await?
    } else {
        queries.list_deletion_requests_by_requester(user.id).await?
    };

    let total = requests.len();
    Ok(Json(json!({ "deletion_requests": requests, "total": total })))
}

pub async fn approve_deletion_request(
    state: State<AppState>,
    user: Extension<User>,
    headers: HeaderMap,
    id: Path<Uuid>,
) -> ApiResult<Json<Value>> {
    resolve_deletion(state, user, headers, id, Resolution::Approve).await
}

pub async fn reject_deletion_request(
    state: State<AppState>,
    user: Extension<User>,
    headers: HeaderMap,
    id: Path<Uuid>,
) -> ApiResult<Json<Value>> {
    resolve_deletion(state, user, headers, id, Resolution::Reject).await
}

/// 审批删除请求（仅管理员，已决议的请求不可重复审批）
///
/// 批准只改变请求状态，实际删除仍走管理员删除端点。
async fn resolve_deletion(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    resolution: Resolution,
) -> ApiResult<Json<Value>> {
    let queries = DatabaseQueries::new(&state.pool);
    let request = queries
        .get_deletion_request_by_id(id)
        .await?
        .ok_or_else(|| PacsError::not_found("deletion_request", id))?;

    let resolved = resolve_request(&request, resolution, &user, chrono::Utc::now())?;
    queries.store_deletion_resolution(&resolved).await?;

    let (ip, user_agent) = client_meta(&headers);
    record_audit(
        &state.pool,
        AuditEvent::new("deletion_request_resolve")
            .actor(user.id)
            .resource("deletion_request", resolved.id.to_string())
            .client(ip, user_agent)
            .details(json!({ "status": resolved.status })),
    )
    .await;

    Ok(Json(json!(resolved)))
}
