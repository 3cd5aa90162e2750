//! 数据库查询操作

use crate::audit::{insert_audit, AuditEvent};
use crate::connection::DatabasePool;
use crate::models::*;
use medipacs_access::StudyScope;
use medipacs_core::utils::{random_study_uid, STUDY_UID_MAX_ATTEMPTS};
use medipacs_core::{
    DeletionRequest, DiagnosticCenter, DicomFile, PacsError, Patient, Result, Study, StudyStatus,
    User,
};
use uuid::Uuid;

/// 数据库查询操作接口
pub struct DatabaseQueries<'a> {
    pool: &'a DatabasePool,
}

impl<'a> DatabaseQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 创建诊断中心表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS diagnostic_centers (
                id UUID PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                address TEXT,
                phone VARCHAR(64),
                email VARCHAR(255),
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                storage_quota_gb BIGINT NOT NULL DEFAULT 100,
                storage_used_bytes BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| PacsError::Database(e.to_string()))?;

        // 创建用户表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                email VARCHAR(255) UNIQUE NOT NULL,
                username VARCHAR(64) UNIQUE NOT NULL,
                full_name VARCHAR(255) NOT NULL,
                hashed_password VARCHAR(255) NOT NULL,
                role VARCHAR(32) NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                diagnostic_center_id UUID REFERENCES diagnostic_centers(id),
                last_login TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| PacsError::Database(e.to_string()))?;

        // 创建患者表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS patients (
                id UUID PRIMARY KEY,
                patient_id VARCHAR(64) UNIQUE NOT NULL,
                first_name VARCHAR(255) NOT NULL,
                last_name VARCHAR(255) NOT NULL,
                date_of_birth DATE,
                gender VARCHAR(8),
                phone VARCHAR(64),
                email VARCHAR(255),
                address TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| PacsError::Database(e.to_string()))?;

        // 创建检查表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS studies (
                id UUID PRIMARY KEY,
                study_uid VARCHAR(8) UNIQUE NOT NULL,
                patient_id UUID NOT NULL REFERENCES patients(id),
                diagnostic_center_id UUID NOT NULL REFERENCES diagnostic_centers(id),
                uploaded_by_id UUID NOT NULL REFERENCES users(id),
                assigned_doctor_id UUID REFERENCES users(id),
                radiologist_id UUID REFERENCES users(id),
                study_date TIMESTAMP WITH TIME ZONE,
                modality VARCHAR(16),
                body_part VARCHAR(64),
                description TEXT,
                priority VARCHAR(16) NOT NULL DEFAULT 'normal',
                status VARCHAR(20) NOT NULL DEFAULT 'queued',
                ai_report TEXT,
                doctor_report TEXT,
                radiologist_report TEXT,
                final_report TEXT,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| PacsError::Database(e.to_string()))?;

        // 创建DICOM文件表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS dicom_files (
                id UUID PRIMARY KEY,
                study_id UUID NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
                series_uid VARCHAR(64) NOT NULL,
                instance_uid VARCHAR(64) NOT NULL,
                file_path VARCHAR(512) NOT NULL,
                file_size BIGINT NOT NULL DEFAULT 0,
                slice_number INTEGER,
                patient_name VARCHAR(255),
                patient_id_dicom VARCHAR(64),
                study_date_dicom VARCHAR(16),
                modality_dicom VARCHAR(16),
                body_part_dicom VARCHAR(64),
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| PacsError::Database(e.to_string()))?;

        // 创建删除请求表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS deletion_requests (
                id UUID PRIMARY KEY,
                study_id UUID NOT NULL,
                requested_by_id UUID NOT NULL REFERENCES users(id),
                reason TEXT NOT NULL,
                status VARCHAR(16) NOT NULL DEFAULT 'pending',
                approved_by_id UUID REFERENCES users(id),
                approved_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| PacsError::Database(e.to_string()))?;

        // 创建审计日志表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id UUID PRIMARY KEY,
                user_id UUID,
                action VARCHAR(64) NOT NULL,
                resource_type VARCHAR(64),
                resource_id VARCHAR(64),
                ip_address VARCHAR(64),
                user_agent VARCHAR(255),
                details JSONB,
                timestamp TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| PacsError::Database(e.to_string()))?;

        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)",
            "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)",
            "CREATE INDEX IF NOT EXISTS idx_users_center ON users(diagnostic_center_id)",
            "CREATE INDEX IF NOT EXISTS idx_patients_patient_id ON patients(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_studies_study_uid ON studies(study_uid)",
            "CREATE INDEX IF NOT EXISTS idx_studies_center ON studies(diagnostic_center_id)",
            "CREATE INDEX IF NOT EXISTS idx_studies_uploaded_by ON studies(uploaded_by_id)",
            "CREATE INDEX IF NOT EXISTS idx_studies_assigned_doctor ON studies(assigned_doctor_id)",
            "CREATE INDEX IF NOT EXISTS idx_studies_status ON studies(status)",
            "CREATE INDEX IF NOT EXISTS idx_dicom_files_study ON dicom_files(study_id)",
            "CREATE INDEX IF NOT EXISTS idx_deletion_requests_study ON deletion_requests(study_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_user ON audit_logs(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(|e| PacsError::Database(e.to_string()))?;
        }

        Ok(())
    }

    // ========== 用户相关操作 ==========

    /// 创建新用户
    pub async fn create_user(&self, user: &NewUser) -> Result<User> {
        let pool = self.pool.pool();

        let result = sqlx::query_as::<_, DbUser>(r#"
            INSERT INTO users (id, email, username, full_name, hashed_password, role, diagnostic_center_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
        "#)
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.hashed_password)
        .bind(user.role.as_str())
        .bind(user.diagnostic_center_id)
        .fetch_one(pool)
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.into())
    }

    /// 根据ID查找用户
    pub async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.map(User::from))
    }

    /// 根据用户名查找用户（返回包含口令哈希的行，仅供认证使用）
    pub async fn get_user_row_by_username(&self, username: &str) -> Result<Option<DbUser>> {
        sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| PacsError::Database(e.to_string()))
    }

    /// 用户名或邮箱是否已被占用
    pub async fn user_exists(&self, username: &str, email: &str) -> Result<bool> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE username = $1 OR email = $2 LIMIT 1")
                .bind(username)
                .bind(email)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(|e| PacsError::Database(e.to_string()))?;
        Ok(row.is_some())
    }

    /// 分页列出用户
    pub async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<User>> {
        let results = sqlx::query_as::<_, DbUser>(
            "SELECT * FROM users ORDER BY created_at OFFSET $1 LIMIT $2",
        )
        .bind(skip)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(results.into_iter().map(User::from).collect())
    }

    /// 更新用户（None字段保持不变）
    pub async fn update_user(&self, id: Uuid, update: &UserUpdate) -> Result<Option<User>> {
        let (set_center, center_value) = match &update.diagnostic_center_id {
            Some(value) => (true, *value),
            None => (false, None),
        };

        let result = sqlx::query_as::<_, DbUser>(r#"
            UPDATE users SET
                full_name = COALESCE($2, full_name),
                role = COALESCE($3, role),
                is_active = COALESCE($4, is_active),
                diagnostic_center_id = CASE WHEN $5 THEN $6 ELSE diagnostic_center_id END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
        "#)
        .bind(id)
        .bind(update.full_name.as_deref())
        .bind(update.role.map(|r| r.as_str()))
        .bind(update.is_active)
        .bind(set_center)
        .bind(center_value)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.map(User::from))
    }

    /// 停用用户（本核心不做物理删除）
    pub async fn deactivate_user(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// 记录最近登录时间
    pub async fn touch_last_login(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| PacsError::Database(e.to_string()))?;
        Ok(())
    }

    // ========== 诊断中心相关操作 ==========

    /// 创建诊断中心
    pub async fn create_center(&self, center: &NewDiagnosticCenter) -> Result<DiagnosticCenter> {
        let result = sqlx::query_as::<_, DbDiagnosticCenter>(r#"
            INSERT INTO diagnostic_centers (id, name, address, phone, email, storage_quota_gb)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
        "#)
        .bind(Uuid::new_v4())
        .bind(&center.name)
        .bind(&center.address)
        .bind(&center.phone)
        .bind(&center.email)
        .bind(center.storage_quota_gb)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.into())
    }

    /// 根据ID查找诊断中心
    pub async fn get_center_by_id(&self, id: Uuid) -> Result<Option<DiagnosticCenter>> {
        let result = sqlx::query_as::<_, DbDiagnosticCenter>(
            "SELECT * FROM diagnostic_centers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.map(DiagnosticCenter::from))
    }

    /// 分页列出诊断中心
    pub async fn list_centers(&self, skip: i64, limit: i64) -> Result<Vec<DiagnosticCenter>> {
        let results = sqlx::query_as::<_, DbDiagnosticCenter>(
            "SELECT * FROM diagnostic_centers ORDER BY created_at OFFSET $1 LIMIT $2",
        )
        .bind(skip)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(results.into_iter().map(DiagnosticCenter::from).collect())
    }

    /// 翻转诊断中心启用状态，返回新状态
    pub async fn toggle_center_status(&self, id: Uuid) -> Result<Option<bool>> {
        let row: Option<(bool,)> = sqlx::query_as(r#"
            UPDATE diagnostic_centers SET is_active = NOT is_active, updated_at = NOW()
            WHERE id = $1
            RETURNING is_active
        "#)
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(row.map(|(active,)| active))
    }

    /// 更新诊断中心存储配额
    pub async fn update_center_quota(&self, id: Uuid, quota_gb: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE diagnostic_centers SET storage_quota_gb = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(quota_gb)
        .execute(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// 调整诊断中心已用存储（字节，可为负，下限为0）
    ///
    /// 仅作统计用途，调用方失败时记录日志即可，不中断主流程。
    pub async fn adjust_center_storage(&self, id: Uuid, delta_bytes: i64) -> Result<()> {
        sqlx::query(r#"
            UPDATE diagnostic_centers
            SET storage_used_bytes = GREATEST(0, storage_used_bytes + $2), updated_at = NOW()
            WHERE id = $1
        "#)
        .bind(id)
        .bind(delta_bytes)
        .execute(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;
        Ok(())
    }

    // ========== 患者相关操作 ==========

    /// 根据ID查找患者
    pub async fn get_patient_by_id(&self, id: Uuid) -> Result<Option<Patient>> {
        let result = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.map(Patient::from))
    }

    /// 根据患者编号查找患者
    pub async fn get_patient_by_patient_id(&self, patient_id: &str) -> Result<Option<Patient>> {
        let result = sqlx::query_as::<_, DbPatient>(
            "SELECT * FROM patients WHERE patient_id = $1",
        )
        .bind(patient_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.map(Patient::from))
    }

    /// 创建新患者
    pub async fn create_patient(
        &self,
        patient_id: &str,
        first_name: &str,
        last_name: &str,
        date_of_birth: Option<chrono::NaiveDate>,
        gender: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
        address: Option<&str>,
    ) -> Result<Patient> {
        let result = sqlx::query_as::<_, DbPatient>(r#"
            INSERT INTO patients (id, patient_id, first_name, last_name, date_of_birth, gender, phone, email, address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
        "#)
        .bind(Uuid::new_v4())
        .bind(patient_id)
        .bind(first_name)
        .bind(last_name)
        .bind(date_of_birth)
        .bind(gender)
        .bind(phone)
        .bind(email)
        .bind(address)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.into())
    }

    /// 合并补充患者人口学字段（只填充空缺，不覆盖已有值）
    pub async fn merge_patient(
        &self,
        id: Uuid,
        date_of_birth: Option<chrono::NaiveDate>,
        gender: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
        address: Option<&str>,
    ) -> Result<()> {
        sqlx::query(r#"
            UPDATE patients SET
                date_of_birth = COALESCE(date_of_birth, $2),
                gender = COALESCE(gender, $3),
                phone = COALESCE(phone, $4),
                email = COALESCE(email, $5),
                address = COALESCE(address, $6),
                updated_at = NOW()
            WHERE id = $1
        "#)
        .bind(id)
        .bind(date_of_birth)
        .bind(gender)
        .bind(phone)
        .bind(email)
        .bind(address)
        .execute(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;
        Ok(())
    }

    // ========== 检查相关操作 ==========

    /// 分配一个未被占用的检查号
    ///
    /// 100次碰撞重试后失败：字符空间约36^8，耗尽意味着数据损坏，
    /// 按致命错误处理而非继续重试。
    pub async fn allocate_study_uid(&self) -> Result<String> {
        for attempt in 0..STUDY_UID_MAX_ATTEMPTS {
            let candidate = random_study_uid();
            let existing: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM studies WHERE study_uid = $1")
                    .bind(&candidate)
                    .fetch_optional(self.pool.pool())
                    .await
                    .map_err(|e| PacsError::Database(e.to_string()))?;

            if existing.is_none() {
                return Ok(candidate);
            }
            tracing::warn!("Study uid collision on attempt {}: {}", attempt + 1, candidate);
        }

        Err(PacsError::Internal(format!(
            "failed to allocate study uid after {} attempts",
            STUDY_UID_MAX_ATTEMPTS
        )))
    }

    /// 创建新检查
    pub async fn create_study(&self, study: &NewStudy) -> Result<Study> {
        let result = sqlx::query_as::<_, DbStudy>(r#"
            INSERT INTO studies (id, study_uid, patient_id, diagnostic_center_id, uploaded_by_id,
                                 study_date, modality, body_part, description, priority, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
        "#)
        .bind(Uuid::new_v4())
        .bind(&study.study_uid)
        .bind(study.patient_id)
        .bind(study.diagnostic_center_id)
        .bind(study.uploaded_by_id)
        .bind(study.study_date)
        .bind(&study.modality)
        .bind(&study.body_part)
        .bind(&study.description)
        .bind(&study.priority)
        .bind(study.status.as_str())
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.into())
    }

    /// 根据ID查找检查
    pub async fn get_study_by_id(&self, id: Uuid) -> Result<Option<Study>> {
        let result = sqlx::query_as::<_, DbStudy>("SELECT * FROM studies WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.map(Study::from))
    }

    /// 根据检查号查找检查
    pub async fn get_study_by_uid(&self, study_uid: &str) -> Result<Option<Study>> {
        let result = sqlx::query_as::<_, DbStudy>("SELECT * FROM studies WHERE study_uid = $1")
            .bind(study_uid)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.map(Study::from))
    }

    /// 按访问范围分页列出检查，可按状态过滤
    ///
    /// 范围过滤在SQL层完成，与`StudyScope::matches`语义一致。
    pub async fn list_studies(
        &self,
        scope: &StudyScope,
        status_filter: Option<StudyStatus>,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Study>> {
        let pool = self.pool.pool();
        let status = status_filter.map(|s| s.as_str());

        let results = match scope {
            StudyScope::All => {
                sqlx::query_as::<_, DbStudy>(r#"
                    SELECT * FROM studies
                    WHERE ($1::varchar IS NULL OR status = $1)
                    ORDER BY created_at DESC OFFSET $2 LIMIT $3
                "#)
                .bind(status)
                .bind(skip)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
            StudyScope::UploadedBy(user_id) => {
                sqlx::query_as::<_, DbStudy>(r#"
                    SELECT * FROM studies
                    WHERE uploaded_by_id = $1 AND ($2::varchar IS NULL OR status = $2)
                    ORDER BY created_at DESC OFFSET $3 LIMIT $4
                "#)
                .bind(user_id)
                .bind(status)
                .bind(skip)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
            StudyScope::CenterOrAssigned {
                center_id,
                doctor_id,
            } => {
                // 本中心与分配给本人的并集；无租户时仅剩分配部分
                sqlx::query_as::<_, DbStudy>(r#"
                    SELECT * FROM studies
                    WHERE (diagnostic_center_id = $1 OR assigned_doctor_id = $2)
                      AND ($3::varchar IS NULL OR status = $3)
                    ORDER BY created_at DESC OFFSET $4 LIMIT $5
                "#)
                .bind(center_id.unwrap_or_else(Uuid::nil))
                .bind(doctor_id)
                .bind(status)
                .bind(skip)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
            StudyScope::Center(center_id) => {
                // 无租户的中心受限角色看不到任何检查
                let Some(center) = center_id else {
                    return Ok(Vec::new());
                };
                sqlx::query_as::<_, DbStudy>(r#"
                    SELECT * FROM studies
                    WHERE diagnostic_center_id = $1 AND ($2::varchar IS NULL OR status = $2)
                    ORDER BY created_at DESC OFFSET $3 LIMIT $4
                "#)
                .bind(center)
                .bind(status)
                .bind(skip)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
        }
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(results.into_iter().map(Study::from).collect())
    }

    /// 访问范围内的检查总数，过滤条件与`list_studies`一致
    pub async fn count_studies(
        &self,
        scope: &StudyScope,
        status_filter: Option<StudyStatus>,
    ) -> Result<i64> {
        let pool = self.pool.pool();
        let status = status_filter.map(|s| s.as_str());

        let result: (i64,) = match scope {
            StudyScope::All => {
                sqlx::query_as(r#"
                    SELECT COUNT(*) FROM studies
                    WHERE ($1::varchar IS NULL OR status = $1)
                "#)
                .bind(status)
                .fetch_one(pool)
                .await
            }
            StudyScope::UploadedBy(user_id) => {
                sqlx::query_as(r#"
                    SELECT COUNT(*) FROM studies
                    WHERE uploaded_by_id = $1 AND ($2::varchar IS NULL OR status = $2)
                "#)
                .bind(user_id)
                .bind(status)
                .fetch_one(pool)
                .await
            }
            StudyScope::CenterOrAssigned {
                center_id,
                doctor_id,
            } => {
                sqlx::query_as(r#"
                    SELECT COUNT(*) FROM studies
                    WHERE (diagnostic_center_id = $1 OR assigned_doctor_id = $2)
                      AND ($3::varchar IS NULL OR status = $3)
                "#)
                .bind(center_id.unwrap_or_else(Uuid::nil))
                .bind(doctor_id)
                .bind(status)
                .fetch_one(pool)
                .await
            }
            StudyScope::Center(center_id) => {
                let Some(center) = center_id else {
                    return Ok(0);
                };
                sqlx::query_as(r#"
                    SELECT COUNT(*) FROM studies
                    WHERE diagnostic_center_id = $1 AND ($2::varchar IS NULL OR status = $2)
                "#)
                .bind(center)
                .bind(status)
                .fetch_one(pool)
                .await
            }
        }
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.0)
    }

    /// 条件更新：仅更新状态
    ///
    /// 所有状态更新都以version为条件（乐观并发），命中0行说明
    /// 检查已被并发修改，返回Conflict。
    pub async fn update_study_status(
        &self,
        id: Uuid,
        new_status: StudyStatus,
        expected_version: i32,
    ) -> Result<Study> {
        let result = sqlx::query_as::<_, DbStudy>(r#"
            UPDATE studies SET status = $2, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $3
            RETURNING *
        "#)
        .bind(id)
        .bind(new_status.as_str())
        .bind(expected_version)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        result.map(Study::from).ok_or_else(concurrent_modification)
    }

    /// 条件更新：分配医生
    pub async fn assign_doctor(
        &self,
        id: Uuid,
        doctor_id: Uuid,
        new_status: StudyStatus,
        expected_version: i32,
    ) -> Result<Study> {
        let result = sqlx::query_as::<_, DbStudy>(r#"
            UPDATE studies SET assigned_doctor_id = $2, status = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $4
            RETURNING *
        "#)
        .bind(id)
        .bind(doctor_id)
        .bind(new_status.as_str())
        .bind(expected_version)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        result.map(Study::from).ok_or_else(concurrent_modification)
    }

    /// 条件更新：放射科医生自行认领
    ///
    /// 除version外还要求radiologist_id仍为空，数据库层再挡一次并发认领。
    pub async fn self_assign_radiologist(
        &self,
        id: Uuid,
        radiologist_id: Uuid,
        new_status: StudyStatus,
        expected_version: i32,
    ) -> Result<Study> {
        let result = sqlx::query_as::<_, DbStudy>(r#"
            UPDATE studies SET radiologist_id = $2, status = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $4 AND radiologist_id IS NULL
            RETURNING *
        "#)
        .bind(id)
        .bind(radiologist_id)
        .bind(new_status.as_str())
        .bind(expected_version)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        result.map(Study::from).ok_or_else(concurrent_modification)
    }

    /// 条件更新：医生报告
    pub async fn set_doctor_report(
        &self,
        id: Uuid,
        report: &str,
        new_status: StudyStatus,
        expected_version: i32,
    ) -> Result<Study> {
        let result = sqlx::query_as::<_, DbStudy>(r#"
            UPDATE studies SET doctor_report = $2, status = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $4
            RETURNING *
        "#)
        .bind(id)
        .bind(report)
        .bind(new_status.as_str())
        .bind(expected_version)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        result.map(Study::from).ok_or_else(concurrent_modification)
    }

    /// 条件更新：放射科报告与终审报告
    pub async fn set_radiologist_report(
        &self,
        id: Uuid,
        report: &str,
        final_report: Option<&str>,
        new_status: StudyStatus,
        expected_version: i32,
    ) -> Result<Study> {
        let result = sqlx::query_as::<_, DbStudy>(r#"
            UPDATE studies SET radiologist_report = $2, final_report = COALESCE($3, final_report),
                               status = $4, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $5
            RETURNING *
        "#)
        .bind(id)
        .bind(report)
        .bind(final_report)
        .bind(new_status.as_str())
        .bind(expected_version)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        result.map(Study::from).ok_or_else(concurrent_modification)
    }

    /// 保存AI报告文本（不改变状态，状态由富化钩子推进）
    pub async fn set_ai_report(&self, id: Uuid, report: &str) -> Result<()> {
        sqlx::query("UPDATE studies SET ai_report = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(report)
            .execute(self.pool.pool())
            .await
            .map_err(|e| PacsError::Database(e.to_string()))?;
        Ok(())
    }

    // ========== DICOM文件相关操作 ==========

    /// 登记新DICOM文件
    pub async fn create_dicom_file(&self, file: &NewDicomFile) -> Result<DicomFile> {
        let result = sqlx::query_as::<_, DbDicomFile>(r#"
            INSERT INTO dicom_files (id, study_id, series_uid, instance_uid, file_path, file_size,
                                     slice_number, patient_name, patient_id_dicom, study_date_dicom,
                                     modality_dicom, body_part_dicom)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
        "#)
        .bind(Uuid::new_v4())
        .bind(file.study_id)
        .bind(&file.series_uid)
        .bind(&file.instance_uid)
        .bind(&file.file_path)
        .bind(file.file_size)
        .bind(file.slice_number)
        .bind(&file.patient_name)
        .bind(&file.patient_id_dicom)
        .bind(&file.study_date_dicom)
        .bind(&file.modality_dicom)
        .bind(&file.body_part_dicom)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.into())
    }

    /// 根据ID查找DICOM文件
    pub async fn get_dicom_file_by_id(&self, id: Uuid) -> Result<Option<DicomFile>> {
        let result = sqlx::query_as::<_, DbDicomFile>("SELECT * FROM dicom_files WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.map(DicomFile::from))
    }

    /// 某检查的全部DICOM文件
    pub async fn list_dicom_files_for_study(&self, study_id: Uuid) -> Result<Vec<DicomFile>> {
        let results = sqlx::query_as::<_, DbDicomFile>(
            "SELECT * FROM dicom_files WHERE study_id = $1 ORDER BY slice_number NULLS LAST",
        )
        .bind(study_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(results.into_iter().map(DicomFile::from).collect())
    }

    // ========== 删除请求相关操作 ==========

    /// 创建删除请求
    pub async fn create_deletion_request(
        &self,
        study_id: Uuid,
        requested_by_id: Uuid,
        reason: &str,
    ) -> Result<DeletionRequest> {
        let result = sqlx::query_as::<_, DbDeletionRequest>(r#"
            INSERT INTO deletion_requests (id, study_id, requested_by_id, reason, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING *
        "#)
        .bind(Uuid::new_v4())
        .bind(study_id)
        .bind(requested_by_id)
        .bind(reason)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.into())
    }

    /// 根据ID查找删除请求
    pub async fn get_deletion_request_by_id(&self, id: Uuid) -> Result<Option<DeletionRequest>> {
        let result = sqlx::query_as::<_, DbDeletionRequest>(
            "SELECT * FROM deletion_requests WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(result.map(DeletionRequest::from))
    }

    /// 列出全部删除请求
    pub async fn list_deletion_requests(&self) -> Result<Vec<DeletionRequest>> {
        let results = sqlx::query_as::<_, DbDeletionRequest>(
            "SELECT * FROM deletion_requests ORDER BY created_at DESC",
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(results.into_iter().map(DeletionRequest::from).collect())
    }

    /// 列出某用户发起的删除请求
    pub async fn list_deletion_requests_by_requester(
        &self,
        requested_by_id: Uuid,
    ) -> Result<Vec<DeletionRequest>> {
        let results = sqlx::query_as::<_, DbDeletionRequest>(
            "SELECT * FROM deletion_requests WHERE requested_by_id = $1 ORDER BY created_at DESC",
        )
        .bind(requested_by_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        Ok(results.into_iter().map(DeletionRequest::from).collect())
    }

    /// 保存审批结果
    pub async fn store_deletion_resolution(&self, request: &DeletionRequest) -> Result<()> {
        sqlx::query(r#"
            UPDATE deletion_requests SET status = $2, approved_by_id = $3, approved_at = $4
            WHERE id = $1
        "#)
        .bind(request.id)
        .bind(request.status.as_str())
        .bind(request.approved_by_id)
        .bind(request.approved_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;
        Ok(())
    }

    // ========== 级联删除 ==========

    /// 级联删除检查：文件行、检查行、审计记录与存储统计在同一事务内
    ///
    /// 审计detail必须在调用前完成PHI脱敏。审计写入失败会回滚整个
    /// 事务——审计完整性是删除原子性契约的一部分。文件字节的清理
    /// 由调用方在事务外尽力执行。
    pub async fn delete_study_cascade(
        &self,
        study: &Study,
        freed_bytes: i64,
        audit: &AuditEvent,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| PacsError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM dicom_files WHERE study_id = $1")
            .bind(study.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| PacsError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM studies WHERE id = $1")
            .bind(study.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| PacsError::Database(e.to_string()))?;

        insert_audit(&mut *tx, audit).await?;

        sqlx::query(r#"
            UPDATE diagnostic_centers
            SET storage_used_bytes = GREATEST(0, storage_used_bytes - $2), updated_at = NOW()
            WHERE id = $1
        "#)
        .bind(study.diagnostic_center_id)
        .bind(freed_bytes)
        .execute(&mut *tx)
        .await
        .map_err(|e| PacsError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| PacsError::Database(e.to_string()))?;

        tracing::info!("Study {} deleted with {} freed bytes", study.study_uid, freed_bytes);
        Ok(())
    }
}

fn concurrent_modification() -> PacsError {
    PacsError::Conflict("Study was modified concurrently, retry with fresh state".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_version_surfaces_conflict() {
        // 条件更新命中0行时走的统一分支
        let error: Option<Study> = None;
        let result = error.ok_or_else(concurrent_modification);
        match result {
            Err(PacsError::Conflict(_)) => {}
            other => panic!("expected Conflict, got {:?}", other),
        }
        assert_eq!(concurrent_modification().code(), "conflict");
    }
}
