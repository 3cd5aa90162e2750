//! 用户认证与会话管理

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use medipacs_core::{PacsError, User, UserRole};
use medipacs_database::{AuditEvent, AuditRecorder, DatabaseQueries};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::response::{ApiError, ApiResult};
use crate::server::AppState;

/// 登录请求
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// 登录响应
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserInfo,
}

/// 用户信息（不含敏感字段）
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub is_active: bool,
    pub diagnostic_center_id: Option<Uuid>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            is_active: user.is_active,
            diagnostic_center_id: user.diagnostic_center_id,
        }
    }
}

// ========== 口令哈希 ==========

/// 口令哈希（sha256十六进制）
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_password(password: &str, hashed: &str) -> bool {
    hash_password(password) == hashed
}

// ========== 会话管理 ==========

struct Session {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// 内存会话表
///
/// token为32字节随机数的十六进制表示，带过期时间。
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// 签发新会话，返回token与过期时间
    ///
    /// 签发时顺带清扫已过期会话，防止废弃token在进程生命周期内累积。
    pub async fn issue(&self, user_id: Uuid) -> (String, DateTime<Utc>) {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes[..]);
        let token = hex::encode(bytes);
        let now = Utc::now();
        let expires_at = now + self.ttl;

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| session.expires_at > now);
        sessions.insert(token.clone(), Session { user_id, expires_at });
        (token, expires_at)
    }

    /// 查找有效会话，过期的顺手移除
    pub async fn lookup(&self, token: &str) -> Option<Uuid> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some(session) if session.expires_at > Utc::now() => {
                    return Some(session.user_id)
                }
                None => return None,
                _ => {}
            }
        }
        self.sessions.write().await.remove(token);
        None
    }

    /// 注销会话
    pub async fn revoke(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }

    #[cfg(test)]
    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

// ========== 登录限流 ==========

/// 失败尝试限流器
pub trait RateLimiter: Send + Sync {
    /// 当前key是否仍被允许尝试
    fn check(&self, key: &str) -> bool;
    /// 登记一次失败
    fn register_failure(&self, key: &str);
    /// 成功后清除记录
    fn reset(&self, key: &str);
}

/// 固定窗口内存限流器
pub struct InMemoryRateLimiter {
    max_failures: u32,
    window: std::time::Duration,
    entries: Mutex<HashMap<String, (u32, Instant)>>,
}

impl InMemoryRateLimiter {
    pub fn new(max_failures: u32, window: std::time::Duration) -> Self {
        Self {
            max_failures,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, (u32, Instant)>) -> T) -> T {
        match self.entries.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check(&self, key: &str) -> bool {
        self.with_entries(|entries| match entries.get(key) {
            Some((count, since)) => {
                if since.elapsed() >= self.window {
                    entries.remove(key);
                    true
                } else {
                    *count < self.max_failures
                }
            }
            None => true,
        })
    }

    fn register_failure(&self, key: &str) {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert((0, Instant::now()));
            if entry.1.elapsed() >= self.window {
                *entry = (0, Instant::now());
            }
            entry.0 += 1;
        });
    }

    fn reset(&self, key: &str) {
        self.with_entries(|entries| {
            entries.remove(key);
        });
    }
}

// ========== 请求元信息 ==========

/// 从请求头中取客户端IP与User-Agent，供审计使用
pub fn client_meta(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    (ip, user_agent)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// 登录失败按客户端IP计数；取不到IP的请求归入同一个unknown桶
fn login_limiter_key(ip: Option<&str>) -> String {
    format!("login:{}", ip.unwrap_or("unknown"))
}

// ========== 处理器与中间件 ==========

/// 登录
pub async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let (ip, user_agent) = client_meta(&headers);
    let limiter_key = login_limiter_key(ip.as_deref());
    if !state.login_limiter.check(&limiter_key) {
        return Err(PacsError::RateLimited(
            "Too many failed login attempts, try again later".to_string(),
        )
        .into());
    }

    let queries = DatabaseQueries::new(&state.pool);
    let row = queries.get_user_row_by_username(&request.username).await?;

    let Some(row) = row.filter(|r| verify_password(&request.password, &r.hashed_password)) else {
        state.login_limiter.register_failure(&limiter_key);
        tracing::warn!("Failed login attempt for {}", request.username);
        return Err(PacsError::Unauthenticated("Invalid username or password".to_string()).into());
    };

    let user: User = row.into();
    if !user.is_active {
        return Err(PacsError::Unauthenticated("Account is deactivated".to_string()).into());
    }

    state.login_limiter.reset(&limiter_key);
    queries.touch_last_login(user.id).await?;

    let (token, expires_at) = state.sessions.issue(user.id).await;

    let audit = AuditEvent::new("login")
        .actor(user.id)
        .resource("user", user.id.to_string())
        .client(ip, user_agent);
    if let Err(e) = AuditRecorder::new(&state.pool).record(audit).await {
        tracing::error!("Failed to record login audit: {}", e);
    }

    tracing::info!("User {} logged in", user.username);
    Ok(Json(LoginResponse {
        access_token: token,
        token_type: "bearer".to_string(),
        expires_at,
        user: UserInfo::from(&user),
    }))
}

/// 注销当前会话
pub async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(token) = bearer_token(&headers) {
        state.sessions.revoke(token).await;
    }
    Ok(Json(serde_json::json!({ "status": "logged_out" })))
}

/// 当前用户信息
pub async fn me_handler(Extension(user): Extension<User>) -> Json<UserInfo> {
    Json(UserInfo::from(&user))
}

/// 认证中间件：校验Bearer token并注入User
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| PacsError::Unauthenticated("Missing bearer token".to_string()))?
        .to_string();

    let user_id = state
        .sessions
        .lookup(&token)
        .await
        .ok_or_else(|| PacsError::Unauthenticated("Invalid or expired session".to_string()))?;

    let queries = DatabaseQueries::new(&state.pool);
    let user = queries
        .get_user_by_id(user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| PacsError::Unauthenticated("Account is deactivated".to_string()))?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_roundtrip() {
        let hashed = hash_password("s3cret");
        assert!(verify_password("s3cret", &hashed));
        assert!(!verify_password("wrong", &hashed));
        // sha256十六进制固定64字符
        assert_eq!(hashed.len(), 64);
    }

    #[tokio::test]
    async fn test_session_issue_and_lookup() {
        let sessions = SessionManager::new(1);
        let user_id = Uuid::new_v4();
        let (token, expires_at) = sessions.issue(user_id).await;

        assert!(expires_at > Utc::now());
        assert_eq!(sessions.lookup(&token).await, Some(user_id));
        assert_eq!(sessions.lookup("bogus").await, None);

        sessions.revoke(&token).await;
        assert_eq!(sessions.lookup(&token).await, None);
    }

    #[test]
    fn test_rate_limiter_window() {
        let limiter = InMemoryRateLimiter::new(3, std::time::Duration::from_secs(60));
        let key = "login:203.0.113.7";

        assert!(limiter.check(key));
        for _ in 0..3 {
            limiter.register_failure(key);
        }
        assert!(!limiter.check(key));

        // 成功登录清除计数
        limiter.reset(key);
        assert!(limiter.check(key));
    }

    #[test]
    fn test_limiter_keyed_by_client_ip() {
        assert_eq!(login_limiter_key(Some("203.0.113.7")), "login:203.0.113.7");
        assert_eq!(login_limiter_key(None), "login:unknown");

        // 同一IP换用户名不绕过限流，换IP不受牵连
        let limiter = InMemoryRateLimiter::new(2, std::time::Duration::from_secs(60));
        let blocked = login_limiter_key(Some("203.0.113.7"));
        limiter.register_failure(&blocked);
        limiter.register_failure(&blocked);
        assert!(!limiter.check(&blocked));
        assert!(limiter.check(&login_limiter_key(Some("198.51.100.1"))));
    }

    #[tokio::test]
    async fn test_issue_sweeps_expired_sessions() {
        // TTL为0小时，签发即过期
        let sessions = SessionManager::new(0);
        sessions.issue(Uuid::new_v4()).await;
        sessions.issue(Uuid::new_v4()).await;
        // 第二次签发时第一条已被清扫
        assert_eq!(sessions.session_count().await, 1);
    }

    #[test]
    fn test_rate_limiter_expired_window_allows_again() {
        let limiter = InMemoryRateLimiter::new(1, std::time::Duration::from_millis(0));
        limiter.register_failure("k");
        // 窗口为0时立即过期
        assert!(limiter.check("k"));
    }
}
