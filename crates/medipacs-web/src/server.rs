//! Web服务器装配

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use medipacs_core::{PacsError, Result};
use medipacs_database::DatabasePool;
use medipacs_storage::StorageManager;
use medipacs_workflow::{MetadataExtractor, ReportGenerator};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::admin;
use crate::auth::{auth_middleware, login_handler, logout_handler, me_handler, RateLimiter, SessionManager};
use crate::handlers;

/// 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub pool: DatabasePool,
    pub storage: Arc<StorageManager>,
    pub sessions: Arc<SessionManager>,
    pub login_limiter: Arc<dyn RateLimiter>,
    pub report_generator: Arc<dyn ReportGenerator>,
    pub metadata_extractor: Arc<dyn MetadataExtractor>,
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState, max_upload_bytes: usize) -> Self {
        let app = Self::create_app(state, max_upload_bytes);
        Self { addr, app }
    }

    fn create_app(state: AppState, max_upload_bytes: usize) -> Router {
        // 需要认证的路由
        let protected = Router::new()
            .route("/auth/me", get(me_handler))
            .route("/auth/logout", post(logout_handler))
            .nest("/api/v1", api_routes())
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ));

        Router::new()
            // 无需token的路由
            .route("/", get(handlers::api_root))
            .route("/health", get(handlers::health))
            .route("/auth/login", post(login_handler))
            .merge(protected)
            // 全局中间件
            .layer(DefaultBodyLimit::max(max_upload_bytes))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    ),
            )
            .with_state(state)
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| PacsError::Internal(format!("failed to bind {}: {}", self.addr, e)))?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| PacsError::Internal(format!("web server error: {}", e)))?;

        Ok(())
    }
}

/// API v1 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        // 检查流转
        .route("/studies/upload", post(handlers::upload_study))
        .route("/studies", get(handlers::list_studies))
        .route("/studies/files/:id", get(handlers::get_dicom_file))
        .route(
            "/studies/:uid",
            get(handlers::get_study).delete(handlers::delete_study),
        )
        .route("/studies/:uid/status", get(handlers::get_study_status))
        .route("/studies/:uid/assign", put(handlers::assign_study))
        .route("/studies/:uid/assign-to-self", put(handlers::assign_to_self))
        .route("/studies/:uid/report", put(handlers::write_report))
        // 删除请求
        .route(
            "/deletion-requests",
            post(handlers::create_deletion_request).get(handlers::list_deletion_requests),
        )
        .route(
            "/deletion-requests/:id/approve",
            put(handlers::approve_deletion_request),
        )
        .route(
            "/deletion-requests/:id/reject",
            put(handlers::reject_deletion_request),
        )
        // 管理端点
        .nest("/admin", admin_routes())
}

/// 管理路由
fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/users/:id",
            put(admin::update_user).delete(admin::deactivate_user),
        )
        .route(
            "/centers",
            get(admin::list_centers).post(admin::create_center),
        )
        .route("/centers/:id", get(admin::get_center))
        .route("/centers/:id/toggle-status", put(admin::toggle_center_status))
        .route("/centers/:id/storage", put(admin::allocate_center_storage))
        .route("/audit", get(admin::list_audit_logs))
}
