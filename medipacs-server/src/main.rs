//! MediPACS服务器主程序

mod config;

use clap::Parser;
use medipacs_core::{PacsError, Result, UserRole};
use medipacs_database::{DatabasePool, DatabaseQueries, NewUser};
use medipacs_storage::StorageManager;
use medipacs_web::{
    auth::hash_password, AppState, InMemoryRateLimiter, SessionManager, WebServer,
};
use medipacs_workflow::{NoopExtractor, StubReportGenerator};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;

/// MediPACS服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "medipacs-server")]
#[command(about = "MediPACS 医学影像检查管理服务器")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_level))
        .init();

    info!("启动MediPACS服务器...");

    let settings = Settings::load(args.config.as_deref())?;
    info!("服务器配置:");
    info!("  监听地址: {}:{}", settings.server.host, settings.server.port);
    info!("  存储目录: {}", settings.storage.base_path);

    // 数据库连接与建表
    let pool = DatabasePool::connect(
        &settings.database.url,
        settings.database.max_connections,
    )
    .await?;
    DatabaseQueries::new(&pool).create_tables().await?;
    bootstrap_admin(&pool, &settings).await?;

    let state = AppState {
        pool,
        storage: Arc::new(StorageManager::new(settings.storage.base_path.clone())),
        sessions: Arc::new(SessionManager::new(settings.auth.session_ttl_hours)),
        login_limiter: Arc::new(InMemoryRateLimiter::new(
            settings.auth.login_max_failures,
            std::time::Duration::from_secs(settings.auth.login_window_secs),
        )),
        report_generator: Arc::new(StubReportGenerator),
        metadata_extractor: Arc::new(NoopExtractor),
    };

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| PacsError::Internal(format!("invalid listen address: {}", e)))?;
    let max_upload_bytes = settings.server.max_upload_mb * 1024 * 1024;

    WebServer::new(addr, state, max_upload_bytes).run().await
}

/// 首次启动时创建默认管理员账号
async fn bootstrap_admin(pool: &DatabasePool, settings: &Settings) -> Result<()> {
    let queries = DatabaseQueries::new(pool);
    if queries.get_user_row_by_username("admin").await?.is_some() {
        return Ok(());
    }

    queries
        .create_user(&NewUser {
            email: "admin@medipacs.local".to_string(),
            username: "admin".to_string(),
            full_name: "System Administrator".to_string(),
            hashed_password: hash_password(&settings.auth.bootstrap_admin_password),
            role: UserRole::Admin,
            diagnostic_center_id: None,
        })
        .await?;

    warn!("Bootstrap admin account created, change its password after first login");
    Ok(())
}
