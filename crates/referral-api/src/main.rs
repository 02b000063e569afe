//! 转诊服务入口
//!
//! 加载配置、初始化可观测性与存储，组装核心服务并启动 HTTP 与后台 Worker

use std::sync::Arc;

use anyhow::bail;
use referral_api::{
    AppState,
    auth::{JwtConfig, JwtManager},
    build_router,
    worker::CodeExpiryWorker,
};
use referral_core::{NotificationPublisher, ReferralCore, Repositories, SystemClock};
use referral_shared::{
    config::{AppConfig, AuthConfig, StorageBackend},
    database::Database,
    observability,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "referral-api";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        storage = ?config.storage.backend,
        "Starting {} on {}",
        SERVICE_NAME,
        config.server_addr()
    );

    if config.auth.jwt_secret == AuthConfig::default().jwt_secret {
        if config.is_production() {
            bail!("生产环境必须通过 REFERRAL_AUTH__JWT_SECRET 设置 JWT 密钥");
        }
        warn!("使用默认 JWT 密钥，生产环境请设置 REFERRAL_AUTH__JWT_SECRET");
    }

    let (repos, database) = match config.storage.backend {
        StorageBackend::Postgres => {
            let db = Database::connect(&config.database).await?;
            db.run_migrations().await?;
            (Repositories::postgres(db.pool().clone()), Some(db))
        }
        StorageBackend::Memory => {
            warn!("使用内存存储，进程退出后数据丢失");
            (Repositories::memory(), None)
        }
    };

    let publisher = NotificationPublisher::from_config(&config.notifications)?;
    info!(
        sink = ?config.notifications.sink,
        enabled = publisher.is_enabled(),
        "通知下游已初始化"
    );

    let core = ReferralCore::new(repos, publisher, Arc::new(SystemClock), &config)?;
    let jwt = JwtManager::new(JwtConfig::from(&config.auth));
    let state = AppState::new(core.clone(), jwt, database.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = if config.workers.code_expiry_enabled {
        let worker = CodeExpiryWorker::from_config(core.registry.clone(), &config.workers);
        Some(tokio::spawn(async move { worker.run(shutdown_rx).await }))
    } else {
        info!("兑换码过期 Worker 未启用");
        None
    };

    if config.server.cors_origins.trim() == "*" && config.is_production() {
        warn!("server.cors_origins 为 \"*\"，生产环境请设置为具体域名");
    }
    info!(origins = %config.server.cors_origins, "CORS 已配置");
    let app = build_router(state, &config.server);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker 退出异常");
        }
    }
    if let Some(db) = database {
        db.close().await;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// 监听 SIGTERM 或 Ctrl+C
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
