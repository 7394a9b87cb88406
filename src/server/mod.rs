use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cli::AppConfig;
use crate::common::logger::PrettyLogger;
use crate::downloader::DownloadService;
use crate::downloader::janitor::spawn_janitor;

pub mod error;
pub mod handlers;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

/// 构建路由
///
/// - `POST /download` 提交链接，返回任务ID
/// - `GET /progress/{task_id}` 进度事件流（SSE）
/// - `GET /file/{task_id}` 下载已完成任务的文件，只能成功一次
/// - `GET /health` 健康检查
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/download", post(handlers::submit))
        .route("/progress/{task_id}", get(handlers::progress))
        .route("/file/{task_id}", get(handlers::file))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// 启动服务，直到收到 Ctrl-C
pub async fn serve(config: AppConfig) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&config.download_dir).await?;

    let service = Arc::new(DownloadService::from_config(&config));
    let janitor = spawn_janitor(service.store(), config.task_ttl, config.sweep_interval);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let address = listener.local_addr()?;
    let formats: Vec<String> = config.rules.formats.iter().map(|f| f.to_string()).collect();
    PrettyLogger::banner(
        address.to_string(),
        config.download_dir.display().to_string(),
        &formats,
    );
    info!("服务已启动: {}", address);

    axum::serve(listener, create_router(AppState::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    janitor.abort();
    info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("收到退出信号，正在关闭"),
        Err(e) => {
            warn!("无法监听退出信号: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
