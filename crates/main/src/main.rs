//! 主应用程序入口
//!
//! 加载配置、装配存储与消息中枢，启动 Axum 服务并处理优雅停机。

use std::{sync::Arc, time::Duration};

use application::SessionValidator;
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // RUST_LOG 优先，其次取配置中的日志级别
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(environment = %config.server.environment, "starting converse");

    let infrastructure = Infrastructure::connect(&config.database).await?;
    let session_validator: Arc<dyn SessionValidator> =
        Arc::new(JwtService::new(config.jwt.clone()));
    let (state, hub_task) =
        AppState::build(&config, infrastructure.message_store(), session_validator);
    let hub = state.hub.clone();

    let app = router(state);
    let bind_address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("聊天服务启动在 http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // 先关闭中枢，让所有 WebSocket 连接退出
            hub.shutdown().await;
        })
        .await?;

    let grace = Duration::from_secs(config.server.shutdown_timeout_seconds);
    if tokio::time::timeout(grace, hub_task).await.is_err() {
        warn!("hub did not stop within {:?}", grace);
    }

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
