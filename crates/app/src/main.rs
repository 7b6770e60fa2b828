use fullon_app::{bootstrap, logging, settings};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// # Summary
/// 网关启动入口。
///
/// # Logic
/// 1. 加载分层配置并初始化日志。
/// 2. 组装依赖，启动后台健康检查。
/// 3. 收到 Ctrl-C 后取消全局令牌，服务器与所有会话随之优雅退出。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = settings::config_path(std::env::args());
    let config = settings::load(path.as_deref())?;
    let _guard = logging::init(&config.logging);
    info!("Fullon gateway starting...");

    let shutdown = CancellationToken::new();
    let gateway = bootstrap::assemble(&config, shutdown.clone())?;
    let checker = gateway.health.clone().spawn(shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
        signal.cancel();
    });

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let served = fullon_api::server::start_server(gateway.state, &bind_addr).await;
    shutdown.cancel();
    if let Err(e) = checker.await {
        tracing::warn!("Health checker ended abnormally: {}", e);
    }
    served
}
