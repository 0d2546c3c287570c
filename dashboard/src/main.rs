//! Pulse 事件计数看板

use std::net::SocketAddr;

use pulse_bootstrap::{Infrastructure, RuntimeConfig, init_runtime, shutdown_signal};
use pulse_config::AppConfig;
use pulse_dashboard::{AppState, build_router};
use pulse_telemetry::init_metrics;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env 可选
    let _ = dotenvy::dotenv();

    // 加载配置
    let runtime = RuntimeConfig::default();
    let config = AppConfig::load(&runtime.config_dir)?;
    init_runtime(&config);

    let metrics = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    // 初始化基础设施
    let infra = Infrastructure::from_config(config).await?;
    let janitor = infra.start_session_janitor();

    let app = build_router(AppState::from_infrastructure(&infra, metrics));

    info!(%addr, "Starting dashboard");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    infra.shutdown();
    let _ = janitor.await;
    info!("Dashboard stopped");

    Ok(())
}
