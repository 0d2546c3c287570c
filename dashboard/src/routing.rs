//! 运维路由与目录

use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use pulse_errors::{AppError, AppResult};
use pulse_telemetry::HealthStatus;
use serde::Serialize;

use crate::middleware::Authenticated;
use crate::state::AppState;

pub fn ops_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
}

pub fn catalog_routes() -> Router<AppState> {
    Router::new().route("/api/tables", get(list_tables))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// 就绪检查：立即探测仓库
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut status = HealthStatus::new();
    let backend = state.repository.backend_name();

    let start = Instant::now();
    match state.repository.health_check().await {
        Ok(probe) => status.add_check(backend, true, Some(probe.latency_ms), None),
        Err(e) => {
            tracing::warn!(backend, error = %e, "Warehouse readiness probe failed");
            let elapsed = start.elapsed().as_millis() as u64;
            // 不向外暴露内部错误
            status.add_check(
                backend,
                false,
                Some(elapsed),
                Some(e.to_problem_details().detail),
            );
        }
    }
    status.add_check("catalog", !state.catalog.is_empty(), None, None);

    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn metrics(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| AppError::not_found("Metrics recorder is not installed"))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}

#[derive(Debug, Serialize)]
pub struct TablesResponse {
    pub tables: Vec<String>,
}

async fn list_tables(State(state): State<AppState>, _auth: Authenticated) -> Json<TablesResponse> {
    Json(TablesResponse {
        tables: state.catalog.list().into_iter().map(str::to_string).collect(),
    })
}
