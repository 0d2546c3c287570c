//! Pulse 事件计数看板 HTTP 服务

pub mod auth;
pub mod middleware;
pub mod reports;
pub mod routing;
pub mod state;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware::from_fn_with_state,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::warn;

pub use state::{AppState, HttpSettings};

/// 构建完整路由
pub fn build_router(state: AppState) -> Router {
    // 需要会话的路由
    let api = Router::new()
        .merge(auth::session_routes())
        .merge(routing::catalog_routes())
        .merge(reports::report_routes())
        .layer(from_fn_with_state(state.clone(), middleware::session_middleware));

    let mut app = Router::new()
        .merge(api)
        .merge(routing::ops_routes())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.settings.max_upload_bytes))
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(&state.settings.cors_allowed_origins) {
        app = app.layer(cors);
    }

    app.with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true),
    )
}
