//! HTTP 接口测试（mock 仓库）

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{Request, Response, StatusCode, header},
};
use chrono::NaiveDate;
use pulse_dashboard::{AppState, HttpSettings, build_router};
use pulse_domain::{AccessGate, SessionPolicy, SessionStore, TableCatalog};
use pulse_errors::AppError;
use pulse_ports::{EventCountRow, MockEventCountRepository, WarehouseProbe};
use serde_json::Value;
use tower::ServiceExt;

const ACCESS_KEY: &str = "1729";
const PEER: &str = "198.51.100.4:40000";

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn fixture_rows() -> Vec<EventCountRow> {
    vec![
        EventCountRow::new(date(1), "login", "web", 10),
        EventCountRow::new(date(1), "signup", "ios", 3),
        EventCountRow::new(date(2), "login", "ios", 7),
        EventCountRow::new(date(2), "signup", "web", 5),
    ]
}

fn catalog() -> TableCatalog {
    TableCatalog::from_map(&BTreeMap::from([
        (
            "User Activity".to_string(),
            "catalog.schema.user_activity".to_string(),
        ),
        ("Billing".to_string(), "finance.billing_events".to_string()),
    ]))
    .unwrap()
}

fn app_with(repo: MockEventCountRepository, sessions: Arc<SessionStore>) -> Router {
    let state = AppState::new(
        Arc::new(repo),
        Arc::new(catalog()),
        Arc::new(AccessGate::new(ACCESS_KEY).unwrap()),
        sessions,
    )
    .with_settings(HttpSettings {
        max_upload_bytes: 1024,
        ..Default::default()
    });
    build_router(state)
}

fn app(repo: MockEventCountRepository) -> Router {
    app_with(repo, Arc::new(SessionStore::default()))
}

/// 不应被调用的仓库
fn untouched_repo() -> MockEventCountRepository {
    let mut repo = MockEventCountRepository::new();
    repo.expect_fetch_event_counts().times(0);
    repo
}

fn session_cookie<B>(response: &Response<B>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post_login(app: &Router, cookie: Option<&str>, key: &str) -> Response<Body> {
    post_login_from(app, PEER, cookie, key).await
}

async fn post_login_from(
    app: &Router,
    peer: &str,
    cookie: Option<&str>,
    key: &str,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/session")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let body = serde_json::json!({ "access_key": key }).to_string();
    let mut request = builder.body(Body::from(body)).unwrap();
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    app.clone().oneshot(request).await.unwrap()
}

async fn get_session(app: &Router, cookie: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder().uri("/api/session");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// 登录并返回 cookie
async fn login(app: &Router) -> String {
    let response = post_login(app, None, ACCESS_KEY).await;
    assert_eq!(response.status(), StatusCode::OK);
    session_cookie(&response).expect("login should issue a session cookie")
}

async fn post_csv(app: &Router, uri: &str, cookie: &str, csv: &str) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "text/csv")
        .body(Body::from(csv.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

const SCENARIO_CSV: &str = "event,props_feature\nlogin,web\nsignup,ios\nlogin,android\n";
const REPORT_URI: &str = "/api/reports?table=User%20Activity&start_date=2024-01-01";

#[tokio::test]
async fn test_health() {
    let app = app(untouched_repo());
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_protected_routes_require_authentication() {
    let app = app(untouched_repo());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/tables").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    assert!(session_cookie(&response).is_none());

    // 伪造的会话 ID 同样被拒绝
    let forged = format!("pulse_session={}", uuid::Uuid::new_v4());
    let response = post_csv(&app, REPORT_URI, &forged, SCENARIO_CSV).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_flow() {
    let app = app(untouched_repo());

    let response = post_login(&app, None, "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(session_cookie(&response).is_none());

    let response = post_login(&app, None, ACCESS_KEY).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).expect("login should issue a session cookie");
    assert_eq!(body_json(response).await["authenticated"], true);

    let response = get_session(&app, Some(&cookie)).await;
    assert_eq!(body_json(response).await["authenticated"], true);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/tables")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["tables"],
        serde_json::json!(["Billing", "User Activity"])
    );
}

#[tokio::test]
async fn test_lockout_after_repeated_failures() {
    let sessions = Arc::new(SessionStore::new(SessionPolicy {
        max_failed_attempts: 2,
        lockout: Duration::from_secs(60),
        ttl: Duration::from_secs(600),
    }));
    let app = app_with(untouched_repo(), sessions);

    let response = post_login(&app, None, "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = post_login(&app, None, "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = post_login(&app, None, ACCESS_KEY).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_lockout_survives_dropping_the_cookie() {
    let sessions = Arc::new(SessionStore::new(SessionPolicy {
        max_failed_attempts: 2,
        lockout: Duration::from_secs(60),
        ttl: Duration::from_secs(600),
    }));
    let app = app_with(untouched_repo(), sessions);

    // 每次都不带 cookie，计数仍按对端地址累计
    let mut statuses = Vec::new();
    for _ in 0..3 {
        statuses.push(post_login(&app, None, "wrong").await.status());
    }
    assert_eq!(
        statuses,
        [
            StatusCode::UNAUTHORIZED,
            StatusCode::UNAUTHORIZED,
            StatusCode::TOO_MANY_REQUESTS
        ]
    );

    let response = post_login(&app, None, ACCESS_KEY).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(session_cookie(&response).is_none());

    // 其他地址不受影响
    let response = post_login_from(&app, "203.0.113.9:5000", None, ACCESS_KEY).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_anonymous_requests_do_not_grow_the_session_store() {
    let sessions = Arc::new(SessionStore::default());
    let app = app_with(untouched_repo(), sessions.clone());

    for _ in 0..200 {
        let response = get_session(&app, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_cookie(&response).is_none());
    }
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/tables").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = post_login(&app, None, "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(sessions.len(), 0);

    login(&app).await;
    assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn test_logout_clears_session() {
    let app = app(untouched_repo());
    let cookie = login(&app).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/session")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .contains("Max-Age=0")
    );

    let response = get_session(&app, Some(&cookie)).await;
    assert_eq!(body_json(response).await["authenticated"], false);
}

#[tokio::test]
async fn test_report_scenario() {
    let mut repo = MockEventCountRepository::new();
    repo.expect_fetch_event_counts()
        .withf(|q| {
            q.table.qualified_name() == "catalog.schema.user_activity"
                && q.start_date == NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                && q.events.iter().map(String::as_str).eq(["login", "signup"])
        })
        .times(1)
        .returning(|_| Ok(fixture_rows()));

    let app = app(repo);
    let cookie = login(&app).await;
    let response = post_csv(&app, REPORT_URI, &cookie, SCENARIO_CSV).await;

    assert_eq!(response.status(), StatusCode::OK);
    let view = body_json(response).await;

    assert_eq!(view["status"], "ok");
    assert_eq!(view["table"], "User Activity");
    assert!(
        view["query_preview"]
            .as_str()
            .unwrap()
            .contains("event_date >= '2024-01-01' AND event_name IN ('login','signup')")
    );
    assert_eq!(view["headline"]["total_count"], 25);
    assert_eq!(view["headline"]["active_days"], 2);
    assert_eq!(view["definitions"]["total_rows"], 3);
    assert_eq!(view["rows"].as_array().unwrap().len(), 4);

    let by_event = &view["charts"][1];
    assert_eq!(by_event["kind"], "bar");
    assert_eq!(by_event["points"][0]["label"], "login");
    assert_eq!(by_event["points"][0]["value"], 17);
    assert_eq!(by_event["points"][1]["value"], 8);

    let daily = &view["charts"][0];
    assert_eq!(daily["kind"], "line");
    assert_eq!(daily["points"][0]["value"], 13);
    assert_eq!(daily["points"][1]["value"], 12);
}

#[tokio::test]
async fn test_missing_columns_halt_before_query() {
    let app = app(untouched_repo());
    let cookie = login(&app).await;

    let response = post_csv(&app, REPORT_URI, &cookie, "name,owner\nlogin,growth\n").await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let problem = body_json(response).await;
    assert_eq!(
        problem["missing_columns"],
        serde_json::json!(["event", "props_feature"])
    );
}

#[tokio::test]
async fn test_zero_rows_is_no_data() {
    let mut repo = MockEventCountRepository::new();
    repo.expect_fetch_event_counts()
        .times(1)
        .returning(|_| Ok(Vec::new()));

    let app = app(repo);
    let cookie = login(&app).await;
    let response = post_csv(&app, REPORT_URI, &cookie, SCENARIO_CSV).await;

    assert_eq!(response.status(), StatusCode::OK);
    let view = body_json(response).await;
    assert_eq!(view["status"], "no_data");
    assert!(view["warning"].is_string());
    assert_eq!(view["headline"]["total_count"], 0);
}

#[tokio::test]
async fn test_no_events_skip_the_warehouse() {
    let app = app(untouched_repo());
    let cookie = login(&app).await;

    let response = post_csv(&app, REPORT_URI, &cookie, "event,props_feature\n,web\n  ,ios\n").await;

    assert_eq!(response.status(), StatusCode::OK);
    let view = body_json(response).await;
    assert_eq!(view["status"], "no_data");
    assert!(view.get("query_preview").is_none());
    assert_eq!(view["definitions"]["skipped_rows"], 2);
}

#[tokio::test]
async fn test_unknown_table_and_bad_date() {
    let app = app(untouched_repo());
    let cookie = login(&app).await;

    let response = post_csv(
        &app,
        "/api/reports?table=catalog.schema.user_activity&start_date=2024-01-01",
        &cookie,
        SCENARIO_CSV,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_csv(
        &app,
        "/api/reports?table=User%20Activity&start_date=01/02/2024",
        &cookie,
        SCENARIO_CSV,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let problem = body_json(response).await;
    assert!(problem["detail"].as_str().unwrap().contains("start_date"));
}

#[tokio::test]
async fn test_warehouse_errors_are_not_leaked() {
    let mut repo = MockEventCountRepository::new();
    repo.expect_fetch_event_counts()
        .times(1)
        .returning(|_| Err(AppError::database("[TABLE_OR_VIEW_NOT_FOUND] at 10.1.2.3")));

    let app = app(repo);
    let cookie = login(&app).await;
    let response = post_csv(&app, REPORT_URI, &cookie, SCENARIO_CSV).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let problem = body_json(response).await;
    let detail = problem["detail"].as_str().unwrap();
    assert!(!detail.contains("10.1.2.3"));
    assert!(!detail.contains("TABLE_OR_VIEW_NOT_FOUND"));
}

#[tokio::test]
async fn test_export_csv() {
    let mut repo = MockEventCountRepository::new();
    repo.expect_fetch_event_counts()
        .times(1)
        .returning(|_| Ok(fixture_rows()));

    let app = app(repo);
    let cookie = login(&app).await;
    let response = post_csv(
        &app,
        "/api/reports/export?table=User%20Activity&start_date=2024-01-01",
        &cookie,
        SCENARIO_CSV,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv")
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"report.csv\""
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "event_date,event_name,props_feature,total_count");
    assert_eq!(lines[1], "2024-01-01,login,web,10");
    assert_eq!(lines.len(), 5);
}

#[tokio::test]
async fn test_definition_preview() {
    let app = app(untouched_repo());
    let cookie = login(&app).await;

    let response = post_csv(&app, "/api/definitions/preview", &cookie, SCENARIO_CSV).await;
    assert_eq!(response.status(), StatusCode::OK);

    let preview = body_json(response).await;
    assert_eq!(preview["columns"], serde_json::json!(["event", "props_feature"]));
    assert_eq!(preview["events"], serde_json::json!(["login", "signup"]));
    assert_eq!(preview["preview"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_too_many_events_are_rejected_before_query() {
    let state = AppState::new(
        Arc::new(untouched_repo()),
        Arc::new(catalog()),
        Arc::new(AccessGate::new(ACCESS_KEY).unwrap()),
        Arc::new(SessionStore::default()),
    )
    .with_settings(HttpSettings {
        max_report_events: 2,
        ..Default::default()
    });
    let app = build_router(state);
    let cookie = login(&app).await;

    let csv = "event,props_feature\nlogin,web\nsignup,ios\npurchase,web\n";
    let response = post_csv(&app, REPORT_URI, &cookie, csv).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let problem = body_json(response).await;
    assert!(problem["detail"].as_str().unwrap().contains("at most 2"));
}

#[tokio::test]
async fn test_upload_size_limit() {
    let app = app(untouched_repo());
    let cookie = login(&app).await;

    let mut csv = String::from("event,props_feature\n");
    while csv.len() <= 2048 {
        csv.push_str("some_long_event_name,web\n");
    }

    let response = post_csv(&app, REPORT_URI, &cookie, &csv).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_readiness_reflects_warehouse() {
    let mut healthy = MockEventCountRepository::new();
    healthy.expect_backend_name().return_const("databricks");
    healthy
        .expect_health_check()
        .returning(|| Ok(WarehouseProbe { latency_ms: 8 }));

    let response = app(healthy)
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["healthy"], true);
    assert_eq!(status["checks"][0]["latency_ms"], 8);

    let mut down = MockEventCountRepository::new();
    down.expect_backend_name().return_const("databricks");
    down.expect_health_check()
        .returning(|| Err(AppError::external_service("connect to 10.0.0.5 refused")));

    let response = app(down)
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await.to_string();
    assert!(!body.contains("10.0.0.5"));
}

#[tokio::test]
async fn test_metrics_without_recorder() {
    let response = app(untouched_repo())
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
