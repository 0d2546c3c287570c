//! 会话中间件与提取器

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, header, request::Parts},
    middleware::Next,
    response::Response,
};
use pulse_domain::{Session, SessionId};
use pulse_errors::AppError;
use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

/// 会话 cookie 名称
pub const SESSION_COOKIE: &str = "pulse_session";

/// 当前请求的会话
///
/// 由 `session_middleware` 注入请求扩展。没有有效 cookie 的请求得到一个
/// 不入库的匿名会话，`id` 为 `None`。
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentSession {
    pub id: Option<SessionId>,
    pub session: Session,
}

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .copied()
            .ok_or_else(|| AppError::internal("Session middleware did not run"))
    }
}

/// 已认证会话，未认证时返回 401
#[derive(Debug, Clone, Copy)]
pub struct Authenticated(pub SessionId);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let current = CurrentSession::from_request_parts(parts, state).await?;
        match current.id {
            Some(id) if current.session.authenticated => Ok(Self(id)),
            _ => {
                warn!(path = %parts.uri.path(), "Unauthenticated access");
                Err(AppError::unauthenticated("Enter the access key to continue"))
            }
        }
    }
}

/// 客户端标识，取对端地址
///
/// 不读取 `X-Forwarded-For` 等可由客户端伪造的请求头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl ClientKey {
    pub fn from_addr(addr: Option<SocketAddr>) -> Self {
        match addr {
            Some(addr) => Self(format!("ip:{}", addr.ip())),
            None => Self("ip:unknown".to_string()),
        }
    }
}

impl<S> FromRequestParts<S> for ClientKey
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let addr = ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|ConnectInfo(addr)| addr);
        Ok(Self::from_addr(addr))
    }
}

/// 会话中间件
///
/// 只查找 `pulse_session` cookie 对应的已有会话，不创建会话
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let current = session_id_from_headers(request.headers())
        .and_then(|id| {
            state.sessions.get(&id).map(|session| CurrentSession {
                id: Some(id),
                session,
            })
        })
        .unwrap_or_default();

    request.extensions_mut().insert(current);
    next.run(request).await
}

/// 从 Cookie 头解析会话 ID
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

/// 生成会话 cookie
pub fn session_cookie(
    id: SessionId,
    max_age_secs: u64,
    secure: bool,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}{}",
        SESSION_COOKIE, id, max_age_secs, secure
    ))
}

/// 清除会话 cookie
pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("pulse_session=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}
