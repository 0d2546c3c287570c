//! pulse-errors - 统一错误处理
//!
//! 基于 RFC 7807 Problem Details 规范。
//! 错误分为两类：用户可修复（4xx，原样返回消息）与运维可修复（5xx，只返回通用描述）。

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("External service error: {0}")]
    ExternalService(String),
}

/// 错误归属
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 用户可自行修复（重新上传、修正参数、重新登录）
    User,
    /// 需要运维介入（仓库不可用、配置错误等）
    Operator,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn missing_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::MissingColumns(columns.into_iter().map(Into::into).collect())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn external_service(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    /// 错误归属分类
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_)
            | Self::Validation(_)
            | Self::MissingColumns(_)
            | Self::Unauthenticated(_)
            | Self::ResourceExhausted(_) => ErrorClass::User,
            Self::FailedPrecondition(_)
            | Self::Internal(_)
            | Self::Database(_)
            | Self::ExternalService(_) => ErrorClass::Operator,
        }
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::MissingColumns(_) => 422,
            Self::Unauthenticated(_) => 401,
            Self::ResourceExhausted(_) => 429,
            Self::FailedPrecondition(_) => 503,
            Self::Internal(_) => 500,
            Self::Database(_) => 500,
            Self::ExternalService(_) => 502,
        }
    }

    /// 转换为 Problem Details
    ///
    /// 运维类错误不暴露内部细节，原始信息只写日志。
    pub fn to_problem_details(&self) -> ProblemDetails {
        let detail = match self.class() {
            ErrorClass::User => self.to_string(),
            ErrorClass::Operator => self.public_detail().to_string(),
        };

        let missing_columns = match self {
            Self::MissingColumns(columns) => Some(columns.clone()),
            _ => None,
        };

        ProblemDetails {
            r#type: self.problem_type(),
            title: self.problem_title(),
            status: self.status_code(),
            detail,
            instance: None,
            missing_columns,
        }
    }

    fn public_detail(&self) -> &'static str {
        match self {
            Self::Database(_) => "The warehouse query failed. Contact an operator if this persists.",
            Self::ExternalService(_) => "The warehouse is unreachable right now. Try again later.",
            Self::FailedPrecondition(_) => "The service is not ready to handle this request.",
            _ => "An unexpected error occurred.",
        }
    }

    fn problem_type(&self) -> String {
        let slug = match self {
            Self::NotFound(_) => "not-found",
            Self::Validation(_) => "validation",
            Self::MissingColumns(_) => "missing-columns",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::ResourceExhausted(_) => "resource-exhausted",
            Self::FailedPrecondition(_) => "failed-precondition",
            Self::Internal(_) => "internal",
            Self::Database(_) => "database",
            Self::ExternalService(_) => "external-service",
        };
        format!("https://pulse.internal/problems/{}", slug)
    }

    fn problem_title(&self) -> String {
        match self {
            Self::NotFound(_) => "Resource Not Found",
            Self::Validation(_) => "Validation Error",
            Self::MissingColumns(_) => "Missing Columns",
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::ResourceExhausted(_) => "Resource Exhausted",
            Self::FailedPrecondition(_) => "Failed Precondition",
            Self::Internal(_) => "Internal Server Error",
            Self::Database(_) => "Database Error",
            Self::ExternalService(_) => "External Service Error",
        }
        .to_string()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.class() == ErrorClass::Operator {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let problem = self.to_problem_details();
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            Json(problem),
        )
            .into_response()
    }
}

/// RFC 7807 Problem Details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// 缺失的 CSV 列（仅 MissingColumns）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_columns: Option<Vec<String>>,
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
