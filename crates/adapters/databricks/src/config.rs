//! Databricks 配置模块
//!
//! 连接凭证、连接池和语句执行相关设置

use std::time::Duration;

use pulse_errors::{AppError, AppResult};
use secrecy::{ExposeSecret, Secret};
use url::Url;

/// Databricks 配置
#[derive(Debug, Clone)]
pub struct DatabricksConfig {
    // 凭证
    /// 工作区地址（可省略 scheme，默认 https）
    pub host: Secret<String>,
    /// SQL Warehouse HTTP 路径
    pub http_path: Secret<String>,
    /// 访问令牌
    pub token: Secret<String>,

    // 连接池配置
    /// 最大并发语句数
    pub pool_max: u32,
    /// 等待空闲连接的超时
    pub connection_timeout: Duration,

    // 语句执行
    /// 同步等待时间，超时后服务端取消语句
    pub statement_timeout: Duration,

    // 健康检查
    /// 健康状态有效期
    pub health_check_interval: Duration,
    /// 单次探测超时
    pub health_check_timeout: Duration,
}

impl DatabricksConfig {
    /// 创建新的配置
    pub fn new(
        host: impl Into<String>,
        http_path: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            host: Secret::new(host.into()),
            http_path: Secret::new(http_path.into()),
            token: Secret::new(token.into()),
            pool_max: 4,
            connection_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(50),
            health_check_interval: Duration::from_secs(60),
            health_check_timeout: Duration::from_secs(10),
        }
    }

    /// 设置连接池大小
    pub fn with_pool_max(mut self, max: u32) -> Self {
        self.pool_max = max;
        self
    }

    /// 设置连接超时
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// 设置语句等待时间
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// 设置健康状态有效期
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// 设置探测超时
    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    /// 解析工作区地址
    pub fn base_url(&self) -> AppResult<Url> {
        let host = self.host.expose_secret().trim().trim_end_matches('/');
        if host.is_empty() {
            return Err(AppError::failed_precondition("Databricks host is not configured"));
        }

        let raw = if host.contains("://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        Url::parse(&raw)
            .map_err(|e| AppError::failed_precondition(format!("Invalid Databricks host: {}", e)))
    }

    /// 从 HTTP 路径提取 warehouse id
    ///
    /// 支持 `/sql/1.0/warehouses/<id>` 和旧式 `/sql/1.0/endpoints/<id>`。
    pub fn warehouse_id(&self) -> AppResult<String> {
        let path = self.http_path.expose_secret().trim().trim_end_matches('/');
        let mut segments = path.rsplit('/');
        let id = segments.next().unwrap_or_default();
        let kind = segments.next().unwrap_or_default();

        if id.is_empty() || !matches!(kind, "warehouses" | "endpoints") {
            return Err(AppError::failed_precondition(
                "Databricks http_path must look like /sql/1.0/warehouses/<id>",
            ));
        }

        Ok(id.to_string())
    }

    /// 语句 `wait_timeout` 参数，Databricks 只接受 0 或 5-50 秒
    pub fn wait_timeout_param(&self) -> String {
        let secs = self.statement_timeout.as_secs().clamp(5, 50);
        format!("{}s", secs)
    }
}
