//! Databricks 健康检查模块
//!
//! 探测语句为 `SELECT 1`，结果写回连接池的健康状态。

use std::sync::Arc;
use std::time::{Duration, Instant};

use pulse_domain::BoundStatement;
use pulse_errors::{AppError, AppResult};
use tracing::{debug, error};

use crate::client::DatabricksPool;

/// 健康检查结果
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// 是否健康
    pub healthy: bool,
    /// 延迟（毫秒）
    pub latency_ms: Option<u64>,
    /// 错误信息
    pub error: Option<String>,
}

impl HealthCheckResult {
    /// 转换为结果，失败时返回运维类错误
    pub fn into_result(self) -> AppResult<u64> {
        match (self.healthy, self.latency_ms) {
            (true, Some(latency)) => Ok(latency),
            _ => Err(AppError::external_service(
                self.error
                    .unwrap_or_else(|| "Databricks health check failed".to_string()),
            )),
        }
    }
}

/// 健康检查器
pub struct HealthChecker {
    pool: Arc<DatabricksPool>,
    timeout: Duration,
}

impl HealthChecker {
    /// 创建新的健康检查器
    pub fn new(pool: Arc<DatabricksPool>) -> Self {
        let timeout = pool.config().health_check_timeout;
        Self { pool, timeout }
    }

    /// 设置超时时间
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 立即探测
    pub async fn probe(&self) -> HealthCheckResult {
        let start = Instant::now();
        let statement = BoundStatement {
            sql: "SELECT 1".to_string(),
            params: Vec::new(),
        };

        let run = async {
            let client = self.pool.get().await?;
            client.execute(&statement).await
        };

        let result = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(_)) => Ok(start.elapsed().as_millis() as u64),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("Health check timed out".to_string()),
        };

        match result {
            Ok(latency) => {
                debug!(latency_ms = latency, "Databricks warehouse healthy");
                self.pool.mark_healthy();
                HealthCheckResult {
                    healthy: true,
                    latency_ms: Some(latency),
                    error: None,
                }
            }
            Err(message) => {
                error!(error = %message, "Databricks warehouse unhealthy");
                self.pool.mark_unhealthy(message.clone());
                HealthCheckResult {
                    healthy: false,
                    latency_ms: None,
                    error: Some(message),
                }
            }
        }
    }

    /// 状态过期时才探测
    pub async fn check_if_stale(&self) -> AppResult<()> {
        if !self.pool.needs_health_check() {
            return Ok(());
        }
        self.probe().await.into_result().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabricksConfig;

    fn closed_pool() -> Arc<DatabricksPool> {
        let config = DatabricksConfig::new("127.0.0.1:9", "/sql/1.0/warehouses/wh", "t")
            .with_connection_timeout(Duration::from_millis(20));
        let pool = Arc::new(DatabricksPool::new(config).unwrap());
        pool.close();
        pool
    }

    #[test]
    fn test_health_check_result() {
        let ok = HealthCheckResult {
            healthy: true,
            latency_ms: Some(12),
            error: None,
        };
        assert_eq!(ok.into_result().unwrap(), 12);

        let bad = HealthCheckResult {
            healthy: false,
            latency_ms: None,
            error: Some("refused".to_string()),
        };
        assert!(matches!(bad.into_result(), Err(AppError::ExternalService(_))));
    }

    #[tokio::test]
    async fn test_probe_marks_pool_unhealthy() {
        let pool = closed_pool();
        let checker = HealthChecker::new(pool.clone()).with_timeout(Duration::from_secs(1));

        let result = checker.probe().await;
        assert!(!result.healthy);
        assert!(!pool.needs_health_check());
        assert!(pool.status().last_error.is_some());
    }

    #[tokio::test]
    async fn test_fresh_state_skips_probe() {
        let pool = closed_pool();
        pool.mark_healthy();
        let checker = HealthChecker::new(pool);
        assert!(checker.check_if_stale().await.is_ok());
    }
}
