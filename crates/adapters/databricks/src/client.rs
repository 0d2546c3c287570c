//! Databricks 连接池
//!
//! 共享一个 `reqwest::Client`（HTTP keep-alive），用信号量限制并发语句数。
//! 健康状态惰性维护：记录最近一次探测结果和时间，过期后由调用方触发重新探测。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use pulse_domain::BoundStatement;
use pulse_errors::{AppError, AppResult};
use secrecy::ExposeSecret;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};
use url::Url;

use crate::config::DatabricksConfig;
use crate::statement::{
    ExecuteStatementRequest, ResultChunk, STATEMENTS_PATH, StatementResponse, StatementResult,
};

/// 响应体在错误信息中保留的最大长度
const MAX_ERROR_BODY: usize = 512;

/// 最近一次健康检查
#[derive(Debug, Clone, Default)]
struct HealthState {
    healthy: bool,
    checked_at: Option<Instant>,
    last_error: Option<String>,
}

/// 连接池状态
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// 最大并发数
    pub max_size: u32,
    /// 可用许可数
    pub available: usize,
    /// 最近一次检查是否健康
    pub healthy: bool,
    /// 距最近一次检查的时间
    pub last_checked: Option<Duration>,
    /// 最近一次错误
    pub last_error: Option<String>,
    /// 是否已关闭
    pub closed: bool,
}

/// Databricks 连接池
pub struct DatabricksPool {
    http: reqwest::Client,
    config: DatabricksConfig,
    base_url: Url,
    warehouse_id: String,
    permits: Semaphore,
    health: RwLock<HealthState>,
    closed: AtomicBool,
}

impl DatabricksPool {
    /// 创建连接池，不发起任何网络请求
    pub fn new(config: DatabricksConfig) -> AppResult<Self> {
        if config.pool_max == 0 {
            return Err(AppError::validation("Databricks pool_max must be at least 1"));
        }

        let base_url = config.base_url()?;
        let warehouse_id = config.warehouse_id()?;

        let http = reqwest::Client::builder()
            .connect_timeout(config.connection_timeout)
            // 服务端等待时间之外留出网络余量
            .timeout(config.statement_timeout + Duration::from_secs(15))
            .pool_max_idle_per_host(config.pool_max as usize)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        debug!(
            host = %base_url.host_str().unwrap_or_default(),
            pool_max = config.pool_max,
            "Databricks pool created"
        );

        Ok(Self {
            http,
            permits: Semaphore::new(config.pool_max as usize),
            base_url,
            warehouse_id,
            config,
            health: RwLock::new(HealthState::default()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &DatabricksConfig {
        &self.config
    }

    pub fn warehouse_id(&self) -> &str {
        &self.warehouse_id
    }

    /// 获取连接，超时返回 `ResourceExhausted`
    pub async fn get(&self) -> AppResult<PooledClient<'_>> {
        if self.is_closed() {
            return Err(AppError::failed_precondition("Databricks pool is closed"));
        }

        let permit = tokio::time::timeout(self.config.connection_timeout, self.permits.acquire())
            .await
            .map_err(|_| {
                warn!(
                    timeout_ms = self.config.connection_timeout.as_millis() as u64,
                    "Timed out waiting for a Databricks connection"
                );
                AppError::resource_exhausted("Warehouse is busy, please retry shortly")
            })?
            .map_err(|_| AppError::failed_precondition("Databricks pool is closed"))?;

        Ok(PooledClient {
            pool: self,
            _permit: permit,
        })
    }

    /// 关闭连接池，之后的获取全部失败
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.permits.close();
            debug!("Databricks pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 健康状态是否需要重新探测
    pub fn needs_health_check(&self) -> bool {
        let state = self.health.read();
        match state.checked_at {
            Some(at) => at.elapsed() >= self.config.health_check_interval,
            None => true,
        }
    }

    /// 标记健康
    pub fn mark_healthy(&self) {
        let mut state = self.health.write();
        state.healthy = true;
        state.checked_at = Some(Instant::now());
        state.last_error = None;
    }

    /// 标记不健康
    pub fn mark_unhealthy(&self, error: impl Into<String>) {
        let mut state = self.health.write();
        state.healthy = false;
        state.checked_at = Some(Instant::now());
        state.last_error = Some(error.into());
    }

    /// 获取连接池状态
    pub fn status(&self) -> PoolStatus {
        let state = self.health.read();
        PoolStatus {
            max_size: self.config.pool_max,
            available: self.permits.available_permits(),
            healthy: state.healthy,
            last_checked: state.checked_at.map(|at| at.elapsed()),
            last_error: state.last_error.clone(),
            closed: self.is_closed(),
        }
    }
}

/// 从连接池借出的连接，drop 时归还
pub struct PooledClient<'a> {
    pool: &'a DatabricksPool,
    _permit: SemaphorePermit<'a>,
}

impl PooledClient<'_> {
    /// 执行语句并收集全部分块
    pub async fn execute(&self, statement: &BoundStatement) -> AppResult<StatementResult> {
        let pool = self.pool;
        let url = join_url(&pool.base_url, STATEMENTS_PATH)?;
        let request = ExecuteStatementRequest::new(
            statement,
            &pool.warehouse_id,
            pool.config.wait_timeout_param(),
        );

        let response: StatementResponse = self
            .send(pool.http.post(url).json(&request))
            .await?;
        response.ensure_succeeded()?;

        let mut result = StatementResult::from_manifest(response.manifest.as_ref());
        let mut next = match response.result {
            Some(chunk) => {
                let link = chunk.next_chunk_internal_link.clone();
                result.push_chunk(chunk);
                link
            }
            None => None,
        };

        while let Some(link) = next {
            let url = join_url(&pool.base_url, &link)?;
            let chunk: ResultChunk = self.send(pool.http.get(url)).await?;
            debug!(
                statement_id = %response.statement_id,
                chunk_index = chunk.chunk_index.unwrap_or_default(),
                "Fetched result chunk"
            );
            next = chunk.next_chunk_internal_link.clone();
            result.push_chunk(chunk);
        }

        Ok(result)
    }

    /// 发送请求并解析 JSON
    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> AppResult<T> {
        let response = request
            .bearer_auth(self.pool.config.token.expose_secret())
            .send()
            .await
            .map_err(|e| AppError::external_service(format!("Databricks request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(match status.as_u16() {
                401 | 403 => AppError::external_service(format!(
                    "Databricks rejected the credentials ({}): {}",
                    status, body
                )),
                _ => AppError::external_service(format!(
                    "Databricks returned {}: {}",
                    status, body
                )),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::external_service(format!("Invalid Databricks response: {}", e)))
    }
}

fn join_url(base: &Url, path: &str) -> AppResult<Url> {
    base.join(path)
        .map_err(|e| AppError::internal(format!("Invalid Databricks URL '{}': {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max: u32, timeout_ms: u64) -> DatabricksPool {
        let config = DatabricksConfig::new("127.0.0.1:9", "/sql/1.0/warehouses/wh", "token")
            .with_pool_max(max)
            .with_connection_timeout(Duration::from_millis(timeout_ms));
        DatabricksPool::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_checkout_beyond_max_times_out() {
        let pool = pool(2, 50);

        let a = pool.get().await.unwrap();
        let _b = pool.get().await.unwrap();
        assert_eq!(pool.status().available, 0);

        let err = pool.get().await.err().unwrap();
        assert!(matches!(err, AppError::ResourceExhausted(_)));

        // 归还后可再次获取
        drop(a);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_checkout() {
        let pool = pool(1, 50);
        pool.close();
        pool.close();

        let err = pool.get().await.err().unwrap();
        assert!(matches!(err, AppError::FailedPrecondition(_)));
        assert!(pool.status().closed);
    }

    #[test]
    fn test_zero_pool_is_rejected() {
        let config = DatabricksConfig::new("h", "/sql/1.0/warehouses/wh", "t").with_pool_max(0);
        assert!(DatabricksPool::new(config).is_err());
    }

    #[test]
    fn test_health_state_is_lazy() {
        let pool = pool(1, 50);
        assert!(pool.needs_health_check());
        assert!(!pool.status().healthy);

        pool.mark_healthy();
        assert!(!pool.needs_health_check());
        assert!(pool.status().healthy);

        pool.mark_unhealthy("boom");
        let status = pool.status();
        assert!(!status.healthy);
        assert_eq!(status.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_join_url_keeps_internal_links_on_host() {
        let base = Url::parse("https://adb-1.net/").unwrap();
        let url = join_url(&base, "/api/2.0/sql/statements/abc/result/chunks/1").unwrap();
        assert_eq!(url.as_str(), "https://adb-1.net/api/2.0/sql/statements/abc/result/chunks/1");
    }
}
