//! 基础设施资源管理
//!
//! 启动时一次性构建仓库连接、表目录、访问密钥和会话仓库，进程内共享。

use std::sync::Arc;
use std::time::Duration;

use pulse_adapter_databricks::{
    DatabricksConfig as DatabricksAdapterConfig, DatabricksEventCountRepository, DatabricksPool,
    HealthChecker,
};
use pulse_adapter_synthetic::{SyntheticEventCounts, SyntheticSettings};
use pulse_config::{AppConfig, WarehouseBackend};
use pulse_domain::{AccessGate, SessionPolicy, SessionStore, TableCatalog};
use pulse_errors::{AppError, AppResult};
use pulse_ports::EventCountRepository;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::retry::{RetryConfig, with_retry_optional};
use crate::shutdown::ShutdownController;

/// 基础设施资源容器
pub struct Infrastructure {
    /// 应用配置
    config: AppConfig,
    /// 事件计数仓库（Databricks 或演示数据）
    repository: Arc<dyn EventCountRepository>,
    /// Databricks 连接池（仅 Databricks 后端）
    databricks_pool: Option<Arc<DatabricksPool>>,
    /// 表目录
    catalog: Arc<TableCatalog>,
    /// 访问密钥校验器
    gate: Arc<AccessGate>,
    /// 会话仓库
    sessions: Arc<SessionStore>,
    /// 后台任务关闭控制
    shutdown: ShutdownController,
}

impl Infrastructure {
    /// 从配置创建基础设施资源
    pub async fn from_config(config: AppConfig) -> AppResult<Self> {
        // 1. 表目录（必需）
        let catalog = if config.catalog.tables.is_empty() {
            warn!("No catalog tables configured, using built-in defaults");
            TableCatalog::with_defaults()?
        } else {
            TableCatalog::from_map(&config.catalog.tables)?
        };
        info!(tables = catalog.len(), "Table catalog loaded");

        // 2. 访问密钥
        let gate = AccessGate::new(config.access.key.expose_secret())?;
        let sessions = SessionStore::new(SessionPolicy {
            max_failed_attempts: config.access.max_failed_attempts.max(1),
            lockout: Duration::from_secs(config.access.lockout_secs),
            ttl: Duration::from_secs(config.access.session_ttl_secs),
        });

        // 3. 仓库
        let (repository, databricks_pool): (Arc<dyn EventCountRepository>, _) =
            match config.warehouse.backend {
                WarehouseBackend::Databricks => {
                    let db_config = config.warehouse.databricks.as_ref().ok_or_else(|| {
                        AppError::failed_precondition(
                            "Databricks backend selected but DATABRICKS_HOST, \
                             DATABRICKS_HTTP_PATH and DATABRICKS_TOKEN are not set",
                        )
                    })?;

                    let pool = Arc::new(DatabricksPool::new(Self::build_databricks_config(
                        db_config,
                    ))?);
                    info!(pool_max = db_config.pool_max, "Databricks connection pool created");

                    if config.warehouse.probe_on_startup {
                        Self::probe_warehouse(pool.clone()).await;
                    }

                    let repo = DatabricksEventCountRepository::new(pool.clone());
                    (Arc::new(repo) as Arc<dyn EventCountRepository>, Some(pool))
                }
                WarehouseBackend::Synthetic => {
                    let s = &config.warehouse.synthetic;
                    let repo = SyntheticEventCounts::new(SyntheticSettings {
                        days: s.days,
                        features: s.features.clone(),
                        min_count: s.min_count,
                        max_count: s.max_count,
                        seed: s.seed,
                        max_rows: s.max_rows,
                    })?;
                    warn!("Synthetic warehouse backend enabled, reports contain generated data");
                    (Arc::new(repo) as Arc<dyn EventCountRepository>, None)
                }
            };

        Ok(Self {
            config,
            repository,
            databricks_pool,
            catalog: Arc::new(catalog),
            gate: Arc::new(gate),
            sessions: Arc::new(sessions),
            shutdown: ShutdownController::new(),
        })
    }

    /// 构建 Databricks 适配器配置
    fn build_databricks_config(config: &pulse_config::DatabricksConfig) -> DatabricksAdapterConfig {
        DatabricksAdapterConfig::new(
            config.host.expose_secret().as_str(),
            config.http_path.expose_secret().as_str(),
            config.token.expose_secret().as_str(),
        )
        .with_pool_max(config.pool_max)
        .with_connection_timeout(Duration::from_secs(config.connection_timeout_secs))
        .with_statement_timeout(Duration::from_secs(config.statement_timeout_secs))
        .with_health_check_interval(Duration::from_secs(config.health_check_interval_secs))
    }

    /// 启动时探测仓库，失败只记录日志
    async fn probe_warehouse(pool: Arc<DatabricksPool>) {
        let checker = HealthChecker::new(pool);
        let latency = with_retry_optional(&RetryConfig::default(), "Databricks probe", || {
            let checker = &checker;
            async move { checker.probe().await.into_result() }
        })
        .await;

        if let Some(latency_ms) = latency {
            info!(latency_ms, "Databricks warehouse reachable");
        }
    }

    /// 启动过期会话清理任务，间隔为会话有效期的一半
    pub fn start_session_janitor(&self) -> tokio::task::JoinHandle<()> {
        let sessions = self.sessions.clone();
        let shutdown = self.shutdown.clone();
        let interval = (sessions.policy().ttl / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Starting session janitor");
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = sessions.purge_expired();
                        if purged > 0 {
                            debug!(purged, remaining = sessions.len(), "Expired sessions purged");
                        }
                    }
                    _ = shutdown.wait() => break,
                }
            }
            debug!("Session janitor stopped");
        })
    }

    /// 停止后台任务并关闭连接池
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
        if let Some(pool) = &self.databricks_pool {
            pool.close();
        }
        info!("Infrastructure shut down");
    }

    /// 获取应用配置
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取事件计数仓库
    pub fn repository(&self) -> Arc<dyn EventCountRepository> {
        self.repository.clone()
    }

    /// 获取 Databricks 连接池（如果可用）
    pub fn databricks_pool(&self) -> Option<Arc<DatabricksPool>> {
        self.databricks_pool.clone()
    }

    pub fn catalog(&self) -> Arc<TableCatalog> {
        self.catalog.clone()
    }

    pub fn gate(&self) -> Arc<AccessGate> {
        self.gate.clone()
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }
}
