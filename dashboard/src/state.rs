//! 共享状态

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use pulse_bootstrap::Infrastructure;
use pulse_domain::{AccessGate, SessionStore, TableCatalog};
use pulse_ports::EventCountRepository;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn EventCountRepository>,
    pub catalog: Arc<TableCatalog>,
    pub gate: Arc<AccessGate>,
    pub sessions: Arc<SessionStore>,
    pub metrics: Option<PrometheusHandle>,
    pub settings: HttpSettings,
}

/// HTTP 层设置
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// 上传 CSV 的最大字节数
    pub max_upload_bytes: usize,
    /// 单次报表允许的不同事件数
    pub max_report_events: usize,
    /// 为空时不挂载 CORS
    pub cors_allowed_origins: Vec<String>,
    /// 会话 cookie 是否带 `Secure`
    pub secure_cookies: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: 5 * 1024 * 1024,
            max_report_events: 1000,
            cors_allowed_origins: Vec::new(),
            secure_cookies: false,
        }
    }
}

impl AppState {
    pub fn new(
        repository: Arc<dyn EventCountRepository>,
        catalog: Arc<TableCatalog>,
        gate: Arc<AccessGate>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            repository,
            catalog,
            gate,
            sessions,
            metrics: None,
            settings: HttpSettings::default(),
        }
    }

    /// 从启动好的基础设施构建
    pub fn from_infrastructure(infra: &Infrastructure, metrics: Option<PrometheusHandle>) -> Self {
        let config = infra.config();
        Self {
            repository: infra.repository(),
            catalog: infra.catalog(),
            gate: infra.gate(),
            sessions: infra.sessions(),
            metrics,
            settings: HttpSettings {
                max_upload_bytes: config.server.max_upload_bytes,
                max_report_events: config.server.max_report_events,
                cors_allowed_origins: config.server.cors_allowed_origins.clone(),
                secure_cookies: config.is_production(),
            },
        }
    }

    pub fn with_settings(mut self, settings: HttpSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
