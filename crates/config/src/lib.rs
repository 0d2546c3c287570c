//! pulse-config - 配置加载库
//!
//! 加载顺序：`default.toml` → `{APP_ENV}.toml` → `PULSE_` 前缀环境变量。
//! 仓库凭证另外支持 `DATABRICKS_HOST` / `DATABRICKS_HTTP_PATH` / `DATABRICKS_TOKEN`。

use std::collections::BTreeMap;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::Deserialize;
use thiserror::Error;

use secrecy::Secret;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 上传 CSV 的最大字节数
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// 单次报表允许的不同事件数
    #[serde(default = "default_max_report_events")]
    pub max_report_events: usize,
    /// 允许的跨域来源，为空则不启用 CORS
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_max_report_events() -> usize {
    1000
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 强制 JSON 日志（生产环境默认开启）
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// 仓库后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    /// Databricks SQL Warehouse
    #[default]
    Databricks,
    /// 随机生成数据（演示模式）
    Synthetic,
}

/// Databricks 配置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabricksConfig {
    /// 工作区地址，例如 `https://adb-123.4.azuredatabricks.net`
    pub host: Secret<String>,
    /// SQL Warehouse HTTP 路径，例如 `/sql/1.0/warehouses/abc123`
    pub http_path: Secret<String>,
    /// 访问令牌
    pub token: Secret<String>,
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// 语句同步等待时间（Databricks 限制 5-50 秒）
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

fn default_pool_max() -> u32 {
    4
}

fn default_connection_timeout_secs() -> u64 {
    30
}

fn default_statement_timeout_secs() -> u64 {
    50
}

fn default_health_check_interval_secs() -> u64 {
    60
}

/// 演示数据配置
#[derive(Debug, Clone, Deserialize)]
pub struct SyntheticConfig {
    #[serde(default = "default_synthetic_days")]
    pub days: u32,
    #[serde(default = "default_synthetic_features")]
    pub features: Vec<String>,
    #[serde(default)]
    pub min_count: u64,
    #[serde(default = "default_synthetic_max_count")]
    pub max_count: u64,
    pub seed: Option<u64>,
    /// 单次生成的行数上限
    #[serde(default = "default_synthetic_max_rows")]
    pub max_rows: usize,
}

fn default_synthetic_days() -> u32 {
    14
}

fn default_synthetic_features() -> Vec<String> {
    vec!["web".to_string(), "ios".to_string(), "android".to_string()]
}

fn default_synthetic_max_count() -> u64 {
    500
}

fn default_synthetic_max_rows() -> usize {
    100_000
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            days: default_synthetic_days(),
            features: default_synthetic_features(),
            min_count: 0,
            max_count: default_synthetic_max_count(),
            seed: None,
            max_rows: default_synthetic_max_rows(),
        }
    }
}

/// 仓库配置
#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    #[serde(default)]
    pub backend: WarehouseBackend,
    /// 启动时主动探测仓库（默认惰性检查）
    #[serde(default)]
    pub probe_on_startup: bool,
    /// 只由 `DATABRICKS_*` 环境变量和可选调优项组成
    pub databricks: Option<DatabricksConfig>,
    #[serde(default)]
    pub synthetic: SyntheticConfig,
}

/// 访问控制配置
#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// 访问密钥（外部注入，禁止写入配置文件）
    pub key: Secret<String>,
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lockout_secs() -> u64 {
    300
}

fn default_session_ttl_secs() -> u64 {
    3600
}

/// 表目录配置：展示名 → 完整表名
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub tables: BTreeMap<String, String>,
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    pub app_env: String,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub warehouse: WarehouseConfig,
    pub access: AccessConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(config_dir).extract()?;
        Ok(config)
    }

    /// 构建分层配置源
    pub fn figment(config_dir: &str) -> Figment {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        Figment::new()
            .merge(Serialized::default("app_env", &env))
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(
                Env::raw()
                    .only(&["DATABRICKS_HOST", "DATABRICKS_HTTP_PATH", "DATABRICKS_TOKEN"])
                    .map(|key| {
                        match key.as_str().to_ascii_lowercase().as_str() {
                            "databricks_host" => "warehouse.databricks.host",
                            "databricks_http_path" => "warehouse.databricks.http_path",
                            _ => "warehouse.databricks.token",
                        }
                        .into()
                    }),
            )
            .merge(Env::prefixed("PULSE_").split("__"))
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
