//! 事件计数 Repository trait 定义
//!
//! 定义访问分析仓库的抽象接口以及请求级数据模型

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use pulse_errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// 完整表名的最大层级（catalog.schema.table）
const MAX_TABLE_PARTS: usize = 3;

/// 已校验的表引用
///
/// 只能来自配置的表目录，每一段都必须是合法标识符，因此可以安全地拼入 SQL。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRef {
    display_name: String,
    parts: Vec<String>,
}

impl TableRef {
    /// 从展示名和完整表名创建
    pub fn new(display_name: impl Into<String>, qualified_name: &str) -> AppResult<Self> {
        let parts: Vec<String> = qualified_name.split('.').map(str::to_string).collect();

        if parts.len() > MAX_TABLE_PARTS {
            return Err(AppError::validation(format!(
                "Table name '{}' has more than {} parts",
                qualified_name, MAX_TABLE_PARTS
            )));
        }

        if let Some(bad) = parts.iter().find(|p| !is_identifier(p)) {
            return Err(AppError::validation(format!(
                "Table name '{}' contains an invalid identifier '{}'",
                qualified_name, bad
            )));
        }

        Ok(Self {
            display_name: display_name.into(),
            parts,
        })
    }

    /// 展示名
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// 各级标识符
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// 以 `.` 连接的完整表名
    pub fn qualified_name(&self) -> String {
        self.parts.join(".")
    }

    /// 反引号包裹的完整表名，用于 SQL
    pub fn quoted(&self) -> String {
        self.parts
            .iter()
            .map(|p| format!("`{}`", p))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 事件计数查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCountQuery {
    /// 目标表
    pub table: TableRef,
    /// 起始日期（含）
    pub start_date: NaiveDate,
    /// 去重后的事件名集合
    pub events: BTreeSet<String>,
}

impl EventCountQuery {
    /// 创建新的查询参数
    pub fn new<I, S>(table: TableRef, start_date: NaiveDate, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table,
            start_date,
            events: events.into_iter().map(Into::into).collect(),
        }
    }

    /// 没有任何事件时无需访问仓库
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// 事件计数结果行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCountRow {
    pub event_date: NaiveDate,
    pub event_name: String,
    pub props_feature: String,
    pub total_count: u64,
}

impl EventCountRow {
    pub fn new(
        event_date: NaiveDate,
        event_name: impl Into<String>,
        props_feature: impl Into<String>,
        total_count: u64,
    ) -> Self {
        Self {
            event_date,
            event_name: event_name.into(),
            props_feature: props_feature.into(),
            total_count,
        }
    }
}

/// 仓库健康探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseProbe {
    /// 探测延迟（毫秒）
    pub latency_ms: u64,
}

/// 事件计数 Repository trait
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait EventCountRepository: Send + Sync {
    /// 按日期、事件、特征分组统计事件数
    async fn fetch_event_counts(&self, query: &EventCountQuery) -> AppResult<Vec<EventCountRow>>;

    /// 探测仓库是否可用
    async fn health_check(&self) -> AppResult<WarehouseProbe>;

    /// 后端名称（用于日志和指标）
    fn backend_name(&self) -> &'static str;
}
