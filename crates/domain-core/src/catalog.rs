//! 表目录
//!
//! 展示名到完整表名的固定映射，来自静态配置。查询只能指向目录中的表。

use std::collections::BTreeMap;

use pulse_errors::{AppError, AppResult};
use pulse_ports::TableRef;

/// 默认目录，未配置时使用
pub const DEFAULT_TABLES: &[(&str, &str)] =
    &[("User Activity", "catalog.schema.user_activity")];

/// 表目录
#[derive(Debug, Clone)]
pub struct TableCatalog {
    tables: BTreeMap<String, TableRef>,
}

impl TableCatalog {
    /// 从配置映射构建，任一表名非法即失败
    pub fn from_map(map: &BTreeMap<String, String>) -> AppResult<Self> {
        let mut tables = BTreeMap::new();
        for (display_name, qualified) in map {
            let display_name = display_name.trim();
            if display_name.is_empty() {
                return Err(AppError::validation("Catalog entry has an empty display name"));
            }
            let table = TableRef::new(display_name, qualified.trim())?;
            tables.insert(display_name.to_string(), table);
        }

        if tables.is_empty() {
            return Err(AppError::validation("Table catalog is empty"));
        }

        Ok(Self { tables })
    }

    /// 使用内置默认目录
    pub fn with_defaults() -> AppResult<Self> {
        let map = DEFAULT_TABLES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::from_map(&map)
    }

    /// 按展示名解析表
    pub fn resolve(&self, display_name: &str) -> AppResult<TableRef> {
        self.tables
            .get(display_name.trim())
            .cloned()
            .ok_or_else(|| {
                AppError::validation(format!(
                    "Unknown table '{}'. Choose one of: {}",
                    display_name,
                    self.list().join(", ")
                ))
            })
    }

    /// 全部展示名（已排序）
    pub fn list(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
