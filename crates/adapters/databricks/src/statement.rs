//! SQL Statement Execution API 2.0 报文
//!
//! 只使用 `JSON_ARRAY` + `INLINE` 方式，所有值以字符串（或 null）返回。

use chrono::NaiveDate;
use pulse_domain::{BoundStatement, StatementParam};
use pulse_errors::{AppError, AppResult};
use pulse_ports::EventCountRow;
use serde::{Deserialize, Serialize};

/// 语句执行路径
pub const STATEMENTS_PATH: &str = "/api/2.0/sql/statements";

/// 执行请求
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteStatementRequest<'a> {
    pub statement: &'a str,
    pub warehouse_id: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<StatementParameter<'a>>,
    pub wait_timeout: String,
    pub on_wait_timeout: &'static str,
    pub format: &'static str,
    pub disposition: &'static str,
}

impl<'a> ExecuteStatementRequest<'a> {
    pub fn new(statement: &'a BoundStatement, warehouse_id: &'a str, wait_timeout: String) -> Self {
        Self {
            statement: &statement.sql,
            warehouse_id,
            parameters: statement.params.iter().map(StatementParameter::from).collect(),
            wait_timeout,
            on_wait_timeout: "CANCEL",
            format: "JSON_ARRAY",
            disposition: "INLINE",
        }
    }
}

/// 命名参数
#[derive(Debug, Clone, Serialize)]
pub struct StatementParameter<'a> {
    pub name: &'a str,
    pub value: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl<'a> From<&'a StatementParam> for StatementParameter<'a> {
    fn from(param: &'a StatementParam) -> Self {
        Self {
            name: &param.name,
            value: &param.value,
            kind: param.kind.as_str(),
        }
    }
}

/// 语句状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Closed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceError {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatementStatus {
    pub state: StatementState,
    #[serde(default)]
    pub error: Option<ServiceError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultSchema {
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultManifest {
    #[serde(default)]
    pub schema: ResultSchema,
    #[serde(default)]
    pub total_row_count: Option<u64>,
    #[serde(default)]
    pub total_chunk_count: Option<u64>,
}

/// 单个结果分块
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultChunk {
    #[serde(default)]
    pub chunk_index: Option<u64>,
    #[serde(default)]
    pub data_array: Vec<Vec<Option<String>>>,
    #[serde(default)]
    pub next_chunk_internal_link: Option<String>,
}

/// 执行响应
#[derive(Debug, Clone, Deserialize)]
pub struct StatementResponse {
    pub statement_id: String,
    pub status: StatementStatus,
    #[serde(default)]
    pub manifest: Option<ResultManifest>,
    #[serde(default)]
    pub result: Option<ResultChunk>,
}

impl StatementResponse {
    /// 非成功状态转换为错误
    pub fn ensure_succeeded(&self) -> AppResult<()> {
        let message = || {
            self.status
                .error
                .as_ref()
                .and_then(|e| e.message.clone())
                .unwrap_or_else(|| "no message".to_string())
        };

        match self.status.state {
            StatementState::Succeeded => Ok(()),
            StatementState::Failed => Err(AppError::database(format!(
                "Statement {} failed: {}",
                self.statement_id,
                message()
            ))),
            StatementState::Canceled | StatementState::Closed => Err(AppError::database(format!(
                "Statement {} was canceled before completion: {}",
                self.statement_id,
                message()
            ))),
            StatementState::Pending | StatementState::Running => {
                Err(AppError::external_service(format!(
                    "Statement {} still running after wait timeout",
                    self.statement_id
                )))
            }
        }
    }
}

/// 收集完所有分块后的结果
#[derive(Debug, Clone, Default)]
pub struct StatementResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl StatementResult {
    pub fn from_manifest(manifest: Option<&ResultManifest>) -> Self {
        let mut columns: Vec<&ColumnInfo> = manifest
            .map(|m| m.schema.columns.iter().collect())
            .unwrap_or_default();
        columns.sort_by_key(|c| c.position.unwrap_or(usize::MAX));

        Self {
            columns: columns.into_iter().map(|c| c.name.clone()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_chunk(&mut self, chunk: ResultChunk) {
        self.rows.extend(chunk.data_array);
    }

    fn column_index(&self, name: &str) -> AppResult<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                AppError::database(format!(
                    "Result is missing column '{}' (got: {})",
                    name,
                    self.columns.join(", ")
                ))
            })
    }

    /// 按列名映射为事件计数行
    pub fn into_event_count_rows(self) -> AppResult<Vec<EventCountRow>> {
        let date_idx = self.column_index("event_date")?;
        let event_idx = self.column_index("event_name")?;
        let feature_idx = self.column_index("props_feature")?;
        let count_idx = self.column_index("total_count")?;

        let cell = |row: &[Option<String>], idx: usize| -> Option<String> {
            row.get(idx).cloned().flatten()
        };

        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let raw_date = cell(row, date_idx).ok_or_else(|| {
                    AppError::database(format!("Row {} has a null event_date", i))
                })?;
                let event_date = parse_date(&raw_date)?;

                let raw_count = cell(row, count_idx).unwrap_or_else(|| "0".to_string());
                let total_count = raw_count.trim().parse::<u64>().map_err(|_| {
                    AppError::database(format!("Row {} has a non-integer total_count '{}'", i, raw_count))
                })?;

                Ok(EventCountRow {
                    event_date,
                    event_name: cell(row, event_idx).unwrap_or_default(),
                    props_feature: cell(row, feature_idx).unwrap_or_default(),
                    total_count,
                })
            })
            .collect()
    }
}

/// DATE 列为 `YYYY-MM-DD`，TIMESTAMP 列截取日期部分
fn parse_date(raw: &str) -> AppResult<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| AppError::database(format!("Unparseable event_date '{}'", raw)))
}
