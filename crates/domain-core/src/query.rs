//! 事件计数查询构建
//!
//! 所有值都以命名参数绑定，表名只来自 `TableRef`（目录白名单 + 标识符校验）。
//! 事件集合为空时不生成语句，避免非法的 `IN ()`。

use pulse_ports::EventCountQuery;
use serde::Serialize;

/// 分组列
const GROUP_COLUMNS: &str = "event_date, event_name, props_feature";

/// 参数类型（对应 Databricks 参数的 `type` 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamKind {
    Date,
    String,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "DATE",
            Self::String => "STRING",
        }
    }
}

/// 命名参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementParam {
    pub name: String,
    pub value: String,
    pub kind: ParamKind,
}

/// 带参数的 SQL 语句
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundStatement {
    /// 使用 `:name` 占位符的语句
    pub sql: String,
    pub params: Vec<StatementParam>,
}

/// 构建结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedQuery {
    /// 没有事件，直接返回零行
    Empty,
    Statement(BoundStatement),
}

impl PreparedQuery {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn statement(&self) -> Option<&BoundStatement> {
        match self {
            Self::Empty => None,
            Self::Statement(stmt) => Some(stmt),
        }
    }
}

/// 构建事件计数查询
pub fn build_event_count_query(query: &EventCountQuery) -> PreparedQuery {
    if query.is_empty() {
        return PreparedQuery::Empty;
    }

    let mut params = Vec::with_capacity(query.events.len() + 1);
    params.push(StatementParam {
        name: "start_date".to_string(),
        value: query.start_date.format("%Y-%m-%d").to_string(),
        kind: ParamKind::Date,
    });

    let mut placeholders = Vec::with_capacity(query.events.len());
    for (i, event) in query.events.iter().enumerate() {
        let name = format!("event_{}", i);
        placeholders.push(format!(":{}", name));
        params.push(StatementParam {
            name,
            value: event.clone(),
            kind: ParamKind::String,
        });
    }

    let sql = format!(
        "SELECT {group}, count(*) AS total_count\n\
         FROM {table}\n\
         WHERE event_date >= :start_date AND event_name IN ({events})\n\
         GROUP BY {group}\n\
         ORDER BY event_date ASC",
        group = GROUP_COLUMNS,
        table = query.table.quoted(),
        events = placeholders.join(","),
    );

    PreparedQuery::Statement(BoundStatement { sql, params })
}

impl BoundStatement {
    /// 按名称查找参数
    pub fn param(&self, name: &str) -> Option<&StatementParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// 渲染为内联字面量的语句，只用于日志和预览，不会被执行
    pub fn render_inline(&self) -> String {
        let mut out = String::with_capacity(self.sql.len() + 16 * self.params.len());
        let mut chars = self.sql.char_indices().peekable();

        while let Some((start, c)) = chars.next() {
            if c != ':' {
                out.push(c);
                continue;
            }

            let mut end = start + 1;
            while let Some(&(i, next)) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    end = i + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }

            let name = &self.sql[start + 1..end];
            match self.param(name) {
                Some(param) => out.push_str(&quote_literal(&param.value)),
                None => out.push_str(&self.sql[start..end]),
            }
        }

        out
    }
}

/// Spark SQL 字符串字面量转义
fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}
