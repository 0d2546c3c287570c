//! 事件定义上传解析
//!
//! 上传的 CSV 至少包含 `event` 与 `props_feature` 两列。

use std::collections::{BTreeSet, HashMap};
use std::io::Read;

use pulse_errors::{AppError, AppResult};
use serde::Serialize;

/// 必需列，缺失任意一列即终止处理
pub const REQUIRED_COLUMNS: &[&str] = &["event", "props_feature"];

/// 预览行数
pub const PREVIEW_ROWS: usize = 5;

/// 单条事件定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventDefinition {
    pub event: String,
    pub props_feature: String,
}

/// 解析后的事件定义集合
#[derive(Debug, Clone, Serialize)]
pub struct DefinitionSet {
    /// 有效定义行
    pub rows: Vec<EventDefinition>,
    /// 去重排序后的事件名
    pub events: BTreeSet<String>,
    /// 去重排序后的特征名
    pub features: BTreeSet<String>,
    /// CSV 中出现的全部列
    pub columns: Vec<String>,
    /// 读取的数据行数（含被跳过的行）
    pub total_rows: usize,
    /// `event` 为空而被跳过的行数
    pub skipped_rows: usize,
    /// 前几行原始数据，按列顺序
    pub preview: Vec<Vec<String>>,
}

impl DefinitionSet {
    /// 有效定义数
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// 列名到下标的映射
struct ColumnMap {
    indices: HashMap<String, usize>,
    headers: Vec<String>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut indices = HashMap::new();
        let mut header_list = Vec::with_capacity(headers.len());
        for (i, field) in headers.iter().enumerate() {
            let name = field.trim_start_matches('\u{feff}').trim().to_string();
            indices.entry(name.clone()).or_insert(i);
            header_list.push(name);
        }
        Self {
            indices,
            headers: header_list,
        }
    }

    fn get<'a>(&self, record: &'a csv::StringRecord, col: &str) -> Option<&'a str> {
        self.indices.get(col).and_then(|&i| record.get(i))
    }

    fn has(&self, col: &str) -> bool {
        self.indices.contains_key(col)
    }

    fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !self.has(c))
            .collect()
    }
}

/// 从任意 `Read` 解析事件定义
pub fn parse_definitions<R: Read>(reader: R) -> AppResult<DefinitionSet> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| AppError::validation(format!("Unreadable CSV header: {}", e)))?
        .clone();

    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(AppError::validation("Uploaded file is empty"));
    }

    let col_map = ColumnMap::from_headers(&headers);
    let missing = col_map.missing_required();
    if !missing.is_empty() {
        return Err(AppError::missing_columns(missing));
    }

    let mut rows = Vec::new();
    let mut events = BTreeSet::new();
    let mut features = BTreeSet::new();
    let mut preview = Vec::new();
    let mut total_rows = 0usize;
    let mut skipped_rows = 0usize;

    for (idx, result) in rdr.records().enumerate() {
        // 表头占第 1 行
        let line = idx + 2;
        let record = result
            .map_err(|e| AppError::validation(format!("Malformed CSV at line {}: {}", line, e)))?;
        total_rows += 1;

        if preview.len() < PREVIEW_ROWS {
            preview.push(record.iter().map(str::to_string).collect());
        }

        let event = col_map.get(&record, "event").unwrap_or_default();
        if event.is_empty() {
            skipped_rows += 1;
            continue;
        }
        let props_feature = col_map.get(&record, "props_feature").unwrap_or_default();

        events.insert(event.to_string());
        if !props_feature.is_empty() {
            features.insert(props_feature.to_string());
        }
        rows.push(EventDefinition {
            event: event.to_string(),
            props_feature: props_feature.to_string(),
        });
    }

    if total_rows == 0 {
        return Err(AppError::validation("Uploaded file has no data rows"));
    }

    tracing::debug!(
        total_rows,
        skipped_rows,
        unique_events = events.len(),
        "Parsed event definitions"
    );

    Ok(DefinitionSet {
        rows,
        events,
        features,
        columns: col_map.headers,
        total_rows,
        skipped_rows,
        preview,
    })
}

/// 从内存中的上传内容解析
pub fn parse_definitions_bytes(bytes: &[u8]) -> AppResult<DefinitionSet> {
    parse_definitions(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collapses_duplicates() {
        let csv = "event,props_feature\nlogin,web\nsignup,ios\nlogin,web\nlogin,android\n";
        let set = parse_definitions_bytes(csv.as_bytes()).unwrap();

        assert_eq!(set.total_rows, 4);
        assert_eq!(set.len(), 4);
        assert_eq!(set.events.iter().collect::<Vec<_>>(), vec!["login", "signup"]);
        assert_eq!(
            set.features.iter().collect::<Vec<_>>(),
            vec!["android", "ios", "web"]
        );
    }

    #[test]
    fn test_missing_both_columns() {
        let csv = "name,feature\nlogin,web\n";
        let err = parse_definitions_bytes(csv.as_bytes()).unwrap_err();
        match err {
            AppError::MissingColumns(cols) => {
                assert_eq!(cols, vec!["event".to_string(), "props_feature".to_string()]);
            }
            other => panic!("Expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_props_feature_only() {
        let csv = "event,owner\nlogin,growth\n";
        let err = parse_definitions_bytes(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, AppError::MissingColumns(ref c) if c == &["props_feature"]));
    }

    #[test]
    fn test_header_names_are_case_sensitive() {
        let err = parse_definitions_bytes(b"Event,Props_Feature\nlogin,web\n").unwrap_err();
        assert!(matches!(err, AppError::MissingColumns(ref c) if c.len() == 2));
    }

    #[test]
    fn test_headers_are_trimmed_and_bom_stripped() {
        let csv = "\u{feff} event , props_feature ,extra\n login , web ,x\n";
        let set = parse_definitions_bytes(csv.as_bytes()).unwrap();

        assert_eq!(set.columns, vec!["event", "props_feature", "extra"]);
        assert_eq!(
            set.rows[0],
            EventDefinition {
                event: "login".to_string(),
                props_feature: "web".to_string(),
            }
        );
    }

    #[test]
    fn test_blank_events_are_skipped() {
        let csv = "event,props_feature\n,web\nlogin,\n";
        let set = parse_definitions_bytes(csv.as_bytes()).unwrap();

        assert_eq!(set.total_rows, 2);
        assert_eq!(set.skipped_rows, 1);
        assert_eq!(set.events.len(), 1);
        assert!(set.features.is_empty());
    }

    #[test]
    fn test_quoted_values_keep_punctuation() {
        let csv = "event,props_feature\n\"it's; here\",web\n";
        let set = parse_definitions_bytes(csv.as_bytes()).unwrap();
        assert!(set.events.contains("it's; here"));
    }

    #[test]
    fn test_empty_upload_is_rejected() {
        assert!(matches!(
            parse_definitions_bytes(b""),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            parse_definitions_bytes(b"event,props_feature\n"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_preview_is_capped() {
        let mut csv = String::from("event,props_feature\n");
        for i in 0..12 {
            csv.push_str(&format!("e{},f{}\n", i, i));
        }
        let set = parse_definitions_bytes(csv.as_bytes()).unwrap();

        assert_eq!(set.preview.len(), PREVIEW_ROWS);
        assert_eq!(set.preview[0], vec!["e0", "f0"]);
        assert_eq!(set.total_rows, 12);
    }
}
