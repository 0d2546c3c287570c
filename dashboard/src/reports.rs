//! 报表与导出路由
//!
//! 一次请求走完整条流水线：解析上传 → 解析表名 → 构建查询 → 执行 → 聚合 → 展示。

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    routing::post,
};
use chrono::NaiveDate;
use pulse_domain::{
    Aggregates, DefinitionSet, GroupTotal, HeadlineMetrics, build_event_count_query,
    export::{EXPORT_FILENAME, rows_to_csv},
    parse_definitions_bytes,
};
use pulse_errors::{AppError, AppResult};
use pulse_ports::{EventCountQuery, EventCountRow};
use pulse_telemetry::record_report;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::middleware::Authenticated;
use crate::state::AppState;

pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/api/definitions/preview", post(preview_definitions))
        .route("/api/reports", post(create_report))
        .route("/api/reports/export", post(export_report))
}

/// 报表查询参数
#[derive(Debug, Default, Deserialize)]
pub struct ReportParams {
    pub table: Option<String>,
    pub start_date: Option<String>,
}

impl ReportParams {
    fn start_date(&self) -> AppResult<NaiveDate> {
        let raw = self
            .start_date
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::validation("start_date is required (YYYY-MM-DD)"))?;

        NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            AppError::validation(format!("start_date '{}' is not a valid YYYY-MM-DD date", raw))
        })
    }

    fn table(&self) -> AppResult<&str> {
        self.table
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::validation("table is required"))
    }
}

/// 一次报表运行的结果
#[derive(Debug)]
pub struct Report {
    pub query: EventCountQuery,
    pub definitions: DefinitionSet,
    /// 内联字面量的语句，只用于展示
    pub query_preview: Option<String>,
    pub rows: Vec<EventCountRow>,
}

/// 执行报表流水线
pub async fn run_report(state: &AppState, params: &ReportParams, body: &[u8]) -> AppResult<Report> {
    // 缺列时在查询前终止
    let definitions = parse_definitions_bytes(body)?;
    let max_events = state.settings.max_report_events;
    if definitions.events.len() > max_events {
        return Err(AppError::validation(format!(
            "The upload lists {} distinct events; at most {} are allowed per report",
            definitions.events.len(),
            max_events
        )));
    }
    let table = state.catalog.resolve(params.table()?)?;
    let start_date = params.start_date()?;

    let query = EventCountQuery::new(table, start_date, definitions.events.iter().cloned());
    let prepared = build_event_count_query(&query);
    let query_preview = prepared.statement().map(|stmt| stmt.render_inline());

    let rows = if prepared.is_empty() {
        Vec::new()
    } else {
        state.repository.fetch_event_counts(&query).await?
    };

    Ok(Report {
        query,
        definitions,
        query_preview,
        rows,
    })
}

/// 报表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ok,
    NoData,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NoData => "no_data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: u64,
}

/// 图表描述，由前端渲染
#[derive(Debug, Clone, Serialize)]
pub struct ChartSpec {
    pub id: &'static str,
    pub title: &'static str,
    pub kind: ChartKind,
    pub x_label: &'static str,
    pub y_label: &'static str,
    pub points: Vec<ChartPoint>,
}

impl ChartSpec {
    fn from_totals<K: ToString>(
        id: &'static str,
        title: &'static str,
        kind: ChartKind,
        x_label: &'static str,
        totals: &[GroupTotal<K>],
    ) -> Self {
        Self {
            id,
            title,
            kind,
            x_label,
            y_label: "total_count",
            points: totals
                .iter()
                .map(|g| ChartPoint {
                    label: g.key.to_string(),
                    value: g.total,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DefinitionSummary {
    pub total_rows: usize,
    pub skipped_rows: usize,
    pub unique_events: usize,
    pub unique_features: usize,
}

/// 报表视图
#[derive(Debug, Clone, Serialize)]
pub struct ReportView {
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub table: String,
    pub start_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_preview: Option<String>,
    pub definitions: DefinitionSummary,
    pub headline: HeadlineMetrics,
    pub charts: Vec<ChartSpec>,
    pub rows: Vec<EventCountRow>,
}

impl ReportView {
    pub fn from_report(report: Report) -> Self {
        let aggregates = Aggregates::from_rows(&report.rows);
        let headline = HeadlineMetrics::compute(&aggregates, &report.query.events);

        let (status, warning) = if report.query.is_empty() {
            (
                ReportStatus::NoData,
                Some("The uploaded file does not contain any events".to_string()),
            )
        } else if aggregates.is_empty() {
            (
                ReportStatus::NoData,
                Some(format!(
                    "No rows found in '{}' since {} for the uploaded events",
                    report.query.table.display_name(),
                    report.query.start_date
                )),
            )
        } else {
            (ReportStatus::Ok, None)
        };

        let charts = vec![
            ChartSpec::from_totals(
                "daily_trend",
                "Daily event volume",
                ChartKind::Line,
                "event_date",
                &aggregates.by_date,
            ),
            ChartSpec::from_totals(
                "by_event",
                "Volume by event",
                ChartKind::Bar,
                "event_name",
                &aggregates.by_event,
            ),
            ChartSpec::from_totals(
                "by_feature",
                "Volume by feature",
                ChartKind::Bar,
                "props_feature",
                &aggregates.by_feature,
            ),
        ];

        let definitions = DefinitionSummary {
            total_rows: report.definitions.total_rows,
            skipped_rows: report.definitions.skipped_rows,
            unique_events: report.definitions.events.len(),
            unique_features: report.definitions.features.len(),
        };

        Self {
            status,
            warning,
            table: report.query.table.display_name().to_string(),
            start_date: report.query.start_date,
            query_preview: report.query_preview,
            definitions,
            headline,
            charts,
            rows: report.rows,
        }
    }
}

async fn create_report(
    State(state): State<AppState>,
    Authenticated(session_id): Authenticated,
    Query(params): Query<ReportParams>,
    body: Bytes,
) -> AppResult<Json<ReportView>> {
    let report = match run_report(&state, &params, &body).await {
        Ok(report) => report,
        Err(e) => {
            record_report("error");
            return Err(e);
        }
    };

    let view = ReportView::from_report(report);
    record_report(view.status.as_str());

    if view.status == ReportStatus::NoData {
        warn!(session_id = %session_id, table = %view.table, "Report returned no data");
    } else {
        info!(
            session_id = %session_id,
            table = %view.table,
            rows = view.rows.len(),
            total = view.headline.total_count,
            "Report generated"
        );
    }

    Ok(Json(view))
}

async fn export_report(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(params): Query<ReportParams>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let report = run_report(&state, &params, &body).await?;
    let csv = rows_to_csv(&report.rows)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", EXPORT_FILENAME),
            ),
        ],
        csv,
    ))
}

/// 上传预览
#[derive(Debug, Clone, Serialize)]
pub struct DefinitionPreview {
    pub columns: Vec<String>,
    pub total_rows: usize,
    pub skipped_rows: usize,
    pub events: Vec<String>,
    pub features: Vec<String>,
    pub preview: Vec<Vec<String>>,
}

impl From<DefinitionSet> for DefinitionPreview {
    fn from(set: DefinitionSet) -> Self {
        Self {
            columns: set.columns,
            total_rows: set.total_rows,
            skipped_rows: set.skipped_rows,
            events: set.events.into_iter().collect(),
            features: set.features.into_iter().collect(),
            preview: set.preview,
        }
    }
}

async fn preview_definitions(
    _auth: Authenticated,
    body: Bytes,
) -> AppResult<Json<DefinitionPreview>> {
    let set = parse_definitions_bytes(&body)?;
    Ok(Json(set.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_ports::TableRef;

    fn report(events: &[&str], rows: Vec<EventCountRow>) -> Report {
        let table = TableRef::new("User Activity", "catalog.schema.user_activity").unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let csv: String = std::iter::once("event,props_feature\n".to_string())
            .chain(events.iter().map(|e| format!("{},web\n", e)))
            .collect();
        let definitions = if events.is_empty() {
            parse_definitions_bytes(b"event,props_feature\n,web\n").unwrap()
        } else {
            parse_definitions_bytes(csv.as_bytes()).unwrap()
        };
        Report {
            query: EventCountQuery::new(table, start, events.iter().copied()),
            definitions,
            query_preview: None,
            rows,
        }
    }

    #[test]
    fn test_view_with_rows() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let view = ReportView::from_report(report(
            &["login"],
            vec![
                EventCountRow::new(d, "login", "web", 4),
                EventCountRow::new(d, "login", "ios", 6),
            ],
        ));

        assert_eq!(view.status, ReportStatus::Ok);
        assert!(view.warning.is_none());
        assert_eq!(view.charts.len(), 3);
        assert_eq!(view.charts[0].kind, ChartKind::Line);
        assert_eq!(view.charts[0].points[0].label, "2024-01-01");
        assert_eq!(view.charts[0].points[0].value, 10);
        assert_eq!(view.charts[2].points.len(), 2);
        assert_eq!(view.headline.coverage_pct, 100);
    }

    #[test]
    fn test_view_without_rows_is_no_data() {
        let view = ReportView::from_report(report(&["login"], vec![]));
        assert_eq!(view.status, ReportStatus::NoData);
        assert!(view.warning.unwrap().contains("User Activity"));
        assert!(view.charts.iter().all(|c| c.points.is_empty()));
    }

    #[test]
    fn test_view_without_events() {
        let view = ReportView::from_report(report(&[], vec![]));
        assert_eq!(view.status, ReportStatus::NoData);
        assert_eq!(view.definitions.skipped_rows, 1);
    }

    #[test]
    fn test_params_validation() {
        let params = ReportParams {
            table: Some("  ".to_string()),
            start_date: Some("2024-13-01".to_string()),
        };
        assert!(matches!(params.table(), Err(AppError::Validation(_))));
        assert!(matches!(params.start_date(), Err(AppError::Validation(_))));

        let ok = ReportParams {
            table: Some("User Activity".to_string()),
            start_date: Some("2024-01-01".to_string()),
        };
        assert_eq!(ok.table().unwrap(), "User Activity");
        assert_eq!(ok.start_date().unwrap(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }
}
