//! 结果聚合
//!
//! 按日期、事件、特征三个维度对 `total_count` 求和。
//! 分组结果按键排序，与输入行顺序无关。

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use pulse_ports::EventCountRow;
use serde::Serialize;

/// 单个分组的合计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupTotal<K> {
    pub key: K,
    pub total: u64,
}

/// 三个维度的聚合视图
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Aggregates {
    pub by_date: Vec<GroupTotal<NaiveDate>>,
    pub by_event: Vec<GroupTotal<String>>,
    pub by_feature: Vec<GroupTotal<String>>,
    pub total: u64,
    pub row_count: usize,
}

impl Aggregates {
    /// 从结果行计算聚合
    pub fn from_rows(rows: &[EventCountRow]) -> Self {
        let mut by_date: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        let mut by_event: BTreeMap<&str, u64> = BTreeMap::new();
        let mut by_feature: BTreeMap<&str, u64> = BTreeMap::new();
        let mut total = 0u64;

        for row in rows {
            *by_date.entry(row.event_date).or_default() += row.total_count;
            *by_event.entry(row.event_name.as_str()).or_default() += row.total_count;
            *by_feature.entry(row.props_feature.as_str()).or_default() += row.total_count;
            total += row.total_count;
        }

        Self {
            by_date: into_totals(by_date, |k| k),
            by_event: into_totals(by_event, str::to_string),
            by_feature: into_totals(by_feature, str::to_string),
            total,
            row_count: rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// 合计最高的一天
    pub fn peak_day(&self) -> Option<&GroupTotal<NaiveDate>> {
        // 并列时取最早的一天
        self.by_date
            .iter()
            .fold(None, |best: Option<&GroupTotal<NaiveDate>>, g| match best {
                Some(b) if b.total >= g.total => Some(b),
                _ => Some(g),
            })
    }
}

fn into_totals<K, T>(map: BTreeMap<K, u64>, convert: impl Fn(K) -> T) -> Vec<GroupTotal<T>> {
    map.into_iter()
        .map(|(k, total)| GroupTotal {
            key: convert(k),
            total,
        })
        .collect()
}

/// 报表头部指标
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadlineMetrics {
    pub total_count: u64,
    pub row_count: usize,
    pub distinct_events: usize,
    pub distinct_features: usize,
    pub active_days: usize,
    pub peak_day: Option<NaiveDate>,
    pub peak_day_total: u64,
    /// 上传中请求的事件数
    pub events_requested: usize,
    /// 实际有数据的请求事件数
    pub events_with_data: usize,
    /// 覆盖率（百分比，整数）
    pub coverage_pct: u32,
}

impl HeadlineMetrics {
    pub fn compute(aggregates: &Aggregates, requested: &BTreeSet<String>) -> Self {
        let events_with_data = aggregates
            .by_event
            .iter()
            .filter(|g| requested.contains(&g.key))
            .count();

        let coverage_pct = if requested.is_empty() {
            0
        } else {
            ((events_with_data as f64 / requested.len() as f64) * 100.0).round() as u32
        };

        let peak = aggregates.peak_day();

        Self {
            total_count: aggregates.total,
            row_count: aggregates.row_count,
            distinct_events: aggregates.by_event.len(),
            distinct_features: aggregates.by_feature.len(),
            active_days: aggregates.by_date.len(),
            peak_day: peak.map(|g| g.key),
            peak_day_total: peak.map(|g| g.total).unwrap_or(0),
            events_requested: requested.len(),
            events_with_data,
            coverage_pct,
        }
    }
}
