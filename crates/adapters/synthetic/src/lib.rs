//! adapter-synthetic - 演示数据后端
//!
//! 没有配置仓库时替代 Databricks：对每一天、每个请求的事件、每个配置的特征
//! 生成一个随机计数。配置了种子时结果可复现。

use std::time::Instant;

use async_trait::async_trait;
use chrono::Days;
use pulse_errors::{AppError, AppResult};
use pulse_ports::{EventCountQuery, EventCountRepository, EventCountRow, WarehouseProbe};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::debug;

const BACKEND_NAME: &str = "synthetic";

/// 生成参数
#[derive(Debug, Clone)]
pub struct SyntheticSettings {
    /// 从起始日期开始生成的天数
    pub days: u32,
    pub features: Vec<String>,
    pub min_count: u64,
    pub max_count: u64,
    pub seed: Option<u64>,
    /// 单次生成的行数上限
    pub max_rows: usize,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            days: 14,
            features: vec!["web".to_string(), "ios".to_string(), "android".to_string()],
            min_count: 0,
            max_count: 500,
            seed: None,
            max_rows: 100_000,
        }
    }
}

/// 随机事件计数 Repository
#[derive(Debug, Clone)]
pub struct SyntheticEventCounts {
    settings: SyntheticSettings,
}

impl SyntheticEventCounts {
    pub fn new(settings: SyntheticSettings) -> AppResult<Self> {
        if settings.min_count > settings.max_count {
            return Err(AppError::validation(format!(
                "Synthetic min_count {} exceeds max_count {}",
                settings.min_count, settings.max_count
            )));
        }
        if settings.features.is_empty() {
            return Err(AppError::validation("Synthetic backend needs at least one feature"));
        }
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &SyntheticSettings {
        &self.settings
    }

    fn rng(&self) -> StdRng {
        match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// 同步生成结果行，按日期、事件、特征顺序
    ///
    /// 行数超过 `max_rows` 时返回 `Validation`，不做任何分配
    pub fn generate(&self, query: &EventCountQuery) -> AppResult<Vec<EventCountRow>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let s = &self.settings;
        let expected = (s.days as usize)
            .checked_mul(query.events.len())
            .and_then(|n| n.checked_mul(s.features.len()))
            .filter(|&n| n <= s.max_rows)
            .ok_or_else(|| {
                AppError::validation(format!(
                    "{} events over {} days would exceed the {} row limit",
                    query.events.len(),
                    s.days,
                    s.max_rows
                ))
            })?;

        let mut rng = self.rng();
        let mut rows = Vec::with_capacity(expected);

        for offset in 0..s.days {
            let Some(date) = query.start_date.checked_add_days(Days::new(offset as u64)) else {
                break;
            };
            for event in &query.events {
                for feature in &s.features {
                    rows.push(EventCountRow {
                        event_date: date,
                        event_name: event.clone(),
                        props_feature: feature.clone(),
                        total_count: rng.gen_range(s.min_count..=s.max_count),
                    });
                }
            }
        }

        Ok(rows)
    }
}

#[async_trait]
impl EventCountRepository for SyntheticEventCounts {
    async fn fetch_event_counts(&self, query: &EventCountQuery) -> AppResult<Vec<EventCountRow>> {
        let start = Instant::now();
        let rows = self.generate(query)?;

        pulse_telemetry::record_warehouse_query(
            BACKEND_NAME,
            start.elapsed().as_secs_f64() * 1000.0,
        );
        debug!(table = %query.table, rows = rows.len(), "Generated synthetic event counts");

        Ok(rows)
    }

    async fn health_check(&self) -> AppResult<WarehouseProbe> {
        Ok(WarehouseProbe { latency_ms: 0 })
    }

    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }
}
