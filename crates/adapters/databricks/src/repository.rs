//! Databricks Repository 实现
//!
//! 实现事件计数 Repository trait

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use pulse_domain::{PreparedQuery, build_event_count_query};
use pulse_errors::AppResult;
use pulse_ports::{EventCountQuery, EventCountRepository, EventCountRow, WarehouseProbe};
use tracing::{debug, info};

use crate::client::DatabricksPool;
use crate::health::HealthChecker;

const BACKEND_NAME: &str = "databricks";

/// 事件计数 Repository 实现
pub struct DatabricksEventCountRepository {
    pool: Arc<DatabricksPool>,
    health: HealthChecker,
}

impl DatabricksEventCountRepository {
    /// 创建新的事件计数 Repository
    pub fn new(pool: Arc<DatabricksPool>) -> Self {
        let health = HealthChecker::new(pool.clone());
        Self { pool, health }
    }

    pub fn pool(&self) -> &Arc<DatabricksPool> {
        &self.pool
    }
}

#[async_trait]
impl EventCountRepository for DatabricksEventCountRepository {
    async fn fetch_event_counts(&self, query: &EventCountQuery) -> AppResult<Vec<EventCountRow>> {
        let statement = match build_event_count_query(query) {
            PreparedQuery::Empty => return Ok(Vec::new()),
            PreparedQuery::Statement(stmt) => stmt,
        };

        self.health.check_if_stale().await?;

        debug!(
            table = %query.table,
            events = query.events.len(),
            query = %statement.render_inline(),
            "Executing event count query"
        );

        let start = Instant::now();
        let client = self.pool.get().await?;
        let result = match client.execute(&statement).await {
            Ok(result) => {
                self.pool.mark_healthy();
                result
            }
            Err(e) => {
                self.pool.mark_unhealthy(e.to_string());
                return Err(e);
            }
        };
        drop(client);

        let elapsed = start.elapsed();
        pulse_telemetry::record_warehouse_query(BACKEND_NAME, elapsed.as_secs_f64() * 1000.0);

        let rows = result.into_event_count_rows()?;
        info!(
            table = %query.table,
            rows = rows.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Event count query finished"
        );

        Ok(rows)
    }

    async fn health_check(&self) -> AppResult<WarehouseProbe> {
        let latency_ms = self.health.probe().await.into_result()?;
        Ok(WarehouseProbe { latency_ms })
    }

    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }
}
