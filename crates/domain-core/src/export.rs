//! 结果导出

use pulse_errors::{AppError, AppResult};
use pulse_ports::EventCountRow;

/// 导出文件的列顺序
pub const EXPORT_HEADER: [&str; 4] = ["event_date", "event_name", "props_feature", "total_count"];

/// 导出文件名
pub const EXPORT_FILENAME: &str = "report.csv";

/// 将结果行写成 CSV
pub fn rows_to_csv(rows: &[EventCountRow]) -> AppResult<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::with_capacity(64 + rows.len() * 48));

    wtr.write_record(EXPORT_HEADER)
        .map_err(|e| AppError::internal(format!("CSV write failed: {}", e)))?;

    for row in rows {
        let date = row.event_date.format("%Y-%m-%d").to_string();
        let count = row.total_count.to_string();
        wtr.write_record([
            date.as_str(),
            row.event_name.as_str(),
            row.props_feature.as_str(),
            count.as_str(),
        ])
        .map_err(|e| AppError::internal(format!("CSV write failed: {}", e)))?;
    }

    wtr.into_inner()
        .map_err(|e| AppError::internal(format!("CSV flush failed: {}", e)))
}
