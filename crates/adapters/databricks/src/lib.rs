//! adapter-databricks - Databricks SQL 适配器
//!
//! 通过 SQL Statement Execution API 2.0 访问 SQL Warehouse，包括：
//! - 连接池管理
//! - 命名参数语句执行与分块拉取
//! - 健康检查
//! - 事件计数 Repository 实现

mod client;
mod config;
mod health;
mod repository;
mod statement;

pub use client::*;
pub use config::*;
pub use health::*;
pub use repository::*;
pub use statement::{StatementResult, StatementState};
