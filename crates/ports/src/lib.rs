//! ports - 抽象 trait 层
//!
//! 定义事件计数查询的数据模型与仓库接口

mod event_count_repository;

pub use event_count_repository::*;
