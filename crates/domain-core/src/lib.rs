//! pulse-domain - 报表流水线的领域逻辑
//!
//! 定义上传解析、表目录、查询构建、结果聚合、访问控制与导出。
//! 不依赖任何 I/O，仓库访问通过 `pulse-ports` 注入。

pub mod access;
pub mod aggregate;
pub mod catalog;
pub mod definition;
pub mod export;
pub mod query;

pub use access::{AccessGate, Session, SessionId, SessionPolicy, SessionStore};
pub use aggregate::{Aggregates, GroupTotal, HeadlineMetrics};
pub use catalog::TableCatalog;
pub use definition::{DefinitionSet, EventDefinition, parse_definitions, parse_definitions_bytes};
pub use export::rows_to_csv;
pub use query::{BoundStatement, ParamKind, PreparedQuery, StatementParam, build_event_count_query};
