//! pulse-bootstrap - 服务启动骨架
//!
//! 运行时初始化、基础设施装配、启动重试与关闭信号

mod infrastructure;
mod retry;
mod runtime;
mod shutdown;

pub use infrastructure::*;
pub use retry::*;
pub use runtime::*;
pub use shutdown::*;
