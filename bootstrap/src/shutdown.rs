//! Graceful Shutdown

use tokio::sync::watch;
use tracing::info;

/// Shutdown 控制器
///
/// 基于 watch 通道，关闭之后才开始等待的任务也能立即返回。
#[derive(Clone)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        if !self.tx.send_replace(true) {
            info!("Triggering shutdown");
        }
    }

    /// 是否已触发关闭
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// 等待关闭信号
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // 发送端与控制器同生命周期，不会提前关闭
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
