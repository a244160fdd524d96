use tokio::sync::broadcast;
use tracing::info;

/// 优雅关闭管理器
///
/// 广播一次性的关闭信号，各后台循环各自持有一个接收端。
pub struct ShutdownManager {
    tx: broadcast::Sender<()>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn shutdown(&self) {
        info!("广播关闭信号");
        // 没有存活的接收端也不算错误
        let _ = self.tx.send(());
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
