use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 优雅关闭管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭信号发送器
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
        }
    }

    /// 订阅关闭信号；已关闭时返回立即触发的接收器
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        let shutdown_tx = self.shutdown_tx.read().await;
        if let Some(ref tx) = *shutdown_tx {
            tx.subscribe()
        } else {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            rx
        }
    }

    /// 触发关闭，重复调用为空操作
    pub async fn shutdown(&self) {
        let mut shutdown_tx = self.shutdown_tx.write().await;
        match shutdown_tx.take() {
            Some(tx) => {
                debug!("发送关闭信号给 {} 个订阅者", tx.receiver_count());
                // 没有接收者时发送失败，忽略
                let _ = tx.send(());
                info!("关闭信号已发送");
            }
            None => debug!("关闭管理器已经触发过关闭"),
        }
    }

    pub async fn is_shutdown(&self) -> bool {
        self.shutdown_tx.read().await.is_none()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
