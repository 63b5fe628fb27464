use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::registry::Registry;

/// 节点失效检测
///
/// 心跳超过 `node_timeout` 的健康节点被标记为 unhealthy，其未结束的任务
/// 被回收重新入队。节点不会被删除，也不会自动恢复为 healthy。
pub struct HealthMonitor {
    registry: Arc<Registry>,
    node_timeout: Duration,
    check_interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<Registry>, node_timeout: Duration, check_interval: Duration) -> Self {
        Self {
            registry,
            node_timeout,
            check_interval,
        }
    }

    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    /// 以给定时间点执行一次检测，返回本次新标记为失效的节点
    pub async fn check_once(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::milliseconds(self.node_timeout.as_millis() as i64);
        let mut state = self.registry.lock().await;
        let expired = state.expired_nodes(now, timeout);

        for node_id in &expired {
            let last_heartbeat = state
                .nodes()
                .get(node_id)
                .map(|node| node.info.last_heartbeat);
            let reassigned = state.mark_unhealthy(node_id);
            metrics::counter!("fleet_nodes_unhealthy_total").increment(1);
            metrics::counter!("fleet_tasks_requeued_total").increment(reassigned.len() as u64);
            warn!(
                node_id = %node_id,
                last_heartbeat = ?last_heartbeat,
                reassigned = reassigned.len(),
                "节点心跳超时，已标记为失效"
            );
        }

        if expired.is_empty() {
            debug!("健康检查完成，无失效节点");
        } else {
            metrics::gauge!("fleet_queue_depth").set(state.queue_depth() as f64);
        }
        expired
    }

    /// 启动健康检查循环
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            info!(
                timeout_seconds = self.node_timeout.as_secs(),
                "节点健康检查循环已启动"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let failed = self.check_once(Utc::now()).await;
                        if !failed.is_empty() {
                            info!("检测到 {} 个失效节点", failed.len());
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("节点健康检查循环收到停止信号");
                        break;
                    }
                }
            }
        })
    }
}
