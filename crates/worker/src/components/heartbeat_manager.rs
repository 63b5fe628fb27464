use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use fleet_core::models::HeartbeatRequest;
use fleet_core::FleetResult;

use super::CoordinatorClient;

/// 本机负载与可用内存采样
///
/// Linux 上读取 `/proc/loadavg` 和 `/proc/meminfo`，其它平台或读取失败时
/// 使用配置的回退值。
#[derive(Debug, Clone)]
pub struct ResourceSampler {
    fallback_load: f64,
    fallback_memory_mb: f64,
}

impl ResourceSampler {
    pub fn new(fallback_load: f64, fallback_memory_mb: f64) -> Self {
        Self {
            fallback_load,
            fallback_memory_mb,
        }
    }

    /// 返回 (1 分钟平均负载, 可用内存 MB)
    pub fn sample(&self) -> (f64, f64) {
        let load = Self::read_load().unwrap_or(self.fallback_load);
        let memory = Self::read_available_memory_mb().unwrap_or(self.fallback_memory_mb);
        (load, memory)
    }

    #[cfg(target_os = "linux")]
    fn read_load() -> Option<f64> {
        let content = std::fs::read_to_string("/proc/loadavg").ok()?;
        parse_loadavg(&content)
    }

    #[cfg(not(target_os = "linux"))]
    fn read_load() -> Option<f64> {
        None
    }

    #[cfg(target_os = "linux")]
    fn read_available_memory_mb() -> Option<f64> {
        let content = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_mem_available_mb(&content)
    }

    #[cfg(not(target_os = "linux"))]
    fn read_available_memory_mb() -> Option<f64> {
        None
    }
}

fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

fn parse_mem_available_mb(content: &str) -> Option<f64> {
    content
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<f64>().ok())
        .map(|kb| kb / 1024.0)
}

pub struct HeartbeatManager {
    node_id: String,
    client: Arc<dyn CoordinatorClient>,
    sampler: ResourceSampler,
    heartbeat_interval: Duration,
}

impl HeartbeatManager {
    pub fn new(
        node_id: String,
        client: Arc<dyn CoordinatorClient>,
        sampler: ResourceSampler,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            node_id,
            client,
            sampler,
            heartbeat_interval,
        }
    }

    /// 发送一次心跳，失败不重试
    pub async fn send_heartbeat(&self, status: &str) -> FleetResult<()> {
        let (load, available_memory) = self.sampler.sample();
        let request = HeartbeatRequest {
            node_id: self.node_id.clone(),
            load,
            available_memory,
            status: status.to_string(),
        };
        self.client.heartbeat(&request).await?;
        debug!(
            node_id = %self.node_id,
            load,
            available_memory,
            "Heartbeat sent"
        );
        Ok(())
    }

    /// 启动心跳循环，失败时等待下一个周期
    pub fn start_heartbeat_task(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        // registration already stamps last_heartbeat, so the first beat waits one period
        let mut heartbeat_interval = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = heartbeat_interval.tick() => {
                        if let Err(e) = self.send_heartbeat("running").await {
                            warn!(node_id = %self.node_id, "Failed to send heartbeat: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Heartbeat task shutting down");
                        break;
                    }
                }
            }
        })
    }
}
