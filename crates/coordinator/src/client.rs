use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use fleet_core::models::{AssignTaskRequest, NodeAddress};
use fleet_core::{FleetError, FleetResult};

/// 协调器到 Worker 的 RPC 客户端
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// 推送任务到 Worker
    async fn assign_task(&self, address: &NodeAddress, request: &AssignTaskRequest)
        -> FleetResult<()>;
}

/// 基于 HTTP/JSON 的 Worker 客户端
pub struct HttpWorkerClient {
    http_client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(timeout: Duration) -> FleetResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FleetError::Internal(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn assign_task(
        &self,
        address: &NodeAddress,
        request: &AssignTaskRequest,
    ) -> FleetResult<()> {
        let url = format!("{}/tasks/assign", address.base_url());

        match self.http_client.post(&url).json(request).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    debug!(task_id = %request.task_id, url = %url, "任务推送成功");
                    Ok(())
                } else {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!(task_id = %request.task_id, "任务推送失败: HTTP {} - {}", status, body);
                    Err(FleetError::Rpc {
                        status: status.as_u16(),
                        message: body,
                    })
                }
            }
            Err(e) if e.is_timeout() => Err(FleetError::Timeout(format!("{url}: {e}"))),
            Err(e) => Err(FleetError::Network(format!("{url}: {e}"))),
        }
    }
}
