use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use fleet_core::models::{
    DeregisterNodeRequest, HeartbeatRequest, RegisterNodeRequest, UpdateTaskRequest,
};
use fleet_core::{FleetError, FleetResult};

/// Worker 到协调器的 RPC 客户端
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    async fn register(&self, request: &RegisterNodeRequest) -> FleetResult<()>;

    async fn heartbeat(&self, request: &HeartbeatRequest) -> FleetResult<()>;

    async fn update_task(&self, request: &UpdateTaskRequest) -> FleetResult<()>;

    async fn deregister(&self, request: &DeregisterNodeRequest) -> FleetResult<()>;
}

pub struct HttpCoordinatorClient {
    coordinator_url: String,
    http_client: reqwest::Client,
}

impl HttpCoordinatorClient {
    pub fn new(coordinator_url: impl Into<String>, timeout: Duration) -> FleetResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FleetError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            coordinator_url: coordinator_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn coordinator_url(&self) -> &str {
        &self.coordinator_url
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> FleetResult<()> {
        let url = format!("{}{}", self.coordinator_url, path);

        match self.http_client.post(&url).json(body).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    debug!("POST {} succeeded", url);
                    Ok(())
                } else {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!("POST {} failed: HTTP {} - {}", url, status, body);
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

#[async_trait]
impl CoordinatorClient for HttpCoordinatorClient {
    async fn register(&self, request: &RegisterNodeRequest) -> FleetResult<()> {
        self.post("/nodes/register", request).await
    }

    async fn heartbeat(&self, request: &HeartbeatRequest) -> FleetResult<()> {
        self.post("/nodes/heartbeat", request).await
    }

    async fn update_task(&self, request: &UpdateTaskRequest) -> FleetResult<()> {
        self.post("/tasks/update", request).await
    }

    async fn deregister(&self, request: &DeregisterNodeRequest) -> FleetResult<()> {
        self.post("/nodes/deregister", request).await
    }
}
