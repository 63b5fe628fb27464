use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

use fleet_api::{create_coordinator_app, create_worker_app};
use fleet_coordinator::{Coordinator, HttpWorkerClient};
use fleet_core::{AppConfig, RetryManager};
use fleet_worker::{HttpCoordinatorClient, ProcessExecutor, WorkerNode};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Coordinator,
    Worker,
}

impl std::str::FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "coordinator" => Ok(AppMode::Coordinator),
            "worker" => Ok(AppMode::Worker),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

/// 主应用程序：按运行模式组装协调器或 Worker，并托管其 HTTP 服务
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    retry_manager: Arc<RetryManager>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let retry_manager = RetryManager::from_configs(&config.resilience.policies)
            .await
            .context("注册重试策略失败")?;
        info!(
            "已注册重试策略: {:?}",
            retry_manager.policy_names().await
        );

        Ok(Self {
            config,
            mode,
            retry_manager: Arc::new(retry_manager),
        })
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    pub fn retry_manager(&self) -> &Arc<RetryManager> {
        &self.retry_manager
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match self.mode {
            AppMode::Coordinator => self.run_coordinator(shutdown_rx).await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
        }
    }

    async fn run_coordinator(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let config = &self.config.coordinator;
        info!("启动协调器: {}", config.bind_address);

        let client = HttpWorkerClient::new(config.rpc_timeout())
            .context("创建Worker RPC客户端失败")?;
        let coordinator = Arc::new(Coordinator::new(
            config,
            Arc::new(client),
            Arc::clone(&self.retry_manager),
        ));

        let listener = TcpListener::bind(&config.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", config.bind_address))?;
        let handles = coordinator.start(shutdown_rx.resubscribe());

        info!("协调器服务启动在 http://{}", config.bind_address);
        let app = create_coordinator_app(Arc::clone(&coordinator));
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("协调器收到关闭信号");
            })
            .await
            .context("协调器HTTP服务运行失败")?;

        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务异常退出: {}", e);
            }
        }

        info!("协调器已停止");
        Ok(())
    }

    async fn run_worker(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let config = self.config.worker.clone();
        info!("启动Worker服务: {}", config.node_id);

        let client = HttpCoordinatorClient::new(&config.coordinator_url, config.rpc_timeout())
            .context("创建协调器RPC客户端失败")?;
        let executor = ProcessExecutor::new(
            config.interpreter.clone(),
            config.scripts_dir.clone(),
            config.execution_timeout(),
        );
        let worker = Arc::new(WorkerNode::new(
            config.clone(),
            Arc::new(client),
            Arc::new(executor),
            Arc::clone(&self.retry_manager),
        ));

        // the assign endpoint must be reachable before the coordinator learns about us
        let listener = TcpListener::bind(&config.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", config.bind_address))?;
        let app = create_worker_app(Arc::clone(&worker));
        let mut server_rx = shutdown_rx.resubscribe();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_rx.recv().await;
                })
                .await
        });
        info!("Worker服务监听 http://{}", config.bind_address);

        if let Err(e) = worker.start().await {
            server.abort();
            return Err(e).context("向协调器注册失败");
        }

        let _ = shutdown_rx.recv().await;
        info!("Worker收到关闭信号");

        worker.stop().await.context("停止Worker失败")?;
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Worker HTTP服务运行失败: {}", e),
            Err(e) => error!("Worker HTTP服务异常退出: {}", e),
        }

        info!("Worker服务已停止");
        Ok(())
    }
}
