use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use fleet_core::models::{
    AssignTaskRequest, DeregisterNodeRequest, RegisterNodeRequest, UpdateTaskRequest,
};
use fleet_core::{FleetError, FleetResult, RetryManager, WorkerConfig};

use super::{CoordinatorClient, HeartbeatManager, ResourceSampler, TaskExecutionManager};
use crate::components::task_execution::LocalTask;
use crate::executors::TaskExecutor;

/// Worker 运行状态快照
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub node_id: String,
    pub running: bool,
    pub executor: String,
    pub active_tasks: usize,
    pub tracked_tasks: usize,
}

/// Worker 节点
///
/// 启动时先运行心跳和任务处理循环，再向协调器注册；注册失败则终止启动。
pub struct WorkerNode {
    config: WorkerConfig,
    client: Arc<dyn CoordinatorClient>,
    retry_manager: Arc<RetryManager>,
    task_execution_manager: Arc<TaskExecutionManager>,
    heartbeat_manager: Arc<HeartbeatManager>,
    shutdown_tx: RwLock<Option<broadcast::Sender<()>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    is_running: RwLock<bool>,
}

impl WorkerNode {
    pub fn new(
        config: WorkerConfig,
        client: Arc<dyn CoordinatorClient>,
        executor: Arc<dyn TaskExecutor>,
        retry_manager: Arc<RetryManager>,
    ) -> Self {
        let sampler = ResourceSampler::new(0.0, config.capabilities.memory.unwrap_or(0.0));
        let heartbeat_manager = Arc::new(HeartbeatManager::new(
            config.node_id.clone(),
            Arc::clone(&client),
            sampler,
            config.heartbeat_interval(),
        ));
        let task_execution_manager =
            Arc::new(TaskExecutionManager::new(config.node_id.clone(), executor));
        Self {
            config,
            client,
            retry_manager,
            task_execution_manager,
            heartbeat_manager,
            shutdown_tx: RwLock::new(None),
            handles: Mutex::new(Vec::new()),
            is_running: RwLock::new(false),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn heartbeat_manager(&self) -> &Arc<HeartbeatManager> {
        &self.heartbeat_manager
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn start(self: &Arc<Self>) -> FleetResult<()> {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            return Err(FleetError::Internal(
                "Worker node already running".to_string(),
            ));
        }

        info!("Starting worker node: {}", self.config.node_id);
        let (shutdown_tx, heartbeat_rx) = broadcast::channel(1);
        let processing_rx = shutdown_tx.subscribe();
        {
            let mut handles = self.handles.lock().await;
            handles.push(Arc::clone(&self.heartbeat_manager).start_heartbeat_task(heartbeat_rx));
            handles.push(self.start_task_processing(processing_rx));
        }
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let request = RegisterNodeRequest {
            node_id: self.config.node_id.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            capabilities: self.config.capabilities.clone(),
        };
        if let Err(e) = self
            .retry_manager
            .execute(&self.config.rpc_policy, "register", || {
                self.client.register(&request)
            })
            .await
        {
            error!("Failed to register with coordinator: {}", e);
            self.shutdown_loops().await;
            return Err(e);
        }

        *is_running = true;
        info!("Worker node {} registered and running", self.config.node_id);
        Ok(())
    }

    pub async fn stop(&self) -> FleetResult<()> {
        let mut is_running = self.is_running.write().await;
        if !*is_running {
            return Ok(());
        }

        info!("Stopping worker node: {}", self.config.node_id);
        self.shutdown_loops().await;
        self.task_execution_manager.cancel_all().await;

        let request = DeregisterNodeRequest {
            node_id: self.config.node_id.clone(),
        };
        if let Err(e) = self
            .retry_manager
            .execute(&self.config.rpc_policy, "deregister", || {
                self.client.deregister(&request)
            })
            .await
        {
            warn!("Failed to deregister from coordinator: {}", e);
        }

        *is_running = false;
        info!("Worker node {} stopped", self.config.node_id);
        Ok(())
    }

    async fn shutdown_loops(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Background task ended abnormally: {}", e);
            }
        }
    }

    fn start_task_processing(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let mut poll_interval = interval(self.config.task_poll_interval());
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let worker = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = poll_interval.tick() => {
                        worker.process_once().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Task processing shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// 推进本地任务并上报状态，返回已被协调器确认的终止任务数
    pub async fn process_once(&self) -> usize {
        let updates = self.task_execution_manager.advance().await;
        let mut acknowledged = 0;
        for update in updates {
            if self.report(&update).await && update.status.is_terminal()
                && self.task_execution_manager.acknowledge(&update.task_id).await
            {
                acknowledged += 1;
            }
        }
        acknowledged
    }

    /// 上报状态；返回 false 表示需要下次重试
    async fn report(&self, update: &UpdateTaskRequest) -> bool {
        let context = format!("update {} -> {}", update.task_id, update.status);
        match self
            .retry_manager
            .execute(&self.config.rpc_policy, &context, || {
                self.client.update_task(update)
            })
            .await
        {
            Ok(()) => true,
            Err(FleetError::Rpc { status, message }) if (400..500).contains(&status) => {
                warn!(
                    task_id = %update.task_id,
                    "Coordinator rejected status report (HTTP {}): {}, dropping it",
                    status,
                    message
                );
                true
            }
            Err(e) => {
                warn!(
                    task_id = %update.task_id,
                    status = %update.status,
                    "Failed to report task status, will retry: {}",
                    e
                );
                false
            }
        }
    }

    /// Assign RPC
    pub async fn assign_task(&self, request: AssignTaskRequest) -> FleetResult<()> {
        self.task_execution_manager.accept(request).await
    }

    /// Stop RPC：取消执行并上报 stopped；未持有的任务返回 not found
    pub async fn stop_task(&self, task_id: &str) -> FleetResult<()> {
        let update = self.task_execution_manager.stop(task_id).await?;
        // an unconfirmed stopped report is resent by process_once
        if self.report(&update).await {
            self.task_execution_manager.acknowledge(task_id).await;
        }
        Ok(())
    }

    pub async fn heartbeat_once(&self) -> FleetResult<()> {
        self.heartbeat_manager.send_heartbeat("running").await
    }

    pub async fn get_task(&self, task_id: &str) -> Option<LocalTask> {
        self.task_execution_manager.get(task_id).await
    }

    pub async fn tasks(&self) -> Vec<LocalTask> {
        self.task_execution_manager.list().await
    }

    pub async fn status(&self) -> WorkerStatus {
        let tasks = self.task_execution_manager.list().await;
        WorkerStatus {
            node_id: self.config.node_id.clone(),
            running: self.is_running().await,
            executor: self.task_execution_manager.executor_name().to_string(),
            active_tasks: tasks.iter().filter(|t| !t.status.is_terminal()).count(),
            tracked_tasks: tasks.len(),
        }
    }
}
