use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use fleet_core::models::{
    HeartbeatRequest, NodeDetail, NodeSummary, RegisterNodeRequest, SubmitTaskRequest, TaskInfo,
    UpdateTaskRequest,
};
use fleet_core::{CoordinatorConfig, FleetResult, RetryManager};

use crate::client::WorkerClient;
use crate::health_monitor::HealthMonitor;
use crate::placement::{LeastLoadedStrategy, PlacementStrategy};
use crate::registry::{CoordinatorStats, Registry};
use crate::scheduler::TaskScheduler;

/// 协调器
///
/// 持有节点注册表和任务队列，对外提供 RPC 处理逻辑，并运行调度循环和
/// 健康检查循环。
pub struct Coordinator {
    registry: Arc<Registry>,
    scheduler: Arc<TaskScheduler>,
    health_monitor: Arc<HealthMonitor>,
}

impl Coordinator {
    pub fn new(
        config: &CoordinatorConfig,
        client: Arc<dyn WorkerClient>,
        retry_manager: Arc<RetryManager>,
    ) -> Self {
        Self::with_strategy(config, client, retry_manager, Arc::new(LeastLoadedStrategy::new()))
    }

    pub fn with_strategy(
        config: &CoordinatorConfig,
        client: Arc<dyn WorkerClient>,
        retry_manager: Arc<RetryManager>,
        strategy: Arc<dyn PlacementStrategy>,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let scheduler = Arc::new(TaskScheduler::new(
            Arc::clone(&registry),
            strategy,
            client,
            retry_manager,
            config.assign_policy.clone(),
            config.schedule_interval(),
        ));
        let health_monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            config.node_timeout(),
            config.health_check_interval(),
        ));
        Self {
            registry,
            scheduler,
            health_monitor,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health_monitor
    }

    /// 启动调度循环和健康检查循环
    pub fn start(&self, shutdown_rx: broadcast::Receiver<()>) -> Vec<JoinHandle<()>> {
        info!("启动协调器后台任务");
        vec![
            Arc::clone(&self.scheduler).spawn(shutdown_rx.resubscribe()),
            Arc::clone(&self.health_monitor).spawn(shutdown_rx),
        ]
    }

    pub async fn register_node(&self, request: RegisterNodeRequest) -> FleetResult<()> {
        let node_id = request.node_id.clone();
        self.registry.lock().await.register_node(request)?;
        self.scheduler.forget_node(&node_id).await;
        Ok(())
    }

    /// 注销节点，返回被回收的任务；未知节点为空操作
    pub async fn deregister_node(&self, node_id: &str) -> Vec<String> {
        let reassigned = self.registry.lock().await.deregister_node(node_id);
        match reassigned {
            Some(reassigned) => {
                self.scheduler.forget_node(node_id).await;
                metrics::counter!("fleet_tasks_requeued_total").increment(reassigned.len() as u64);
                reassigned
            }
            None => Vec::new(),
        }
    }

    pub async fn heartbeat(&self, request: HeartbeatRequest) -> FleetResult<()> {
        self.registry.lock().await.heartbeat(request)
    }

    pub async fn submit_task(&self, request: SubmitTaskRequest) -> FleetResult<String> {
        let mut state = self.registry.lock().await;
        let task_id = state.submit_task(request)?;
        metrics::counter!("fleet_tasks_submitted_total").increment(1);
        metrics::gauge!("fleet_queue_depth").set(state.queue_depth() as f64);
        Ok(task_id)
    }

    pub async fn update_task(&self, request: UpdateTaskRequest) -> FleetResult<()> {
        self.registry.lock().await.update_task(request)
    }

    pub async fn get_task(&self, task_id: &str) -> FleetResult<TaskInfo> {
        self.registry.lock().await.get_task(task_id)
    }

    pub async fn get_node(&self, node_id: &str) -> FleetResult<NodeDetail> {
        self.registry.lock().await.get_node(node_id)
    }

    pub async fn list_nodes(&self) -> Vec<NodeSummary> {
        self.registry.lock().await.list_nodes()
    }

    pub async fn list_tasks(&self) -> Vec<TaskInfo> {
        self.registry.lock().await.list_tasks()
    }

    pub async fn stats(&self) -> CoordinatorStats {
        self.registry.lock().await.stats()
    }
}
