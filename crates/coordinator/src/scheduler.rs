use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use fleet_core::{CircuitBreaker, FleetError, FleetResult, RetryManager, RetryPolicy};

use crate::client::WorkerClient;
use crate::placement::PlacementStrategy;
use crate::registry::{Assignment, Placement, Registry};

/// 一轮调度的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub assigned: usize,
    /// 推送失败后回滚并重新入队的任务数
    pub requeued: usize,
    /// 没有合适节点而重新入队的任务数
    pub unplaced: usize,
}

/// 调度器
///
/// 每轮把当前队列中的任务各处理一次：选节点、写入暂定分配、推送 assign RPC。
/// 推送失败或无候选节点的任务在本轮结束时按原优先级重新入队；
/// 轮次异常退出时由调度循环扫描注册表找回这些任务。
pub struct TaskScheduler {
    registry: Arc<Registry>,
    strategy: Arc<dyn PlacementStrategy>,
    client: Arc<dyn WorkerClient>,
    retry_manager: Arc<RetryManager>,
    assign_policy: String,
    schedule_interval: Duration,
    /// 每个节点独立的重试策略实例，各自持有熔断器
    node_policies: Mutex<HashMap<String, Arc<RetryPolicy>>>,
}

impl TaskScheduler {
    pub fn new(
        registry: Arc<Registry>,
        strategy: Arc<dyn PlacementStrategy>,
        client: Arc<dyn WorkerClient>,
        retry_manager: Arc<RetryManager>,
        assign_policy: impl Into<String>,
        schedule_interval: Duration,
    ) -> Self {
        Self {
            registry,
            strategy,
            client,
            retry_manager,
            assign_policy: assign_policy.into(),
            schedule_interval,
            node_policies: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// 执行一轮调度
    pub async fn schedule_once(&self) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        let budget = self.registry.lock().await.queue_depth();
        let mut deferred = Vec::new();

        for _ in 0..budget {
            let placement = self.registry.lock().await.place_next(self.strategy.as_ref());
            match placement {
                None => break,
                Some(Placement::NoCandidate { task_id }) => {
                    debug!(task_id = %task_id, "暂无可用节点，稍后重试");
                    report.unplaced += 1;
                    deferred.push(task_id);
                }
                Some(Placement::Assigned(assignment)) => match self.push(&assignment).await {
                    Ok(()) => {
                        report.assigned += 1;
                        metrics::counter!("fleet_tasks_assigned_total").increment(1);
                        info!(
                            task_id = %assignment.task_id,
                            node_id = %assignment.node_id,
                            "任务已分配"
                        );
                    }
                    Err(e) => {
                        warn!(
                            task_id = %assignment.task_id,
                            node_id = %assignment.node_id,
                            circuit_open = e.is_circuit_open(),
                            "任务推送失败，撤销分配: {}",
                            e
                        );
                        let rolled_back = self
                            .registry
                            .lock()
                            .await
                            .rollback_assignment(&assignment.task_id, &assignment.node_id);
                        if rolled_back {
                            report.requeued += 1;
                            deferred.push(assignment.task_id);
                        }
                    }
                },
            }
        }

        let mut state = self.registry.lock().await;
        for task_id in deferred {
            if state.requeue(&task_id) {
                metrics::counter!("fleet_tasks_requeued_total").increment(1);
            }
        }
        metrics::gauge!("fleet_queue_depth").set(state.queue_depth() as f64);
        report
    }

    async fn push(&self, assignment: &Assignment) -> FleetResult<()> {
        let policy = self.policy_for(&assignment.node_id).await?;
        let context = format!("assign {} -> {}", assignment.task_id, assignment.node_id);
        self.retry_manager
            .execute_with_policy(&policy, &context, || {
                self.client
                    .assign_task(&assignment.address, &assignment.request)
            })
            .await
    }

    async fn policy_for(&self, node_id: &str) -> FleetResult<Arc<RetryPolicy>> {
        let mut policies = self.node_policies.lock().await;
        if let Some(policy) = policies.get(node_id) {
            return Ok(Arc::clone(policy));
        }

        let base = self
            .retry_manager
            .policy(&self.assign_policy)
            .await
            .ok_or_else(|| {
                FleetError::Configuration(format!("未注册的重试策略: {}", self.assign_policy))
            })?;
        let circuit_breaker = base.config.circuit_breaker.clone().map(|config| {
            Arc::new(CircuitBreaker::new(
                format!("{}:{}", base.name(), node_id),
                config,
            ))
        });
        let policy = Arc::new(RetryPolicy {
            config: base.config.clone(),
            circuit_breaker,
        });
        policies.insert(node_id.to_string(), Arc::clone(&policy));
        Ok(policy)
    }

    /// 节点重新注册或注销时丢弃其熔断器状态
    pub async fn forget_node(&self, node_id: &str) {
        self.node_policies.lock().await.remove(node_id);
    }

    /// 节点当前的推送熔断器
    pub async fn node_breaker(&self, node_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.node_policies
            .lock()
            .await
            .get(node_id)
            .and_then(|policy| policy.circuit_breaker.clone())
    }

    /// 异常退出的轮次可能已让任务出队却未回到队列，统一找回
    async fn recover_stranded(&self) {
        let mut state = self.registry.lock().await;
        let recovered = state.requeue_stranded();
        if !recovered.is_empty() {
            warn!(count = recovered.len(), "已找回滞留的待调度任务");
            metrics::counter!("fleet_tasks_requeued_total").increment(recovered.len() as u64);
        }
        metrics::gauge!("fleet_queue_depth").set(state.queue_depth() as f64);
    }

    /// 启动调度循环
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut ticker = interval(self.schedule_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            info!(
                strategy = self.strategy_name(),
                interval_ms = self.schedule_interval.as_millis() as u64,
                "调度循环已启动"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let scheduler = Arc::clone(&self);
                        // a panic inside one pass must not end the loop
                        let pass = tokio::spawn(async move { scheduler.schedule_once().await });
                        match pass.await {
                            Ok(report) if report.assigned + report.requeued > 0 => {
                                debug!(?report, "调度轮次完成");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!("调度轮次异常退出: {}", e);
                                self.recover_stranded().await;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("调度循环收到停止信号");
                        break;
                    }
                }
            }
        })
    }
}
