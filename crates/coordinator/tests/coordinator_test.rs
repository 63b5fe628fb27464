use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use fleet_coordinator::{Coordinator, PlacementStrategy, WorkerClient};
use fleet_core::models::{
    AssignTaskRequest, HealthStatus, HeartbeatRequest, NodeAddress, NodeCapabilities, NodeState,
    RegisterNodeRequest, SubmitTaskRequest, TaskRequirements, TaskStatus, UpdateTaskRequest,
};
use fleet_core::{
    CircuitBreakerConfig, CircuitState, CoordinatorConfig, FleetError, FleetResult, RetryManager,
    RetryPolicyConfig,
};

/// 以 host 作为节点标识记录推送
#[derive(Default)]
struct MockWorkerClient {
    calls: Mutex<Vec<(String, String)>>,
    failing_hosts: Mutex<HashSet<String>>,
}

impl MockWorkerClient {
    fn fail_host(&self, host: &str) {
        self.failing_hosts.lock().unwrap().insert(host.to_string());
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerClient for MockWorkerClient {
    async fn assign_task(
        &self,
        address: &NodeAddress,
        request: &AssignTaskRequest,
    ) -> FleetResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((address.host.clone(), request.task_id.clone()));
        if self.failing_hosts.lock().unwrap().contains(&address.host) {
            return Err(FleetError::Network("connection refused".to_string()));
        }
        Ok(())
    }
}

async fn coordinator_with(
    client: Arc<MockWorkerClient>,
    policy: RetryPolicyConfig,
) -> Coordinator {
    let config = CoordinatorConfig {
        assign_policy: policy.name.clone(),
        schedule_interval_ms: 10,
        ..Default::default()
    };
    let retry_manager = Arc::new(RetryManager::from_configs(&[policy]).await.unwrap());
    Coordinator::new(&config, client, retry_manager)
}

async fn coordinator(client: Arc<MockWorkerClient>) -> Coordinator {
    coordinator_with(client, RetryPolicyConfig::worker_rpc()).await
}

async fn register(coordinator: &Coordinator, id: &str, capabilities: NodeCapabilities) {
    coordinator
        .register_node(RegisterNodeRequest {
            node_id: id.to_string(),
            host: id.to_string(),
            port: 9000,
            capabilities,
        })
        .await
        .unwrap();
}

async fn submit(coordinator: &Coordinator, id: &str, priority: i64, requirements: TaskRequirements) {
    coordinator
        .submit_task(SubmitTaskRequest {
            task_id: Some(id.to_string()),
            script_id: format!("{id}.py"),
            priority,
            requirements,
        })
        .await
        .unwrap();
}

async fn set_load(coordinator: &Coordinator, id: &str, load: f64) {
    coordinator
        .heartbeat(HeartbeatRequest {
            node_id: id.to_string(),
            load,
            available_memory: 4096.0,
            status: "running".to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_task_assigned_to_matching_node_after_one_tick() {
    let client = Arc::new(MockWorkerClient::default());
    let coordinator = coordinator(client.clone()).await;
    register(&coordinator, "N1", NodeCapabilities::new(10.0, 4096.0, &["python"])).await;
    submit(&coordinator, "T1", 1, TaskRequirements::new(1024.0, &["python"])).await;

    let report = coordinator.scheduler().schedule_once().await;
    assert_eq!(report.assigned, 1);

    let task = coordinator.get_task("T1").await.unwrap();
    assert_eq!(task.node_id.as_deref(), Some("N1"));
    assert_eq!(task.status, TaskStatus::Pending);
    let node = coordinator.get_node("N1").await.unwrap();
    assert!(node.tasks.contains(&"T1".to_string()));
    assert_eq!(client.calls(), vec![("N1".to_string(), "T1".to_string())]);
}

#[tokio::test]
async fn test_least_loaded_node_wins() {
    let client = Arc::new(MockWorkerClient::default());
    let coordinator = coordinator(client.clone()).await;
    register(&coordinator, "A", NodeCapabilities::new(10.0, 4096.0, &[])).await;
    register(&coordinator, "B", NodeCapabilities::new(10.0, 4096.0, &[])).await;
    set_load(&coordinator, "A", 0.8).await;
    set_load(&coordinator, "B", 0.2).await;

    submit(&coordinator, "t1", 0, TaskRequirements::default()).await;
    coordinator.scheduler().schedule_once().await;

    assert_eq!(coordinator.get_task("t1").await.unwrap().node_id.as_deref(), Some("B"));
}

#[tokio::test]
async fn test_never_assigned_to_node_lacking_memory_or_capabilities() {
    let client = Arc::new(MockWorkerClient::default());
    let coordinator = coordinator(client.clone()).await;
    register(&coordinator, "small", NodeCapabilities::new(10.0, 512.0, &["python"])).await;
    register(&coordinator, "rusty", NodeCapabilities::new(10.0, 8192.0, &["rust"])).await;
    submit(&coordinator, "t1", 1, TaskRequirements::new(1024.0, &["python"])).await;

    for _ in 0..3 {
        let report = coordinator.scheduler().schedule_once().await;
        assert_eq!(report.assigned, 0);
        assert_eq!(report.unplaced, 1);
    }

    let task = coordinator.get_task("t1").await.unwrap();
    assert!(task.node_id.is_none());
    assert_eq!(coordinator.stats().await.queue_depth, 1);
    assert!(client.calls().is_empty());

    // a fitting node shows up later and gets the task
    register(&coordinator, "big", NodeCapabilities::new(10.0, 4096.0, &["python"])).await;
    coordinator.scheduler().schedule_once().await;
    assert_eq!(coordinator.get_task("t1").await.unwrap().node_id.as_deref(), Some("big"));
}

#[tokio::test]
async fn test_equal_priority_served_in_task_id_order() {
    let client = Arc::new(MockWorkerClient::default());
    let coordinator = coordinator(client.clone()).await;
    register(&coordinator, "n1", NodeCapabilities::new(10.0, 4096.0, &[])).await;
    submit(&coordinator, "task-b", 5, TaskRequirements::default()).await;
    submit(&coordinator, "task-c", 5, TaskRequirements::default()).await;
    submit(&coordinator, "task-a", 5, TaskRequirements::default()).await;
    submit(&coordinator, "urgent", 9, TaskRequirements::default()).await;

    let report = coordinator.scheduler().schedule_once().await;
    assert_eq!(report.assigned, 4);

    let order: Vec<String> = client.calls().into_iter().map(|(_, task)| task).collect();
    assert_eq!(order, vec!["urgent", "task-a", "task-b", "task-c"]);
}

#[tokio::test]
async fn test_deregister_reassigns_before_removal() {
    let client = Arc::new(MockWorkerClient::default());
    let coordinator = coordinator(client.clone()).await;
    register(&coordinator, "n1", NodeCapabilities::new(10.0, 4096.0, &[])).await;
    submit(&coordinator, "t1", 1, TaskRequirements::default()).await;
    submit(&coordinator, "t2", 1, TaskRequirements::default()).await;
    coordinator.scheduler().schedule_once().await;
    coordinator
        .update_task(UpdateTaskRequest {
            task_id: "t2".to_string(),
            status: TaskStatus::Completed,
            result: Some(serde_json::json!("done")),
            error: None,
        })
        .await
        .unwrap();

    let reassigned = coordinator.deregister_node("n1").await;
    assert_eq!(reassigned, vec!["t1".to_string()]);

    let t1 = coordinator.get_task("t1").await.unwrap();
    assert_eq!(t1.status, TaskStatus::Pending);
    assert!(t1.node_id.is_none());
    assert_eq!(coordinator.get_task("t2").await.unwrap().status, TaskStatus::Completed);
    assert!(matches!(
        coordinator.get_node("n1").await,
        Err(FleetError::NodeNotFound { .. })
    ));

    // unknown node is a no-op
    assert!(coordinator.deregister_node("n1").await.is_empty());
}

#[tokio::test]
async fn test_heartbeat_timeout_marks_unhealthy_and_requeues_once() {
    let client = Arc::new(MockWorkerClient::default());
    let coordinator = coordinator(client.clone()).await;
    register(&coordinator, "n1", NodeCapabilities::new(10.0, 4096.0, &[])).await;
    submit(&coordinator, "t1", 1, TaskRequirements::default()).await;
    coordinator.scheduler().schedule_once().await;
    assert_eq!(coordinator.get_task("t1").await.unwrap().node_id.as_deref(), Some("n1"));

    let monitor = coordinator.health_monitor();
    let now = Utc::now();
    assert!(monitor.check_once(now).await.is_empty());
    assert!(monitor
        .check_once(now + chrono::Duration::seconds(29))
        .await
        .is_empty());

    let failed = monitor.check_once(now + chrono::Duration::seconds(31)).await;
    assert_eq!(failed, vec!["n1".to_string()]);

    let node = coordinator.get_node("n1").await.unwrap();
    assert_eq!(node.health_status, HealthStatus::Unhealthy);
    assert!(node.tasks.is_empty());
    let task = coordinator.get_task("t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.node_id.is_none());
    assert_eq!(coordinator.stats().await.queue_depth, 1);

    // already unhealthy: a later check does not requeue again
    let again = monitor.check_once(now + chrono::Duration::seconds(62)).await;
    assert!(again.is_empty());
    assert_eq!(coordinator.stats().await.queue_depth, 1);
}

#[tokio::test]
async fn test_unhealthy_node_excluded_and_not_revived_by_heartbeat() {
    let client = Arc::new(MockWorkerClient::default());
    let coordinator = coordinator(client.clone()).await;
    register(&coordinator, "n1", NodeCapabilities::new(10.0, 4096.0, &[])).await;
    coordinator
        .health_monitor()
        .check_once(Utc::now() + chrono::Duration::seconds(31))
        .await;

    set_load(&coordinator, "n1", 0.0).await;
    assert_eq!(
        coordinator.get_node("n1").await.unwrap().health_status,
        HealthStatus::Unhealthy
    );

    submit(&coordinator, "t1", 1, TaskRequirements::default()).await;
    let report = coordinator.scheduler().schedule_once().await;
    assert_eq!(report.assigned, 0);
    assert!(client.calls().is_empty());

    // re-registration is the only way back
    register(&coordinator, "n1", NodeCapabilities::new(10.0, 4096.0, &[])).await;
    coordinator.scheduler().schedule_once().await;
    assert_eq!(coordinator.get_task("t1").await.unwrap().node_id.as_deref(), Some("n1"));
}

#[tokio::test]
async fn test_failed_push_rolls_back_and_requeues() {
    let client = Arc::new(MockWorkerClient::default());
    client.fail_host("n1");
    let coordinator = coordinator(client.clone()).await;
    register(&coordinator, "n1", NodeCapabilities::new(10.0, 4096.0, &[])).await;
    submit(&coordinator, "t1", 3, TaskRequirements::default()).await;

    let report = coordinator.scheduler().schedule_once().await;
    assert_eq!(report.assigned, 0);
    assert_eq!(report.requeued, 1);

    let task = coordinator.get_task("t1").await.unwrap();
    assert!(task.node_id.is_none());
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(coordinator.get_node("n1").await.unwrap().tasks.is_empty());
    assert_eq!(coordinator.stats().await.queue_depth, 1);
    assert_eq!(client.calls().len(), 1);
}

#[tokio::test]
async fn test_dead_worker_trips_its_breaker() {
    let client = Arc::new(MockWorkerClient::default());
    client.fail_host("dead");
    let mut policy = RetryPolicyConfig::worker_rpc();
    policy.circuit_breaker = Some(CircuitBreakerConfig {
        failure_threshold: 2,
        reset_timeout: Duration::from_secs(60),
        ..Default::default()
    });
    let coordinator = coordinator_with(client.clone(), policy).await;
    register(&coordinator, "dead", NodeCapabilities::new(10.0, 4096.0, &[])).await;
    submit(&coordinator, "t1", 1, TaskRequirements::default()).await;

    coordinator.scheduler().schedule_once().await;
    coordinator.scheduler().schedule_once().await;
    assert_eq!(client.calls().len(), 2);

    let breaker = coordinator.scheduler().node_breaker("dead").await.unwrap();
    assert_eq!(breaker.state().await, CircuitState::Open);

    // fail-fast: the worker is not contacted, the task still goes back to the queue
    let report = coordinator.scheduler().schedule_once().await;
    assert_eq!(report.requeued, 1);
    assert_eq!(client.calls().len(), 2);
    assert_eq!(coordinator.stats().await.queue_depth, 1);

    // re-registration starts from a fresh breaker
    register(&coordinator, "dead", NodeCapabilities::new(10.0, 4096.0, &[])).await;
    assert!(coordinator.scheduler().node_breaker("dead").await.is_none());
}

#[tokio::test]
async fn test_background_loops_assign_and_stop() {
    let client = Arc::new(MockWorkerClient::default());
    let coordinator = coordinator(client.clone()).await;
    register(&coordinator, "n1", NodeCapabilities::new(10.0, 4096.0, &[])).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handles = coordinator.start(shutdown_rx);

    submit(&coordinator, "t1", 1, TaskRequirements::default()).await;
    let mut assigned = false;
    for _ in 0..100 {
        if coordinator.get_task("t1").await.unwrap().node_id.is_some() {
            assigned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(assigned);

    shutdown_tx.send(()).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
    }
}

/// 第二次选点时 panic，其余时候找不到节点
#[derive(Default)]
struct PanickingStrategy {
    calls: AtomicUsize,
}

impl PlacementStrategy for PanickingStrategy {
    fn select_node(
        &self,
        _requirements: &TaskRequirements,
        _nodes: &BTreeMap<String, NodeState>,
    ) -> Option<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            panic!("placement blew up");
        }
        None
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

#[tokio::test]
async fn test_panicking_pass_does_not_strand_tasks() {
    let config = CoordinatorConfig {
        schedule_interval_ms: 10,
        ..Default::default()
    };
    let retry_manager = Arc::new(
        RetryManager::from_configs(&[RetryPolicyConfig::worker_rpc()])
            .await
            .unwrap(),
    );
    let strategy = Arc::new(PanickingStrategy::default());
    let coordinator = Coordinator::with_strategy(
        &config,
        Arc::new(MockWorkerClient::default()),
        retry_manager,
        strategy.clone(),
    );
    // first pass: "high" is deferred, then "low" panics mid-placement
    submit(&coordinator, "high", 5, TaskRequirements::default()).await;
    submit(&coordinator, "low", 1, TaskRequirements::default()).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handles = coordinator.start(shutdown_rx);
    for _ in 0..100 {
        if strategy.calls.load(Ordering::SeqCst) >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(strategy.calls.load(Ordering::SeqCst) >= 4);

    shutdown_tx.send(()).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
    }

    let state = coordinator.registry().lock().await;
    assert!(state.is_queued("high"));
    assert!(state.is_queued("low"));
    assert_eq!(state.queue_depth(), 2);
}
