use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use fleet_core::models::{
    AssignTaskRequest, DeregisterNodeRequest, HeartbeatRequest, RegisterNodeRequest,
    TaskRequirements, TaskStatus, UpdateTaskRequest,
};
use fleet_core::{
    FleetError, FleetResult, RetryManager, RetryPolicyConfig, RetryStrategy, WorkerConfig,
};
use fleet_worker::{ExecutionState, TaskExecutor, CoordinatorClient, WorkerNode};

#[derive(Default)]
struct MockExecutor {
    started: Mutex<Vec<String>>,
    scripts: Mutex<std::collections::HashMap<String, String>>,
    cancelled: Mutex<Vec<String>>,
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn execute(
        &self,
        task_id: &str,
        script_id: &str,
        _requirements: &TaskRequirements,
    ) -> FleetResult<()> {
        if script_id == "broken.py" {
            return Err(FleetError::TaskExecution("interpreter missing".to_string()));
        }
        self.started.lock().unwrap().push(task_id.to_string());
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), script_id.to_string());
        Ok(())
    }

    async fn poll(&self, task_id: &str) -> FleetResult<ExecutionState> {
        let script = self.scripts.lock().unwrap().get(task_id).cloned();
        match script.as_deref() {
            Some("ok.py") => Ok(ExecutionState::Completed(json!("ok"))),
            Some("fail.py") => Ok(ExecutionState::Failed("boom".to_string())),
            Some(_) => Ok(ExecutionState::Running),
            None => Err(FleetError::task_not_found(task_id)),
        }
    }

    async fn cancel(&self, task_id: &str) -> FleetResult<()> {
        self.cancelled.lock().unwrap().push(task_id.to_string());
        self.scripts.lock().unwrap().remove(task_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[derive(Default)]
struct MockCoordinatorClient {
    registrations: Mutex<Vec<RegisterNodeRequest>>,
    heartbeats: Mutex<Vec<HeartbeatRequest>>,
    updates: Mutex<Vec<UpdateTaskRequest>>,
    deregistrations: Mutex<Vec<String>>,
    fail_register: AtomicBool,
    fail_updates: AtomicBool,
    reject_updates: AtomicBool,
    fail_deregister: AtomicBool,
}

impl MockCoordinatorClient {
    fn statuses(&self, task_id: &str) -> Vec<TaskStatus> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.task_id == task_id)
            .map(|u| u.status)
            .collect()
    }
}

#[async_trait]
impl CoordinatorClient for MockCoordinatorClient {
    async fn register(&self, request: &RegisterNodeRequest) -> FleetResult<()> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(FleetError::Network("connection refused".to_string()));
        }
        self.registrations.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn heartbeat(&self, request: &HeartbeatRequest) -> FleetResult<()> {
        self.heartbeats.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn update_task(&self, request: &UpdateTaskRequest) -> FleetResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(FleetError::Network("connection reset".to_string()));
        }
        if self.reject_updates.load(Ordering::SeqCst) {
            return Err(FleetError::Rpc {
                status: 404,
                message: "task not found".to_string(),
            });
        }
        self.updates.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn deregister(&self, request: &DeregisterNodeRequest) -> FleetResult<()> {
        if self.fail_deregister.load(Ordering::SeqCst) {
            return Err(FleetError::Network("connection refused".to_string()));
        }
        self.deregistrations.lock().unwrap().push(request.node_id.clone());
        Ok(())
    }
}

struct Harness {
    worker: Arc<WorkerNode>,
    client: Arc<MockCoordinatorClient>,
    executor: Arc<MockExecutor>,
}

async fn harness() -> Harness {
    let config = WorkerConfig {
        node_id: "worker-test".to_string(),
        task_poll_interval_ms: 10,
        ..Default::default()
    };
    let policy = RetryPolicyConfig {
        name: config.rpc_policy.clone(),
        max_attempts: 2,
        strategy: RetryStrategy::Linear,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
        retryable_errors: vec!["network".to_string(), "timeout".to_string()],
        retryable_patterns: Vec::new(),
        max_total_time: Duration::from_secs(1),
        circuit_breaker: None,
    };
    let retry_manager = Arc::new(RetryManager::from_configs(&[policy]).await.unwrap());
    let client = Arc::new(MockCoordinatorClient::default());
    let executor = Arc::new(MockExecutor::default());
    let worker = Arc::new(WorkerNode::new(
        config,
        client.clone(),
        executor.clone(),
        retry_manager,
    ));
    Harness {
        worker,
        client,
        executor,
    }
}

fn assignment(task_id: &str, script_id: &str) -> AssignTaskRequest {
    AssignTaskRequest {
        task_id: task_id.to_string(),
        script_id: script_id.to_string(),
        requirements: TaskRequirements::default(),
    }
}

#[tokio::test]
async fn test_start_registers_and_stop_deregisters() {
    let h = harness().await;
    h.worker.start().await.unwrap();
    assert!(h.worker.is_running().await);

    let registrations = h.client.registrations.lock().unwrap().clone();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].node_id, "worker-test");
    assert_eq!(registrations[0].port, 8001);

    assert!(h.worker.start().await.is_err());

    h.worker.stop().await.unwrap();
    assert!(!h.worker.is_running().await);
    assert_eq!(
        h.client.deregistrations.lock().unwrap().clone(),
        vec!["worker-test".to_string()]
    );
}

#[tokio::test]
async fn test_registration_failure_aborts_start() {
    let h = harness().await;
    h.client.fail_register.store(true, Ordering::SeqCst);

    let result = h.worker.start().await;
    assert!(matches!(result, Err(FleetError::Network(_))));
    assert!(!h.worker.is_running().await);
}

#[tokio::test]
async fn test_deregistration_failure_is_not_fatal() {
    let h = harness().await;
    h.worker.start().await.unwrap();
    h.client.fail_deregister.store(true, Ordering::SeqCst);

    assert!(h.worker.stop().await.is_ok());
    assert!(!h.worker.is_running().await);
}

#[tokio::test]
async fn test_task_runs_and_reports_completion() {
    let h = harness().await;
    h.worker.assign_task(assignment("t1", "ok.py")).await.unwrap();
    assert_eq!(h.worker.get_task("t1").await.unwrap().status, TaskStatus::Pending);

    assert_eq!(h.worker.process_once().await, 0);
    assert_eq!(h.executor.started.lock().unwrap().clone(), vec!["t1".to_string()]);
    let local = h.worker.get_task("t1").await.unwrap();
    assert_eq!(local.status, TaskStatus::Running);
    assert!(local.started_at.is_some());

    assert_eq!(h.worker.process_once().await, 1);
    assert!(h.worker.get_task("t1").await.is_none());
    assert_eq!(
        h.client.statuses("t1"),
        vec![TaskStatus::Running, TaskStatus::Completed]
    );
    let updates = h.client.updates.lock().unwrap().clone();
    assert_eq!(updates[1].result, Some(json!("ok")));
}

#[tokio::test]
async fn test_failures_are_reported_with_error() {
    let h = harness().await;
    h.worker.assign_task(assignment("t1", "fail.py")).await.unwrap();
    h.worker.assign_task(assignment("t2", "broken.py")).await.unwrap();

    h.worker.process_once().await;
    h.worker.process_once().await;

    assert_eq!(h.client.statuses("t1"), vec![TaskStatus::Running, TaskStatus::Failed]);
    assert_eq!(h.client.statuses("t2"), vec![TaskStatus::Failed]);
    let updates = h.client.updates.lock().unwrap().clone();
    let t1_failed = updates
        .iter()
        .find(|u| u.task_id == "t1" && u.status == TaskStatus::Failed)
        .unwrap();
    assert_eq!(t1_failed.error.as_deref(), Some("boom"));
    assert!(h.worker.tasks().await.is_empty());
}

#[tokio::test]
async fn test_terminal_report_kept_until_acknowledged() {
    let h = harness().await;
    h.client.fail_updates.store(true, Ordering::SeqCst);
    h.worker.assign_task(assignment("t1", "ok.py")).await.unwrap();

    h.worker.process_once().await;
    h.worker.process_once().await;
    h.worker.process_once().await;
    let local = h.worker.get_task("t1").await.unwrap();
    assert_eq!(local.status, TaskStatus::Completed);
    assert!(h.client.statuses("t1").is_empty());

    h.client.fail_updates.store(false, Ordering::SeqCst);
    assert_eq!(h.worker.process_once().await, 1);
    assert!(h.worker.get_task("t1").await.is_none());
    assert_eq!(h.client.statuses("t1"), vec![TaskStatus::Completed]);
    // the task was executed once
    assert_eq!(h.executor.started.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejected_report_is_dropped() {
    let h = harness().await;
    h.client.reject_updates.store(true, Ordering::SeqCst);
    h.worker.assign_task(assignment("t1", "ok.py")).await.unwrap();

    h.worker.process_once().await;
    assert_eq!(h.worker.process_once().await, 1);
    assert!(h.worker.get_task("t1").await.is_none());
}

#[tokio::test]
async fn test_stop_task_cancels_and_reports() {
    let h = harness().await;
    h.worker.assign_task(assignment("t1", "hang.py")).await.unwrap();
    h.worker.process_once().await;
    h.worker.process_once().await;
    assert_eq!(h.worker.get_task("t1").await.unwrap().status, TaskStatus::Running);

    h.worker.stop_task("t1").await.unwrap();
    assert_eq!(h.executor.cancelled.lock().unwrap().clone(), vec!["t1".to_string()]);
    assert_eq!(h.client.statuses("t1"), vec![TaskStatus::Running, TaskStatus::Stopped]);
    assert!(h.worker.get_task("t1").await.is_none());

    let again = h.worker.stop_task("t1").await;
    assert!(matches!(again, Err(FleetError::TaskNotFound { .. })));
}

#[tokio::test]
async fn test_stop_pending_task_skips_executor() {
    let h = harness().await;
    h.worker.assign_task(assignment("t1", "hang.py")).await.unwrap();
    h.worker.stop_task("t1").await.unwrap();

    assert!(h.executor.cancelled.lock().unwrap().is_empty());
    assert!(h.executor.started.lock().unwrap().is_empty());
    assert_eq!(h.client.statuses("t1"), vec![TaskStatus::Stopped]);
}

#[tokio::test]
async fn test_stopped_report_resent_until_acknowledged() {
    let h = harness().await;
    h.worker.assign_task(assignment("t1", "hang.py")).await.unwrap();
    h.worker.process_once().await;
    h.client.fail_updates.store(true, Ordering::SeqCst);

    h.worker.stop_task("t1").await.unwrap();
    assert_eq!(h.executor.cancelled.lock().unwrap().len(), 1);
    assert_eq!(h.worker.get_task("t1").await.unwrap().status, TaskStatus::Stopped);
    assert_eq!(h.client.statuses("t1"), vec![TaskStatus::Running]);

    // a repeated stop neither cancels again nor loses the entry
    h.worker.stop_task("t1").await.unwrap();
    assert_eq!(h.executor.cancelled.lock().unwrap().len(), 1);
    assert!(h.worker.get_task("t1").await.is_some());

    h.client.fail_updates.store(false, Ordering::SeqCst);
    assert_eq!(h.worker.process_once().await, 1);
    assert!(h.worker.get_task("t1").await.is_none());
    assert_eq!(h.client.statuses("t1"), vec![TaskStatus::Running, TaskStatus::Stopped]);
}

#[tokio::test]
async fn test_duplicate_assignment_ignored() {
    let h = harness().await;
    h.worker.assign_task(assignment("t1", "hang.py")).await.unwrap();
    h.worker.process_once().await;
    h.worker.assign_task(assignment("t1", "hang.py")).await.unwrap();

    assert_eq!(h.worker.get_task("t1").await.unwrap().status, TaskStatus::Running);
    h.worker.process_once().await;
    assert_eq!(h.executor.started.lock().unwrap().len(), 1);

    let invalid = h.worker.assign_task(assignment("", "x.py")).await;
    assert!(matches!(invalid, Err(FleetError::Validation(_))));
}

#[tokio::test]
async fn test_heartbeat_once_posts_sample() {
    let h = harness().await;
    h.worker.heartbeat_once().await.unwrap();

    let heartbeats = h.client.heartbeats.lock().unwrap().clone();
    assert_eq!(heartbeats.len(), 1);
    assert_eq!(heartbeats[0].node_id, "worker-test");
    assert_eq!(heartbeats[0].status, "running");
    assert!(heartbeats[0].load >= 0.0);
    assert!(heartbeats[0].available_memory >= 0.0);
}

#[tokio::test]
async fn test_processing_loop_drives_tasks() {
    let h = harness().await;
    h.worker.start().await.unwrap();
    h.worker.assign_task(assignment("t1", "ok.py")).await.unwrap();

    let mut done = false;
    for _ in 0..200 {
        if h.client.statuses("t1").contains(&TaskStatus::Completed) {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(done);

    let status = h.worker.status().await;
    assert_eq!(status.node_id, "worker-test");
    assert!(status.running);
    assert_eq!(status.executor, "mock");

    h.worker.stop().await.unwrap();
    let seen: HashSet<TaskStatus> = h.client.statuses("t1").into_iter().collect();
    assert!(seen.contains(&TaskStatus::Running));
}
