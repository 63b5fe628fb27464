use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fleet_core::models::TaskRequirements;
use fleet_core::{FleetError, FleetResult};

/// 执行器上报的任务进度
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionState {
    Running,
    Completed(Value),
    Failed(String),
}

/// 任务执行器
///
/// `execute` 只负责启动，完成情况通过 `poll` 查询。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        task_id: &str,
        script_id: &str,
        requirements: &TaskRequirements,
    ) -> FleetResult<()>;

    async fn poll(&self, task_id: &str) -> FleetResult<ExecutionState>;

    async fn cancel(&self, task_id: &str) -> FleetResult<()>;

    fn name(&self) -> &str;
}

/// Runs `<interpreter> <scripts_dir>/<script_id>` as a child process.
///
/// stdout becomes the result; a non-zero exit reports stderr as the error.
pub struct ProcessExecutor {
    interpreter: String,
    scripts_dir: PathBuf,
    timeout: Duration,
    jobs: Mutex<HashMap<String, JoinHandle<ExecutionState>>>,
}

impl ProcessExecutor {
    pub fn new(interpreter: impl Into<String>, scripts_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            scripts_dir: scripts_dir.into(),
            timeout,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// script_id 必须是脚本目录下的相对路径
    fn script_path(&self, script_id: &str) -> FleetResult<PathBuf> {
        let relative = Path::new(script_id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if script_id.trim().is_empty() || escapes {
            return Err(FleetError::Validation(format!("非法的脚本ID: {script_id}")));
        }
        Ok(self.scripts_dir.join(relative))
    }

    async fn run(interpreter: String, script: PathBuf, timeout: Duration) -> ExecutionState {
        let child = Command::new(&interpreter)
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return ExecutionState::Failed(format!(
                    "启动进程失败: {interpreter} {}: {e}",
                    script.display()
                ))
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
                if output.status.success() {
                    ExecutionState::Completed(Value::String(stdout))
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
                    let code = output
                        .status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string());
                    if stderr.is_empty() {
                        ExecutionState::Failed(format!("进程退出码: {code}"))
                    } else {
                        ExecutionState::Failed(format!("进程退出码: {code}: {stderr}"))
                    }
                }
            }
            Ok(Err(e)) => ExecutionState::Failed(format!("等待进程失败: {e}")),
            Err(_) => ExecutionState::Failed(format!("执行超时 ({}s)", timeout.as_secs_f64())),
        }
    }
}

#[async_trait]
impl TaskExecutor for ProcessExecutor {
    async fn execute(
        &self,
        task_id: &str,
        script_id: &str,
        _requirements: &TaskRequirements,
    ) -> FleetResult<()> {
        let script = self.script_path(script_id)?;
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(task_id) {
            return Err(FleetError::TaskExecution(format!("任务已在执行: {task_id}")));
        }

        info!(task_id, script = %script.display(), "启动任务进程");
        let handle = tokio::spawn(Self::run(self.interpreter.clone(), script, self.timeout));
        jobs.insert(task_id.to_string(), handle);
        Ok(())
    }

    async fn poll(&self, task_id: &str) -> FleetResult<ExecutionState> {
        let mut jobs = self.jobs.lock().await;
        let finished = match jobs.get(task_id) {
            Some(handle) => handle.is_finished(),
            None => return Err(FleetError::task_not_found(task_id)),
        };
        if !finished {
            return Ok(ExecutionState::Running);
        }

        let Some(handle) = jobs.remove(task_id) else {
            return Err(FleetError::task_not_found(task_id));
        };
        match handle.await {
            Ok(state) => Ok(state),
            Err(e) => Ok(ExecutionState::Failed(format!("执行任务异常退出: {e}"))),
        }
    }

    async fn cancel(&self, task_id: &str) -> FleetResult<()> {
        match self.jobs.lock().await.remove(task_id) {
            Some(handle) => {
                // dropping the future kills the child
                handle.abort();
                debug!(task_id, "任务进程已取消");
                Ok(())
            }
            None => {
                warn!(task_id, "取消的任务没有在执行");
                Err(FleetError::task_not_found(task_id))
            }
        }
    }

    fn name(&self) -> &str {
        "process"
    }
}
