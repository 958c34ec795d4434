//! Orchestrator: single-tool execution and workflow runs over the registry.

pub mod execution;
mod runner;
pub mod workflow;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::bus::Bus;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::event::{CoreEvent, WorkflowEventPayload, WorkflowFailedPayload};
use crate::registry::ToolRegistry;
use crate::types::{ExecutionContext, ExecutionResult};

pub use execution::{ExecutionStatus, StepOutcome, StepRecord, WorkflowExecution};
pub use workflow::{RetryPolicy, StepCondition, Workflow, WorkflowStep};

use runner::RunnerContext;

struct ActiveRun {
    cancel: Arc<AtomicBool>,
    workflow_id: String,
}

/// Executes single tools and workflows through the registry. Owns the set of
/// in-flight runs; it never mutates registry entries directly.
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    config: Arc<Config>,
    bus: Bus,
    semaphore: Arc<Semaphore>,
    active: Mutex<HashMap<String, ActiveRun>>,
    executions: Mutex<HashMap<String, WorkflowExecution>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ToolRegistry>, config: Arc<Config>, bus: Bus) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.orchestration.max_concurrent_tools.max(1)));
        Self {
            registry,
            config,
            bus,
            semaphore,
            active: Mutex::new(HashMap::new()),
            executions: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a single tool outside any workflow.
    ///
    /// Not-found, unavailable, and invalid-input errors surface as `Err`;
    /// a remote-side failure comes back as a failed [`ExecutionResult`] so
    /// callers see the same shape a workflow step would record.
    pub async fn execute_tool(
        &self,
        tool_id: &str,
        arguments: &Value,
        session_id: Option<String>,
    ) -> CoreResult<ExecutionResult> {
        let context = ExecutionContext::for_tool(tool_id, session_id);
        let started = std::time::Instant::now();
        match self.registry.execute_tool(tool_id, arguments, &context).await {
            Ok(result) => Ok(result),
            Err(
                error @ (CoreError::NotFound(_)
                | CoreError::Unavailable(_)
                | CoreError::InvalidInput(_)),
            ) => Err(error),
            Err(error) => {
                let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                let mut result = ExecutionResult::failed(tool_id, error.to_string(), duration_ms);
                result.session_id = context.session_id;
                Ok(result)
            }
        }
    }

    /// Run a workflow to completion and return its final execution record.
    ///
    /// The record is retrievable by id while the run is in flight and after
    /// it reaches a terminal status.
    pub async fn execute_workflow(
        &self,
        workflow: Workflow,
        session_id: Option<String>,
    ) -> CoreResult<WorkflowExecution> {
        workflow.validate()?;

        let mut execution = WorkflowExecution::new(&workflow.id, session_id);
        execution.transition(ExecutionStatus::Running)?;
        let execution_id = execution.id.clone();
        let cancel = Arc::new(AtomicBool::new(false));

        self.lock_active().insert(
            execution_id.clone(),
            ActiveRun {
                cancel: Arc::clone(&cancel),
                workflow_id: workflow.id.clone(),
            },
        );
        self.store(execution.clone());
        self.bus
            .publish(CoreEvent::WorkflowStarted(WorkflowEventPayload {
                execution_id: execution_id.clone(),
                workflow_id: workflow.id.clone(),
            }));

        let ctx = RunnerContext {
            registry: Arc::clone(&self.registry),
            bus: self.bus.clone(),
            semaphore: Arc::clone(&self.semaphore),
            error_handling: self.config.orchestration.error_handling,
            cancel,
        };
        let budget = Duration::from_secs(self.config.orchestration.workflow_timeout_secs);
        let timed_out = tokio::time::timeout(budget, runner::run(&ctx, &workflow, &mut execution))
            .await
            .is_err();
        if timed_out && !execution.status.is_terminal() {
            execution.errors.push(format!(
                "workflow timed out after {}s",
                self.config.orchestration.workflow_timeout_secs
            ));
            let _ = execution.transition(ExecutionStatus::Failed);
        }

        self.lock_active().remove(&execution_id);
        self.store(execution.clone());

        match execution.status {
            ExecutionStatus::Completed => {
                self.bus
                    .publish(CoreEvent::WorkflowCompleted(WorkflowEventPayload {
                        execution_id: execution_id.clone(),
                        workflow_id: workflow.id.clone(),
                    }));
            }
            ExecutionStatus::Failed => {
                self.bus.publish(CoreEvent::WorkflowFailed(WorkflowFailedPayload {
                    execution_id: execution_id.clone(),
                    workflow_id: workflow.id.clone(),
                    error: execution
                        .errors
                        .last()
                        .cloned()
                        .unwrap_or_else(|| "workflow failed".to_string()),
                }));
            }
            // Cancellation already published its event.
            _ => {}
        }

        Ok(execution)
    }

    /// Request cooperative cancellation of an in-flight run. The flag is
    /// checked between steps; in-flight remote calls are not interrupted.
    pub fn cancel_execution(&self, execution_id: &str) -> CoreResult<()> {
        let workflow_id = {
            let mut active = self.lock_active();
            let run = active.remove(execution_id).ok_or_else(|| {
                CoreError::NotFound(format!("active execution '{execution_id}'"))
            })?;
            run.cancel.store(true, Ordering::SeqCst);
            run.workflow_id
        };

        {
            let mut executions = self.lock_executions();
            if let Some(execution) = executions.get_mut(execution_id) {
                if !execution.status.is_terminal() {
                    let _ = execution.transition(ExecutionStatus::Cancelled);
                }
            }
        }

        self.bus
            .publish(CoreEvent::WorkflowCancelled(WorkflowEventPayload {
                execution_id: execution_id.to_string(),
                workflow_id,
            }));
        Ok(())
    }

    pub fn get_execution(&self, execution_id: &str) -> Option<WorkflowExecution> {
        self.lock_executions().get(execution_id).cloned()
    }

    pub fn list_executions(&self) -> Vec<WorkflowExecution> {
        let mut all: Vec<WorkflowExecution> = self.lock_executions().values().cloned().collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        all
    }

    pub fn active_count(&self) -> usize {
        self.lock_active().len()
    }

    fn store(&self, execution: WorkflowExecution) {
        let mut executions = self.lock_executions();
        // A cancellation may have marked the stored record terminal while
        // the runner was finishing; terminal status wins.
        if let Some(existing) = executions.get(&execution.id) {
            if existing.status.is_terminal() && !execution.status.is_terminal() {
                return;
            }
            if existing.status == ExecutionStatus::Cancelled {
                let mut merged = execution;
                merged.status = ExecutionStatus::Cancelled;
                executions.insert(merged.id.clone(), merged);
                return;
            }
        }
        executions.insert(execution.id.clone(), execution);
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveRun>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_executions(&self) -> std::sync::MutexGuard<'_, HashMap<String, WorkflowExecution>> {
        match self.executions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ErrorHandling, OrchestrationConfig, RemoteConfig, StorageConfig};
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use chrono::Utc;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicU32;
    use tempfile::tempdir;

    async fn spawn_remote(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        addr
    }

    fn tool(name: &str) -> Value {
        json!({
            "name": name,
            "description": "test tool",
            "inputSchema": {"type": "object"},
            "serverId": "s1",
        })
    }

    fn discovery_route(names: &[&str]) -> Router {
        let tools: Vec<Value> = names.iter().map(|n| tool(n)).collect();
        let body = json!({
            "tools": tools,
            "servers": [{"id": "s1", "name": "stub", "lastSeen": Utc::now()}],
        });
        Router::new().route(
            "/tools",
            get(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        )
    }

    /// Remote that echoes back which tool ran, so result ordering is visible.
    fn echo_execute_route(router: Router) -> Router {
        router.route(
            "/tools/:id/execute",
            post(|Path(id): Path<String>| async move {
                Json(json!({
                    "success": true,
                    "result": {"tool": id},
                    "executionTime": 1,
                }))
            }),
        )
    }

    async fn setup(
        remote: Router,
        orchestration: OrchestrationConfig,
        dir: &std::path::Path,
    ) -> (Arc<ToolRegistry>, Orchestrator) {
        let addr = spawn_remote(remote).await;
        let config = Arc::new(Config {
            remote: RemoteConfig {
                base_url: format!("http://{addr}"),
                ..RemoteConfig::default()
            },
            orchestration,
            storage: StorageConfig {
                snapshot_path: dir.join("registry.json"),
                snapshot_debounce_ms: 10,
            },
            ..Config::default()
        });
        let bus = Bus::new(64);
        let registry =
            Arc::new(ToolRegistry::new(Arc::clone(&config), bus.clone()).expect("registry"));
        registry.discover().await.expect("discover");
        let orchestrator = Orchestrator::new(Arc::clone(&registry), config, bus);
        (registry, orchestrator)
    }

    fn step(id: &str, tool: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            tool_id: format!("s1:{tool}"),
            arguments: json!({}),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            condition: None,
            on_success: None,
            on_error: None,
            timeout_ms: None,
            retry: RetryPolicy::default(),
        }
    }

    fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
        Workflow {
            id: "wf-1".to_string(),
            name: "test workflow".to_string(),
            steps,
            version: None,
        }
    }

    #[tokio::test]
    async fn single_tool_execution_passes_through() {
        let dir = tempdir().expect("tempdir");
        let remote = echo_execute_route(discovery_route(&["echo"]));
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;

        let result = orchestrator
            .execute_tool("s1:echo", &json!({"msg": "hi"}), Some("sess-1".to_string()))
            .await
            .expect("execute");
        assert!(result.success);
        assert_eq!(result.result.expect("result")["tool"], "s1:echo");
    }

    #[tokio::test]
    async fn single_tool_remote_failure_becomes_failed_result() {
        let dir = tempdir().expect("tempdir");
        let remote = discovery_route(&["echo"]).route(
            "/tools/:id/execute",
            post(|| async { StatusCode::BAD_GATEWAY }),
        );
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;

        let result = orchestrator
            .execute_tool("s1:echo", &json!({}), None)
            .await
            .expect("should not be Err");
        assert!(!result.success);
        assert!(result.error.expect("error").contains("502"));
    }

    #[tokio::test]
    async fn single_tool_not_found_propagates() {
        let dir = tempdir().expect("tempdir");
        let remote = echo_execute_route(discovery_route(&["echo"]));
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;

        let error = orchestrator
            .execute_tool("s1:ghost", &json!({}), None)
            .await
            .expect_err("not found");
        assert!(matches!(error, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn dependent_step_result_never_precedes_its_dependency() {
        let dir = tempdir().expect("tempdir");
        let remote = echo_execute_route(discovery_route(&["a", "b", "c"]));
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;

        let wf = workflow(vec![
            step("a", "a", &[]),
            step("b", "b", &["a"]),
            step("c", "c", &["b"]),
        ]);
        let execution = orchestrator.execute_workflow(wf, None).await.expect("run");

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let order: Vec<&str> = execution.results.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(execution.ended_at.is_some());
    }

    #[tokio::test]
    async fn diamond_dependencies_complete_with_join_last() {
        let dir = tempdir().expect("tempdir");
        let remote = echo_execute_route(discovery_route(&["a", "b", "c", "d"]));
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;

        let wf = workflow(vec![
            step("a", "a", &[]),
            step("b", "b", &["a"]),
            step("c", "c", &["a"]),
            step("d", "d", &["b", "c"]),
        ]);
        let execution = orchestrator.execute_workflow(wf, None).await.expect("run");

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let position = |id: &str| {
            execution
                .results
                .iter()
                .position(|r| r.step_id == id)
                .expect("present")
        };
        assert!(position("a") < position("b"));
        assert!(position("a") < position("c"));
        assert!(position("d") > position("b"));
        assert!(position("d") > position("c"));
    }

    #[tokio::test]
    async fn false_condition_skips_step_without_failing() {
        let dir = tempdir().expect("tempdir");
        let remote = echo_execute_route(discovery_route(&["a", "b"]));
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;

        let mut conditional = step("b", "b", &["a"]);
        conditional.condition = Some("!a.success".to_string());
        let wf = workflow(vec![step("a", "a", &[]), conditional]);
        let execution = orchestrator.execute_workflow(wf, None).await.expect("run");

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.errors.is_empty());
        let skipped = execution
            .results
            .iter()
            .find(|r| r.step_id == "b")
            .expect("recorded");
        assert_eq!(skipped.outcome, StepOutcome::Skipped);
    }

    #[tokio::test]
    async fn flaky_step_retries_until_success() {
        let dir = tempdir().expect("tempdir");
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let remote = discovery_route(&["flaky"]).route(
            "/tools/:id/execute",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StatusCode::INTERNAL_SERVER_ERROR)
                    } else {
                        Ok(Json(json!({"success": true, "result": {}, "executionTime": 1})))
                    }
                }
            }),
        );
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;

        let mut flaky = step("a", "flaky", &[]);
        flaky.retry = RetryPolicy {
            max_retries: 3,
            backoff_ms: 10,
            exponential: true,
        };
        let execution = orchestrator
            .execute_workflow(workflow(vec![flaky]), None)
            .await
            .expect("run");

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.results[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn strict_mode_halts_after_retry_exhaustion() {
        let dir = tempdir().expect("tempdir");
        let remote = discovery_route(&["bad", "never"]).route(
            "/tools/:id/execute",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;

        let mut failing = step("a", "bad", &[]);
        failing.retry = RetryPolicy {
            max_retries: 1,
            backoff_ms: 10,
            exponential: false,
        };
        let wf = workflow(vec![failing, step("b", "never", &["a"])]);
        let execution = orchestrator.execute_workflow(wf, None).await.expect("run");

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(!execution.errors.is_empty());
        assert_eq!(execution.results[0].attempts, 2);
        // The dependent step never ran.
        assert!(!execution.results.iter().any(|r| r.step_id == "b"));
    }

    #[tokio::test]
    async fn lenient_mode_continues_past_failures() {
        let dir = tempdir().expect("tempdir");
        let remote = discovery_route(&["bad", "after"]).route(
            "/tools/:id/execute",
            post(|Path(id): Path<String>| async move {
                if id == "s1:bad" {
                    Err(StatusCode::INTERNAL_SERVER_ERROR)
                } else {
                    Ok(Json(json!({"success": true, "result": {}, "executionTime": 1})))
                }
            }),
        );
        let orchestration = OrchestrationConfig {
            error_handling: ErrorHandling::Lenient,
            ..OrchestrationConfig::default()
        };
        let (_registry, orchestrator) = setup(remote, orchestration, dir.path()).await;

        let wf = workflow(vec![step("a", "bad", &[]), step("b", "after", &["a"])]);
        let execution = orchestrator.execute_workflow(wf, None).await.expect("run");

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.errors.len(), 1);
        assert!(execution.results.iter().any(|r| r.step_id == "b"));
    }

    #[tokio::test]
    async fn error_branch_handles_failure_and_completes() {
        let dir = tempdir().expect("tempdir");
        let remote = discovery_route(&["bad", "cleanup"]).route(
            "/tools/:id/execute",
            post(|Path(id): Path<String>| async move {
                if id == "s1:bad" {
                    Err(StatusCode::INTERNAL_SERVER_ERROR)
                } else {
                    Ok(Json(json!({"success": true, "result": {}, "executionTime": 1})))
                }
            }),
        );
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;

        let mut failing = step("a", "bad", &[]);
        failing.on_error = Some("handler".to_string());
        let wf = workflow(vec![failing, step("handler", "cleanup", &[])]);
        let execution = orchestrator.execute_workflow(wf, None).await.expect("run");

        // The error branch is the designated handler, so the run completes.
        assert_eq!(execution.status, ExecutionStatus::Completed);
        let handler = execution
            .results
            .iter()
            .find(|r| r.step_id == "handler")
            .expect("handler ran");
        assert_eq!(handler.outcome, StepOutcome::Completed);
    }

    #[tokio::test]
    async fn branch_target_does_not_run_unprompted() {
        let dir = tempdir().expect("tempdir");
        let remote = echo_execute_route(discovery_route(&["a", "cleanup"]));
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;

        let mut succeeding = step("a", "a", &[]);
        succeeding.on_error = Some("handler".to_string());
        let wf = workflow(vec![succeeding, step("handler", "cleanup", &[])]);
        let execution = orchestrator.execute_workflow(wf, None).await.expect("run");

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(!execution.results.iter().any(|r| r.step_id == "handler"));
    }

    #[tokio::test]
    async fn cancellation_is_cooperative_between_steps() {
        let dir = tempdir().expect("tempdir");
        // Slow steps so cancellation lands mid-run.
        let remote = discovery_route(&["slow"]).route(
            "/tools/:id/execute",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Json(json!({"success": true, "result": {}, "executionTime": 200}))
            }),
        );
        let orchestration = OrchestrationConfig {
            max_concurrent_tools: 1,
            ..OrchestrationConfig::default()
        };
        let (_registry, orchestrator) = setup(remote, orchestration, dir.path()).await;
        let orchestrator = Arc::new(orchestrator);

        let wf = workflow(vec![
            step("a", "slow", &[]),
            step("b", "slow", &["a"]),
            step("c", "slow", &["b"]),
        ]);
        let runner = Arc::clone(&orchestrator);
        let run = tokio::spawn(async move { runner.execute_workflow(wf, None).await });

        // Wait for the run to appear, then cancel it.
        let execution_id = loop {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Some(execution) = orchestrator.list_executions().into_iter().next() {
                break execution.id;
            }
        };
        orchestrator.cancel_execution(&execution_id).expect("cancel");

        let execution = run.await.expect("join").expect("run");
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(execution.results.len() < 3);
        assert_eq!(orchestrator.active_count(), 0);

        let stored = orchestrator.get_execution(&execution_id).expect("stored");
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancelling_unknown_execution_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let remote = echo_execute_route(discovery_route(&["a"]));
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;
        assert!(matches!(
            orchestrator.cancel_execution("ghost"),
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn workflow_timeout_fails_the_run() {
        let dir = tempdir().expect("tempdir");
        let remote = discovery_route(&["slow"]).route(
            "/tools/:id/execute",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({"success": true, "result": {}, "executionTime": 500}))
            }),
        );
        let orchestration = OrchestrationConfig {
            workflow_timeout_secs: 0,
            ..OrchestrationConfig::default()
        };
        let (_registry, orchestrator) = setup(remote, orchestration, dir.path()).await;

        let execution = orchestrator
            .execute_workflow(workflow(vec![step("a", "slow", &[])]), None)
            .await
            .expect("run");
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.errors.iter().any(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn invalid_workflow_is_rejected_before_running() {
        let dir = tempdir().expect("tempdir");
        let remote = echo_execute_route(discovery_route(&["a"]));
        let (_registry, orchestrator) =
            setup(remote, OrchestrationConfig::default(), dir.path()).await;

        let wf = workflow(vec![step("a", "a", &["a"])]);
        let error = orchestrator
            .execute_workflow(wf, None)
            .await
            .expect_err("invalid");
        assert!(matches!(error, CoreError::InvalidInput(_)));
        assert!(orchestrator.list_executions().is_empty());
    }
}
