//! Workflow step scheduling engine.
//!
//! Steps run as spawned tasks gated by a shared semaphore; completions flow
//! back to the coordinating loop over an mpsc channel. The loop owns all
//! run state, so scheduling decisions never race with step completions.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};

use crate::bus::Bus;
use crate::config::ErrorHandling;
use crate::event::{CoreEvent, WorkflowStepPayload};
use crate::registry::ToolRegistry;
use crate::types::{ExecutionContext, ExecutionPriority, ExecutionResult};

use super::execution::{ExecutionStatus, StepOutcome, StepRecord, WorkflowExecution};
use super::workflow::{StepCondition, Workflow, WorkflowStep};

pub(crate) struct RunnerContext {
    pub registry: Arc<ToolRegistry>,
    pub bus: Bus,
    pub semaphore: Arc<Semaphore>,
    pub error_handling: ErrorHandling,
    pub cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
    NotStarted,
    InFlight,
    Terminal,
}

struct StepFinished {
    step_id: String,
    record: StepRecord,
}

/// Drive one workflow run to a terminal status. The execution must already
/// be `Running`; per-step records and errors are appended as steps finish.
pub(crate) async fn run(ctx: &RunnerContext, workflow: &Workflow, execution: &mut WorkflowExecution) {
    let branch_targets: HashSet<&str> = workflow
        .steps
        .iter()
        .flat_map(|step| [step.on_success.as_deref(), step.on_error.as_deref()])
        .flatten()
        .collect();

    let mut states: HashMap<String, StepState> = workflow
        .steps
        .iter()
        .map(|step| (step.id.clone(), StepState::NotStarted))
        .collect();
    let mut branch_activated: HashSet<String> = HashSet::new();
    let mut results: HashMap<String, ExecutionResult> = HashMap::new();
    let mut halted = false;
    let mut fatal_unhandled = false;
    let mut in_flight = 0_usize;

    let (tx, mut rx) = mpsc::unbounded_channel::<StepFinished>();

    loop {
        if ctx.cancel.load(Ordering::SeqCst) {
            if execution.status == ExecutionStatus::Running {
                let _ = execution.transition(ExecutionStatus::Cancelled);
            }
            return;
        }

        if !halted {
            // Skipping a step may unlock its dependents, so sweep to fixpoint.
            let mut progressed = true;
            while progressed {
                progressed = false;
                for step in &workflow.steps {
                    if !is_ready(step, &states, &branch_targets, &branch_activated) {
                        continue;
                    }
                    if let Some(expr) = &step.condition {
                        // Parse errors were rejected by validation; a parsed
                        // condition that evaluates false skips the step.
                        let passes = StepCondition::parse(expr)
                            .map(|condition| condition.evaluate(&results))
                            .unwrap_or(false);
                        if !passes {
                            states.insert(step.id.clone(), StepState::Terminal);
                            execution.record_step(StepRecord::skipped(&step.id));
                            progressed = true;
                            continue;
                        }
                    }
                    states.insert(step.id.clone(), StepState::InFlight);
                    execution.current_step = Some(step.id.clone());
                    in_flight += 1;
                    spawn_step(ctx, step.clone(), execution.session_id.clone(), tx.clone());
                    progressed = true;
                }
            }
        }

        if in_flight == 0 {
            break;
        }

        let Some(finished) = rx.recv().await else {
            break;
        };
        in_flight -= 1;
        states.insert(finished.step_id.clone(), StepState::Terminal);

        let step = workflow.step(&finished.step_id);
        match finished.record.outcome {
            StepOutcome::Completed => {
                if let Some(result) = &finished.record.result {
                    results.insert(finished.step_id.clone(), result.clone());
                }
                if let Some(target) = step.and_then(|s| s.on_success.clone()) {
                    branch_activated.insert(target);
                }
                ctx.bus
                    .publish(CoreEvent::WorkflowStepFinished(WorkflowStepPayload {
                        execution_id: execution.id.clone(),
                        step_id: finished.step_id.clone(),
                        success: true,
                    }));
            }
            StepOutcome::Failed => {
                ctx.bus
                    .publish(CoreEvent::WorkflowStepFinished(WorkflowStepPayload {
                        execution_id: execution.id.clone(),
                        step_id: finished.step_id.clone(),
                        success: false,
                    }));
                match step.and_then(|s| s.on_error.clone()) {
                    // An error branch is the designated handler; the run
                    // carries on through it.
                    Some(target) => {
                        branch_activated.insert(target);
                    }
                    None => {
                        fatal_unhandled = true;
                        if ctx.error_handling == ErrorHandling::Strict {
                            halted = true;
                        }
                    }
                }
            }
            StepOutcome::Skipped => {}
        }
        execution.record_step(finished.record);
    }

    if execution.status != ExecutionStatus::Running {
        return;
    }
    let terminal = if fatal_unhandled && ctx.error_handling == ErrorHandling::Strict {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Completed
    };
    let _ = execution.transition(terminal);
}

fn is_ready(
    step: &WorkflowStep,
    states: &HashMap<String, StepState>,
    branch_targets: &HashSet<&str>,
    branch_activated: &HashSet<String>,
) -> bool {
    if states.get(&step.id) != Some(&StepState::NotStarted) {
        return false;
    }
    if branch_activated.contains(&step.id) {
        // An explicit branch overrides dependency ordering.
        return true;
    }
    if branch_targets.contains(step.id.as_str()) {
        // Branch targets only run when a branch enters them.
        return false;
    }
    step.depends_on
        .iter()
        .all(|dep| states.get(dep) == Some(&StepState::Terminal))
}

/// Execute one step with its retry budget on a spawned task. The semaphore
/// bounds concurrently running steps; the permit is held for the whole
/// attempt sequence so retries do not oversubscribe the remote plane.
fn spawn_step(
    ctx: &RunnerContext,
    step: WorkflowStep,
    session_id: Option<String>,
    tx: mpsc::UnboundedSender<StepFinished>,
) {
    let registry = Arc::clone(&ctx.registry);
    let semaphore = Arc::clone(&ctx.semaphore);
    tokio::spawn(async move {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let _ = tx.send(StepFinished {
                    step_id: step.id.clone(),
                    record: StepRecord::failed(&step.id, "step semaphore closed", 0),
                });
                return;
            }
        };

        let record = execute_with_retries(&registry, &step, session_id).await;
        let _ = tx.send(StepFinished {
            step_id: step.id.clone(),
            record,
        });
    });
}

async fn execute_with_retries(
    registry: &ToolRegistry,
    step: &WorkflowStep,
    session_id: Option<String>,
) -> StepRecord {
    let arguments = if step.arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        step.arguments.clone()
    };
    let mut attempts = 0_u32;
    loop {
        let context = ExecutionContext {
            tool_name: step.tool_id.clone(),
            session_id: session_id.clone(),
            priority: ExecutionPriority::Normal,
            timeout_ms: step.timeout_ms,
            retry_count: attempts,
            max_retries: step.retry.max_retries,
        };
        attempts += 1;

        let error = match registry.execute_tool(&step.tool_id, &arguments, &context).await {
            Ok(result) if result.success => {
                return StepRecord::completed(&step.id, result, attempts);
            }
            Ok(result) => result
                .error
                .unwrap_or_else(|| "tool reported failure".to_string()),
            // Not-found, unavailable, and bad-input failures cannot be
            // retried into success; fail the step immediately.
            Err(
                error @ (crate::error::CoreError::NotFound(_)
                | crate::error::CoreError::Unavailable(_)
                | crate::error::CoreError::InvalidInput(_)),
            ) => {
                return StepRecord::failed(&step.id, error.to_string(), attempts);
            }
            Err(error) => error.to_string(),
        };

        if attempts > step.retry.max_retries {
            return StepRecord::failed(&step.id, error, attempts);
        }
        tracing::warn!(
            "step '{}' attempt {attempts} failed ({error}); retrying",
            step.id
        );
        tokio::time::sleep(step.retry.backoff_for(attempts)).await;
    }
}
