//! Workflow execution records and their status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{CoreError, CoreResult};
use crate::types::ExecutionResult;

/// Run status. Transitions are monotonic forward: a terminal status never
/// reverts to an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn can_transition(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Cancelled | Self::Failed),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Outcome of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Completed,
    Failed,
    /// The step's condition evaluated false; not counted as a failure.
    Skipped,
}

/// Per-step record appended to the run in completion order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_id: String,
    pub outcome: StepOutcome,
    #[serde(default)]
    pub result: Option<ExecutionResult>,
    /// Total attempts charged, including retries.
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn completed(step_id: &str, result: ExecutionResult, attempts: u32) -> Self {
        Self {
            step_id: step_id.to_string(),
            outcome: StepOutcome::Completed,
            result: Some(result),
            attempts,
            error: None,
        }
    }

    pub fn failed(step_id: &str, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            step_id: step_id.to_string(),
            outcome: StepOutcome::Failed,
            result: None,
            attempts,
            error: Some(error.into()),
        }
    }

    pub fn skipped(step_id: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            outcome: StepOutcome::Skipped,
            result: None,
            attempts: 0,
            error: None,
        }
    }
}

/// The runtime record of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub current_step: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Per-step results in completion order.
    pub results: Vec<StepRecord>,
    pub errors: Vec<String>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: &str, session_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            workflow_id: workflow_id.to_string(),
            session_id,
            status: ExecutionStatus::Pending,
            current_step: None,
            started_at: Utc::now(),
            ended_at: None,
            results: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Advance the status, enforcing monotonic forward transitions.
    pub fn transition(&mut self, next: ExecutionStatus) -> CoreResult<()> {
        if !self.status.can_transition(next) {
            return Err(CoreError::Internal(format!(
                "invalid status transition {:?} -> {next:?} for execution {}",
                self.status, self.id
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
            self.current_step = None;
        }
        Ok(())
    }

    pub fn record_step(&mut self, record: StepRecord) {
        if let Some(error) = &record.error {
            self.errors
                .push(format!("step '{}': {error}", record.step_id));
        }
        self.results.push(record);
    }
}
