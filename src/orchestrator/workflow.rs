//! Declarative workflow plans: steps, dependencies, conditions, retry policy.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::{CoreError, CoreResult};
use crate::types::ExecutionResult;

/// A declarative plan: a graph of tool-invocation steps.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub version: Option<String>,
}

/// One node in the plan.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    /// Registry entry id (`{serverId}:{name}`) of the tool to invoke.
    pub tool_id: String,
    #[serde(default)]
    pub arguments: Value,
    /// Step ids that must reach a terminal outcome before this step runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional condition checked against accumulated prior results before
    /// the step runs; false means the step is recorded as skipped.
    #[serde(default)]
    pub condition: Option<String>,
    /// Branch override: run this step next when the step succeeds.
    #[serde(default)]
    pub on_success: Option<String>,
    /// Branch override: run this step next when the step fails fatally.
    #[serde(default)]
    pub on_error: Option<String>,
    /// Per-step execution timeout override, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    /// Double the backoff on every retry when set.
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 1000,
            exponential: false,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        let ms = if self.exponential {
            self.backoff_ms.saturating_mul(1_u64 << attempt.saturating_sub(1).min(16))
        } else {
            self.backoff_ms
        };
        std::time::Duration::from_millis(ms)
    }
}

impl Workflow {
    /// Validate the plan before a run starts: step ids unique, every
    /// dependency and branch target resolves, the dependency graph is
    /// acyclic, and conditions parse.
    pub fn validate(&self) -> CoreResult<()> {
        if self.steps.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "workflow '{}' has no steps",
                self.id
            )));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(CoreError::InvalidInput(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(CoreError::InvalidInput(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(CoreError::InvalidInput(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.id
                    )));
                }
            }
            for target in [&step.on_success, &step.on_error].into_iter().flatten() {
                if !ids.contains(target.as_str()) {
                    return Err(CoreError::InvalidInput(format!(
                        "step '{}' branches to unknown step '{target}'",
                        step.id
                    )));
                }
            }
            if let Some(expr) = &step.condition {
                StepCondition::parse(expr)?;
            }
        }

        self.check_acyclic()
    }

    /// Kahn's algorithm over the `dependsOn` edges.
    fn check_acyclic(&self) -> CoreResult<()> {
        let mut in_degree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|step| (step.id.as_str(), step.depends_on.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            for dep in &step.depends_on {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(step.id.as_str());
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut resolved = 0;
        while let Some(id) = ready.pop() {
            resolved += 1;
            for &dependent in dependents.get(id).into_iter().flatten() {
                let degree = in_degree.entry(dependent).or_insert(0);
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.push(dependent);
                }
            }
        }

        if resolved != self.steps.len() {
            return Err(CoreError::InvalidInput(format!(
                "workflow '{}' has a dependency cycle",
                self.id
            )));
        }
        Ok(())
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.id == id)
    }
}

/// Parsed step condition.
///
/// Grammar: `<stepId>.success`, `!<stepId>.success`, or
/// `<stepId>.result.<dot.path> == <json-literal>`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepCondition {
    Succeeded(String),
    NotSucceeded(String),
    ResultEquals {
        step: String,
        path: Vec<String>,
        value: Value,
    },
}

impl StepCondition {
    pub fn parse(expr: &str) -> CoreResult<Self> {
        let expr = expr.trim();
        if let Some((lhs, rhs)) = expr.split_once("==") {
            let lhs = lhs.trim();
            let rhs = rhs.trim();
            let value: Value = serde_json::from_str(rhs).map_err(|_| {
                CoreError::InvalidInput(format!("condition literal '{rhs}' is not valid JSON"))
            })?;
            let mut parts = lhs.split('.');
            let step = parts.next().unwrap_or_default();
            if step.is_empty() || parts.next() != Some("result") {
                return Err(CoreError::InvalidInput(format!(
                    "condition '{expr}' must compare '<stepId>.result.<path>'"
                )));
            }
            return Ok(Self::ResultEquals {
                step: step.to_string(),
                path: parts.map(str::to_string).collect(),
                value,
            });
        }

        let (negated, body) = match expr.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, expr),
        };
        match body.strip_suffix(".success") {
            Some(step) if !step.is_empty() && !step.contains('.') => {
                let step = step.to_string();
                Ok(if negated {
                    Self::NotSucceeded(step)
                } else {
                    Self::Succeeded(step)
                })
            }
            _ => Err(CoreError::InvalidInput(format!(
                "unsupported condition expression '{expr}'"
            ))),
        }
    }

    /// Evaluate against the accumulated results of prior steps. A condition
    /// referencing a step with no recorded result evaluates to false.
    pub fn evaluate(&self, results: &HashMap<String, ExecutionResult>) -> bool {
        match self {
            Self::Succeeded(step) => results.get(step).is_some_and(|r| r.success),
            Self::NotSucceeded(step) => !results.get(step).is_some_and(|r| r.success),
            Self::ResultEquals { step, path, value } => {
                let Some(result) = results.get(step).and_then(|r| r.result.as_ref()) else {
                    return false;
                };
                let mut cursor = result;
                for key in path {
                    match cursor.get(key) {
                        Some(next) => cursor = next,
                        None => return false,
                    }
                }
                cursor == value
            }
        }
    }
}
