use serde::Serialize;
use utoipa::ToSchema;

use crate::types::ToolCategory;

/// Events published on the [`crate::bus::Bus`] as the catalog and workflow
/// runs change state.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum CoreEvent {
    /// A brand-new tool appeared in a discovery pass.
    ToolRegistered(ToolEventPayload),
    /// A known tool's descriptive fields changed.
    ToolUpdated(ToolEventPayload),
    /// A previously known tool was absent from the latest discovery pass.
    ToolUnavailable(ToolUnavailablePayload),
    ToolExecuted(ToolExecutedPayload),
    ToolExecutionFailed(ToolExecutionFailedPayload),
    WorkflowStarted(WorkflowEventPayload),
    WorkflowStepFinished(WorkflowStepPayload),
    WorkflowCompleted(WorkflowEventPayload),
    WorkflowFailed(WorkflowFailedPayload),
    WorkflowCancelled(WorkflowEventPayload),
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolEventPayload {
    pub tool_id: String,
    pub category: ToolCategory,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolUnavailablePayload {
    pub tool_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutedPayload {
    pub tool_id: String,
    pub session_id: Option<String>,
    /// Wall-clock duration of the proxied call, in milliseconds.
    pub execution_time: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionFailedPayload {
    pub tool_id: String,
    pub session_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEventPayload {
    pub execution_id: String,
    pub workflow_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepPayload {
    pub execution_id: String,
    pub step_id: String,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowFailedPayload {
    pub execution_id: String,
    pub workflow_id: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tagged_envelope() {
        let event = CoreEvent::ToolUnavailable(ToolUnavailablePayload {
            tool_id: "s1:echo".to_string(),
        });
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "toolUnavailable");
        assert_eq!(json["payload"]["toolId"], "s1:echo");
    }
}
