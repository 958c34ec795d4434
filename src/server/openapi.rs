use utoipa::OpenApi;

use crate::event::{
    CoreEvent, ToolEventPayload, ToolExecutedPayload, ToolExecutionFailedPayload,
    ToolUnavailablePayload, WorkflowEventPayload, WorkflowFailedPayload, WorkflowStepPayload,
};
use crate::orchestrator::execution::{
    ExecutionStatus, StepOutcome, StepRecord, WorkflowExecution,
};
use crate::orchestrator::workflow::{RetryPolicy, Workflow, WorkflowStep};
use crate::server::error::{ApiErrorBody, ApiErrorResponse};
use crate::server::tools::{ApiToolEntry, ExecuteToolRequest, ExecuteToolResponse};
use crate::server::workflows::{CancelResponse, ExecuteWorkflowRequest};
use crate::server::HealthResponse;
use crate::types::{
    ExecutionResult, HealthStatus, RegistryEntry, ServerInfo, ToolCategory, ToolInfo,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Toolbridge API",
        version = "0.1.0",
        description = "Tool registry and workflow orchestration service"
    ),
    paths(
        crate::server::health,
        crate::server::tools::list_tools,
        crate::server::tools::get_tool,
        crate::server::tools::execute_tool,
        crate::server::workflows::execute_workflow,
        crate::server::workflows::get_execution,
        crate::server::workflows::cancel_execution,
        crate::server::events::stream_events,
    ),
    components(schemas(
        // Error
        ApiErrorResponse,
        ApiErrorBody,
        // Catalog
        ToolInfo,
        ServerInfo,
        ToolCategory,
        HealthStatus,
        RegistryEntry,
        ApiToolEntry,
        ExecuteToolRequest,
        ExecuteToolResponse,
        ExecutionResult,
        // Workflows
        Workflow,
        WorkflowStep,
        RetryPolicy,
        ExecutionStatus,
        StepOutcome,
        StepRecord,
        WorkflowExecution,
        ExecuteWorkflowRequest,
        CancelResponse,
        // Events
        CoreEvent,
        ToolEventPayload,
        ToolUnavailablePayload,
        ToolExecutedPayload,
        ToolExecutionFailedPayload,
        WorkflowEventPayload,
        WorkflowStepPayload,
        WorkflowFailedPayload,
        // Misc
        HealthResponse,
    ))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_serializes_and_names_all_routes() {
        let spec = ApiDoc::openapi().to_json().expect("serialize");
        for path in [
            "/health",
            "/tools",
            "/tools/{id}",
            "/tools/{id}/execute",
            "/workflows/execute",
            "/executions/{id}",
            "/executions/{id}/cancel",
            "/events",
        ] {
            assert!(spec.contains(path), "missing path {path}");
        }
    }
}
