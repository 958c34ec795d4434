//! Workflow execution and cancellation routes.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::orchestrator::{Workflow, WorkflowExecution};
use crate::server::error::{ApiError, ApiErrorResponse};
use crate::server::ServerState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteWorkflowRequest {
    pub workflow: Workflow,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResponse {
    pub ok: bool,
}

#[utoipa::path(
    post,
    path = "/workflows/execute",
    tag = "workflows",
    request_body = ExecuteWorkflowRequest,
    responses(
        (status = 200, description = "Final execution record", body = WorkflowExecution),
        (status = 400, description = "Workflow failed validation", body = ApiErrorResponse),
    ),
    description = "Run a workflow to a terminal status and return its execution record."
)]
pub(crate) async fn execute_workflow(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ExecuteWorkflowRequest>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let execution = state
        .orchestrator
        .execute_workflow(request.workflow, request.session_id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(execution))
}

#[utoipa::path(
    get,
    path = "/executions/{id}",
    tag = "workflows",
    params(("id" = String, Path, description = "Execution id")),
    responses(
        (status = 200, description = "Execution record", body = WorkflowExecution),
        (status = 404, body = ApiErrorResponse),
    ),
)]
pub(crate) async fn get_execution(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    state
        .orchestrator
        .get_execution(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("execution '{id}'")))
}

#[utoipa::path(
    post,
    path = "/executions/{id}/cancel",
    tag = "workflows",
    params(("id" = String, Path, description = "Execution id")),
    responses(
        (status = 200, description = "Cancellation requested", body = CancelResponse),
        (status = 404, description = "No such in-flight execution", body = ApiErrorResponse),
    ),
    description = "Cooperatively cancel an in-flight workflow run; checked between steps."
)]
pub(crate) async fn cancel_execution(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    state
        .orchestrator
        .cancel_execution(&id)
        .map_err(ApiError::from)?;
    Ok(Json(CancelResponse { ok: true }))
}
