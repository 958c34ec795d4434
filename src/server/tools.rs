//! Tool listing and execution routes.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::server::error::{ApiError, ApiErrorResponse};
use crate::server::ServerState;
use crate::types::{ExecutionResult, HealthStatus, RegistryEntry, ToolCategory};

/// Registry entry plus its derived health, as served over HTTP.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiToolEntry {
    #[serde(flatten)]
    pub entry: RegistryEntry,
    pub health: HealthStatus,
}

impl From<RegistryEntry> for ApiToolEntry {
    fn from(entry: RegistryEntry) -> Self {
        let health = entry.health();
        Self { entry, health }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListToolsQuery {
    /// Restrict to one category.
    pub category: Option<ToolCategory>,
    /// Restrict by availability flag.
    pub available: Option<bool>,
}

#[utoipa::path(
    get,
    path = "/tools",
    tag = "tools",
    params(ListToolsQuery),
    responses(
        (status = 200, description = "Registry entries sorted by id", body = [ApiToolEntry]),
    ),
    description = "List the tool catalog, including unavailable entries unless filtered."
)]
pub(crate) async fn list_tools(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListToolsQuery>,
) -> Json<Vec<ApiToolEntry>> {
    let entries = state
        .registry
        .list_tools()
        .await
        .into_iter()
        .filter(|entry| query.category.map_or(true, |c| entry.category == c))
        .filter(|entry| query.available.map_or(true, |a| entry.is_available == a))
        .map(ApiToolEntry::from)
        .collect();
    Json(entries)
}

#[utoipa::path(
    get,
    path = "/tools/{id}",
    tag = "tools",
    params(("id" = String, Path, description = "Registry entry id ({serverId}:{name})")),
    responses(
        (status = 200, description = "The registry entry", body = ApiToolEntry),
        (status = 404, body = ApiErrorResponse),
    ),
)]
pub(crate) async fn get_tool(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiToolEntry>, ApiError> {
    let entry = state
        .registry
        .get_tool(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("tool '{id}'")))?;
    Ok(Json(entry.into()))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteToolRequest {
    pub arguments: Value,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExecuteToolResponse {
    pub ok: bool,
    pub data: ExecutionResult,
}

#[utoipa::path(
    post,
    path = "/tools/{id}/execute",
    tag = "tools",
    params(("id" = String, Path, description = "Registry entry id ({serverId}:{name})")),
    request_body = ExecuteToolRequest,
    responses(
        (status = 200, description = "Execution outcome (success flag inside)", body = ExecuteToolResponse),
        (status = 404, body = ApiErrorResponse),
        (status = 409, description = "Tool is currently unavailable", body = ApiErrorResponse),
    ),
    description = "Proxy one tool execution through the registry."
)]
pub(crate) async fn execute_tool(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(request): Json<ExecuteToolRequest>,
) -> Result<Json<ExecuteToolResponse>, ApiError> {
    let result = state
        .orchestrator
        .execute_tool(&id, &request.arguments, request.session_id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(ExecuteToolResponse { ok: true, data: result }))
}
