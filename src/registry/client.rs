//! HTTP client for the remote control-plane.
//!
//! The remote plane is an opaque collaborator reachable through exactly two
//! calls: list tools and execute tool. Every request carries an explicit
//! timeout; failures map onto [`CoreError::Remote`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RemoteConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::{ExecutionContext, ExecutionResult, ServerInfo, ToolInfo};

/// Payload of `GET {baseUrl}/tools`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryResponse {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
    #[serde(default)]
    pub servers: Vec<ServerInfo>,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    parameters: &'a Value,
    context: &'a ExecutionContext,
}

pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    discovery_timeout: Duration,
    execution_timeout: Duration,
}

impl RemoteClient {
    pub fn new(config: &RemoteConfig) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|error| CoreError::Internal(format!("failed to build http client: {error}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            discovery_timeout: Duration::from_secs(config.discovery_timeout_secs),
            execution_timeout: Duration::from_secs(config.execution_timeout_secs),
        })
    }

    /// Fetch the currently advertised tools and servers.
    pub async fn discover(&self) -> CoreResult<DiscoveryResponse> {
        let url = format!("{}/tools", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.discovery_timeout)
            .send()
            .await
            .map_err(|error| CoreError::Remote(format!("discovery request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Remote(format!(
                "discovery returned status {status}"
            )));
        }

        response
            .json::<DiscoveryResponse>()
            .await
            .map_err(|error| CoreError::Remote(format!("invalid discovery payload: {error}")))
    }

    /// Proxy one tool execution to the remote plane.
    ///
    /// `timeout_ms` overrides the configured execution timeout when present
    /// (drawn from the caller's [`ExecutionContext`]).
    pub async fn execute(
        &self,
        tool_id: &str,
        parameters: &Value,
        context: &ExecutionContext,
    ) -> CoreResult<ExecutionResult> {
        let url = format!("{}/tools/{}/execute", self.base_url, tool_id);
        let timeout = context
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.execution_timeout);

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(&ExecuteRequest {
                parameters,
                context,
            })
            .send()
            .await
            .map_err(|error| {
                CoreError::Remote(format!("execution request for {tool_id} failed: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Remote(format!(
                "execution of {tool_id} returned status {status}"
            )));
        }

        response
            .json::<ExecutionResult>()
            .await
            .map_err(|error| CoreError::Remote(format!("invalid execution payload: {error}")))
    }
}
