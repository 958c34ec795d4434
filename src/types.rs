//! Wire and domain data model shared by the registry and orchestrator.
//!
//! All types serialize in camelCase to match the remote control-plane's JSON
//! and the persisted snapshot format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// A remotely callable capability as advertised by the control-plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
    pub server_id: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A discovered remote tool-provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub protocol_version: Option<String>,
    pub last_seen: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub discovered_at: DateTime<Utc>,
}

/// Fixed category taxonomy, assigned by priority-ordered keyword match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCategory {
    Rag,
    ProjectManagement,
    Data,
    Development,
    Communication,
    FileManagement,
    General,
}

/// Derived health signal; never stored, so it cannot disagree with the stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
}

/// Minimum executions before the success rate can downgrade health.
const HEALTH_MIN_SAMPLES: u64 = 5;
const HEALTH_DEGRADED_BELOW: f64 = 0.5;

/// The registry's local, stateful wrapper around a discovered tool.
///
/// Entries are created on first discovery and never hard-deleted; a tool that
/// disappears from a discovery pass is only marked unavailable so its history
/// is retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// `{serverId}:{name}`, immutable once created.
    pub id: String,
    pub tool: ToolInfo,
    pub category: ToolCategory,
    pub tags: Vec<String>,
    pub is_available: bool,
    pub execution_count: u64,
    /// Two-point running average of call durations, in milliseconds.
    pub average_execution_time: f64,
    /// Fraction of executions that succeeded, in `0.0..=1.0`.
    pub success_rate: f64,
    pub registered_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub last_executed: Option<DateTime<Utc>>,
}

/// Deterministic registry entry id for a tool.
pub fn entry_id(server_id: &str, name: &str) -> String {
    format!("{server_id}:{name}")
}

impl RegistryEntry {
    pub fn new(tool: ToolInfo, category: ToolCategory, tags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: entry_id(&tool.server_id, &tool.name),
            tool,
            category,
            tags,
            is_available: true,
            execution_count: 0,
            average_execution_time: 0.0,
            success_rate: 0.0,
            registered_at: now,
            last_updated: now,
            last_executed: None,
        }
    }

    /// Whether the descriptive fields differ from a freshly discovered tool.
    /// Compared structurally; running statistics are not part of the diff.
    pub fn descriptive_fields_differ(&self, tool: &ToolInfo) -> bool {
        self.tool.description != tool.description
            || self.tool.input_schema != tool.input_schema
            || self.tool.version != tool.version
    }

    /// Fold one execution into the running statistics.
    ///
    /// The average is a two-point average of the previous value and the new
    /// duration rather than a full moving average; the previous success count
    /// is inferred from the previous rate.
    pub fn record_execution(&mut self, duration_ms: f64, success: bool) {
        let prior_successes = (self.success_rate * self.execution_count as f64).round() as u64;
        self.execution_count += 1;
        self.average_execution_time = if self.execution_count == 1 {
            duration_ms
        } else {
            (self.average_execution_time + duration_ms) / 2.0
        };
        let successes = prior_successes + u64::from(success);
        self.success_rate = successes as f64 / self.execution_count as f64;
        let now = Utc::now();
        self.last_executed = Some(now);
        self.last_updated = now;
    }

    pub fn health(&self) -> HealthStatus {
        if !self.is_available {
            return HealthStatus::Unavailable;
        }
        if self.execution_count >= HEALTH_MIN_SAMPLES && self.success_rate < HEALTH_DEGRADED_BELOW
        {
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }
}

/// Caller-supplied priority hint forwarded to the remote plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Parameters for one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionContext {
    pub tool_name: String,
    pub session_id: Option<String>,
    pub priority: ExecutionPriority,
    /// Per-call override of the configured execution timeout, in milliseconds.
    pub timeout_ms: Option<u64>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            tool_name: String::new(),
            session_id: None,
            priority: ExecutionPriority::Normal,
            timeout_ms: None,
            retry_count: 0,
            max_retries: 0,
        }
    }
}

impl ExecutionContext {
    pub fn for_tool(tool_name: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            session_id,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> crate::error::CoreResult<()> {
        if self.retry_count > self.max_retries {
            return Err(crate::error::CoreError::InvalidInput(format!(
                "retryCount {} exceeds maxRetries {}",
                self.retry_count, self.max_retries
            )));
        }
        Ok(())
    }
}

/// Outcome of one tool invocation. Exactly one of `result`/`error` is
/// meaningful depending on `success`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Duration in milliseconds.
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn succeeded(tool_name: &str, result: Value, execution_time: f64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            execution_time,
            tool_name: tool_name.to_string(),
            session_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(tool_name: &str, error: impl Into<String>, execution_time: f64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            execution_time,
            tool_name: tool_name.to_string(),
            session_id: None,
            timestamp: Utc::now(),
        }
    }
}
