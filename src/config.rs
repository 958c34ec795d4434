use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, constructed once at process start and passed by
/// reference into [`crate::registry::ToolRegistry`] and
/// [`crate::orchestrator::Orchestrator`]. There is no global config state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub remote: RemoteConfig,
    pub orchestration: OrchestrationConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

/// Remote control-plane endpoint and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteConfig {
    /// Base URL of the remote plane, e.g. `http://127.0.0.1:8051`.
    pub base_url: String,
    /// Interval between periodic discovery passes, in seconds.
    pub discovery_interval_secs: u64,
    /// Timeout for a single discovery request, in seconds.
    pub discovery_timeout_secs: u64,
    /// Default timeout for a single tool execution, in seconds.
    pub execution_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8051".to_string(),
            discovery_interval_secs: 30,
            discovery_timeout_secs: 10,
            execution_timeout_secs: 30,
        }
    }
}

/// Workflow execution limits and failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestrationConfig {
    /// Upper bound on concurrently running workflow steps.
    pub max_concurrent_tools: usize,
    /// Overall wall-clock budget for a single workflow run, in seconds.
    pub workflow_timeout_secs: u64,
    pub error_handling: ErrorHandling,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tools: 5,
            workflow_timeout_secs: 300,
            error_handling: ErrorHandling::Strict,
        }
    }
}

/// How a workflow reacts to a step exhausting its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    /// A fatal step error halts the run and marks it failed.
    Strict,
    /// Fatal step errors are recorded but the run continues past them.
    #[serde(alias = "skip")]
    Lenient,
}

/// Catalog snapshot persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    /// Path of the single JSON snapshot file.
    pub snapshot_path: PathBuf,
    /// Debounce window for coalescing snapshot writes, in milliseconds.
    pub snapshot_debounce_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("./data/tool-registry.json"),
            snapshot_debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Listen address; port 0 binds an ephemeral port.
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.remote.discovery_timeout_secs, 10);
        assert_eq!(config.remote.execution_timeout_secs, 30);
        assert_eq!(config.orchestration.max_concurrent_tools, 5);
        assert_eq!(config.orchestration.error_handling, ErrorHandling::Strict);
        assert_eq!(config.storage.snapshot_debounce_ms, 500);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "remote": { "baseUrl": "http://10.0.0.1:9" } }"#)
                .expect("parse");
        assert_eq!(config.remote.base_url, "http://10.0.0.1:9");
        assert_eq!(config.remote.discovery_interval_secs, 30);
    }

    #[test]
    fn skip_is_an_alias_for_lenient() {
        let handling: ErrorHandling = serde_json::from_str(r#""skip""#).expect("parse");
        assert_eq!(handling, ErrorHandling::Lenient);
    }
}
