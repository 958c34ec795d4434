//! Tool registry: an eventually-consistent local mirror of remotely
//! advertised tools, with usage statistics and an execution proxy.

pub mod classify;
pub mod client;
pub mod snapshot;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::bus::Bus;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::event::{
    CoreEvent, ToolEventPayload, ToolExecutedPayload, ToolExecutionFailedPayload,
    ToolUnavailablePayload,
};
use crate::types::{entry_id, ExecutionContext, ExecutionResult, RegistryEntry, ServerInfo};

use client::{DiscoveryResponse, RemoteClient};
use snapshot::{load_snapshot, RegistrySnapshot, SnapshotWriter};

/// Per-pass reconciliation counts, mostly for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    pub registered: usize,
    pub updated: usize,
    pub unavailable: usize,
}

/// Owns the tool catalog and the server roster. The orchestrator only ever
/// reads entries or executes through the proxy; all mutation happens here.
pub struct ToolRegistry {
    config: Arc<Config>,
    client: RemoteClient,
    bus: Bus,
    tools: RwLock<HashMap<String, RegistryEntry>>,
    servers: RwLock<HashMap<String, ServerInfo>>,
    writer: SnapshotWriter,
    discovery_loop: Mutex<Option<JoinHandle<()>>>,
}

impl ToolRegistry {
    pub fn new(config: Arc<Config>, bus: Bus) -> CoreResult<Self> {
        let client = RemoteClient::new(&config.remote)?;
        let writer = SnapshotWriter::new(
            config.storage.snapshot_path.clone(),
            Duration::from_millis(config.storage.snapshot_debounce_ms),
        );
        Ok(Self {
            config,
            client,
            bus,
            tools: RwLock::new(HashMap::new()),
            servers: RwLock::new(HashMap::new()),
            writer,
            discovery_loop: Mutex::new(None),
        })
    }

    /// Load the persisted snapshot, then run one discovery pass.
    ///
    /// Never fails: a cold start with an unreachable remote plane leaves the
    /// registry operating on whatever catalog the snapshot provided,
    /// possibly empty.
    pub async fn initialize(&self) {
        match load_snapshot(&self.config.storage.snapshot_path).await {
            Ok(Some(loaded)) => {
                let mut tools = self.tools.write().await;
                for entry in loaded.tools {
                    tools.insert(entry.id.clone(), entry);
                }
                drop(tools);
                let mut servers = self.servers.write().await;
                for server in loaded.servers {
                    servers.insert(server.id.clone(), server);
                }
                tracing::info!("loaded registry snapshot (savedAt {})", loaded.metadata.saved_at);
            }
            Ok(None) => {}
            Err(error) => tracing::warn!("failed to load registry snapshot: {error}"),
        }

        if let Err(error) = self.discover().await {
            tracing::warn!("initial discovery failed: {error}");
        }
    }

    /// One discovery pass: fetch the advertised set and reconcile the local
    /// catalog against it.
    pub async fn discover(&self) -> CoreResult<DiscoveryOutcome> {
        let response = self.client.discover().await?;
        let outcome = self.reconcile(response).await;
        self.schedule_persist().await;
        Ok(outcome)
    }

    async fn reconcile(&self, response: DiscoveryResponse) -> DiscoveryOutcome {
        let now = Utc::now();
        let mut outcome = DiscoveryOutcome::default();

        {
            let mut servers = self.servers.write().await;
            for incoming in response.servers {
                match servers.get_mut(&incoming.id) {
                    Some(existing) => {
                        // discoveredAt is preserved; lastSeen never regresses.
                        existing.name = incoming.name;
                        existing.version = incoming.version;
                        existing.protocol_version = incoming.protocol_version;
                        existing.last_seen = existing.last_seen.max(incoming.last_seen);
                    }
                    None => {
                        servers.insert(incoming.id.clone(), incoming);
                    }
                }
            }
        }

        let mut events = Vec::new();
        {
            let mut tools = self.tools.write().await;
            let mut seen = HashSet::new();
            for tool in response.tools {
                let id = entry_id(&tool.server_id, &tool.name);
                seen.insert(id.clone());
                match tools.get_mut(&id) {
                    Some(existing) => {
                        let changed = existing.descriptive_fields_differ(&tool);
                        if changed {
                            existing.category = classify::categorize(&tool.name, &tool.description);
                            existing.tags = classify::derive_tags(&tool.name, &tool.description);
                            existing.tool = tool;
                            existing.last_updated = now;
                            outcome.updated += 1;
                            events.push(CoreEvent::ToolUpdated(ToolEventPayload {
                                tool_id: id,
                                category: existing.category,
                            }));
                        }
                        existing.is_available = true;
                    }
                    None => {
                        let category = classify::categorize(&tool.name, &tool.description);
                        let tags = classify::derive_tags(&tool.name, &tool.description);
                        let entry = RegistryEntry::new(tool, category, tags);
                        outcome.registered += 1;
                        events.push(CoreEvent::ToolRegistered(ToolEventPayload {
                            tool_id: entry.id.clone(),
                            category,
                        }));
                        tools.insert(entry.id.clone(), entry);
                    }
                }
            }

            // Entries absent from this pass go unavailable; history is kept.
            for entry in tools.values_mut() {
                if !seen.contains(&entry.id) && entry.is_available {
                    entry.is_available = false;
                    entry.last_updated = now;
                    outcome.unavailable += 1;
                    events.push(CoreEvent::ToolUnavailable(ToolUnavailablePayload {
                        tool_id: entry.id.clone(),
                    }));
                }
            }
        }

        for event in events {
            self.bus.publish(event);
        }
        outcome
    }

    /// Start the periodic discovery loop: one immediate pass, then a
    /// repeating timer at the configured interval. Idempotent.
    pub fn start_discovery(self: &Arc<Self>) {
        let mut guard = match self.discovery_loop.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let registry = Arc::clone(self);
        let period = Duration::from_secs(self.config.remote.discovery_interval_secs);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(error) = registry.discover().await {
                    tracing::warn!("discovery pass failed: {error}");
                }
            }
        }));
    }

    /// Stop the periodic discovery loop. Idempotent.
    pub fn stop_discovery(&self) {
        let handle = {
            let mut guard = match self.discovery_loop.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Entries sorted by id. Unavailable entries are included; callers filter.
    pub async fn list_tools(&self) -> Vec<RegistryEntry> {
        let tools = self.tools.read().await;
        let mut entries: Vec<RegistryEntry> = tools.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    pub async fn get_tool(&self, id: &str) -> Option<RegistryEntry> {
        self.tools.read().await.get(id).cloned()
    }

    pub async fn list_servers(&self) -> Vec<ServerInfo> {
        let servers = self.servers.read().await;
        let mut infos: Vec<ServerInfo> = servers.values().cloned().collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub async fn tool_count(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn server_count(&self) -> usize {
        self.servers.read().await.len()
    }

    /// Proxy one execution to the remote plane, updating the entry's
    /// statistics on both success and failure. Remote errors are re-raised
    /// to the caller after bookkeeping.
    pub async fn execute_tool(
        &self,
        id: &str,
        arguments: &Value,
        context: &ExecutionContext,
    ) -> CoreResult<ExecutionResult> {
        context.validate()?;
        {
            let tools = self.tools.read().await;
            let entry = tools
                .get(id)
                .ok_or_else(|| CoreError::NotFound(format!("tool '{id}'")))?;
            if !entry.is_available {
                return Err(CoreError::Unavailable(format!("tool '{id}'")));
            }
        }

        let started = Instant::now();
        let outcome = self.client.execute(id, arguments, context).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(mut result) => {
                if result.tool_name.is_empty() {
                    result.tool_name = id.to_string();
                }
                if result.session_id.is_none() {
                    result.session_id = context.session_id.clone();
                }
                self.record_stats(id, duration_ms, result.success).await;
                // A well-formed response may still report a failed call; the
                // event must mirror the statistic it just recorded.
                if result.success {
                    self.bus.publish(CoreEvent::ToolExecuted(ToolExecutedPayload {
                        tool_id: id.to_string(),
                        session_id: context.session_id.clone(),
                        execution_time: duration_ms,
                    }));
                } else {
                    self.bus
                        .publish(CoreEvent::ToolExecutionFailed(ToolExecutionFailedPayload {
                            tool_id: id.to_string(),
                            session_id: context.session_id.clone(),
                            error: result
                                .error
                                .clone()
                                .unwrap_or_else(|| "tool reported failure".to_string()),
                        }));
                }
                self.schedule_persist().await;
                Ok(result)
            }
            Err(error) => {
                self.record_stats(id, duration_ms, false).await;
                self.bus
                    .publish(CoreEvent::ToolExecutionFailed(ToolExecutionFailedPayload {
                        tool_id: id.to_string(),
                        session_id: context.session_id.clone(),
                        error: error.to_string(),
                    }));
                self.schedule_persist().await;
                Err(error)
            }
        }
    }

    async fn record_stats(&self, id: &str, duration_ms: f64, success: bool) {
        let mut tools = self.tools.write().await;
        if let Some(entry) = tools.get_mut(id) {
            entry.record_execution(duration_ms, success);
        }
    }

    async fn current_snapshot(&self) -> RegistrySnapshot {
        let tools = self.tools.read().await.values().cloned().collect();
        let servers = self.servers.read().await.values().cloned().collect();
        RegistrySnapshot::new(tools, servers)
    }

    async fn schedule_persist(&self) {
        let snapshot = self.current_snapshot().await;
        self.writer.schedule(snapshot);
    }

    /// Stop the discovery loop and flush any pending snapshot write.
    pub async fn shutdown(&self) {
        self.stop_discovery();
        let snapshot = self.current_snapshot().await;
        if let Err(error) = self.writer.flush(snapshot).await {
            tracing::warn!("failed to flush registry snapshot on shutdown: {error}");
        }
    }
}
