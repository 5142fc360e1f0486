//! Tool registry and dispatch (spec §4.4).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use threadline_mcp::McpClient;
use threadline_protocol::ToolDescriptor;

use crate::tools::{reject_unknown_keys, Tool, ToolEnv, ToolOutcome};

/// Wraps one tool exposed by an MCP server behind the same `Tool` trait
/// built-ins implement, so the registry never distinguishes the two once
/// registered (spec §4.4 "merges built-in tools with MCP-proxied tools").
struct McpProxyTool {
    client: Arc<McpClient>,
    remote_name: String,
    descriptor: ToolDescriptor,
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.descriptor.parameters.clone()
    }

    async fn execute(&self, _env: &ToolEnv, args: serde_json::Value) -> ToolOutcome {
        match self.client.call_tool(&self.remote_name, args).await {
            Ok(text) => ToolOutcome::text(text),
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }
}

/// Merges built-in and MCP-proxied tools behind one name→handler map, and
/// holds the per-branch locks that serialize mutating tools (spec §4.4).
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
    branch_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
            branch_locks: DashMap::new(),
        }
    }

    /// Register (or replace) a handler under its own `name()`. Takes `&self`
    /// so tools can be added after the registry is already shared via `Arc`
    /// into the turn engine and subagent manager.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// List `client`'s tools and register each, renaming on collision to
    /// `<server>__<tool>` (spec §4.4).
    pub async fn register_mcp_server(&self, client: Arc<McpClient>) -> threadline_mcp::Result<()> {
        let descriptors = client.list_tools().await?;
        for d in descriptors {
            let name = if self.tools.contains_key(&d.name) {
                format!("{}__{}", client.server_name, d.name)
            } else {
                d.name.clone()
            };
            let remote_name = d.name.clone();
            let descriptor = ToolDescriptor {
                name: name.clone(),
                description: d.description,
                parameters: d.parameters,
            };
            self.tools.insert(
                name,
                Arc::new(McpProxyTool {
                    client: client.clone(),
                    remote_name,
                    descriptor,
                }),
            );
        }
        Ok(())
    }

    /// The view assembled for the provider (spec §4.4 `for_llm()`).
    pub fn for_llm(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|entry| ToolDescriptor {
                name: entry.key().clone(),
                description: entry.value().description().to_string(),
                parameters: entry.value().input_schema(),
            })
            .collect()
    }

    /// Validate, look up, and invoke `name`, serializing on the per-branch
    /// lock when the handler requires it (spec §4.4 dispatch steps 1-5).
    pub async fn dispatch(&self, env: &ToolEnv, name: &str, args: serde_json::Value) -> ToolOutcome {
        let Some(tool) = self.tools.get(name).map(|e| e.value().clone()) else {
            return ToolOutcome::error(format!("unknown tool: {name}"));
        };
        if let Err(e) = reject_unknown_keys(&tool.input_schema(), &args) {
            return ToolOutcome::error(e);
        }
        if tool.needs_branch_lock() {
            let lock = self
                .branch_locks
                .entry(env.branch_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let _guard = lock.lock().await;
            tool.execute(env, args).await
        } else {
            tool.execute(env, args).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::read_file::ReadFileTool;

    fn env() -> ToolEnv {
        ToolEnv {
            session_id: "s1".to_string(),
            branch_id: 1,
            model: "mock".to_string(),
            confirmation_received: false,
            db: threadline_store::db::open_in_memory().unwrap(),
            blobs: threadline_store::BlobStore::new(threadline_store::db::open_in_memory().unwrap()),
            roots: Vec::new(),
        }
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_tool() {
        let registry = ToolRegistry::new();
        let outcome = registry.dispatch(&env(), "does_not_exist", serde_json::json!({})).await;
        assert!(matches!(outcome, ToolOutcome::Error(_)));
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_argument() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(ReadFileTool));
        let outcome = registry
            .dispatch(&env(), "read_file", serde_json::json!({"path": "/tmp/x", "evil": true}))
            .await;
        assert!(matches!(outcome, ToolOutcome::Error(_)));
    }

    #[tokio::test]
    async fn for_llm_reflects_registered_tools() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(ReadFileTool));
        let descriptors = registry.for_llm();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "read_file");
    }
}
