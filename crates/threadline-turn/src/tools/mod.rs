//! Tool system (spec §4.4): the `Tool` trait every handler implements, plus
//! the built-in tool set. MCP-proxied tools implement the same trait via
//! `crate::registry::McpProxyTool`.

pub mod list_files;
pub mod patch_file;
pub mod read_file;
pub mod search_files;
pub mod shell;
pub mod subagent;
pub mod write_file;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use threadline_protocol::Attachment;
use threadline_store::{BlobStore, Db};

/// Per-call context handed to every tool handler (spec §4.4: "session id,
/// branch id, active model name, a flag `confirmation_received`, and handles
/// to the database, blob store, and filesystem root set").
pub struct ToolEnv {
    pub session_id: String,
    pub branch_id: i64,
    pub model: String,
    pub confirmation_received: bool,
    pub db: Db,
    pub blobs: BlobStore,
    /// Filesystem roots the `*_file`/`search_files` tools may touch. Empty
    /// means unrestricted (single-user local deployment, spec §1).
    pub roots: Vec<PathBuf>,
}

impl ToolEnv {
    /// Resolve a tool-supplied path against `roots`, rejecting escapes.
    /// The target need not exist yet (write_file creates new files), so this
    /// walks up to the nearest existing ancestor before checking containment.
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf, String> {
        if self.roots.is_empty() {
            return Ok(PathBuf::from(path));
        }
        let candidate = PathBuf::from(path);
        let mut probe: &Path = &candidate;
        let anchored = loop {
            match probe.canonicalize() {
                Ok(p) => {
                    let suffix = candidate.strip_prefix(probe).unwrap_or(Path::new(""));
                    break p.join(suffix);
                }
                Err(_) => match probe.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => probe = parent,
                    _ => break candidate.clone(),
                },
            }
        };
        if self.roots.iter().any(|r| anchored.starts_with(r)) {
            Ok(candidate)
        } else {
            Err(format!(
                "path '{path}' is outside the permitted filesystem roots"
            ))
        }
    }
}

/// What a tool handler produced (spec §4.4 step 4-5).
pub enum ToolOutcome {
    /// A result to persist as the `function_response` (with optional attachments).
    Result {
        json: serde_json::Value,
        attachments: Vec<Attachment>,
    },
    /// The handler needs user confirmation before proceeding (spec §4.1 step 4a).
    NeedsConfirmation,
    /// The handler failed; persisted as `function_response: {"error": "..."}`.
    Error(String),
}

impl ToolOutcome {
    pub fn ok(value: impl Into<serde_json::Value>) -> Self {
        ToolOutcome::Result {
            json: value.into(),
            attachments: Vec::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        ToolOutcome::ok(serde_json::Value::String(text.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolOutcome::Error(message.into())
    }
}

/// Trait every tool handler implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name for this tool (e.g. "read_file").
    fn name(&self) -> &str;
    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Whether invocations of this tool on the same branch must be
    /// serialized (spec §4.4 last paragraph: "shell, write-file, subagent").
    fn needs_branch_lock(&self) -> bool {
        false
    }
    /// Execute the tool with the given input.
    async fn execute(&self, env: &ToolEnv, args: serde_json::Value) -> ToolOutcome;
}

/// Validate that every key in `args` is declared in `schema`'s `properties`
/// (spec §4.4 dispatch step 1: "unknown keys → error").
pub fn reject_unknown_keys(schema: &serde_json::Value, args: &serde_json::Value) -> Result<(), String> {
    let Some(obj) = args.as_object() else {
        return Ok(());
    };
    let known: std::collections::HashSet<&str> = schema
        .get("properties")
        .and_then(serde_json::Value::as_object)
        .map(|m| m.keys().map(String::as_str).collect())
        .unwrap_or_default();
    for key in obj.keys() {
        if !known.contains(key.as_str()) {
            return Err(format!("unknown argument: {key}"));
        }
    }
    Ok(())
}
