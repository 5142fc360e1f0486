//! Tool: write_file — write content to a file, creating parent directories as needed.

use async_trait::async_trait;

use super::{Tool, ToolEnv, ToolOutcome};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates parent directories if they do not exist. \
         Overwrites the file if it already exists."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to write to."
                },
                "content": {
                    "type": "string",
                    "description": "Text content to write into the file."
                }
            },
            "required": ["path", "content"]
        })
    }

    fn needs_branch_lock(&self) -> bool {
        true
    }

    async fn execute(&self, env: &ToolEnv, input: serde_json::Value) -> ToolOutcome {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required parameter: path");
        };
        let path = match env.resolve_path(path) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::error(e),
        };
        let Some(content) = input.get("content").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required parameter: content");
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return ToolOutcome::error(format!(
                        "failed to create directories for '{}': {e}",
                        path.display()
                    ));
                }
            }
        }

        let byte_len = content.len();
        if let Err(e) = std::fs::write(&path, content) {
            return ToolOutcome::error(format!("failed to write '{}': {e}", path.display()));
        }

        ToolOutcome::text(format!("File written: {byte_len} bytes to '{}'", path.display()))
    }
}
