//! `patch_file` tool — surgical string replacement inside a file.
//!
//! Instead of read → full rewrite, the model sends only the exact text to
//! replace and the replacement. Safer, cheaper on tokens, and works on
//! files that would overflow a full read_file → write_file round-trip.

use async_trait::async_trait;

use super::{Tool, ToolEnv, ToolOutcome};

pub struct PatchFileTool;

#[async_trait]
impl Tool for PatchFileTool {
    fn name(&self) -> &str {
        "patch_file"
    }

    fn description(&self) -> &str {
        "Make a surgical edit to a file by replacing an exact string with new text. \
         Prefer this over write_file when changing only part of a file — it is safer \
         (only the matched region changes) and much cheaper on tokens. \
         The match is exact and whitespace-sensitive: copy the old text verbatim \
         from read_file output. Returns an error if old_string is not found or is ambiguous."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file to edit."
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to find. Must appear in the file."
                },
                "new_string": {
                    "type": "string",
                    "description": "Text to replace old_string with. Use an empty string to delete old_string."
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence instead of just the first. Default false."
                }
            },
            "required": ["path", "old_string", "new_string"]
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
        let Some(old) = input.get("old_string").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required parameter: old_string");
        };
        let Some(new) = input.get("new_string").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required parameter: new_string");
        };
        let replace_all = input.get("replace_all").and_then(|v| v.as_bool()).unwrap_or(false);

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolOutcome::error(format!("failed to read '{}': {e}", path.display())),
        };

        let count = content.matches(old).count();
        if count == 0 {
            return ToolOutcome::error(format!(
                "old_string not found in '{}'. Use read_file first and copy the text verbatim.",
                path.display()
            ));
        }
        if !replace_all && count > 1 {
            return ToolOutcome::error(format!(
                "old_string matches {count} times in '{}'. \
                 Add more surrounding context to make it unique, or set replace_all=true.",
                path.display()
            ));
        }

        let updated = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };

        let tmp_path = path.with_extension("threadline_patch_tmp");
        if let Err(e) = std::fs::write(&tmp_path, &updated) {
            return ToolOutcome::error(format!("failed to write temp file '{}': {e}", tmp_path.display()));
        }
        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return ToolOutcome::error(format!("failed to rename temp file to '{}': {e}", path.display()));
        }

        let occurrences = if replace_all { format!("{count} occurrence(s)") } else { "1 occurrence".to_string() };
        ToolOutcome::text(format!("Patched '{}': replaced {occurrences} of old_string.", path.display()))
    }
}
