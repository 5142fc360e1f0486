//! Tool: subagent — delegate a focused sub-task to a nested session running
//! under its own model/system-prompt profile (spec §4.6).

use std::sync::Arc;

use async_trait::async_trait;

use threadline_core::ids::SessionId;

use super::{Tool, ToolEnv, ToolOutcome};
use crate::subagent::SubagentManager;

pub struct SubagentTool {
    manager: Arc<SubagentManager>,
}

impl SubagentTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SubagentTool {
    fn name(&self) -> &str {
        "subagent"
    }

    fn description(&self) -> &str {
        "Delegate a focused sub-task to a nested agent session. Returns the \
         nested session's final response once it completes."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "profile": {
                    "type": "string",
                    "description": "Name of the subagent profile (model/system-prompt pairing) to run under."
                },
                "prompt": {
                    "type": "string",
                    "description": "The task to hand to the nested session."
                }
            },
            "required": ["profile", "prompt"]
        })
    }

    fn needs_branch_lock(&self) -> bool {
        true
    }

    async fn execute(&self, env: &ToolEnv, input: serde_json::Value) -> ToolOutcome {
        let Some(profile) = input.get("profile").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required parameter: profile");
        };
        let Some(prompt) = input.get("prompt").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required parameter: prompt");
        };
        let parent = SessionId::from(env.session_id.clone());
        match self.manager.run(&parent, profile, prompt.to_string()).await {
            Ok(output) => ToolOutcome::Result {
                json: serde_json::Value::String(output.text),
                attachments: output.attachments,
            },
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }
}

/// Tool: generate_image — a subagent profile specialised for image
/// generation; the nested turn's attachments carry the produced image
/// (spec §4.6: "image generation returns attachments").
pub struct GenerateImageTool {
    manager: Arc<SubagentManager>,
}

impl GenerateImageTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for GenerateImageTool {
    fn name(&self) -> &str {
        "generate_image"
    }

    fn description(&self) -> &str {
        "Generate an image from a text prompt. Returns an attachment with the result."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Description of the image to generate."
                }
            },
            "required": ["prompt"]
        })
    }

    async fn execute(&self, env: &ToolEnv, input: serde_json::Value) -> ToolOutcome {
        let Some(prompt) = input.get("prompt").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required parameter: prompt");
        };
        let parent = SessionId::from(env.session_id.clone());
        match self.manager.run(&parent, "image", prompt.to_string()).await {
            Ok(output) => ToolOutcome::Result {
                json: serde_json::Value::String(output.text),
                attachments: output.attachments,
            },
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }
}
