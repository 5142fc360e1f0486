//! Shell tools (spec §4.5) — thin `Tool` wrappers around `threadline_shell::ShellSupervisor`.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;

use threadline_shell::ShellSupervisor;

use super::{Tool, ToolEnv, ToolOutcome};

/// `run_shell_command` — requires confirmation on the first invocation per
/// branch (spec §4.5); subsequent calls on the same branch proceed directly.
pub struct RunShellCommandTool {
    supervisor: Arc<ShellSupervisor>,
    confirmed_branches: DashSet<i64>,
}

impl RunShellCommandTool {
    pub fn new(supervisor: Arc<ShellSupervisor>) -> Self {
        Self {
            supervisor,
            confirmed_branches: DashSet::new(),
        }
    }
}

#[async_trait]
impl Tool for RunShellCommandTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn description(&self) -> &str {
        "Run a non-interactive shell command. The first call on a given conversation \
         branch requires user confirmation. Returns inline output if the command \
         finishes quickly, otherwise a command_id to poll with poll_shell_command."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to run via sh -c." },
                "directory": { "type": "string", "description": "Working directory (optional)." }
            },
            "required": ["command"]
        })
    }

    fn needs_branch_lock(&self) -> bool {
        true
    }

    async fn execute(&self, env: &ToolEnv, input: serde_json::Value) -> ToolOutcome {
        if !self.confirmed_branches.contains(&env.branch_id) {
            if !env.confirmation_received {
                return ToolOutcome::NeedsConfirmation;
            }
            self.confirmed_branches.insert(env.branch_id);
        }

        let Some(command) = input.get("command").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required parameter: command");
        };
        let directory = input.get("directory").and_then(|v| v.as_str());

        match self.supervisor.run_shell_command(env.branch_id, command, directory).await {
            Ok(result) => ToolOutcome::ok(serde_json::to_value(&result).unwrap_or_default()),
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }
}

/// `poll_shell_command` — returns bytes produced since the last poll.
pub struct PollShellCommandTool {
    supervisor: Arc<ShellSupervisor>,
}

impl PollShellCommandTool {
    pub fn new(supervisor: Arc<ShellSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Tool for PollShellCommandTool {
    fn name(&self) -> &str {
        "poll_shell_command"
    }

    fn description(&self) -> &str {
        "Poll a running shell command started by run_shell_command for more output and status."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command_id": { "type": "integer", "description": "The id returned by run_shell_command." }
            },
            "required": ["command_id"]
        })
    }

    async fn execute(&self, _env: &ToolEnv, input: serde_json::Value) -> ToolOutcome {
        let Some(command_id) = input.get("command_id").and_then(|v| v.as_i64()) else {
            return ToolOutcome::error("missing required parameter: command_id");
        };
        match self.supervisor.poll_shell_command(command_id).await {
            Ok(result) => ToolOutcome::ok(serde_json::to_value(&result).unwrap_or_default()),
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }
}

/// `kill_shell_command` — attempts process termination.
pub struct KillShellCommandTool {
    supervisor: Arc<ShellSupervisor>,
}

impl KillShellCommandTool {
    pub fn new(supervisor: Arc<ShellSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Tool for KillShellCommandTool {
    fn name(&self) -> &str {
        "kill_shell_command"
    }

    fn description(&self) -> &str {
        "Attempt to terminate a running shell command started by run_shell_command."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command_id": { "type": "integer", "description": "The id returned by run_shell_command." }
            },
            "required": ["command_id"]
        })
    }

    async fn execute(&self, _env: &ToolEnv, input: serde_json::Value) -> ToolOutcome {
        let Some(command_id) = input.get("command_id").and_then(|v| v.as_i64()) else {
            return ToolOutcome::error("missing required parameter: command_id");
        };
        match self.supervisor.kill_shell_command(command_id) {
            Ok(status) => ToolOutcome::text(status.as_str().to_string()),
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }
}
