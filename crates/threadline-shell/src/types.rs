//! Shared data types for the shell command supervisor (spec §4.5).

use serde::{Deserialize, Serialize};

/// First poll waits this long for the command to finish inline (spec §4.5).
pub const INITIAL_POLL_DELAY_SECS: u64 = 4;

/// Poll delay doubles on each still-running poll, capped here.
pub const MAX_POLL_DELAY_SECS: u64 = 60;

/// Maximum characters of combined stdout/stderr returned per call before
/// middle-omission truncation (see `truncate::truncate_output`).
pub const MAX_OUTPUT_CHARS: usize = 30_000;

/// Lifecycle state of a shell command record (spec §3's closed status set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellCommandStatus {
    Running,
    Completed,
    Failed,
    FailedToKill,
    FailedOnStartup,
    Killed,
}

impl ShellCommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ShellCommandStatus::Running => "running",
            ShellCommandStatus::Completed => "completed",
            ShellCommandStatus::Failed => "failed",
            ShellCommandStatus::FailedToKill => "failed_to_kill",
            ShellCommandStatus::FailedOnStartup => "failed_on_startup",
            ShellCommandStatus::Killed => "killed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "running" => ShellCommandStatus::Running,
            "completed" => ShellCommandStatus::Completed,
            "failed" => ShellCommandStatus::Failed,
            "failed_to_kill" => ShellCommandStatus::FailedToKill,
            "failed_on_startup" => ShellCommandStatus::FailedOnStartup,
            "killed" => ShellCommandStatus::Killed,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ShellCommandStatus::Running)
    }
}

/// A persisted shell command record (spec §3 "Shell command record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellCommandRecord {
    pub id: i64,
    pub branch_id: i64,
    pub command: String,
    pub directory: Option<String>,
    pub status: ShellCommandStatus,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub stdout_offset: usize,
    pub stderr_offset: usize,
    pub next_poll_delay_secs: u64,
    pub last_polled_at: Option<String>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
}

/// What a poll or initial-wait call hands back to the tool layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResult {
    pub command_id: i64,
    pub status: ShellCommandStatus,
    pub stdout_chunk: String,
    pub stderr_chunk: String,
    pub elapsed_seconds: u64,
    pub exit_code: Option<i32>,
}
