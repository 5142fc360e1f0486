use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use threadline_store::Db;
use tokio::process::Command as AsyncCommand;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::truncate::truncate_output;
use crate::types::{
    PollResult, ShellCommandRecord, ShellCommandStatus, INITIAL_POLL_DELAY_SECS,
    MAX_OUTPUT_CHARS, MAX_POLL_DELAY_SECS,
};

/// In-memory state for a live child process; the ground truth for "is this
/// command actually still running" (spec §4.5 "Crash recovery").
struct LiveJob {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    finished: Option<FinishedState>,
    pid: Option<u32>,
}

struct FinishedState {
    exit_code: i32,
    status: ShellCommandStatus,
}

/// Runs, polls and kills shell commands on behalf of `run_shell_command`
/// (spec §4.5). Command records live in the shared database; live process
/// handles live only in this process's memory.
pub struct ShellSupervisor {
    db: Db,
    live: DashMap<i64, Arc<Mutex<LiveJob>>>,
}

impl ShellSupervisor {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            live: DashMap::new(),
        }
    }

    /// Launch `command`, recording it before returning control, and wait up
    /// to `INITIAL_POLL_DELAY_SECS` for it to finish inline.
    #[instrument(skip(self, command))]
    pub async fn run_shell_command(
        &self,
        branch_id: i64,
        command: &str,
        directory: Option<&str>,
    ) -> Result<PollResult> {
        let now = Utc::now().to_rfc3339();
        let command_id = {
            let conn = self.db.lock().unwrap();
            conn.execute(
                "INSERT INTO shell_commands
                    (branch_id, command, directory, status, started_at, ended_at,
                     stdout_offset, stderr_offset, next_poll_delay_secs, last_polled_at,
                     exit_code, error_message)
                 VALUES (?1, ?2, ?3, 'running', ?4, NULL, 0, 0, ?5, NULL, NULL, NULL)",
                rusqlite::params![branch_id, command, directory, now, INITIAL_POLL_DELAY_SECS as i64],
            )?;
            conn.last_insert_rowid()
        };

        let mut cmd = AsyncCommand::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = directory {
            cmd.current_dir(dir);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                self.mark_terminal(
                    command_id,
                    ShellCommandStatus::FailedOnStartup,
                    None,
                    Some(&e.to_string()),
                )?;
                return Err(Error::SpawnFailed(e.to_string()));
            }
        };

        let pid = child.id();
        let live = Arc::new(Mutex::new(LiveJob {
            stdout: Vec::new(),
            stderr: Vec::new(),
            finished: None,
            pid,
        }));
        self.live.insert(command_id, Arc::clone(&live));

        let db = self.db.clone();
        let job_handle = Arc::clone(&live);
        tokio::spawn(async move {
            match child.wait_with_output().await {
                Ok(output) => {
                    let exit_code = output.status.code().unwrap_or(-1);
                    let mut guard = job_handle.lock().unwrap();
                    guard.stdout = output.stdout;
                    guard.stderr = output.stderr;
                    guard.finished = Some(FinishedState {
                        exit_code,
                        status: ShellCommandStatus::Completed,
                    });
                    drop(guard);
                    let conn = db.lock().unwrap();
                    let now = Utc::now().to_rfc3339();
                    let _ = conn.execute(
                        "UPDATE shell_commands SET status = 'completed', ended_at = ?1, exit_code = ?2
                         WHERE id = ?3 AND status = 'running'",
                        rusqlite::params![now, exit_code, command_id],
                    );
                }
                Err(e) => {
                    let mut guard = job_handle.lock().unwrap();
                    guard.finished = Some(FinishedState {
                        exit_code: -1,
                        status: ShellCommandStatus::Failed,
                    });
                    drop(guard);
                    let conn = db.lock().unwrap();
                    let now = Utc::now().to_rfc3339();
                    let _ = conn.execute(
                        "UPDATE shell_commands SET status = 'failed', ended_at = ?1, error_message = ?2
                         WHERE id = ?3 AND status = 'running'",
                        rusqlite::params![now, e.to_string(), command_id],
                    );
                }
            }
        });

        tokio::time::sleep(std::time::Duration::from_secs(INITIAL_POLL_DELAY_SECS)).await;
        self.collect(command_id)
    }

    /// Sleep for the record's `next_poll_delay_secs`, then report whatever
    /// new output/status is available, doubling the delay for next time
    /// (capped at `MAX_POLL_DELAY_SECS`) if still running.
    #[instrument(skip(self))]
    pub async fn poll_shell_command(&self, command_id: i64) -> Result<PollResult> {
        let delay = self.record(command_id)?.next_poll_delay_secs;
        tokio::time::sleep(std::time::Duration::from_secs(delay)).await;

        let result = self.collect(command_id)?;
        if result.status == ShellCommandStatus::Running {
            let next_delay = (delay * 2).min(MAX_POLL_DELAY_SECS);
            let conn = self.db.lock().unwrap();
            conn.execute(
                "UPDATE shell_commands SET next_poll_delay_secs = ?1 WHERE id = ?2",
                rusqlite::params![next_delay as i64, command_id],
            )?;
        }
        Ok(result)
    }

    #[instrument(skip(self))]
    pub fn kill_shell_command(&self, command_id: i64) -> Result<ShellCommandStatus> {
        let Some(entry) = self.live.get(&command_id) else {
            self.mark_terminal(command_id, ShellCommandStatus::FailedToKill, None, None)?;
            return Ok(ShellCommandStatus::FailedToKill);
        };
        let pid = entry.lock().unwrap().pid;
        let killed = match pid {
            Some(raw_pid) => kill_pid(raw_pid),
            None => false,
        };
        let status = if killed {
            ShellCommandStatus::Killed
        } else {
            ShellCommandStatus::FailedToKill
        };
        self.mark_terminal(command_id, status, None, None)?;
        Ok(status)
    }

    fn record(&self, command_id: i64) -> Result<ShellCommandRecord> {
        let conn = self.db.lock().unwrap();
        conn.query_row(
            "SELECT id, branch_id, command, directory, status, started_at, ended_at,
                    stdout_offset, stderr_offset, next_poll_delay_secs, last_polled_at,
                    exit_code, error_message
             FROM shell_commands WHERE id = ?1",
            rusqlite::params![command_id],
            row_to_record,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(command_id),
            other => Error::Database(other),
        })
    }

    /// Read the bytes produced since the record's offsets, advance them, and
    /// fold in terminal state observed from the live handle if any.
    fn collect(&self, command_id: i64) -> Result<PollResult> {
        let mut record = self.record(command_id)?;
        let now = Utc::now().to_rfc3339();

        let (stdout_chunk, stderr_chunk, exit_code, finished_status) =
            if let Some(live) = self.live.get(&command_id) {
                let guard = live.lock().unwrap();
                let stdout_chunk = strip_text(&guard.stdout[record.stdout_offset.min(guard.stdout.len())..]);
                let stderr_chunk = strip_text(&guard.stderr[record.stderr_offset.min(guard.stderr.len())..]);
                let stdout_len = guard.stdout.len();
                let stderr_len = guard.stderr.len();
                let exit_code = guard.finished.as_ref().map(|f| f.exit_code);
                let finished_status = guard.finished.as_ref().map(|f| f.status);
                drop(guard);
                record.stdout_offset = stdout_len;
                record.stderr_offset = stderr_len;
                (stdout_chunk, stderr_chunk, exit_code, finished_status)
            } else {
                (String::new(), String::new(), record.exit_code, None)
            };

        {
            let conn = self.db.lock().unwrap();
            conn.execute(
                "UPDATE shell_commands SET stdout_offset = ?1, stderr_offset = ?2, last_polled_at = ?3
                 WHERE id = ?4",
                rusqlite::params![record.stdout_offset, record.stderr_offset, now, command_id],
            )?;
        }

        let status = finished_status.unwrap_or(record.status);
        if finished_status.is_some() {
            self.live.remove(&command_id);
        }

        let elapsed_seconds = elapsed_secs(&record.started_at, &now);
        Ok(PollResult {
            command_id,
            status,
            stdout_chunk: truncate_output(&stdout_chunk, MAX_OUTPUT_CHARS),
            stderr_chunk: truncate_output(&stderr_chunk, MAX_OUTPUT_CHARS),
            elapsed_seconds,
            exit_code,
        })
    }

    fn mark_terminal(
        &self,
        command_id: i64,
        status: ShellCommandStatus,
        exit_code: Option<i32>,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.live.remove(&command_id);
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE shell_commands SET status = ?1, ended_at = ?2, exit_code = ?3, error_message = ?4
             WHERE id = ?5",
            rusqlite::params![status.as_str(), now, exit_code, error_message, command_id],
        )?;
        Ok(())
    }
}

fn elapsed_secs(started_at: &str, now: &str) -> u64 {
    let parse = |s: &str| chrono::DateTime::parse_from_rfc3339(s).ok();
    match (parse(started_at), parse(now)) {
        (Some(start), Some(end)) => (end - start).num_seconds().max(0) as u64,
        _ => 0,
    }
}

fn strip_text(raw: &[u8]) -> String {
    let clean = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&clean).into_owned()
}

#[cfg(unix)]
fn kill_pid(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) == 0 }
}

#[cfg(not(unix))]
fn kill_pid(pid: u32) -> bool {
    std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ShellCommandRecord> {
    let status_str: String = row.get(4)?;
    Ok(ShellCommandRecord {
        id: row.get(0)?,
        branch_id: row.get(1)?,
        command: row.get(2)?,
        directory: row.get(3)?,
        status: ShellCommandStatus::from_str(&status_str).unwrap_or(ShellCommandStatus::Failed),
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        stdout_offset: row.get::<_, i64>(7)? as usize,
        stderr_offset: row.get::<_, i64>(8)? as usize,
        next_poll_delay_secs: row.get::<_, i64>(9)? as u64,
        last_polled_at: row.get(10)?,
        exit_code: row.get(11)?,
        error_message: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_db;

    fn setup() -> (ShellSupervisor, i64) {
        let db = threadline_store::db::open_in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            threadline_store::db::init_db(&conn).unwrap();
            init_db(&conn).unwrap();
            conn.execute(
                "INSERT INTO workspaces (id, name, system_prompt, created_at) VALUES ('ws','w','', '')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO sessions (id, workspace_id, name, system_prompt_template,
                    primary_branch_id, environment_generation, temporary, created_at, updated_at)
                 VALUES ('s1','ws','','',NULL,0,0,'','')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO branches (id, session_id, parent_branch_id, branch_from_message_id,
                    head_message_id, pending_confirmation, created_at)
                 VALUES (1,'s1',NULL,NULL,NULL,NULL,'')",
                [],
            )
            .unwrap();
        }
        (ShellSupervisor::new(db), 1)
    }

    #[tokio::test]
    async fn quick_command_completes_inline() {
        let (sup, branch) = setup();
        let result = sup.run_shell_command(branch, "echo hi", None).await.unwrap();
        assert_eq!(result.status, ShellCommandStatus::Completed);
        assert!(result.stdout_chunk.contains("hi"));
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn kill_unknown_command_reports_failed_to_kill() {
        let (sup, _) = setup();
        let status = sup.kill_shell_command(9999).unwrap();
        assert_eq!(status, ShellCommandStatus::FailedToKill);
    }
}
