//! Non-interactive shell command supervisor (spec §4.5): launches commands,
//! tracks them by id in the shared database, and serves `poll`/`kill`
//! against either a live in-process handle or the persisted record.

pub mod error;
pub mod recovery;
pub mod supervisor;
pub mod truncate;
pub mod types;

pub use error::{Error, Result};
pub use recovery::recover_on_startup;
pub use supervisor::ShellSupervisor;
pub use types::{PollResult, ShellCommandRecord, ShellCommandStatus};

/// Create the `shell_commands` table this crate owns. Safe to call on every
/// startup, following the same `init_db` convention as `threadline-store`.
pub fn init_db(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS shell_commands (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            branch_id              INTEGER NOT NULL REFERENCES branches(id),
            command                TEXT NOT NULL,
            directory              TEXT,
            status                 TEXT NOT NULL,
            started_at             TEXT NOT NULL,
            ended_at               TEXT,
            stdout_offset          INTEGER NOT NULL DEFAULT 0,
            stderr_offset          INTEGER NOT NULL DEFAULT 0,
            next_poll_delay_secs   INTEGER NOT NULL DEFAULT 4,
            last_polled_at         TEXT,
            exit_code              INTEGER,
            error_message          TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_shell_commands_branch
            ON shell_commands(branch_id);",
    )?;
    Ok(())
}
