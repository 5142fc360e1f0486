use threadline_store::Db;
use tracing::{info, instrument};

use crate::error::Result;

/// On startup, every record still marked `running` had its in-memory process
/// handle lost with the previous process — rewrite it as `failed_on_startup`
/// (spec §4.5 "Crash recovery"). Safe to call every boot.
#[instrument(skip(db))]
pub fn recover_on_startup(db: &Db) -> Result<usize> {
    let conn = db.lock().unwrap();
    let now = chrono::Utc::now().to_rfc3339();
    let recovered = conn.execute(
        "UPDATE shell_commands
         SET status = 'failed_on_startup', ended_at = ?1,
             error_message = 'process vanished with the server restart'
         WHERE status = 'running'",
        rusqlite::params![now],
    )?;
    if recovered > 0 {
        info!(recovered, "recovered orphaned shell command records on startup");
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_db;

    #[test]
    fn running_records_are_marked_failed_on_startup() {
        let db = threadline_store::db::open_in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            threadline_store::db::init_db(&conn).unwrap();
            init_db(&conn).unwrap();
            conn.execute(
                "INSERT INTO workspaces (id, name, system_prompt, created_at) VALUES ('ws','w','','')",
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
            conn.execute(
                "INSERT INTO shell_commands
                    (id, branch_id, command, directory, status, started_at, ended_at,
                     stdout_offset, stderr_offset, next_poll_delay_secs, last_polled_at,
                     exit_code, error_message)
                 VALUES (1, 1, 'sleep 100', NULL, 'running', '', NULL, 0, 0, 4, NULL, NULL, NULL)",
                [],
            )
            .unwrap();
        }
        let recovered = recover_on_startup(&db).unwrap();
        assert_eq!(recovered, 1);
        let conn = db.lock().unwrap();
        let status: String = conn
            .query_row("SELECT status FROM shell_commands WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "failed_on_startup");
    }
}
