use chrono::Utc;
use tracing::instrument;

use crate::db::Db;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Branch {
    pub id: i64,
    pub session_id: String,
    pub parent_branch_id: Option<i64>,
    pub branch_from_message_id: Option<i64>,
    pub head_message_id: Option<i64>,
    pub pending_confirmation: Option<String>,
    pub created_at: String,
}

/// Creates, switches and pends branches (spec §4.3). Mutates the same
/// database the message/session stores use, so every operation here runs
/// inside a single `rusqlite::Transaction` rather than composing those
/// stores' own lock-and-commit calls.
pub struct BranchManager {
    db: Db,
}

impl BranchManager {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn get(&self, id: i64) -> Result<Branch> {
        let conn = self.db.lock().unwrap();
        conn.query_row(
            "SELECT id, session_id, parent_branch_id, branch_from_message_id,
                    head_message_id, pending_confirmation, created_at
             FROM branches WHERE id = ?1",
            rusqlite::params![id],
            row_to_branch,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound {
                what: "branch",
                id: id.to_string(),
            },
            other => Error::Database(other),
        })
    }

    /// Create the first branch of a brand-new session: no parent branch, no
    /// branch-from point, empty head (spec §3 "Lifecycles" — a session's
    /// first branch is created alongside the session itself).
    #[instrument(skip(self))]
    pub fn create_root(&self, session_id: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO branches
                (session_id, parent_branch_id, branch_from_message_id, head_message_id,
                 pending_confirmation, created_at)
             VALUES (?1, NULL, NULL, NULL, NULL, ?2)",
            rusqlite::params![session_id, now],
        )?;
        let branch_id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE sessions SET primary_branch_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![branch_id, now, session_id],
        )?;
        Ok(branch_id)
    }

    /// Fork a new branch off `message_id`: insert the branch row, append a
    /// fresh user message on it, retarget the branched-from message's
    /// `chosen_next_id`, and make the new branch the session's primary —
    /// all in one transaction (spec §4.3).
    #[instrument(skip(self, new_first_user_text))]
    pub fn create_branch_from(&self, message_id: i64, new_first_user_text: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.lock().unwrap();
        let tx = conn.transaction()?;

        let (session_id, parent_branch_id): (String, i64) = tx.query_row(
            "SELECT session_id, branch_id FROM messages WHERE id = ?1",
            rusqlite::params![message_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ).map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound {
                what: "message",
                id: message_id.to_string(),
            },
            other => Error::Database(other),
        })?;

        tx.execute(
            "INSERT INTO branches
                (session_id, parent_branch_id, branch_from_message_id, head_message_id,
                 pending_confirmation, created_at)
             VALUES (?1, ?2, ?3, NULL, NULL, ?4)",
            rusqlite::params![session_id, parent_branch_id, message_id, now],
        )?;
        let new_branch_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO messages
                (session_id, branch_id, parent_message_id, chosen_next_id,
                 message_type, text, attachments, cumul_token_count, created_at,
                 model, generation, aux)
             VALUES (?1, ?2, ?3, NULL, 'user_text', ?4, '[]', 0, ?5, NULL, 0, NULL)",
            rusqlite::params![session_id, new_branch_id, message_id, new_first_user_text, now],
        )?;
        let new_message_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO messages_fts(rowid, text) VALUES (?1, ?2)",
            rusqlite::params![new_message_id, new_first_user_text],
        )?;

        tx.execute(
            "UPDATE messages SET chosen_next_id = ?1 WHERE id = ?2",
            rusqlite::params![new_message_id, message_id],
        )?;
        tx.execute(
            "UPDATE branches SET head_message_id = ?1 WHERE id = ?2",
            rusqlite::params![new_message_id, new_branch_id],
        )?;
        tx.execute(
            "UPDATE sessions SET primary_branch_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![new_branch_id, now, session_id],
        )?;

        tx.commit()?;
        Ok(new_branch_id)
    }

    /// Update `primary_branch_id` only; `chosen_next_id`s on the previously
    /// active chain are left untouched (spec §4.3).
    #[instrument(skip(self))]
    pub fn switch_primary(&self, session_id: &str, new_branch_id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        let changed = conn.execute(
            "UPDATE sessions SET primary_branch_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![new_branch_id, now, session_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound {
                what: "session",
                id: session_id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, payload))]
    pub fn set_pending(&self, branch_id: i64, payload: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE branches SET pending_confirmation = ?1 WHERE id = ?2",
            rusqlite::params![payload, branch_id],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn clear_pending(&self, branch_id: i64) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE branches SET pending_confirmation = NULL WHERE id = ?1",
            rusqlite::params![branch_id],
        )?;
        Ok(())
    }
}

fn row_to_branch(row: &rusqlite::Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        session_id: row.get(1)?,
        parent_branch_id: row.get(2)?,
        branch_from_message_id: row.get(3)?,
        head_message_id: row.get(4)?,
        pending_confirmation: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup() -> (BranchManager, i64) {
        let db = db::open_in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            db::init_db(&conn).unwrap();
            conn.execute(
                "INSERT INTO workspaces (id, name, system_prompt, created_at) VALUES ('ws','w','', '')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO sessions (id, workspace_id, name, system_prompt_template,
                    primary_branch_id, environment_generation, temporary, created_at, updated_at)
                 VALUES ('s1','ws','','',1,0,0,'','')",
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
                "INSERT INTO messages (id, session_id, branch_id, parent_message_id, chosen_next_id,
                    message_type, text, attachments, cumul_token_count, created_at, model, generation, aux)
                 VALUES (1,'s1',1,NULL,NULL,'user_text','hi','[]',0,'',NULL,0,NULL)",
                [],
            )
            .unwrap();
            conn.execute(
                "UPDATE branches SET head_message_id = 1 WHERE id = 1",
                [],
            )
            .unwrap();
        }
        (BranchManager::new(db), 1)
    }

    #[test]
    fn create_root_has_no_parent_and_becomes_primary() {
        let (mgr, _) = setup();
        let conn_check = mgr.db.clone();
        {
            let conn = conn_check.lock().unwrap();
            conn.execute(
                "INSERT INTO sessions (id, workspace_id, name, system_prompt_template,
                    primary_branch_id, environment_generation, temporary, created_at, updated_at)
                 VALUES ('s2','ws','','',NULL,0,0,'','')",
                [],
            )
            .unwrap();
        }
        let branch_id = mgr.create_root("s2").unwrap();
        let branch = mgr.get(branch_id).unwrap();
        assert_eq!(branch.parent_branch_id, None);
        assert_eq!(branch.branch_from_message_id, None);
        assert_eq!(branch.head_message_id, None);
        let conn = mgr.db.lock().unwrap();
        let primary: i64 = conn
            .query_row("SELECT primary_branch_id FROM sessions WHERE id = 's2'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(primary, branch_id);
    }

    #[test]
    fn create_branch_from_forks_and_becomes_primary() {
        let (mgr, message_id) = setup();
        let new_branch = mgr.create_branch_from(message_id, "edited text").unwrap();
        assert_ne!(new_branch, 1);
        let branch = mgr.get(new_branch).unwrap();
        assert_eq!(branch.branch_from_message_id, Some(message_id));
        assert_eq!(branch.parent_branch_id, Some(1));

        let conn = mgr.db.lock().unwrap();
        let primary: i64 = conn
            .query_row("SELECT primary_branch_id FROM sessions WHERE id = 's1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(primary, new_branch);

        let chosen_next: Option<i64> = conn
            .query_row("SELECT chosen_next_id FROM messages WHERE id = ?1", [message_id], |r| r.get(0))
            .unwrap();
        assert!(chosen_next.is_some());
    }

    #[test]
    fn set_and_clear_pending_round_trip() {
        let (mgr, _) = setup();
        mgr.set_pending(1, r#"{"name":"run_shell_command"}"#).unwrap();
        assert!(mgr.get(1).unwrap().pending_confirmation.is_some());
        mgr.clear_pending(1).unwrap();
        assert!(mgr.get(1).unwrap().pending_confirmation.is_none());
    }

    #[test]
    fn switch_primary_leaves_chosen_next_untouched() {
        let (mgr, message_id) = setup();
        let new_branch = mgr.create_branch_from(message_id, "forked").unwrap();
        mgr.switch_primary("s1", 1).unwrap();
        let conn = mgr.db.lock().unwrap();
        let chosen_next: Option<i64> = conn
            .query_row("SELECT chosen_next_id FROM messages WHERE id = ?1", [message_id], |r| r.get(0))
            .unwrap();
        assert!(chosen_next.is_some());
        drop(conn);
        assert_eq!(mgr.get(new_branch).unwrap().parent_branch_id, Some(1));
    }
}
