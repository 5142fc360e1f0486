use chrono::{DateTime, Utc};
use threadline_core::ids::{SessionId, WorkspaceId};
use tracing::instrument;

use crate::db::Db;
use crate::error::{Error, Result};

/// A conversational session (spec §3). Owns branches, messages, blobs,
/// shell-command records and environment-history entries.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub system_prompt_template: String,
    pub primary_branch_id: Option<i64>,
    pub environment_generation: i64,
    pub temporary: bool,
    pub created_at: String,
    pub updated_at: String,
}

pub struct SessionStore {
    db: Db,
}

impl SessionStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Sessions are created on first message (spec §3 "Lifecycles"); callers
    /// construct the id themselves (a fresh top-level id, or a subagent's
    /// dotted child id from `SessionId::child`).
    #[instrument(skip(self, system_prompt_template))]
    pub fn create(
        &self,
        id: SessionId,
        workspace_id: &WorkspaceId,
        system_prompt_template: &str,
        temporary: bool,
    ) -> Result<Session> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions
                (id, workspace_id, name, system_prompt_template, primary_branch_id,
                 environment_generation, temporary, created_at, updated_at)
             VALUES (?1, ?2, '', ?3, NULL, 0, ?4, ?5, ?5)",
            rusqlite::params![
                id.as_str(),
                workspace_id.as_str(),
                system_prompt_template,
                temporary as i64,
                now,
            ],
        )?;
        Ok(Session {
            id,
            workspace_id: workspace_id.clone(),
            name: String::new(),
            system_prompt_template: system_prompt_template.to_string(),
            primary_branch_id: None,
            environment_generation: 0,
            temporary,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: &SessionId) -> Result<Session> {
        let conn = self.db.lock().unwrap();
        conn.query_row(
            "SELECT id, workspace_id, name, system_prompt_template, primary_branch_id,
                    environment_generation, temporary, created_at, updated_at
             FROM sessions WHERE id = ?1",
            rusqlite::params![id.as_str()],
            row_to_session,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound {
                what: "session",
                id: id.as_str().to_string(),
            },
            other => Error::Database(other),
        })
    }

    /// Atomically set the displayed branch (spec §4.3 `switch_primary`).
    #[instrument(skip(self))]
    pub fn set_primary_branch(&self, id: &SessionId, branch_id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        let changed = conn.execute(
            "UPDATE sessions SET primary_branch_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![branch_id, now, id.as_str()],
        )?;
        if changed == 0 {
            return Err(Error::NotFound {
                what: "session",
                id: id.as_str().to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_name(&self, id: &SessionId, name: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET name = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![name, now, id.as_str()],
        )?;
        Ok(())
    }

    /// Bump the environment generation and record the new root set
    /// (spec §4.1 "Environment-change interleaving").
    #[instrument(skip(self, roots))]
    pub fn bump_environment(&self, id: &SessionId, roots: &[String]) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        let generation: i64 = conn.query_row(
            "UPDATE sessions SET environment_generation = environment_generation + 1, updated_at = ?1
             WHERE id = ?2
             RETURNING environment_generation",
            rusqlite::params![now, id.as_str()],
            |row| row.get(0),
        )?;
        let roots_json = serde_json::to_string(roots)?;
        conn.execute(
            "INSERT INTO env_history (session_id, generation, roots, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id.as_str(), generation, roots_json, now],
        )?;
        Ok(generation)
    }

    pub fn current_generation(&self, id: &SessionId) -> Result<i64> {
        Ok(self.get(id)?.environment_generation)
    }

    /// The root set recorded by the most recent `bump_environment` call, or
    /// an empty list if the session's environment has never changed.
    #[instrument(skip(self))]
    pub fn current_roots(&self, id: &SessionId) -> Result<Vec<String>> {
        let conn = self.db.lock().unwrap();
        let roots_json: Option<String> = conn
            .query_row(
                "SELECT roots FROM env_history WHERE session_id = ?1 ORDER BY generation DESC LIMIT 1",
                rusqlite::params![id.as_str()],
                |row| row.get(0),
            )
            .ok();
        match roots_json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Delete a session and, per the Open Question decision in DESIGN.md,
    /// cascade to every subagent session nested under it (dot-prefixed ids).
    #[instrument(skip(self))]
    pub fn delete_cascading(&self, id: &SessionId) -> Result<usize> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM sessions")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        let to_delete: Vec<String> = ids
            .into_iter()
            .filter(|other| id.is_ancestor_of_or_self(&SessionId::from(other.clone())))
            .collect();
        for sid in &to_delete {
            conn.execute("DELETE FROM env_history WHERE session_id = ?1", [sid])?;
            conn.execute("DELETE FROM messages WHERE session_id = ?1", [sid])?;
            conn.execute("DELETE FROM branches WHERE session_id = ?1", [sid])?;
            conn.execute("DELETE FROM sessions WHERE id = ?1", [sid])?;
        }
        Ok(to_delete.len())
    }

    /// List temporary sessions whose last update is older than `cutoff`
    /// (used by the sweeper, spec §3 "Lifecycles").
    pub fn list_expired_temporary(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionId>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM sessions WHERE temporary = 1 AND updated_at < ?1",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![cutoff.to_rfc3339()],
            |row| row.get::<_, String>(0),
        )?;
        Ok(rows.filter_map(|r| r.ok()).map(SessionId::from).collect())
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: SessionId::from(row.get::<_, String>(0)?),
        workspace_id: WorkspaceId::from(row.get::<_, String>(1)?),
        name: row.get(2)?,
        system_prompt_template: row.get(3)?,
        primary_branch_id: row.get(4)?,
        environment_generation: row.get(5)?,
        temporary: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn store() -> SessionStore {
        let db = db::open_in_memory().unwrap();
        db::init_db(&db.lock().unwrap()).unwrap();
        SessionStore::new(db)
    }

    fn workspace(store: &SessionStore) -> WorkspaceId {
        let conn = store.db.lock().unwrap();
        conn.execute(
            "INSERT INTO workspaces (id, name, system_prompt, created_at) VALUES ('ws1','w','',?1)",
            rusqlite::params![Utc::now().to_rfc3339()],
        )
        .unwrap();
        WorkspaceId::from("ws1".to_string())
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = store();
        let ws = workspace(&store);
        let id = SessionId::from("s1".to_string());
        store.create(id.clone(), &ws, "{{Today}}", false).unwrap();
        let got = store.get(&id).unwrap();
        assert_eq!(got.primary_branch_id, None);
        assert!(!got.temporary);
    }

    #[test]
    fn cascading_delete_removes_subagents_only() {
        let store = store();
        let ws = workspace(&store);
        for name in ["main", "main.sub1", "main.sub1.sub2", "other"] {
            store
                .create(SessionId::from(name.to_string()), &ws, "", false)
                .unwrap();
        }
        let deleted = store.delete_cascading(&SessionId::from("main".to_string())).unwrap();
        assert_eq!(deleted, 3);
        assert!(store.get(&SessionId::from("other".to_string())).is_ok());
        assert!(store.get(&SessionId::from("main".to_string())).is_err());
    }

    #[test]
    fn bump_environment_increments_generation_and_records_history() {
        let store = store();
        let ws = workspace(&store);
        let id = SessionId::from("s1".to_string());
        store.create(id.clone(), &ws, "", false).unwrap();
        let gen1 = store.bump_environment(&id, &["/tmp".to_string()]).unwrap();
        assert_eq!(gen1, 1);
        let gen2 = store.bump_environment(&id, &["/tmp".to_string(), "/home".to_string()]).unwrap();
        assert_eq!(gen2, 2);
    }
}
