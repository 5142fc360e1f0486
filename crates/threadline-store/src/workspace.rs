use chrono::Utc;
use threadline_core::ids::WorkspaceId;
use tracing::instrument;

use crate::db::Db;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub system_prompt: String,
    pub created_at: String,
}

pub struct WorkspaceStore {
    db: Db,
}

impl WorkspaceStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn create(&self, name: &str, system_prompt: &str) -> Result<Workspace> {
        let id = WorkspaceId::new();
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO workspaces (id, name, system_prompt, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id.as_str(), name, system_prompt, now],
        )?;
        Ok(Workspace {
            id,
            name: name.to_string(),
            system_prompt: system_prompt.to_string(),
            created_at: now,
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: &WorkspaceId) -> Result<Workspace> {
        let conn = self.db.lock().unwrap();
        conn.query_row(
            "SELECT id, name, system_prompt, created_at FROM workspaces WHERE id = ?1",
            rusqlite::params![id.as_str()],
            row_to_workspace,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound {
                what: "workspace",
                id: id.as_str().to_string(),
            },
            other => Error::Database(other),
        })
    }

    pub fn list(&self) -> Result<Vec<Workspace>> {
        let conn = self.db.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, name, system_prompt, created_at FROM workspaces ORDER BY created_at")?;
        let rows = stmt.query_map([], row_to_workspace)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Replace a workspace's system-prompt template (spec §6 "system-prompt
    /// CRUD"). Existing sessions keep whatever template they were created
    /// with; only new sessions under this workspace pick up the change.
    #[instrument(skip(self, system_prompt))]
    pub fn update_system_prompt(&self, id: &WorkspaceId, system_prompt: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        let changed = conn.execute(
            "UPDATE workspaces SET system_prompt = ?1 WHERE id = ?2",
            rusqlite::params![system_prompt, id.as_str()],
        )?;
        if changed == 0 {
            return Err(Error::NotFound {
                what: "workspace",
                id: id.as_str().to_string(),
            });
        }
        Ok(())
    }
}

fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: WorkspaceId::from(row.get::<_, String>(0)?),
        name: row.get(1)?,
        system_prompt: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn store() -> WorkspaceStore {
        let db = db::open_in_memory().unwrap();
        db::init_db(&db.lock().unwrap()).unwrap();
        WorkspaceStore::new(db)
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = store();
        let ws = store.create("demo", "be helpful").unwrap();
        let fetched = store.get(&ws.id).unwrap();
        assert_eq!(fetched.name, "demo");
        assert_eq!(fetched.system_prompt, "be helpful");
    }

    #[test]
    fn get_missing_workspace_is_not_found() {
        let store = store();
        let err = store.get(&WorkspaceId::from("nope".to_string())).unwrap_err();
        assert_eq!(err.code(), threadline_core::error::kind::NOT_FOUND);
    }

    #[test]
    fn update_system_prompt_is_visible_on_next_get() {
        let store = store();
        let ws = store.create("demo", "be helpful").unwrap();
        store.update_system_prompt(&ws.id, "be terse").unwrap();
        assert_eq!(store.get(&ws.id).unwrap().system_prompt, "be terse");
    }

    #[test]
    fn update_system_prompt_on_missing_workspace_is_not_found() {
        let store = store();
        let err = store
            .update_system_prompt(&WorkspaceId::from("nope".to_string()), "x")
            .unwrap_err();
        assert_eq!(err.code(), threadline_core::error::kind::NOT_FOUND);
    }
}
