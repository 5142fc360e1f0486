use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::Result;

/// Shared handle to the single per-session-database-file SQLite connection
/// (spec §6: "a single main SQL database file"). All managers in this crate
/// and in `threadline-shell` hold a clone of this handle; writes serialize
/// through the mutex, matching spec §5's "single writer (SQLite WAL)" model.
pub type Db = Arc<Mutex<Connection>>;

/// Open (creating if absent) the database file at `path` in WAL mode and
/// return a shared handle. Does not run migrations — call [`init_db`]
/// afterwards.
pub fn open(path: &str) -> Result<Db> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Open an in-memory database, for tests.
pub fn open_in_memory() -> Result<Db> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Initialise every table owned by this crate. Safe to call on every
/// startup — uses `IF NOT EXISTS` throughout, following this codebase's
/// established `init_db` convention.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS workspaces (
            id                  TEXT PRIMARY KEY,
            name                TEXT NOT NULL,
            system_prompt       TEXT NOT NULL DEFAULT '',
            created_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id                  TEXT PRIMARY KEY,
            workspace_id        TEXT NOT NULL REFERENCES workspaces(id),
            name                TEXT NOT NULL DEFAULT '',
            system_prompt_template TEXT NOT NULL DEFAULT '',
            primary_branch_id   INTEGER,
            environment_generation INTEGER NOT NULL DEFAULT 0,
            temporary           INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_workspace
            ON sessions(workspace_id, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_sessions_temp_updated
            ON sessions(temporary, updated_at);

        CREATE TABLE IF NOT EXISTS branches (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id             TEXT NOT NULL REFERENCES sessions(id),
            parent_branch_id       INTEGER,
            branch_from_message_id INTEGER,
            head_message_id        INTEGER,
            pending_confirmation   TEXT,
            created_at             TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_branches_session
            ON branches(session_id);

        CREATE TABLE IF NOT EXISTS messages (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id         TEXT NOT NULL REFERENCES sessions(id),
            branch_id          INTEGER NOT NULL REFERENCES branches(id),
            parent_message_id  INTEGER,
            chosen_next_id     INTEGER,
            message_type       TEXT NOT NULL,
            text               TEXT NOT NULL DEFAULT '',
            attachments        TEXT NOT NULL DEFAULT '[]',
            cumul_token_count  INTEGER NOT NULL DEFAULT 0,
            created_at         TEXT NOT NULL,
            model              TEXT,
            generation         INTEGER NOT NULL DEFAULT 0,
            aux                TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_messages_branch
            ON messages(branch_id, id);
        CREATE INDEX IF NOT EXISTS idx_messages_parent
            ON messages(parent_message_id);

        CREATE TABLE IF NOT EXISTS blobs (
            hash      TEXT PRIMARY KEY,
            bytes     BLOB NOT NULL,
            refcount  INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS env_history (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id  TEXT NOT NULL REFERENCES sessions(id),
            generation  INTEGER NOT NULL,
            roots       TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_env_history_session
            ON env_history(session_id, generation DESC);

        CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
            text,
            content = 'messages',
            content_rowid = 'id'
        );",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }
}
