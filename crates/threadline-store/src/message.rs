use chrono::Utc;
use threadline_core::ids::SessionId;
use threadline_protocol::{Attachment, Message, MessageType};
use tracing::instrument;

use crate::blob::BlobStore;
use crate::db::Db;
use crate::error::{Error, Result};

/// Fields needed to append a new message; `id`/`created_at` are assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct Draft {
    pub parent_message_id: Option<i64>,
    pub message_type: MessageType,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub model: Option<String>,
    pub generation: i64,
    pub aux: Option<serde_json::Value>,
}

impl Draft {
    pub fn new(message_type: MessageType, text: impl Into<String>) -> Self {
        Self {
            parent_message_id: None,
            message_type,
            text: text.into(),
            attachments: Vec::new(),
            model: None,
            generation: 0,
            aux: None,
        }
    }

    pub fn parent(mut self, id: i64) -> Self {
        self.parent_message_id = Some(id);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = generation;
        self
    }

    pub fn attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn aux(mut self, aux: serde_json::Value) -> Self {
        self.aux = Some(aux);
        self
    }
}

/// Options controlling [`MessageStore::get_active_history`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryOptions {
    pub include_thoughts: bool,
    pub respect_compression: bool,
}

pub struct MessageStore {
    db: Db,
}

impl MessageStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Append `draft` to `branch`, auto-generating a monotonic id, persisting
    /// attachments by blob hash, and updating refcounts (spec §4.2).
    ///
    /// If the draft has a parent, that parent's `chosen_next_id` is set to
    /// the new message and the branch's head pointer advances to it — the
    /// store's notion of "the active path" is simply the chain most
    /// recently appended to.
    #[instrument(skip(self, draft))]
    pub fn add_message(&self, session: &SessionId, branch_id: i64, draft: Draft) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let attachments_json = serde_json::to_string(&draft.attachments)?;
        let aux_json = draft
            .aux
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let type_str = message_type_str(draft.message_type);

        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO messages
                (session_id, branch_id, parent_message_id, chosen_next_id,
                 message_type, text, attachments, cumul_token_count,
                 created_at, model, generation, aux)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                session.as_str(),
                branch_id,
                draft.parent_message_id,
                type_str,
                draft.text,
                attachments_json,
                now,
                draft.model,
                draft.generation,
                aux_json,
            ],
        )?;
        let id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO messages_fts(rowid, text) VALUES (?1, ?2)",
            rusqlite::params![id, draft.text],
        )?;

        for attachment in &draft.attachments {
            BlobStore::adjust_refcount(&conn, &attachment.blob_hash, 1)?;
        }

        if let Some(parent_id) = draft.parent_message_id {
            conn.execute(
                "UPDATE messages SET chosen_next_id = ?1 WHERE id = ?2",
                rusqlite::params![id, parent_id],
            )?;
        }
        conn.execute(
            "UPDATE branches SET head_message_id = ?1 WHERE id = ?2",
            rusqlite::params![id, branch_id],
        )?;

        Ok(id)
    }

    #[instrument(skip(self))]
    pub fn update_chosen_next(&self, id: i64, next_id: Option<i64>) -> Result<()> {
        let conn = self.db.lock().unwrap();
        let changed = conn.execute(
            "UPDATE messages SET chosen_next_id = ?1 WHERE id = ?2",
            rusqlite::params![next_id, id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound {
                what: "message",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, new_text))]
    pub fn update_text(&self, id: i64, new_text: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE messages SET text = ?1 WHERE id = ?2",
            rusqlite::params![new_text, id],
        )?;
        conn.execute(
            "INSERT INTO messages_fts(messages_fts, rowid, text) VALUES ('delete', ?1, ?2)",
            rusqlite::params![id, new_text],
        )
        .ok();
        conn.execute(
            "INSERT INTO messages_fts(rowid, text) VALUES (?1, ?2)",
            rusqlite::params![id, new_text],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn update_cumul_tokens(&self, id: i64, n: i64) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE messages SET cumul_token_count = ?1 WHERE id = ?2",
            rusqlite::params![n, id],
        )?;
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Message> {
        let conn = self.db.lock().unwrap();
        conn.query_row(
            "SELECT id, session_id, branch_id, parent_message_id, chosen_next_id,
                    message_type, text, attachments, cumul_token_count, created_at,
                    model, generation, aux
             FROM messages WHERE id = ?1",
            rusqlite::params![id],
            row_to_message,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound {
                what: "message",
                id: id.to_string(),
            },
            other => Error::Database(other),
        })
    }

    /// Walk back from the branch head via `parent_message_id`, optionally
    /// filtering thoughts and stopping at the most recent compression
    /// boundary (spec §4.2). A forked branch's first message's parent
    /// already points at the message it branched from, in the parent
    /// branch (`BranchManager::create_branch_from`), so this single
    /// parent-pointer walk crosses branch boundaries on its own — it does
    /// not need (and must not repeat) a second, branch-id-based crossing
    /// step once it reaches a branch's own root.
    #[instrument(skip(self))]
    pub fn get_active_history(
        &self,
        branch_id: i64,
        options: HistoryOptions,
    ) -> Result<Vec<Message>> {
        let conn = self.db.lock().unwrap();
        let mut reversed = Vec::new();

        let head: Option<i64> = conn.query_row(
            "SELECT head_message_id FROM branches WHERE id = ?1",
            rusqlite::params![branch_id],
            |row| row.get(0),
        )?;

        let mut cursor = head;
        while let Some(id) = cursor {
            let message = load_message(&conn, id)?;
            let is_compression = message.message_type == MessageType::Compression;
            let parent = message.parent_message_id;
            reversed.push(message);
            if is_compression && options.respect_compression {
                break;
            }
            cursor = parent;
        }

        reversed.reverse();
        if !options.include_thoughts {
            reversed.retain(|m| m.message_type.is_model_visible());
        }
        Ok(reversed)
    }

    #[instrument(skip(self))]
    pub fn get_paginated(
        &self,
        session: &SessionId,
        branch_id: i64,
        before_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, branch_id, parent_message_id, chosen_next_id,
                    message_type, text, attachments, cumul_token_count, created_at,
                    model, generation, aux
             FROM messages
             WHERE session_id = ?1 AND branch_id = ?2 AND (?3 IS NULL OR id < ?3)
             ORDER BY id DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![session.as_str(), branch_id, before_id, limit],
            row_to_message,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// For the UI branch picker: children of `message_id`, ordered by child
    /// id ascending (spec §4.3 tie-break rule).
    #[instrument(skip(self))]
    pub fn possible_next(&self, message_id: i64) -> Result<Vec<(i64, i64)>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, branch_id FROM messages WHERE parent_message_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![message_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn load_message(conn: &rusqlite::Connection, id: i64) -> Result<Message> {
    conn.query_row(
        "SELECT id, session_id, branch_id, parent_message_id, chosen_next_id,
                message_type, text, attachments, cumul_token_count, created_at,
                model, generation, aux
         FROM messages WHERE id = ?1",
        rusqlite::params![id],
        row_to_message,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::NotFound {
            what: "message",
            id: id.to_string(),
        },
        other => Error::Database(other),
    })
}

fn message_type_str(t: MessageType) -> &'static str {
    match t {
        MessageType::UserText => "user_text",
        MessageType::ModelText => "model_text",
        MessageType::FunctionCall => "function_call",
        MessageType::FunctionResponse => "function_response",
        MessageType::Thought => "thought",
        MessageType::Compression => "compression",
        MessageType::EnvChanged => "env_changed",
        MessageType::Command => "command",
        MessageType::Error => "error",
        MessageType::ModelError => "model_error",
    }
}

fn message_type_from_str(s: &str) -> rusqlite::Result<MessageType> {
    Ok(match s {
        "user_text" => MessageType::UserText,
        "model_text" => MessageType::ModelText,
        "function_call" => MessageType::FunctionCall,
        "function_response" => MessageType::FunctionResponse,
        "thought" => MessageType::Thought,
        "compression" => MessageType::Compression,
        "env_changed" => MessageType::EnvChanged,
        "command" => MessageType::Command,
        "error" => MessageType::Error,
        "model_error" => MessageType::ModelError,
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown message_type: {other}"),
                rusqlite::types::Type::Text,
            ))
        }
    })
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let attachments_json: String = row.get(7)?;
    let attachments = serde_json::from_str(&attachments_json).unwrap_or_default();
    let aux_json: Option<String> = row.get(12)?;
    let aux = aux_json.and_then(|s| serde_json::from_str(&s).ok());
    let created_at: String = row.get(9)?;
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        branch_id: row.get(2)?,
        parent_message_id: row.get(3)?,
        chosen_next_id: row.get(4)?,
        message_type: message_type_from_str(&row.get::<_, String>(5)?)?,
        text: row.get(6)?,
        attachments,
        cumul_token_count: row.get(8)?,
        created_at: created_at
            .parse()
            .unwrap_or_else(|_| chrono::Utc::now()),
        model: row.get(10)?,
        generation: row.get(11)?,
        aux,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup() -> (MessageStore, SessionId, i64) {
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
        (MessageStore::new(db), SessionId::from("s1".to_string()), 1)
    }

    #[test]
    fn add_message_sets_chosen_next_on_parent_and_advances_head() {
        let (store, session, branch) = setup();
        let first = store
            .add_message(&session, branch, Draft::new(MessageType::UserText, "hi"))
            .unwrap();
        let second = store
            .add_message(
                &session,
                branch,
                Draft::new(MessageType::ModelText, "hello").parent(first),
            )
            .unwrap();
        let parent = store.get(first).unwrap();
        assert_eq!(parent.chosen_next_id, Some(second));
    }

    #[test]
    fn get_active_history_walks_parent_chain_in_order() {
        let (store, session, branch) = setup();
        let m1 = store
            .add_message(&session, branch, Draft::new(MessageType::UserText, "1"))
            .unwrap();
        let m2 = store
            .add_message(&session, branch, Draft::new(MessageType::ModelText, "2").parent(m1))
            .unwrap();
        let _m3 = store
            .add_message(&session, branch, Draft::new(MessageType::UserText, "3").parent(m2))
            .unwrap();
        let history = store
            .get_active_history(branch, HistoryOptions::default())
            .unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }

    #[test]
    fn get_active_history_excludes_thoughts_by_default() {
        let (store, session, branch) = setup();
        let m1 = store
            .add_message(&session, branch, Draft::new(MessageType::UserText, "1"))
            .unwrap();
        let m2 = store
            .add_message(&session, branch, Draft::new(MessageType::Thought, "thinking...").parent(m1))
            .unwrap();
        store
            .add_message(&session, branch, Draft::new(MessageType::ModelText, "2").parent(m2))
            .unwrap();
        let history = store
            .get_active_history(branch, HistoryOptions::default())
            .unwrap();
        assert!(history.iter().all(|m| m.message_type != MessageType::Thought));
    }

    #[test]
    fn respect_compression_stops_walk_at_boundary() {
        let (store, session, branch) = setup();
        let m1 = store
            .add_message(&session, branch, Draft::new(MessageType::UserText, "old-1"))
            .unwrap();
        let m2 = store
            .add_message(&session, branch, Draft::new(MessageType::ModelText, "old-2").parent(m1))
            .unwrap();
        let compression = store
            .add_message(
                &session,
                branch,
                Draft::new(MessageType::Compression, format!("{m2}\n<state_snapshot/>")).parent(m2),
            )
            .unwrap();
        store
            .add_message(&session, branch, Draft::new(MessageType::UserText, "new").parent(compression))
            .unwrap();
        let history = store
            .get_active_history(
                branch,
                HistoryOptions {
                    include_thoughts: false,
                    respect_compression: true,
                },
            )
            .unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts.first(), Some(&format!("{m2}\n<state_snapshot/>").as_str()));
        assert!(!texts.contains(&"old-1"));
    }

    #[test]
    fn get_active_history_on_a_forked_branch_has_no_duplicates_or_off_path_siblings() {
        use crate::branch::BranchManager;

        let (store, session, branch) = setup();
        let m1 = store
            .add_message(&session, branch, Draft::new(MessageType::UserText, "1"))
            .unwrap();
        let m2 = store
            .add_message(&session, branch, Draft::new(MessageType::ModelText, "2").parent(m1))
            .unwrap();
        let m3 = store
            .add_message(&session, branch, Draft::new(MessageType::UserText, "3").parent(m2))
            .unwrap();
        store
            .add_message(&session, branch, Draft::new(MessageType::ModelText, "4").parent(m3))
            .unwrap();

        let branches = BranchManager::new(store.db.clone());
        let forked = branches.create_branch_from(m2, "5").unwrap();

        let history = store.get_active_history(forked, HistoryOptions::default()).unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["1", "2", "5"]);
    }

    #[test]
    fn possible_next_is_ordered_ascending() {
        let (store, session, branch) = setup();
        let m1 = store
            .add_message(&session, branch, Draft::new(MessageType::UserText, "1"))
            .unwrap();
        let _a = store
            .add_message(&session, branch, Draft::new(MessageType::ModelText, "a").parent(m1))
            .unwrap();
        let next = store.possible_next(m1).unwrap();
        assert_eq!(next.len(), 1);
    }
}
