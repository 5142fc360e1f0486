use tracing::instrument;

use crate::db::Db;
use crate::error::Result;
use crate::message::row_to_message;
use threadline_protocol::Message;

/// A page of full-text search results (spec §4.12).
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

pub struct SearchIndex {
    db: Db,
}

impl SearchIndex {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Matches all tokens in `query` against `user_text`/`model_text`
    /// messages, optionally scoped to a workspace, ordered by id descending
    /// with `max_id`-cursor pagination.
    #[instrument(skip(self, query))]
    pub fn search(
        &self,
        query: &str,
        workspace_id: Option<&str>,
        max_id: Option<i64>,
        limit: u32,
    ) -> Result<SearchPage> {
        let fts_query = build_match_expression(query);
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.session_id, m.branch_id, m.parent_message_id, m.chosen_next_id,
                    m.message_type, m.text, m.attachments, m.cumul_token_count, m.created_at,
                    m.model, m.generation, m.aux
             FROM messages_fts
             JOIN messages m ON m.id = messages_fts.rowid
             JOIN sessions s ON s.id = m.session_id
             WHERE messages_fts MATCH ?1
               AND m.message_type IN ('user_text', 'model_text')
               AND (?2 IS NULL OR s.workspace_id = ?2)
               AND (?3 IS NULL OR m.id < ?3)
             ORDER BY m.id DESC
             LIMIT ?4",
        )?;
        let fetch_limit = limit as i64 + 1;
        let rows = stmt.query_map(
            rusqlite::params![fts_query, workspace_id, max_id, fetch_limit],
            row_to_message,
        )?;
        let mut messages: Vec<Message> = rows.filter_map(|r| r.ok()).collect();
        let has_more = messages.len() as u32 > limit;
        messages.truncate(limit as usize);
        Ok(SearchPage { messages, has_more })
    }
}

/// Escapes each whitespace-separated token as an FTS5 string literal and
/// joins them with implicit `AND`, so a query can't inject FTS5 operators.
fn build_match_expression(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::message::{Draft, MessageStore};
    use threadline_core::ids::SessionId;
    use threadline_protocol::MessageType;

    fn setup() -> (SearchIndex, MessageStore, SessionId) {
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
        (
            SearchIndex::new(db.clone()),
            MessageStore::new(db),
            SessionId::from("s1".to_string()),
        )
    }

    #[test]
    fn search_matches_all_tokens() {
        let (search, store, session) = setup();
        store
            .add_message(&session, 1, Draft::new(MessageType::UserText, "restart the shell supervisor"))
            .unwrap();
        store
            .add_message(&session, 1, Draft::new(MessageType::UserText, "shell colors are nice"))
            .unwrap();
        let page = search.search("shell supervisor", None, None, 10).unwrap();
        assert_eq!(page.messages.len(), 1);
        assert!(page.messages[0].text.contains("supervisor"));
        assert!(!page.has_more);
    }

    #[test]
    fn search_paginates_with_max_id_cursor() {
        let (search, store, session) = setup();
        for i in 0..3 {
            store
                .add_message(&session, 1, Draft::new(MessageType::UserText, format!("token{i}")))
                .unwrap();
        }
        let first_page = search.search("token", None, None, 2).unwrap();
        assert_eq!(first_page.messages.len(), 2);
        assert!(first_page.has_more);
        let last_id = first_page.messages.last().unwrap().id;
        let second_page = search.search("token", None, Some(last_id), 2).unwrap();
        assert_eq!(second_page.messages.len(), 1);
        assert!(!second_page.has_more);
    }
}
