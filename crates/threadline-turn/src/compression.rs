//! History compression (spec §4.7), triggered by the `/compress` user command.
//!
//! Same overall shape as a fact-extraction compaction pass (load recent
//! history, one-shot LLM call, persist a derived message, log the
//! before/after counts) but summarizing into a single `compression` message
//! that the active path resumes from, rather than writing facts into a
//! separate memory store.

use threadline_core::config::PRESERVE_FRACTION;
use threadline_core::ids::SessionId;
use threadline_protocol::{Message, MessageType};
use threadline_store::{Draft, HistoryOptions, MessageStore};
use tracing::info;

use crate::engine::message_to_turn;
use crate::error::Result;
use crate::provider::{ChatRequest, GenerationParams, Provider, Turn};

const TRIGGER_PROMPT: &str = "Summarize the conversation above so it can be resumed without \
the original messages. Write the summary as a single XML element \
<state_snapshot>...</state_snapshot> capturing goals, decisions, open threads, and any \
facts the user would not want to repeat.";

/// Compress `branch_id`'s active history, replacing its oldest
/// `(1 - PRESERVE_FRACTION)` share with a one-shot LLM summary.
///
/// Returns the id of the inserted `compression` message, or `None` if the
/// history has one or zero messages (a no-op per spec §8).
pub async fn compress_branch(
    messages: &MessageStore,
    provider: &dyn Provider,
    session: &SessionId,
    branch_id: i64,
    model: &str,
) -> Result<Option<i64>> {
    let history = messages.get_active_history(
        branch_id,
        HistoryOptions {
            include_thoughts: false,
            respect_compression: true,
        },
    )?;
    if history.len() <= 1 {
        return Ok(None);
    }

    let cut = choose_cut_index(&history)?;
    let head_id = history.last().expect("checked len > 1").id;
    let boundary_id = history[cut - 1].id;

    let summarized = &history[..cut];
    let contents: Vec<Turn> = summarized.iter().map(message_to_turn).collect();
    let req = ChatRequest {
        model: model.to_string(),
        system_prompt: String::new(),
        contents,
        tools: Vec::new(),
        generation: GenerationParams::default(),
    };
    let raw = provider.send(&req).await?;
    let snapshot = extract_state_snapshot(&raw);

    let preserved_tokens: i64 = history[cut..]
        .iter()
        .map(|m| m.cumul_token_count)
        .max()
        .unwrap_or(0);
    let summary_tokens = estimate_tokens(&snapshot);
    let baseline = summary_tokens + preserved_tokens;

    let text = format!("{boundary_id}\n{snapshot}");
    let draft = Draft::new(MessageType::Compression, text)
        .parent(head_id)
        .model(model);
    let compression_id = messages.add_message(session, branch_id, draft)?;
    messages.update_cumul_tokens(compression_id, baseline)?;

    info!(
        session = session.as_str(),
        branch_id,
        cut,
        boundary_id,
        compression_id,
        baseline,
        "compressed branch history"
    );
    Ok(Some(compression_id))
}

/// Choose the smallest `k` such that `history[0..k]`'s serialized length is
/// at least `(1 - PRESERVE_FRACTION)` of the total, then nudge `k` so it
/// never separates a `function_call` from its matching `function_response`
/// (spec §4.7 step 2).
fn choose_cut_index(history: &[Message]) -> Result<usize> {
    let lengths: Vec<usize> = history
        .iter()
        .map(|m| serde_json::to_string(m).map(|s| s.len()))
        .collect::<std::result::Result<_, _>>()?;
    let total: usize = lengths.iter().sum();
    let target = ((1.0 - PRESERVE_FRACTION) * total as f64) as usize;

    let mut running = 0usize;
    let mut k = history.len();
    for (i, len) in lengths.iter().enumerate() {
        running += len;
        if running >= target {
            k = i + 1;
            break;
        }
    }
    k = k.clamp(1, history.len());

    while k < history.len() && history[k - 1].message_type == MessageType::FunctionCall {
        k += 1;
    }
    Ok(k.min(history.len()))
}

fn extract_state_snapshot(raw: &str) -> String {
    match (raw.find("<state_snapshot>"), raw.find("</state_snapshot>")) {
        (Some(start), Some(end)) if end > start => raw[start..end + "</state_snapshot>".len()].to_string(),
        _ => format!("<state_snapshot>{}</state_snapshot>", raw.trim()),
    }
}

/// Crude token estimate for the baseline seed (spec §4.7 step 6 does not
/// mandate a tokenizer; the real count is reconciled by the provider's own
/// `CumulTokenCount` on the next turn).
pub fn estimate_tokens(text: &str) -> i64 {
    (text.len() / 4).max(1) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use threadline_store::{BranchManager, SessionStore};

    fn setup() -> (MessageStore, SessionId, i64) {
        let db = threadline_store::db::open_in_memory().unwrap();
        threadline_store::db::init_db(&db.lock().unwrap()).unwrap();
        let ws_id = "ws";
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "INSERT INTO workspaces (id, name, system_prompt, created_at) VALUES (?1,'w','','')",
                [ws_id],
            )
            .unwrap();
        }
        let sessions = SessionStore::new(db.clone());
        let session = SessionId::from("s1".to_string());
        sessions
            .create(session.clone(), &threadline_core::ids::WorkspaceId::from(ws_id.to_string()), "", false)
            .unwrap();
        let branches = BranchManager::new(db.clone());
        let branch_id = branches.create_root(session.as_str()).unwrap();
        (MessageStore::new(db), session, branch_id)
    }

    fn seed(messages: &MessageStore, session: &SessionId, branch_id: i64, n: usize) {
        let mut parent = None;
        for i in 0..n {
            let kind = if i % 2 == 0 {
                MessageType::UserText
            } else {
                MessageType::ModelText
            };
            let mut draft = Draft::new(kind, format!("message {i}"));
            if let Some(p) = parent {
                draft = draft.parent(p);
            }
            parent = Some(messages.add_message(session, branch_id, draft).unwrap());
        }
    }

    #[tokio::test]
    async fn one_message_history_is_a_no_op() {
        let (messages, session, branch_id) = setup();
        seed(&messages, &session, branch_id, 1);
        let provider = MockProvider { reply: "<state_snapshot>x</state_snapshot>".to_string() };
        let result = compress_branch(&messages, &provider, &session, branch_id, "mock")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn compressing_inserts_a_compression_message_at_the_tip() {
        let (messages, session, branch_id) = setup();
        seed(&messages, &session, branch_id, 10);
        let provider = MockProvider { reply: "<state_snapshot>summary</state_snapshot>".to_string() };
        let id = compress_branch(&messages, &provider, &session, branch_id, "mock")
            .await
            .unwrap()
            .expect("should compress");

        let inserted = messages.get(id).unwrap();
        assert_eq!(inserted.message_type, MessageType::Compression);
        assert!(inserted.text.contains("summary"));

        let history = messages
            .get_active_history(branch_id, HistoryOptions { include_thoughts: false, respect_compression: true })
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
    }

    #[tokio::test]
    async fn cut_never_separates_a_function_call_from_its_response() {
        let (messages, session, branch_id) = setup();
        let d1 = Draft::new(MessageType::UserText, "go");
        let id1 = messages.add_message(&session, branch_id, d1).unwrap();
        let d2 = Draft::new(MessageType::FunctionCall, "{\"name\":\"x\"}").parent(id1);
        let id2 = messages.add_message(&session, branch_id, d2).unwrap();
        let d3 = Draft::new(MessageType::FunctionResponse, "{\"ok\":true}").parent(id2);
        let id3 = messages.add_message(&session, branch_id, d3).unwrap();
        let d4 = Draft::new(MessageType::ModelText, "done").parent(id3);
        messages.add_message(&session, branch_id, d4).unwrap();

        let history = messages
            .get_active_history(branch_id, HistoryOptions::default())
            .unwrap();
        let k = choose_cut_index(&history).unwrap();
        assert_ne!(history[k - 1].message_type, MessageType::FunctionCall);
    }
}
