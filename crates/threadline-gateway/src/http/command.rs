//! Slash commands (spec §4.1/§4.7/§3 `command` message type): a closed set
//! of maintenance operations a user can issue instead of a conversational
//! turn. Each is logged as a `MessageType::Command` message on the branch
//! it was issued against, then runs to completion synchronously (no tool
//! loop, no model call beyond `/compress`'s own one-shot summary) and
//! replies with a single `Finish` frame rather than a streamed turn.

use std::sync::Arc;

use axum::response::Response;
use serde_json::json;
use threadline_core::ids::SessionId;
use threadline_protocol::{EventKind, MessageType};
use threadline_store::Draft;
use threadline_turn::EventSink;

use crate::app::AppState;
use crate::http::sse;

pub enum Command {
    Compress,
    Clear,
    ClearBlobs,
    Expose(String),
    Unexpose(String),
}

/// Parse a leading slash command out of a posted message. Anything not
/// matching the closed set (spec §3) is an ordinary user message, not a
/// malformed command — callers fall through to the normal turn path.
pub fn parse(text: &str) -> Option<Command> {
    let text = text.trim();
    let (head, rest) = match text.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (text, ""),
    };
    match head {
        "/compress" => Some(Command::Compress),
        "/clear" => Some(Command::Clear),
        "/clearblobs" => Some(Command::ClearBlobs),
        "/expose" if !rest.is_empty() => Some(Command::Expose(rest.to_string())),
        "/unexpose" if !rest.is_empty() => Some(Command::Unexpose(rest.to_string())),
        _ => None,
    }
}

/// Run `command` against `branch_id` and render its result as a one-frame
/// SSE response. `raw_text` is the literal command the user typed, persisted
/// verbatim on the `Command` message (spec §3).
pub async fn handle(
    state: &Arc<AppState>,
    session_id: &SessionId,
    branch_id: i64,
    raw_text: &str,
    model: &str,
    command: Command,
) -> Response {
    let session = match state.sessions.get(session_id) {
        Ok(s) => s,
        Err(e) => return crate::error::as_response(e.code(), e),
    };
    let branch = match state.branches.get(branch_id) {
        Ok(b) => b,
        Err(e) => return crate::error::as_response(e.code(), e),
    };
    let command_id = match state.messages.add_message(
        session_id,
        branch_id,
        Draft::new(MessageType::Command, raw_text)
            .generation(session.environment_generation)
            .maybe_parent(branch.head_message_id),
    ) {
        Ok(id) => id,
        Err(e) => return crate::error::as_response(e.code(), e),
    };

    let result = match command {
        Command::Compress => run_compress(state, session_id, branch_id, model).await,
        Command::Clear => run_clear(state, session_id),
        Command::ClearBlobs => run_clear_blobs(state),
        Command::Expose(path) => run_expose(state, session_id, path, true),
        Command::Unexpose(path) => run_expose(state, session_id, path, false),
    };

    match result {
        Ok(payload) => sse::sse_single_frame(EventKind::Finish, json!({ "command_id": command_id, "result": payload })),
        Err(resp) => resp,
    }
}

async fn run_compress(
    state: &Arc<AppState>,
    session_id: &SessionId,
    branch_id: i64,
    model: &str,
) -> Result<serde_json::Value, Response> {
    let compression_id = threadline_turn::compress_branch(&state.messages, state.provider.as_ref(), session_id, branch_id, model)
        .await
        .map_err(|e| crate::error::as_response(e.code(), e))?;
    Ok(json!({ "compressed": compression_id.is_some(), "compression_id": compression_id }))
}

/// Start a fresh root branch and make it primary, leaving the branch the
/// command was issued on (and its history) reachable by switching back to
/// it — `/clear` resets the active conversation without discarding anything.
fn run_clear(state: &Arc<AppState>, session_id: &SessionId) -> Result<serde_json::Value, Response> {
    let new_branch_id = state
        .branches
        .create_root(session_id.as_str())
        .map_err(|e| crate::error::as_response(e.code(), e))?;
    state
        .branches
        .switch_primary(session_id.as_str(), new_branch_id)
        .map_err(|e| crate::error::as_response(e.code(), e))?;
    Ok(json!({ "branch_id": new_branch_id }))
}

fn run_clear_blobs(state: &Arc<AppState>) -> Result<serde_json::Value, Response> {
    let cleared = state.blobs.clear_orphans().map_err(|e| crate::error::as_response(e.code(), e))?;
    Ok(json!({ "cleared": cleared }))
}

/// Add or remove `path` from the session's exposed-root set and bump the
/// environment generation (spec §4.1 "Environment-change interleaving");
/// the next turn on any branch will have `interleave_environment_change`
/// insert an `env_changed` message ahead of the new user text.
fn run_expose(state: &Arc<AppState>, session_id: &SessionId, path: String, expose: bool) -> Result<serde_json::Value, Response> {
    let mut roots = state.sessions.current_roots(session_id).map_err(|e| crate::error::as_response(e.code(), e))?;
    if expose {
        if !roots.iter().any(|r| r == &path) {
            roots.push(path);
        }
    } else {
        roots.retain(|r| r != &path);
    }
    let generation = state
        .sessions
        .bump_environment(session_id, &roots)
        .map_err(|e| crate::error::as_response(e.code(), e))?;
    state
        .broadcaster
        .emit(session_id.as_str(), threadline_protocol::Event::new(EventKind::GenerationChanged, generation));
    Ok(json!({ "generation": generation, "roots": roots }))
}

trait DraftExt {
    fn maybe_parent(self, id: Option<i64>) -> Self;
}

impl DraftExt for Draft {
    fn maybe_parent(self, id: Option<i64>) -> Self {
        match id {
            Some(id) => self.parent(id),
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_command() {
        assert!(matches!(parse("/compress"), Some(Command::Compress)));
        assert!(matches!(parse("/clear"), Some(Command::Clear)));
        assert!(matches!(parse("/clearblobs"), Some(Command::ClearBlobs)));
        assert!(matches!(parse("/expose /tmp/project"), Some(Command::Expose(p)) if p == "/tmp/project"));
        assert!(matches!(parse("/unexpose /tmp/project"), Some(Command::Unexpose(p)) if p == "/tmp/project"));
    }

    #[test]
    fn expose_without_a_path_is_not_a_command() {
        assert!(parse("/expose").is_none());
    }

    #[test]
    fn ordinary_text_is_not_a_command() {
        assert!(parse("hello /compress").is_none());
        assert!(parse("just a normal message").is_none());
    }
}
