//! Chat turn endpoints (spec §6): `POST /chat`, `POST /chat/{session}`,
//! `GET /chat/{session}`, `DELETE /call/{session}`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use threadline_core::error::kind;
use threadline_core::ids::{SessionId, WorkspaceId};
use threadline_core::prompt::{self, PromptContext};
use threadline_protocol::EventKind;
use threadline_turn::{GenerationParams, TurnRequest};

use crate::app::AppState;
use crate::http::{command, sse};

#[derive(Deserialize)]
pub struct CreateChatBody {
    #[serde(default)]
    pub workspace_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// `POST /chat` — create a session in `workspace_id` (or the default
/// workspace), post the first message, and stream the turn.
pub async fn create_chat(State(state): State<Arc<AppState>>, Json(body): Json<CreateChatBody>) -> Response {
    if body.message.trim().is_empty() {
        return crate::error::as_response(kind::VALIDATION, "message cannot be empty");
    }
    let workspace_id = body
        .workspace_id
        .map(WorkspaceId::from)
        .unwrap_or_else(|| state.default_workspace.clone());
    let workspace = match state.workspaces.get(&workspace_id) {
        Ok(w) => w,
        Err(e) => return crate::error::as_response(e.code(), e),
    };

    let session_id = SessionId::new();
    if let Err(e) = state
        .sessions
        .create(session_id.clone(), &workspace_id, &workspace.system_prompt, false)
    {
        return crate::error::as_response(e.code(), e);
    }
    let branch_id = match state.branches.create_root(session_id.as_str()) {
        Ok(id) => id,
        Err(e) => return crate::error::as_response(e.code(), e),
    };

    let model = body.model.clone().unwrap_or_else(|| state.config.agent.default_model.clone());
    if let Some(cmd) = command::parse(&body.message) {
        return command::handle(&state, &session_id, branch_id, &body.message, &model, cmd).await;
    }

    let req = match build_turn_request(&state, &workspace.name, &workspace.system_prompt, body.model) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let rx = state.broadcaster.subscribe(session_id.as_str());
    let engine = state.engine.clone();
    let sid = session_id.clone();
    let message = body.message;
    tokio::spawn(async move {
        if let Err(e) = engine.start_turn(sid.clone(), branch_id, message, req).await {
            warn!(session = sid.as_str(), error = %e, "turn failed");
        }
    });

    sse::sse_response(rx, None)
}

#[derive(Deserialize)]
pub struct PostChatBody {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// `POST /chat/{session}` — post the next message on a session's primary
/// branch and stream the turn.
pub async fn post_chat(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
    Json(body): Json<PostChatBody>,
) -> Response {
    if body.message.trim().is_empty() {
        return crate::error::as_response(kind::VALIDATION, "message cannot be empty");
    }
    let session_id = SessionId::from(session);
    let session_row = match state.sessions.get(&session_id) {
        Ok(s) => s,
        Err(e) => return crate::error::as_response(e.code(), e),
    };
    let Some(branch_id) = session_row.primary_branch_id else {
        return crate::error::as_response(kind::NOT_FOUND, "session has no active branch");
    };
    let workspace = match state.workspaces.get(&session_row.workspace_id) {
        Ok(w) => w,
        Err(e) => return crate::error::as_response(e.code(), e),
    };

    let model = body.model.clone().unwrap_or_else(|| state.config.agent.default_model.clone());
    if let Some(cmd) = command::parse(&body.message) {
        return command::handle(&state, &session_id, branch_id, &body.message, &model, cmd).await;
    }

    let req = match build_turn_request(&state, &workspace.name, &session_row.system_prompt_template, body.model) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let rx = state.broadcaster.subscribe(session_id.as_str());
    let engine = state.engine.clone();
    let sid = session_id.clone();
    let message = body.message;
    tokio::spawn(async move {
        if let Err(e) = engine.start_turn(sid.clone(), branch_id, message, req).await {
            warn!(session = sid.as_str(), error = %e, "turn failed");
        }
    });

    sse::sse_response(rx, None)
}

/// `GET /chat/{session}` — reattach to a session's event stream (spec §6:
/// "emits InitialState (+live events) if a turn is active, else
/// InitialStateNoCall then closes").
pub async fn stream_chat(State(state): State<Arc<AppState>>, Path(session): Path<String>) -> Response {
    let session_id = SessionId::from(session);
    if let Err(e) = state.sessions.get(&session_id) {
        return crate::error::as_response(e.code(), e);
    }
    let rx = state.broadcaster.subscribe(session_id.as_str());
    if state.call_manager.has_active(session_id.as_str()) {
        let leading = threadline_protocol::Event::new(EventKind::InitialState, session_id.as_str()).to_sse();
        sse::sse_response(rx, Some(leading))
    } else {
        sse::sse_single_frame(EventKind::InitialStateNoCall, session_id.as_str())
    }
}

/// `DELETE /call/{session}` — cancel the active turn, if any.
pub async fn cancel_call(State(state): State<Arc<AppState>>, Path(session): Path<String>) -> Json<Value> {
    let cancelled = state.call_manager.cancel(&session);
    Json(json!({ "cancelled": cancelled }))
}

pub(crate) fn build_turn_request(
    state: &AppState,
    workspace_name: &str,
    system_prompt_template: &str,
    model: Option<String>,
) -> Result<TurnRequest, Response> {
    let model = model.unwrap_or_else(|| state.config.agent.default_model.clone());
    let ctx = PromptContext::with_standard_fields(workspace_name, Utc::now());
    let system_prompt = prompt::evaluate(system_prompt_template, &ctx)
        .map_err(|e| crate::error::as_response(e.code(), e))?;
    Ok(TurnRequest {
        model,
        system_prompt,
        tools: state.registry.for_llm(),
        generation: GenerationParams::default(),
    })
}
