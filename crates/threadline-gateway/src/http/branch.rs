//! Branch endpoints (spec §4.3/§6): fork from a message, switch the primary
//! branch, and resume a pending tool confirmation.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use threadline_core::error::kind;
use threadline_core::ids::SessionId;
use threadline_turn::TurnRequest;

use crate::app::AppState;
use crate::http::chat::build_turn_request;
use crate::http::sse;

#[derive(Deserialize)]
pub struct CreateBranchBody {
    pub message_id: i64,
    pub text: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// `POST /chat/{session}/branch` — fork a new branch from `message_id` with
/// an edited user text, then drive it to completion.
pub async fn create_branch(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
    Json(body): Json<CreateBranchBody>,
) -> Response {
    if body.text.trim().is_empty() {
        return crate::error::as_response(kind::VALIDATION, "text cannot be empty");
    }
    let session_id = SessionId::from(session);
    let session_row = match state.sessions.get(&session_id) {
        Ok(s) => s,
        Err(e) => return crate::error::as_response(e.code(), e),
    };
    let workspace = match state.workspaces.get(&session_row.workspace_id) {
        Ok(w) => w,
        Err(e) => return crate::error::as_response(e.code(), e),
    };
    let branch_id = match state.branches.create_branch_from(body.message_id, &body.text) {
        Ok(id) => id,
        Err(e) => return crate::error::as_response(e.code(), e),
    };

    let req: TurnRequest = match build_turn_request(&state, &workspace.name, &session_row.system_prompt_template, body.model) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let rx = state.broadcaster.subscribe(session_id.as_str());
    let engine = state.engine.clone();
    let sid = session_id.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.continue_turn(sid.clone(), branch_id, req).await {
            warn!(session = sid.as_str(), error = %e, "branch turn failed");
        }
    });

    sse::sse_response(rx, None)
}

#[derive(Deserialize)]
pub struct SwitchBranchBody {
    pub branch_id: i64,
}

/// `PUT /chat/{session}/branch` — switch the session's primary branch.
pub async fn switch_branch(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
    Json(body): Json<SwitchBranchBody>,
) -> Response {
    match state.branches.switch_primary(&session, body.branch_id) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => crate::error::as_response(e.code(), e),
    }
}

#[derive(Deserialize)]
pub struct ConfirmBody {
    pub approved: bool,
    #[serde(default)]
    pub model: Option<String>,
}

/// `POST /chat/{session}/branch/{branch}/confirm` — approve or reject the
/// branch's pending tool call and resume the turn.
pub async fn confirm_branch(
    State(state): State<Arc<AppState>>,
    Path((session, branch_id)): Path<(String, i64)>,
    Json(body): Json<ConfirmBody>,
) -> Response {
    let session_id = SessionId::from(session);
    let session_row = match state.sessions.get(&session_id) {
        Ok(s) => s,
        Err(e) => return crate::error::as_response(e.code(), e),
    };
    let workspace = match state.workspaces.get(&session_row.workspace_id) {
        Ok(w) => w,
        Err(e) => return crate::error::as_response(e.code(), e),
    };
    let req: TurnRequest = match build_turn_request(&state, &workspace.name, &session_row.system_prompt_template, body.model) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let rx = state.broadcaster.subscribe(session_id.as_str());
    let engine = state.engine.clone();
    let sid = session_id.clone();
    let approved = body.approved;
    tokio::spawn(async move {
        if let Err(e) = engine.resume_confirmation(sid.clone(), branch_id, approved, req).await {
            warn!(session = sid.as_str(), error = %e, "confirmation resume failed");
        }
    });

    sse::sse_response(rx, None)
}
