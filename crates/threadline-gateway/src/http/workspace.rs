//! Workspace CRUD, including system-prompt updates (spec §6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use threadline_core::ids::WorkspaceId;
use threadline_store::Workspace;

use crate::app::AppState;

#[derive(Serialize)]
pub struct WorkspaceView {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    pub created_at: String,
}

impl From<Workspace> for WorkspaceView {
    fn from(w: Workspace) -> Self {
        Self {
            id: w.id.as_str().to_string(),
            name: w.name,
            system_prompt: w.system_prompt,
            created_at: w.created_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateWorkspaceBody {
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
}

pub async fn create_workspace(State(state): State<Arc<AppState>>, Json(body): Json<CreateWorkspaceBody>) -> Response {
    match state.workspaces.create(&body.name, &body.system_prompt) {
        Ok(w) => Json(WorkspaceView::from(w)).into_response(),
        Err(e) => crate::error::as_response(e.code(), e),
    }
}

pub async fn list_workspaces(State(state): State<Arc<AppState>>) -> Response {
    match state.workspaces.list() {
        Ok(ws) => Json(ws.into_iter().map(WorkspaceView::from).collect::<Vec<_>>()).into_response(),
        Err(e) => crate::error::as_response(e.code(), e),
    }
}

pub async fn get_workspace(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.workspaces.get(&WorkspaceId::from(id)) {
        Ok(w) => Json(WorkspaceView::from(w)).into_response(),
        Err(e) => crate::error::as_response(e.code(), e),
    }
}

#[derive(Deserialize)]
pub struct UpdateSystemPromptBody {
    pub system_prompt: String,
}

pub async fn update_system_prompt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSystemPromptBody>,
) -> Response {
    match state
        .workspaces
        .update_system_prompt(&WorkspaceId::from(id), &body.system_prompt)
    {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => crate::error::as_response(e.code(), e),
    }
}
