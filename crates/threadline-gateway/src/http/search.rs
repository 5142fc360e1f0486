//! `POST /search` — full-text search over persisted messages (spec §4.12).

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub max_id: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

pub async fn search_messages(State(state): State<Arc<AppState>>, Json(body): Json<SearchBody>) -> Response {
    match state
        .search
        .search(&body.query, body.workspace_id.as_deref(), body.max_id, body.limit)
    {
        Ok(page) => Json(json!({ "messages": page.messages, "has_more": page.has_more })).into_response(),
        Err(e) => crate::error::as_response(e.code(), e),
    }
}
