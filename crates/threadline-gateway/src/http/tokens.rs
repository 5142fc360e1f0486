//! `POST /countTokens`, `POST /evaluatePrompt` (spec §6).

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use threadline_core::prompt::{self, PromptContext};
use threadline_turn::estimate_tokens;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct CountTokensBody {
    pub text: String,
}

/// Crude token estimate, shared with the compression path's baseline seed
/// (spec §4.7/§6 — no concrete tokenizer is mandated).
pub async fn count_tokens(State(_state): State<Arc<AppState>>, Json(body): Json<CountTokensBody>) -> Json<Value> {
    Json(json!({ "tokens": estimate_tokens(&body.text) }))
}

#[derive(Deserialize)]
pub struct EvaluatePromptBody {
    pub template: String,
    #[serde(default)]
    pub workspace_name: Option<String>,
}

/// Evaluate a system-prompt template against the standard context (spec
/// §4.11) without needing an existing session — used by clients editing a
/// workspace's system prompt to preview the result.
pub async fn evaluate_prompt(State(_state): State<Arc<AppState>>, Json(body): Json<EvaluatePromptBody>) -> Response {
    let ctx = PromptContext::with_standard_fields(body.workspace_name.as_deref().unwrap_or(""), Utc::now());
    match prompt::evaluate(&body.template, &ctx) {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(e) => crate::error::as_response(e.code(), e),
    }
}
