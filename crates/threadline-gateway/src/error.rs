//! Maps the closed error-kind set (spec §7) to an HTTP status. This is the
//! one place in the whole workspace allowed to know about HTTP — every
//! lower crate's `Error::code()` stays status-agnostic.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use threadline_core::error::kind;

pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        kind::VALIDATION => StatusCode::BAD_REQUEST,
        kind::NOT_FOUND => StatusCode::NOT_FOUND,
        kind::AUTH => StatusCode::UNAUTHORIZED,
        kind::CANCELLED => StatusCode::OK,
        kind::PROVIDER | kind::STORAGE | kind::TOOL | kind::INTERNAL => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render any error exposing `code()` as a `{status, json body}` pair.
pub fn as_response(code: &'static str, message: impl std::fmt::Display) -> Response {
    (status_for_code(code), Json(json!({ "error": message.to_string() }))).into_response()
}
