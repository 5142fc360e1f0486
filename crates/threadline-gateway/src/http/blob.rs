//! `GET /blob/{hash}` — fetch attachment bytes by content hash (spec §4.10).
//!
//! Blobs are stored as opaque bytes with no recorded MIME type, so the
//! content type is inferred from the path's extension, if the client
//! appended one (`/blob/<hash>.png`); otherwise this falls back to
//! `application/octet-stream`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::app::AppState;

pub async fn get_blob(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    let (hash, ext) = match key.split_once('.') {
        Some((hash, ext)) => (hash, Some(ext)),
        None => (key.as_str(), None),
    };

    match state.blobs.get(hash) {
        Ok(bytes) => {
            let mut response = (StatusCode::OK, bytes).into_response();
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(mime_for_ext(ext)),
            );
            response
        }
        Err(e) => crate::error::as_response(e.code(), e),
    }
}

fn mime_for_ext(ext: Option<&str>) -> &'static str {
    match ext {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}
