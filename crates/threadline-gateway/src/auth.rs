//! Bearer-token gate in front of the HTTP surface (spec §6, "single-user
//! deployment"). Supports the one mode this crate's `AuthConfig` carries: an
//! optional shared token. No token configured means no gate — the expected
//! posture for a purely local, loopback-bound deployment (spec §1).

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use serde_json::json;

use crate::app::AppState;

pub async fn require_bearer_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<serde_json::Value>)> {
    let expected = match &state.config.gateway.auth.token {
        Some(t) => t,
        None => return Ok(next.run(request).await),
    };

    if extract_bearer(request.headers()) == Some(expected.as_str()) {
        Ok(next.run(request).await)
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized. Set 'Authorization: Bearer <token>' header." })),
        ))
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert_eq!(extract_bearer(&headers), Some("secret"));
    }

    #[test]
    fn missing_header_yields_none() {
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }
}
