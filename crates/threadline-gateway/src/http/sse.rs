//! SSE response framing (spec §6): literal `data: <kind>\ndata: <payload>`
//! frames already produced by `SessionBroadcaster`/`Event::to_sse`, wrapped
//! in the headers the wire format mandates. No `axum::response::sse::Event`
//! wrapper is used here — that type prepends its own `data: ` framing, which
//! would double up on top of the already-framed text this crate broadcasts.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use tokio::sync::broadcast;

use threadline_protocol::EventKind;

const FINISH_TAG: &str = "data: F";

/// Turn a per-session broadcast subscription into a chunked SSE response,
/// closing the body right after the turn's `Finish` frame goes out so a
/// one-shot client (curl, a script) sees a clean EOF instead of hanging on
/// an idle session.
pub fn sse_response(mut rx: broadcast::Receiver<String>, leading: Option<String>) -> Response {
    let stream = async_stream::stream! {
        if let Some(frame) = leading {
            let done = frame.starts_with(FINISH_TAG);
            yield Ok::<_, std::convert::Infallible>(frame);
            if done {
                return;
            }
        }
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    let done = frame.starts_with(FINISH_TAG);
                    yield Ok(frame);
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}

/// Single-frame response for terminal states that never expect more events
/// (e.g. `InitialStateNoCall`, spec §6: "emits ... else InitialStateNoCall
/// then closes").
pub fn sse_single_frame(kind: EventKind, payload: impl serde::Serialize) -> Response {
    let event = threadline_protocol::Event::new(kind, payload);
    let mut response = Response::new(Body::from(event.to_sse()));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}
