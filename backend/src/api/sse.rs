//! Server-Sent Events endpoint for the live log.

use axum::extract::State;
use axum::response::sse::Sse;
use futures::Stream;
use std::convert::Infallible;
use tracing::info;

use crate::state::AppState;

/// Stream lifecycle messages, errors and pipeline output as they happen.
///
/// Each SSE message carries one JSON-encoded `CastEvent`:
/// ```javascript
/// const logs = new EventSource('http://localhost:3000/api/logs');
/// logs.onmessage = (event) => console.log(JSON.parse(event.data));
/// ```
#[utoipa::path(
    get,
    path = "/api/logs",
    tag = "cast",
    responses(
        (status = 200, description = "Event stream (text/event-stream)")
    )
)]
pub async fn logs_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    info!(
        "New log client connected (total subscribers: {})",
        state.events().subscriber_count() + 1
    );
    state.events().subscribe()
}
