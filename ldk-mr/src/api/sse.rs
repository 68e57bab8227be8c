//! Server-Sent Events for snapshots, competitor scans, alerts and jobs

use crate::{AppState, MODULE_NAME};
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    ldk_common::sse::create_event_sse_stream(MODULE_NAME, &state.event_bus)
}
