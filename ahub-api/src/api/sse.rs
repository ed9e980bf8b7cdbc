//! Server-Sent Events for import progress
//!
//! Only imports executed in this process (the embedded worker) publish here;
//! a standalone worker's progress is visible through `GET /api/imports/:id`.

use crate::AppState;
use ahub_common::events::AppEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// SSE stream of `AppEvent`s belonging to `team_id`
///
/// Streams:
/// - ImportStarted
/// - ImportProgress (after each committed batch)
/// - ImportCompleted
/// - ImportFailed
pub fn import_event_stream(
    state: &AppState,
    team_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(team_id = %team_id, "SSE client connected to import events");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.team_id() != team_id {
                        continue;
                    }
                    if let Some(sse) = to_sse(&event) {
                        yield Ok(sse);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(team_id = %team_id, skipped, "SSE client lagged, events dropped");
                    yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                }
                Err(RecvError::Closed) => {
                    debug!("SSE: event bus closed");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

fn to_sse(event: &AppEvent) -> Option<Event> {
    let event_type = event.event_type();
    match Event::default().event(event_type).json_data(event) {
        Ok(sse) => {
            debug!("SSE: forwarding {}", event_type);
            Some(sse)
        }
        Err(e) => {
            warn!("SSE: failed to serialize event {}: {}", event_type, e);
            None
        }
    }
}
