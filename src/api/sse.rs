//! Server-Sent Events for streamed replies

use crate::graph::{StepEvent, StepStream};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;

/// Turn a streamed turn into an SSE response
pub fn sse_stream(events: StepStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = events.map(|event| Ok(step_event_to_axum(event)));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn step_event_to_axum(event: StepEvent) -> Event {
    let (event_type, data) = match event {
        StepEvent::Delta(text) => (
            "delta",
            json!({
                "type": "delta",
                "text": text
            }),
        ),
        StepEvent::Done { message, chat_name } => (
            "done",
            json!({
                "type": "done",
                "message": message,
                "chat_name": chat_name
            }),
        ),
        StepEvent::Error(e) => {
            tracing::warn!(error = %e, "Turn failed");
            (
                "error",
                json!({
                    "type": "error",
                    "message": e.to_string()
                }),
            )
        }
    };

    Event::default().event(event_type).data(data.to_string())
}
