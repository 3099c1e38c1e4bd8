//! Server-Sent Events encoding of a session's event channel.
//!
//! Every `StreamEvent` becomes one `data: <JSON>` unit. After the orchestrator
//! drops its sender the stream appends `data: [DONE]`, so the end marker is the
//! last unit on every path, including sessions that produced no events.

use std::convert::Infallible;

use axum::response::sse::Event;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::DropGuard;

use crate::stream::StreamEvent;

pub const DONE_MARKER: &str = "[DONE]";
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// JSON body of one event.
pub fn event_json(event: &StreamEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
}

/// Wire form of one event, as written to an event stream.
pub fn encode_frame(event: &StreamEvent) -> String {
    format!("data: {}\n\n", event_json(event))
}

/// SSE stream over a session's receiver.
///
/// `guard` lives as long as the stream: when the client disconnects the
/// response body is dropped and the guard cancels the session.
pub fn event_stream(
    rx: mpsc::Receiver<StreamEvent>,
    guard: Option<DropGuard>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let events = ReceiverStream::new(rx).map(move |event| {
        let _held = &guard;
        Ok::<_, Infallible>(Event::default().data(event_json(&event)))
    });
    events.chain(tokio_stream::once(Ok(Event::default().data(DONE_MARKER))))
}
