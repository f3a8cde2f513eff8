use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::types::StreamEvent;

/// Create SSE stream for chat completions
///
/// Each event is one JSON-encoded chunk (or error object), followed by a
/// final `[DONE]` marker. Dropping the response drops `events`.
pub fn create_chat_stream(
    events: BoxStream<'static, StreamEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut events = events;

        while let Some(event) = events.next().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(data));
        }

        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
