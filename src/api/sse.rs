//! Server-Sent Events support

use crate::db::ConversationSummary;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

/// Stream every published conversation list, starting with the current one
pub fn conversation_list_stream(
    lists: watch::Receiver<Vec<ConversationSummary>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = WatchStream::new(lists)
        .map(|conversations| Ok::<_, Infallible>(list_event(&conversations)));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn list_event(conversations: &[ConversationSummary]) -> Event {
    let data = json!({
        "type": "conversations",
        "conversations": conversations,
    });
    Event::default().event("conversations").data(data.to_string())
}
