//! `/events` — long-lived SSE push of every bus event to connected
//! observers. See `spec.md` §4.K / §6.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::api::state::AppState;
use crate::bus::EventBus;

pub fn router() -> Router<AppState> {
    Router::new().route("/events", get(events))
}

/// Subscribes a forwarding handler onto the bus that republishes every
/// event onto the broadcast channel SSE clients read from. The broadcast
/// channel's own drop-oldest-on-lag behaviour is this component's
/// backpressure policy per `spec.md` §5.
pub fn bridge_bus_to_broadcast(bus: &EventBus, tx: tokio::sync::broadcast::Sender<edge_types::EdgeEvent>) {
    bus.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });
}

async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let mut shutdown = state.shutdown;
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| match result {
            Ok(event) => {
                let tag = event.tag();
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some(Ok(Event::default().event(tag).data(json)))
            }
            Err(_) => None,
        })
        .take_until(async move {
            let _ = shutdown.wait_for(|shutting_down| *shutting_down).await;
        });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(30)).text("ping"))
}
