//! SSE event broadcaster for gateway lifecycle events.
//!
//! Implements the core [`GatewayEventEmitter`] port so the registry, hook
//! pipeline and workflow engine can publish events that are streamed to
//! connected web clients.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use conflux_core::GatewayEvent;
use conflux_core::ports::GatewayEventEmitter;

/// Fans gateway events out to every SSE client.
///
/// Slow clients may miss events if the buffer overflows.
#[derive(Debug, Clone)]
pub struct SseBroadcaster {
    sender: broadcast::Sender<GatewayEvent>,
}

impl SseBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcaster with the default capacity (256 events).
    pub fn with_defaults() -> Self {
        Self::new(256)
    }

    /// SSE response for a new client connection.
    ///
    /// Sends a keep-alive ping every 30 seconds.
    pub fn subscribe(
        self: Arc<Self>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
        let receiver = self.sender.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|result| match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().data(json))),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize event");
                    None
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "SSE stream lagged");
                None
            }
        });

        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(30))
                .text("ping"),
        )
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Raw receiver, for in-process consumers.
    pub fn receiver(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }
}

impl GatewayEventEmitter for SseBroadcaster {
    fn emit(&self, event: GatewayEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emitted_events_reach_receivers() {
        let broadcaster = SseBroadcaster::new(8);
        let mut receiver = broadcaster.receiver();
        assert_eq!(broadcaster.subscriber_count(), 1);

        broadcaster.emit(GatewayEvent::HooksReloaded { count: 2 });
        assert_eq!(
            receiver.recv().await.unwrap(),
            GatewayEvent::HooksReloaded { count: 2 }
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        SseBroadcaster::with_defaults().emit(GatewayEvent::HooksReloaded { count: 0 });
    }
}
