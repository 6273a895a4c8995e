//! Per-auction event fan-out (spec.md §4.F). One broadcast channel per
//! auction, created lazily and looked up through a concurrent map so
//! unrelated auctions never contend on the same lock (grounded in the
//! teacher's `commerce/src/handlers/websocket.rs` broadcast-per-topic idiom,
//! adapted from a per-connection websocket loop to axum SSE streams).

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use dashmap::DashMap;
use futures::stream::Stream;
use marketplace_shared::events::AuctionEvent;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Slow subscribers are dropped once this many buffered events pile up
/// (spec.md §4.F); they must re-sync via a fresh SSE connection, which
/// replays the reconnection snapshot.
const SUBSCRIBER_BUFFER: usize = 64;

struct Topic {
    sender: broadcast::Sender<AuctionEvent>,
    /// Per-auction monotonic counter backing `AuctionEvent.version`
    /// (spec.md §4.F): lets a reconnecting subscriber tell whether its last
    /// snapshot is stale relative to the events it's about to receive.
    version: AtomicU64,
}

impl Topic {
    fn new() -> Self {
        Self {
            sender: broadcast::channel(SUBSCRIBER_BUFFER).0,
            version: AtomicU64::new(0),
        }
    }
}

pub struct AuctionBroadcastRegistry {
    topics: DashMap<Uuid, Topic>,
}

impl AuctionBroadcastRegistry {
    pub fn new() -> Self {
        Self { topics: DashMap::new() }
    }

    /// Single writer per auction (spec.md §5): the caller must already hold
    /// whatever row lock serializes bid placement/extension for this
    /// auction, so publishes observe the same total order as commits and the
    /// version counter advances in that same order. The `version` field on
    /// the passed-in event is overwritten here; callers don't track it.
    pub fn publish(&self, mut event: AuctionEvent) {
        let topic = self.topics.entry(event.auction_id).or_insert_with(Topic::new);
        event.version = topic.version.fetch_add(1, Ordering::SeqCst) + 1;
        // No active subscribers is not an error; the event is simply dropped.
        let _ = topic.sender.send(event);
    }

    pub fn subscribe(&self, auction_id: Uuid) -> broadcast::Receiver<AuctionEvent> {
        self.topics.entry(auction_id).or_insert_with(Topic::new).sender.subscribe()
    }
}

impl Default for AuctionBroadcastRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sse_stream(
    registry: Arc<AuctionBroadcastRegistry>,
    auction_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = registry.subscribe(auction_id);
    let stream = async_stream_from_receiver(receiver);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn async_stream_from_receiver(
    mut receiver: broadcast::Receiver<AuctionEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Ok(payload) = serde_json::to_string(&event) {
                        yield Ok(Event::default().data(payload));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Bounded-buffer overflow: the subscriber missed events
                    // and must re-sync via a snapshot request (spec.md §4.F).
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_shared::events::AuctionEventKind;

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let registry = AuctionBroadcastRegistry::new();
        registry.publish(AuctionEvent {
            kind: AuctionEventKind::BidPlaced,
            auction_id: Uuid::new_v4(),
            payload: serde_json::json!({}),
            version: 0,
        });
    }

    #[tokio::test]
    async fn version_increments_per_auction_and_is_independent_across_auctions() {
        let registry = Arc::new(AuctionBroadcastRegistry::new());
        let auction_a = Uuid::new_v4();
        let auction_b = Uuid::new_v4();
        let mut rx_a = registry.subscribe(auction_a);
        let mut rx_b = registry.subscribe(auction_b);

        for _ in 0..2 {
            registry.publish(AuctionEvent {
                kind: AuctionEventKind::BidPlaced,
                auction_id: auction_a,
                payload: serde_json::json!({}),
                version: 0,
            });
        }
        registry.publish(AuctionEvent {
            kind: AuctionEventKind::BidPlaced,
            auction_id: auction_b,
            payload: serde_json::json!({}),
            version: 0,
        });

        assert_eq!(rx_a.recv().await.unwrap().version, 1);
        assert_eq!(rx_a.recv().await.unwrap().version, 2);
        assert_eq!(rx_b.recv().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let registry = Arc::new(AuctionBroadcastRegistry::new());
        let auction_id = Uuid::new_v4();
        let mut rx = registry.subscribe(auction_id);
        registry.publish(AuctionEvent {
            kind: AuctionEventKind::Extended,
            auction_id,
            payload: serde_json::json!({ "new_end_at": "2026-01-01T00:00:00Z" }),
            version: 1,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.auction_id, auction_id);
    }
}
