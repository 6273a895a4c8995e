//! Event envelopes shared by the auction realtime fan-out and the payment
//! webhook queue. Grounded in the teacher's `EventMetadata`/envelope pattern
//! (`shared/src/events/publisher.rs`), trimmed to the fields this system
//! actually needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-auction broadcast event (spec.md §4.F). `version` is a per-auction
/// monotonic counter so a reconnecting subscriber can tell whether its last
/// snapshot is stale relative to the events it's about to receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionEvent {
    #[serde(rename = "type")]
    pub kind: AuctionEventKind,
    pub auction_id: Uuid,
    pub payload: serde_json::Value,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuctionEventKind {
    BidPlaced,
    Outbid,
    Extended,
    Ended,
    Cancelled,
    BidRemoved,
    PriceRecomputed,
}

/// Inbound webhook payload, normalized before it enters the at-least-once
/// queue (spec.md §4.H, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub gateway_ref: String,
    pub status: String,
    pub amount: i64,
    pub captured: i64,
    pub currency: String,
    pub received_at: DateTime<Utc>,
}

