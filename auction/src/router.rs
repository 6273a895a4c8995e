use axum::Router;

use crate::handlers::{auctions, bids, events};
use crate::state::AuctionState;

pub fn create_router(state: AuctionState) -> Router {
    Router::new()
        .merge(auctions::router())
        .merge(bids::router())
        .merge(events::router())
        .with_state(state)
}
