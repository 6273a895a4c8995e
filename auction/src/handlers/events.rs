use axum::extract::{Path, State};
use axum::routing::get;
use axum::Router;
use uuid::Uuid;

use crate::realtime::sse_stream;
use crate::state::AuctionState;

pub fn router() -> Router<AuctionState> {
    Router::new().route("/auctions/:id/events", get(stream_events))
}

async fn stream_events(State(state): State<AuctionState>, Path(id): Path<Uuid>) -> impl axum::response::IntoResponse {
    sse_stream(state.realtime.clone(), id)
}
