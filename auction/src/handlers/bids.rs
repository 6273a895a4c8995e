use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use marketplace_shared::error::ApiResult;
use marketplace_shared::principal::Principal;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::Bid;
use crate::state::AuctionState;

pub fn router() -> Router<AuctionState> {
    Router::new()
        .route("/auctions/:id/bids", post(place_bid))
        .route("/auctions/:id/bids/:bid_id", axum::routing::delete(remove_bid))
}

#[derive(Debug, Deserialize)]
pub struct PlaceBidRequest {
    pub amount: Decimal,
    pub bidder_name: String,
    pub bidder_city_id: Option<Uuid>,
}

async fn place_bid(
    State(state): State<AuctionState>,
    principal: Principal,
    Path(auction_id): Path<Uuid>,
    Json(payload): Json<PlaceBidRequest>,
) -> ApiResult<Json<Bid>> {
    let bid = state
        .bidding
        .place_bid(&principal, auction_id, payload.amount, payload.bidder_name, payload.bidder_city_id)
        .await?;
    Ok(Json(bid))
}

async fn remove_bid(
    State(state): State<AuctionState>,
    principal: Principal,
    Path((auction_id, bid_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<()> {
    state.admin.remove_bid(&principal, auction_id, bid_id).await
}
