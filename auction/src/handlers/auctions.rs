use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use marketplace_shared::error::ApiResult;
use marketplace_shared::pagination::{PaginatedResponse, PaginationParams};
use marketplace_shared::principal::Principal;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Auction, AuctionSnapshot, ReserveStatus};
use crate::services::admin::NewAuction;
use crate::state::AuctionState;

pub fn router() -> Router<AuctionState> {
    Router::new()
        .route("/auctions", get(list_auctions).post(create_auction))
        .route("/auctions/:id", get(get_auction))
        .route("/auctions/:id/cancel", post(cancel_auction))
        .route("/auctions/:id/reserve", get(reserve_status))
        .route("/auctions/:id/snapshot", get(snapshot))
}

async fn list_auctions(
    State(state): State<AuctionState>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Json<PaginatedResponse<Auction>>> {
    let items: Vec<Auction> = sqlx::query_as(
        "SELECT * FROM auctions ORDER BY start_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT count(*) FROM auctions")
        .fetch_one(&state.pool)
        .await?;

    Ok(Json(PaginatedResponse::new(items, &params, total)))
}

async fn get_auction(State(state): State<AuctionState>, Path(id): Path<Uuid>) -> ApiResult<Json<Auction>> {
    let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| marketplace_shared::error::Error::NotFound("auction not found".into()))?;
    Ok(Json(auction))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAuctionRequest {
    pub product_id: Uuid,
    pub start_price: Decimal,
    pub bid_step: Decimal,
    pub reserve_price: Option<Decimal>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[validate(range(min = 0, max = 60))]
    pub anti_sniping_minutes: i32,
    pub max_extensions_override: Option<i32>,
}

async fn create_auction(
    State(state): State<AuctionState>,
    principal: Principal,
    Json(payload): Json<CreateAuctionRequest>,
) -> ApiResult<Json<Auction>> {
    payload
        .validate()
        .map_err(|e| marketplace_shared::error::Error::Validation(e.to_string()))?;

    let auction = state
        .admin
        .create_auction(
            &principal,
            NewAuction {
                product_id: payload.product_id,
                start_price: payload.start_price,
                bid_step: payload.bid_step,
                reserve_price: payload.reserve_price,
                start_at: payload.start_at,
                end_at: payload.end_at,
                anti_sniping_minutes: payload.anti_sniping_minutes,
                max_extensions_override: payload.max_extensions_override,
            },
        )
        .await?;
    Ok(Json(auction))
}

async fn cancel_auction(
    State(state): State<AuctionState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    state.admin.cancel_auction(&principal, id).await
}

async fn reserve_status(State(state): State<AuctionState>, Path(id): Path<Uuid>) -> ApiResult<Json<ReserveStatus>> {
    Ok(Json(state.lifecycle.reserve_status(id).await?))
}

/// Reconnection snapshot for SSE clients that dropped a lagging subscription
/// (spec.md §4.F).
async fn snapshot(State(state): State<AuctionState>, Path(id): Path<Uuid>) -> ApiResult<Json<AuctionSnapshot>> {
    Ok(Json(state.lifecycle.reconnection_snapshot(id).await?))
}
