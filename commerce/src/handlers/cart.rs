use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use marketplace_shared::error::ApiResult;
use marketplace_shared::principal::Principal;
use serde::Deserialize;
use uuid::Uuid;

use crate::services::cart::{CartLine, LocalCartEntry, MergeResult};
use crate::state::CommerceState;

pub fn router() -> Router<CommerceState> {
    Router::new()
        .route("/cart", get(get_cart).post(add_item))
        .route("/cart/items/:product_id", axum::routing::patch(update_qty).delete(remove_item))
        .route("/cart/merge", post(merge_cart))
}

async fn get_cart(State(state): State<CommerceState>, principal: Principal) -> ApiResult<Json<Vec<CartLine>>> {
    Ok(Json(state.cart.get_cart(&principal).await?))
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    pub qty: Option<i32>,
}

async fn add_item(
    State(state): State<CommerceState>,
    principal: Principal,
    Json(payload): Json<AddItemRequest>,
) -> ApiResult<()> {
    state.cart.add(&principal, payload.product_id, payload.qty).await
}

#[derive(Debug, Deserialize)]
pub struct UpdateQtyRequest {
    pub qty: i32,
}

async fn update_qty(
    State(state): State<CommerceState>,
    principal: Principal,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateQtyRequest>,
) -> ApiResult<()> {
    state.cart.update_qty(&principal, product_id, payload.qty).await
}

async fn remove_item(
    State(state): State<CommerceState>,
    principal: Principal,
    Path(product_id): Path<Uuid>,
) -> ApiResult<()> {
    state.cart.remove(&principal, product_id).await
}

#[derive(Debug, Deserialize)]
pub struct MergeCartRequest {
    pub entries: Vec<MergeEntry>,
}

#[derive(Debug, Deserialize)]
pub struct MergeEntry {
    pub product_id: Uuid,
    pub qty: i32,
}

async fn merge_cart(
    State(state): State<CommerceState>,
    principal: Principal,
    Json(payload): Json<MergeCartRequest>,
) -> ApiResult<Json<MergeResult>> {
    let entries = payload
        .entries
        .into_iter()
        .map(|e| LocalCartEntry { product_id: e.product_id, qty: e.qty })
        .collect();
    Ok(Json(state.cart.merge(&principal, entries).await?))
}
