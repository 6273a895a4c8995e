use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use marketplace_shared::error::{ApiResult, Error};
use marketplace_shared::principal::Principal;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::Invoice;
use crate::state::CommerceState;

pub fn router() -> Router<CommerceState> {
    Router::new().route("/checkout", post(checkout))
}

#[derive(Debug, Deserialize, Default)]
pub struct CheckoutRequest {
    pub city_id: Option<Uuid>,
}

fn idem_key(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Validation("Idempotency-Key header is required".into()))
}

async fn checkout(
    State(state): State<CommerceState>,
    principal: Principal,
    headers: HeaderMap,
    Json(payload): Json<CheckoutRequest>,
) -> ApiResult<Json<Invoice>> {
    let key = idem_key(&headers)?;
    let invoice = state.checkout.checkout(&principal, &key, payload.city_id).await?;
    Ok(Json(invoice))
}
