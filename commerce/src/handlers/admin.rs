use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use marketplace_shared::error::ApiResult;
use marketplace_shared::principal::Principal;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::state::CommerceState;

pub fn router() -> Router<CommerceState> {
    Router::new().route("/admin/payments/:id/refund", post(refund))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount: Decimal,
}

async fn refund(
    State(state): State<CommerceState>,
    principal: Principal,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<RefundRequest>,
) -> ApiResult<()> {
    principal.require_admin()?;
    state.payments.refund(payment_id, payload.amount).await
}
