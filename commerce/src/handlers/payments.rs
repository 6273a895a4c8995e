use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use marketplace_shared::error::{ApiResult, Error};
use marketplace_shared::events::PaymentEvent;
use marketplace_shared::principal::Principal;
use serde::Deserialize;
use uuid::Uuid;

/// Shape of the inbound webhook body (spec.md §6): `id`, `status`, `amount`,
/// `captured`, `currency`. Mapped onto [`PaymentEvent`] with a server-side
/// `received_at` stamp.
#[derive(Debug, Deserialize)]
struct WebhookBody {
    id: String,
    status: String,
    amount: i64,
    captured: i64,
    currency: String,
}

use crate::models::Payment;
use crate::services::gateway::verify_webhook_signature;
use crate::services::payment::PaymentInitResponse;
use crate::state::CommerceState;

pub fn router() -> Router<CommerceState> {
    Router::new()
        .route("/payments/init", post(init_payment))
        .route("/payments/:id", get(get_payment))
        .route("/payments/webhook/:gateway", post(webhook))
}

#[derive(Debug, Deserialize)]
pub struct InitPaymentRequest {
    pub invoice_id: Uuid,
    pub method: String,
}

fn idem_key(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Validation("Idempotency-Key header is required".into()))
}

async fn init_payment(
    State(state): State<CommerceState>,
    principal: Principal,
    headers: HeaderMap,
    Json(payload): Json<InitPaymentRequest>,
) -> ApiResult<Json<PaymentInitResponse>> {
    let key = idem_key(&headers)?;
    let response = state
        .payments
        .init_payment(&principal, payload.invoice_id, &payload.method, &key)
        .await?;
    Ok(Json(response))
}

async fn get_payment(State(state): State<CommerceState>, Path(id): Path<Uuid>) -> ApiResult<Json<Payment>> {
    let payment: Payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| Error::NotFound("payment not found".into()))?;
    Ok(Json(payment))
}

/// Inbound webhook (spec.md §4.H, §6). Validates the signature synchronously
/// then enqueues for the worker and returns; never does DB writes on this
/// path so it can return within the 1s budget.
async fn webhook(
    State(state): State<CommerceState>,
    Path(_gateway): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get("X-Webhook-Signature")
        .and_then(|v| v.to_str().ok());

    match (signature, &state.webhook_secret) {
        (Some(sig), Some(secret)) => verify_webhook_signature(secret, &body, sig)?,
        (None, _) if state.webhook_test_mode => {}
        _ => {
            return Err(Error::unauthorized(
                "PAY_WEBHOOK_INVALID_SIGNATURE",
                "missing or unverifiable webhook signature",
            ));
        }
    }

    let body: WebhookBody = serde_json::from_slice(&body)?;
    let event = PaymentEvent {
        gateway_ref: body.id,
        status: body.status,
        amount: body.amount,
        captured: body.captured,
        currency: body.currency,
        received_at: chrono::Utc::now(),
    };
    state.payments.enqueue_webhook_event(event).await?;
    Ok(StatusCode::OK)
}
