use axum::extract::{Path, Query, State};
use axum::routing::{get, patch};
use axum::{Json, Router};
use marketplace_shared::error::{ApiResult, Error};
use marketplace_shared::principal::Principal;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{City, Shipment, ShipmentStatus};
use crate::state::CommerceState;

pub fn router() -> Router<CommerceState> {
    Router::new()
        .route("/shipments", get(list_shipments))
        .route("/shipments/:id", patch(update_shipment))
        .route("/cities", get(list_cities))
}

#[derive(Debug, Deserialize)]
pub struct ShipmentQuery {
    pub order_id: Uuid,
}

async fn list_shipments(
    State(state): State<CommerceState>,
    Query(query): Query<ShipmentQuery>,
) -> ApiResult<Json<Vec<Shipment>>> {
    let shipments: Vec<Shipment> = sqlx::query_as("SELECT * FROM shipments WHERE order_id = $1 ORDER BY created_at")
        .bind(query.order_id)
        .fetch_all(&state.pool)
        .await?;
    Ok(Json(shipments))
}

#[derive(Debug, Deserialize)]
pub struct UpdateShipmentRequest {
    pub status: Option<ShipmentStatus>,
    pub tracking_ref: Option<String>,
}

async fn update_shipment(
    State(state): State<CommerceState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateShipmentRequest>,
) -> ApiResult<Json<Shipment>> {
    principal.require_admin()?;

    let shipment: Shipment = sqlx::query_as(
        r#"
        UPDATE shipments
        SET status = coalesce($1, status), tracking_ref = coalesce($2, tracking_ref), updated_at = now()
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(payload.status)
    .bind(payload.tracking_ref)
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| Error::NotFound("shipment not found".into()))?;

    Ok(Json(shipment))
}

async fn list_cities(State(state): State<CommerceState>) -> ApiResult<Json<Vec<City>>> {
    let cities: Vec<City> = sqlx::query_as("SELECT * FROM cities ORDER BY name")
        .fetch_all(&state.pool)
        .await?;
    Ok(Json(cities))
}
