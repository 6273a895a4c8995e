use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use marketplace_shared::error::{ApiResult, Error};
use marketplace_shared::pagination::{PaginatedResponse, PaginationParams};
use marketplace_shared::principal::Principal;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Product, ProductType};
use crate::state::CommerceState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    pub product_type: ProductType,
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(length(min = 1))]
    pub slug: String,
    pub price_net: Decimal,
}

pub fn router() -> Router<CommerceState> {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", get(get_product))
}

async fn list_products(
    State(state): State<CommerceState>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Json<PaginatedResponse<Product>>> {
    let items: Vec<Product> = sqlx::query_as(
        "SELECT * FROM products ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT count(*) FROM products")
        .fetch_one(&state.pool)
        .await?;

    Ok(Json(PaginatedResponse::new(items, &params, total)))
}

async fn get_product(State(state): State<CommerceState>, Path(id): Path<Uuid>) -> ApiResult<Json<Product>> {
    let product: Product = sqlx::query_as("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| Error::NotFound("product not found".into()))?;
    Ok(Json(product))
}

async fn create_product(
    State(state): State<CommerceState>,
    principal: Principal,
    Json(payload): Json<CreateProductRequest>,
) -> ApiResult<Json<Product>> {
    principal.require_admin()?;
    payload
        .validate()
        .map_err(|e| Error::Validation(e.to_string()))?;

    let product: Product = sqlx::query_as(
        r#"
        INSERT INTO products (id, product_type, title, slug, price_net, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 'available', now(), now())
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payload.product_type)
    .bind(payload.title)
    .bind(payload.slug)
    .bind(payload.price_net)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(product))
}
