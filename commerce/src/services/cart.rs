use std::sync::Arc;

use marketplace_shared::db::DbPool;
use marketplace_shared::error::{Error, Result};
use marketplace_shared::money::net_to_gross;
use marketplace_shared::principal::Principal;
use marketplace_shared::settings::SettingsProvider;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{CartItem, Product, ProductStatus, ProductType};
use crate::services::reservation::ReservationService;

#[derive(Debug, Serialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub title: String,
    pub product_type: ProductType,
    pub qty: i32,
    pub unit_price_gross: Decimal,
    pub line_total_gross: Decimal,
}

#[derive(Debug, Serialize, Default)]
pub struct MergeResult {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<MergeFailure>,
}

#[derive(Debug, Serialize)]
pub struct MergeFailure {
    pub id: Uuid,
    pub reason: String,
}

#[derive(Debug)]
pub struct LocalCartEntry {
    pub product_id: Uuid,
    pub qty: i32,
}

/// Adding a pigeon to the cart is the point at which the hold is taken
/// (spec.md §3 lifecycle: `available -> reserved (cart)`); this is why
/// `add()` delegates to [`ReservationService`] rather than just inserting a
/// `cart_items` row, and why two concurrent adds for the same pigeon (§8
/// scenario 5) resolve to exactly one winner.
pub struct CartService {
    pool: DbPool,
    settings: Arc<SettingsProvider>,
    reservations: Arc<ReservationService>,
}

impl CartService {
    pub fn new(pool: DbPool, settings: Arc<SettingsProvider>, reservations: Arc<ReservationService>) -> Self {
        Self { pool, settings, reservations }
    }

    fn vat_rate(&self) -> Decimal {
        self.settings.get_typed("vat.rate", Decimal::new(15, 2))
    }

    fn hold_minutes(&self) -> i64 {
        self.settings.get_typed("checkout.hold_minutes", 15)
    }

    fn max_active_holds(&self) -> i64 {
        self.settings.get_typed("checkout.max_active_holds_per_user", 5)
    }

    /// Empty for a non-verified email, per spec.md §4.D.
    pub async fn get_cart(&self, principal: &Principal) -> Result<Vec<CartLine>> {
        if !principal.email_verified() {
            return Ok(Vec::new());
        }

        let items: Vec<CartItem> = sqlx::query_as(
            "SELECT * FROM cart_items WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(principal.user_id)
        .fetch_all(&self.pool)
        .await?;

        let vat_rate = self.vat_rate();
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let product: Product = sqlx::query_as("SELECT * FROM products WHERE id = $1")
                .bind(item.product_id)
                .fetch_one(&self.pool)
                .await?;
            let unit_price_gross = net_to_gross(product.price_net, vat_rate);
            lines.push(CartLine {
                product_id: product.id,
                title: product.title,
                product_type: product.product_type,
                qty: item.qty,
                unit_price_gross,
                line_total_gross: unit_price_gross * Decimal::from(item.qty),
            });
        }
        Ok(lines)
    }

    pub async fn add(&self, principal: &Principal, product_id: Uuid, qty: Option<i32>) -> Result<()> {
        principal.require_verified_email()?;

        let product: Product = sqlx::query_as("SELECT * FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("product not found".into()))?;

        let qty = match product.product_type {
            ProductType::Pigeon => {
                if qty.is_some_and(|q| q != 1) {
                    return Err(Error::Validation("pigeons can only be added with qty = 1".into()));
                }
                self.reservations
                    .reserve_pigeon(
                        principal.user_id,
                        product_id,
                        self.hold_minutes(),
                        self.max_active_holds(),
                    )
                    .await?;
                1
            }
            ProductType::Supply => {
                let qty = qty.unwrap_or(1);
                if qty <= 0 {
                    return Err(Error::Validation("qty must be > 0".into()));
                }
                if product.status != ProductStatus::Available {
                    return Err(Error::conflict(
                        "PRODUCT_UNAVAILABLE",
                        "supply is not available for cart",
                    ));
                }
                self.reservations
                    .reserve_supply(
                        principal.user_id,
                        product_id,
                        qty,
                        self.hold_minutes(),
                        self.max_active_holds(),
                    )
                    .await?;
                qty
            }
        };

        sqlx::query(
            r#"
            INSERT INTO cart_items (user_id, product_id, qty, created_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (user_id, product_id) DO UPDATE SET qty = excluded.qty
            "#,
        )
        .bind(principal.user_id)
        .bind(product_id)
        .bind(qty)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_qty(&self, principal: &Principal, product_id: Uuid, qty: i32) -> Result<()> {
        if qty < 1 {
            return Err(Error::Validation("qty must be >= 1".into()));
        }

        let product: Product = sqlx::query_as("SELECT * FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("product not found".into()))?;
        if product.product_type == ProductType::Pigeon && qty != 1 {
            return Err(Error::Validation("pigeons can only be held with qty = 1".into()));
        }

        let reservation_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM stock_reservations WHERE user_id = $1 AND product_id = $2 AND invoice_id IS NULL",
        )
        .bind(principal.user_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(reservation_id) = reservation_id {
            self.reservations.update_supply_reservation_qty(reservation_id, qty).await?;
        }

        sqlx::query("UPDATE cart_items SET qty = $1 WHERE user_id = $2 AND product_id = $3")
            .bind(qty)
            .bind(principal.user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, principal: &Principal, product_id: Uuid) -> Result<()> {
        self.reservations.release_pigeon(product_id).await?;

        sqlx::query(
            "DELETE FROM stock_reservations WHERE user_id = $1 AND product_id = $2 AND invoice_id IS NULL",
        )
        .bind(principal.user_id)
        .bind(product_id)
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
            .bind(principal.user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Applies each locally-held cart entry to the server; a partial failure
    /// never rolls back successes (spec.md §4.D).
    pub async fn merge(&self, principal: &Principal, entries: Vec<LocalCartEntry>) -> Result<MergeResult> {
        let mut result = MergeResult::default();
        for entry in entries {
            match self.add(principal, entry.product_id, Some(entry.qty)).await {
                Ok(()) => result.succeeded.push(entry.product_id),
                Err(err) => result.failed.push(MergeFailure {
                    id: entry.product_id,
                    reason: err.to_string(),
                }),
            }
        }
        Ok(result)
    }
}
