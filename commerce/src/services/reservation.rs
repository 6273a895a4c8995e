use chrono::{Duration as ChronoDuration, Utc};
use marketplace_shared::db::{advisory_key, advisory_lock, DbPool};
use marketplace_shared::error::{Error, Result};
use uuid::Uuid;

use crate::models::{Product, ProductStatus, ProductType, StockReservation};

/// Pigeon single-holder lock + supply stock reservations with TTL
/// (spec.md §4.C).
pub struct ReservationService {
    pool: DbPool,
}

impl ReservationService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Per-user cap across both reservation kinds (spec.md §4.C "hold-count
    /// limit"), checked on every reservation creation.
    async fn count_active_holds<'e, E>(&self, executor: E, user_id: Uuid) -> Result<i64>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT
                (SELECT count(*) FROM products
                    WHERE product_type = 'pigeon' AND status = 'reserved' AND reserved_by = $1)
                +
                (SELECT count(*) FROM stock_reservations
                    WHERE user_id = $1 AND (invoice_id IS NOT NULL OR expires_at > now()))
            "#,
        )
        .bind(user_id)
        .fetch_one(executor)
        .await?;
        Ok(count.0)
    }

    pub async fn reserve_pigeon(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        hold_minutes: i64,
        max_active_holds: i64,
    ) -> Result<Product> {
        let mut tx = self.pool.begin().await?;

        let holds = self.count_active_holds(&mut *tx, user_id).await?;
        if holds >= max_active_holds {
            return Err(Error::conflict("RES_HOLDS_LIMIT", "active hold limit reached"));
        }

        let product: Product = sqlx::query_as(
            "SELECT * FROM products WHERE id = $1 AND product_type = 'pigeon' FOR UPDATE",
        )
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound("product not found".into()))?;

        if product.status != ProductStatus::Available {
            return Err(Error::conflict("PRODUCT_UNAVAILABLE", "pigeon is not available"));
        }

        let expires_at = Utc::now() + ChronoDuration::minutes(hold_minutes);
        let updated: Product = sqlx::query_as(
            r#"
            UPDATE products
            SET status = 'reserved', reserved_by = $1, reserved_expires_at = $2, updated_at = now()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(expires_at)
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Releases a pigeon hold back to `available`. No-op if the hold already
    /// moved on (called from cart-remove, TTL expiry, invoice failure, and
    /// admin paths, all of which may race).
    pub async fn release_pigeon(&self, product_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE products
            SET status = 'available', reserved_by = NULL, reserved_expires_at = NULL, updated_at = now()
            WHERE id = $1 AND status = 'reserved'
            "#,
        )
        .bind(product_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flips a pigeon `reserved -> payment_in_progress` for the holder's own
    /// checkout flow. Scoped to `user_id` so a stale call can't steal someone
    /// else's hold.
    pub async fn mark_payment_in_progress(&self, product_id: Uuid, user_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE products
            SET status = 'payment_in_progress', updated_at = now()
            WHERE id = $1 AND status = 'reserved' AND reserved_by = $2
            "#,
        )
        .bind(product_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn revert_payment_in_progress(&self, product_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE products
            SET status = 'available', reserved_by = NULL, reserved_expires_at = NULL, updated_at = now()
            WHERE id = $1 AND status = 'payment_in_progress'
            "#,
        )
        .bind(product_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_sold(&self, product_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE products SET status = 'sold', reserved_by = NULL, reserved_expires_at = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(product_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Serializes contenders on the product via an advisory lock keyed by
    /// `hash(product_id)` for the enclosing transaction (spec.md §4.C).
    pub async fn reserve_supply(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        qty: i32,
        hold_minutes: i64,
        max_active_holds: i64,
    ) -> Result<StockReservation> {
        if qty < 1 {
            return Err(Error::Validation("qty must be >= 1".into()));
        }

        let mut tx = self.pool.begin().await?;

        let holds = self.count_active_holds(&mut *tx, user_id).await?;
        if holds >= max_active_holds {
            return Err(Error::conflict("RES_HOLDS_LIMIT", "active hold limit reached"));
        }

        advisory_lock(&mut tx, advisory_key(product_id)).await?;

        let stock_qty: (i32,) = sqlx::query_as(
            "SELECT stock_qty FROM supply_details WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound("supply product not found".into()))?;

        let active_reserved: (Option<i64>,) = sqlx::query_as(
            r#"
            SELECT sum(qty)::bigint FROM stock_reservations
            WHERE product_id = $1 AND (invoice_id IS NOT NULL OR expires_at > now())
            "#,
        )
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;
        let active_reserved = active_reserved.0.unwrap_or(0);

        if (active_reserved + qty as i64) > stock_qty.0 as i64 {
            return Err(Error::conflict(
                "RES_STOCK_INSUFFICIENT",
                "insufficient stock to reserve requested quantity",
            ));
        }

        let expires_at = Utc::now() + ChronoDuration::minutes(hold_minutes);
        let reservation: StockReservation = sqlx::query_as(
            r#"
            INSERT INTO stock_reservations (id, product_id, user_id, qty, expires_at, invoice_id)
            VALUES ($1, $2, $3, $4, $5, NULL)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(product_id)
        .bind(user_id)
        .bind(qty)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    /// Allowed while the reservation is not linked to an invoice and has not
    /// expired (spec.md §4.C).
    pub async fn update_supply_reservation_qty(
        &self,
        reservation_id: Uuid,
        qty: i32,
    ) -> Result<StockReservation> {
        if qty < 1 {
            return Err(Error::Validation("qty must be >= 1".into()));
        }
        sqlx::query_as(
            r#"
            UPDATE stock_reservations
            SET qty = $1
            WHERE id = $2 AND invoice_id IS NULL AND expires_at > now()
            RETURNING *
            "#,
        )
        .bind(qty)
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("reservation not found or no longer editable".into()))
    }

    pub async fn remove_supply_reservation(&self, reservation_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM stock_reservations WHERE id = $1 AND invoice_id IS NULL")
            .bind(reservation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Stamps every active supply reservation for `user_id` with the given
    /// invoice, extending their TTL to cover the payment session window.
    /// Called from payment init (spec.md §4.C "link-to-invoice").
    pub async fn link_supply_reservations_to_invoice(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        invoice_id: Uuid,
        session_expires_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE stock_reservations
            SET invoice_id = $1, expires_at = $2
            WHERE user_id = $3 AND invoice_id IS NULL AND expires_at > now()
            "#,
        )
        .bind(invoice_id)
        .bind(session_expires_at)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn release_reservations_for_invoice(&self, invoice_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM stock_reservations WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub fn product_type_of(product: &Product) -> ProductType {
    product.product_type
}
