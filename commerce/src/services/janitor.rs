use std::sync::Arc;

use marketplace_shared::db::DbPool;
use marketplace_shared::error::Result;

use crate::services::reservation::ReservationService;

/// Periodic sweep of expired reservations and stale payment sessions
/// (spec.md §4.I). The auction half of the sweep (`scheduled -> live`,
/// `live -> ended`) lives in `marketplace_auction::services::lifecycle`.
pub struct CommerceJanitor {
    pool: DbPool,
    reservations: Arc<ReservationService>,
}

impl CommerceJanitor {
    pub fn new(pool: DbPool, reservations: Arc<ReservationService>) -> Self {
        Self { pool, reservations }
    }

    /// Runs every sweep once. All sweeps are idempotent; a row that already
    /// moved is left untouched.
    pub async fn sweep(&self) -> Result<()> {
        self.expire_pigeon_reservations().await?;
        self.expire_supply_reservations().await?;
        self.fail_stale_payment_sessions().await?;
        Ok(())
    }

    async fn expire_pigeon_reservations(&self) -> Result<()> {
        let expired: Vec<uuid::Uuid> = sqlx::query_scalar(
            "SELECT id FROM products WHERE status = 'reserved' AND reserved_expires_at < now()",
        )
        .fetch_all(&self.pool)
        .await?;

        for product_id in expired {
            self.reservations.release_pigeon(product_id).await?;
            tracing::info!(product_id = %product_id, "pigeon reservation expired");
        }
        Ok(())
    }

    async fn expire_supply_reservations(&self) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM stock_reservations WHERE invoice_id IS NULL AND expires_at < now()",
        )
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            tracing::info!(count = result.rows_affected(), "expired supply reservations");
        }
        Ok(())
    }

    async fn fail_stale_payment_sessions(&self) -> Result<()> {
        let stale: Vec<(uuid::Uuid, uuid::Uuid)> = sqlx::query_as(
            r#"
            SELECT i.id, i.order_id FROM invoices i
            WHERE i.status = 'payment_in_progress'
              AND (i.totals ->> 'pay_started_at') IS NOT NULL
              AND (i.totals ->> 'pay_started_at')::timestamptz
                  + make_interval(mins => coalesce((i.totals ->> 'session_ttl_minutes')::int, 30))
                  < now()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (invoice_id, order_id) in stale {
            let mut tx = self.pool.begin().await?;
            sqlx::query("UPDATE invoices SET status = 'failed', updated_at = now() WHERE id = $1")
                .bind(invoice_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                r#"
                UPDATE products SET status = 'available', reserved_by = NULL, reserved_expires_at = NULL, updated_at = now()
                WHERE id IN (SELECT product_id FROM order_items WHERE order_id = $1)
                  AND product_type = 'pigeon' AND status = 'payment_in_progress'
                "#,
            )
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM stock_reservations WHERE invoice_id = $1")
                .bind(invoice_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(invoice_id = %invoice_id, "payment session expired, invoice failed");
        }
        Ok(())
    }
}
