use chrono::Duration as ChronoDuration;
use marketplace_shared::db::DbPool;
use marketplace_shared::error::{Error, Result};
use uuid::Uuid;

/// Sliding-window limiter that counts existing rows rather than maintaining
/// a separate counter table (spec.md §4.J, §9): the row the operation itself
/// writes is the count.
pub struct RateLimiter {
    pool: DbPool,
}

impl RateLimiter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Payment-init attempts in the trailing window, joined through
    /// invoice/order to reach the acting user (payments has no `user_id`
    /// column of its own).
    pub async fn check_payment_init_rate(&self, user_id: Uuid, limit: i64, window_minutes: i64) -> Result<()> {
        let since = chrono::Utc::now() - ChronoDuration::minutes(window_minutes);
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*) FROM payments p
            JOIN invoices i ON i.id = p.invoice_id
            JOIN orders o ON o.id = i.order_id
            WHERE o.user_id = $1 AND p.created_at > $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        if count >= limit {
            Err(Error::RateLimited("PAYMENTS_INIT"))
        } else {
            Ok(())
        }
    }
}
