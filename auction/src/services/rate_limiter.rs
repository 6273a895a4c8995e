use chrono::Duration as ChronoDuration;
use marketplace_shared::db::DbPool;
use marketplace_shared::error::{Error, Result};
use uuid::Uuid;

/// Counts the bidder's own rows in `bids` rather than maintaining a separate
/// counter (spec.md §4.J, §9).
pub struct BidRateLimiter {
    pool: DbPool,
}

impl BidRateLimiter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn check<'e, E>(&self, executor: E, user_id: Uuid, limit: i64) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let since = chrono::Utc::now() - ChronoDuration::minutes(1);
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM bids WHERE user_id = $1 AND created_at > $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(executor)
        .await?;

        if count >= limit {
            Err(Error::RateLimited("BIDS"))
        } else {
            Ok(())
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}
