use std::hash::{Hash, Hasher};
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Postgres, Transaction};

use crate::config::DatabaseConfig;
use crate::error::Result;

pub type DbPool = sqlx::PgPool;
pub type DbTransaction<'a> = Transaction<'a, Postgres>;

pub async fn connect(config: &DatabaseConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(config.idle_timeout_secs.map(Duration::from_secs))
        .connect(&config.url)
        .await?;
    Ok(pool)
}

pub async fn health_check(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

/// Deterministic 64-bit key for `pg_advisory_xact_lock`, derived from any
/// hashable value (a product id for supply-stock serialization, an
/// idempotency key for checkout/payment-init serialization).
pub fn advisory_key(value: impl Hash) -> i64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish() as i64
}

/// Acquires a transaction-scoped advisory lock (released automatically on
/// commit or rollback). Required before the supply-stock read/insert in
/// `reserve_supply` and before checkout's idempotency-key replay check
/// (spec.md §4.C, §4.G).
pub async fn advisory_lock(tx: &mut DbTransaction<'_>, key: i64) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_key_is_deterministic() {
        assert_eq!(advisory_key("product-123"), advisory_key("product-123"));
        assert_ne!(advisory_key("product-123"), advisory_key("product-124"));
    }
}
