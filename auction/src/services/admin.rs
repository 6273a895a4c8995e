use std::sync::Arc;

use chrono::{DateTime, Utc};
use marketplace_commerce::models::ProductStatus;
use marketplace_shared::db::DbPool;
use marketplace_shared::error::{Error, Result};
use marketplace_shared::events::{AuctionEvent, AuctionEventKind};
use marketplace_shared::principal::Principal;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Auction, AuctionExtension, AuctionStatus, Bid};
use crate::realtime::AuctionBroadcastRegistry;

pub struct AuctionAdminService {
    pool: DbPool,
    realtime: Arc<AuctionBroadcastRegistry>,
}

pub struct NewAuction {
    pub product_id: Uuid,
    pub start_price: Decimal,
    pub bid_step: Decimal,
    pub reserve_price: Option<Decimal>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub anti_sniping_minutes: i32,
    pub max_extensions_override: Option<i32>,
}

impl AuctionAdminService {
    pub fn new(pool: DbPool, realtime: Arc<AuctionBroadcastRegistry>) -> Self {
        Self { pool, realtime }
    }

    /// Creates a `draft`-born auction that is immediately transitioned to
    /// `scheduled` (or `live`, if `start_at` has already passed) and flips
    /// the product to `in_auction` (spec.md §3 invariants: at most one
    /// `scheduled|live` auction per product; `in_auction` requires a live
    /// auction row).
    pub async fn create_auction(&self, principal: &Principal, new: NewAuction) -> Result<Auction> {
        principal.require_admin()?;

        if new.end_at <= new.start_at {
            return Err(Error::Validation("end_at must be after start_at".into()));
        }
        if new.bid_step <= Decimal::ZERO {
            return Err(Error::Validation("bid_step must be >= 1".into()));
        }
        if let Some(reserve) = new.reserve_price {
            if reserve < new.start_price {
                return Err(Error::conflict("AUC_RESERVE_INVALID", "reserve_price must be >= start_price"));
            }
        }

        let mut tx = self.pool.begin().await?;

        let product_status: ProductStatus = sqlx::query_scalar("SELECT status FROM products WHERE id = $1 FOR UPDATE")
            .bind(new.product_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound("product not found".into()))?;
        if product_status != ProductStatus::Available {
            return Err(Error::conflict("PRODUCT_UNAVAILABLE", "product is not available to start an auction"));
        }

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM auctions WHERE product_id = $1 AND status IN ('scheduled', 'live')",
        )
        .bind(new.product_id)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Err(Error::conflict("AUC_ALREADY_SCHEDULED", "product already has a scheduled or live auction"));
        }

        let status = if new.start_at <= Utc::now() { AuctionStatus::Live } else { AuctionStatus::Scheduled };

        let auction: Auction = sqlx::query_as(
            r#"
            INSERT INTO auctions (id, product_id, start_price, bid_step, reserve_price, start_at, end_at,
                anti_sniping_minutes, status, extensions_count, max_extensions_override, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10, now(), now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.product_id)
        .bind(new.start_price)
        .bind(new.bid_step)
        .bind(new.reserve_price)
        .bind(new.start_at)
        .bind(new.end_at)
        .bind(Some(new.anti_sniping_minutes))
        .bind(status)
        .bind(new.max_extensions_override)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE products SET status = 'in_auction', updated_at = now() WHERE id = $1")
            .bind(new.product_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(auction)
    }

    /// Admin cancellation, `scheduled|live -> cancelled` (spec.md §4.E). The
    /// product returns to `available`, mirroring the `no_bids` outcome path.
    pub async fn cancel_auction(&self, principal: &Principal, auction_id: Uuid) -> Result<()> {
        principal.require_admin()?;

        let mut tx = self.pool.begin().await?;

        let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
            .bind(auction_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound("auction not found".into()))?;

        if !matches!(auction.status, AuctionStatus::Scheduled | AuctionStatus::Live) {
            return Err(Error::conflict("AUC_NOT_LIVE", "auction is not scheduled or live"));
        }

        sqlx::query("UPDATE auctions SET status = 'cancelled', updated_at = now() WHERE id = $1")
            .bind(auction_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE products SET status = 'available', updated_at = now() WHERE id = $1 AND status IN ('in_auction', 'auction_hold')",
        )
        .bind(auction.product_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.realtime.publish(AuctionEvent {
            kind: AuctionEventKind::Cancelled,
            auction_id,
            payload: serde_json::json!({}),
            version: 0,
        });

        Ok(())
    }

    /// Removes a bid; any extension it caused is undone and `end_at`
    /// recomputed, in reverse order (spec.md §4.E "Admin bid removal").
    pub async fn remove_bid(&self, principal: &Principal, auction_id: Uuid, bid_id: Uuid) -> Result<()> {
        principal.require_admin()?;

        let mut tx = self.pool.begin().await?;

        let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
            .bind(auction_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound("auction not found".into()))?;

        let bid: Bid = sqlx::query_as("SELECT * FROM bids WHERE id = $1 AND auction_id = $2")
            .bind(bid_id)
            .bind(auction_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound("bid not found".into()))?;

        sqlx::query("DELETE FROM bids WHERE id = $1")
            .bind(bid_id)
            .execute(&mut *tx)
            .await?;

        let caused_extensions: Vec<AuctionExtension> = sqlx::query_as(
            "SELECT * FROM auction_extensions WHERE extended_by_bid_id = $1 ORDER BY new_end_at DESC",
        )
        .bind(bid_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut new_end_at = auction.end_at;
        let mut reverted = 0i32;
        for extension in &caused_extensions {
            sqlx::query("DELETE FROM auction_extensions WHERE id = $1")
                .bind(extension.id)
                .execute(&mut *tx)
                .await?;
            new_end_at = extension.old_end_at;
            reverted += 1;
        }

        if reverted > 0 {
            sqlx::query(
                "UPDATE auctions SET end_at = $1, extensions_count = extensions_count - $2, updated_at = now() WHERE id = $3",
            )
            .bind(new_end_at)
            .bind(reverted)
            .bind(auction_id)
            .execute(&mut *tx)
            .await?;
        }

        let new_highest: Option<Decimal> =
            sqlx::query_scalar("SELECT max(amount) FROM bids WHERE auction_id = $1")
                .bind(auction_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        self.realtime.publish(AuctionEvent {
            kind: AuctionEventKind::BidRemoved,
            auction_id,
            payload: serde_json::json!({ "bid_id": bid_id }),
            version: 0,
        });
        self.realtime.publish(AuctionEvent {
            kind: AuctionEventKind::PriceRecomputed,
            auction_id,
            payload: serde_json::json!({ "highest_bid": new_highest, "end_at": new_end_at }),
            version: 0,
        });

        Ok(())
    }
}
