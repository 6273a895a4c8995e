use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use marketplace_shared::db::DbPool;
use marketplace_shared::error::{Error, Result};
use marketplace_shared::events::{AuctionEvent, AuctionEventKind};
use marketplace_shared::principal::Principal;
use marketplace_shared::settings::SettingsProvider;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Auction, AuctionStatus, Bid};
use crate::realtime::AuctionBroadcastRegistry;
use crate::services::rate_limiter::BidRateLimiter;

pub struct BiddingService {
    pool: DbPool,
    settings: Arc<SettingsProvider>,
    rate_limiter: BidRateLimiter,
    realtime: Arc<AuctionBroadcastRegistry>,
}

impl BiddingService {
    pub fn new(pool: DbPool, settings: Arc<SettingsProvider>, realtime: Arc<AuctionBroadcastRegistry>) -> Self {
        let rate_limiter = BidRateLimiter::new(pool.clone());
        Self { pool, settings, rate_limiter, realtime }
    }

    fn bid_rate_limit(&self) -> i64 {
        self.settings.get_typed("bids.rate_limit_per_minute", 10)
    }

    fn default_anti_sniping_minutes(&self) -> i32 {
        self.settings.get_typed("auctions.default_anti_sniping_minutes", 10)
    }

    fn default_max_extensions(&self) -> i32 {
        self.settings.get_typed("auctions.max_extensions", 3)
    }

    /// Bid placement preconditions and the anti-sniping extension, both
    /// evaluated under the same row lock on the auction (spec.md §4.E).
    pub async fn place_bid(
        &self,
        principal: &Principal,
        auction_id: Uuid,
        amount: Decimal,
        bidder_name: String,
        bidder_city_id: Option<Uuid>,
    ) -> Result<Bid> {
        principal.require_can_bid()?;
        principal.require_verified_email()?;

        let mut tx = self.pool.begin().await?;

        self.rate_limiter.check(&mut *tx, principal.user_id, self.bid_rate_limit()).await?;

        let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
            .bind(auction_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound("auction not found".into()))?;

        if auction.status != AuctionStatus::Live {
            return Err(Error::conflict("AUC_NOT_LIVE", "auction is not live"));
        }
        let now = Utc::now();
        if auction.end_at <= now {
            return Err(Error::conflict("AUC_ENDED", "auction has already ended"));
        }

        let current_highest: Option<Decimal> =
            sqlx::query_scalar("SELECT max(amount) FROM bids WHERE auction_id = $1")
                .bind(auction_id)
                .fetch_one(&mut *tx)
                .await?;
        let previous_top_bidder: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM bids WHERE auction_id = $1 ORDER BY amount DESC, created_at DESC LIMIT 1",
        )
        .bind(auction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let base = current_highest.unwrap_or(auction.start_price);
        let minimum = base + auction.bid_step;
        if amount < minimum {
            return Err(Error::conflict("AUC_BID_TOO_LOW", "bid does not meet the minimum increment"));
        }
        if ((amount - base) % auction.bid_step) != Decimal::ZERO {
            return Err(Error::conflict("AUC_STEP_MISMATCH", "bid does not align to the bid step"));
        }

        let bid: Bid = sqlx::query_as(
            r#"
            INSERT INTO bids (id, auction_id, user_id, amount, bidder_name_snapshot, bidder_city_id_snapshot, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(auction_id)
        .bind(principal.user_id)
        .bind(amount)
        .bind(&bidder_name)
        .bind(bidder_city_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut events = vec![AuctionEvent {
            kind: AuctionEventKind::BidPlaced,
            auction_id,
            payload: serde_json::json!({ "bid_id": bid.id, "amount": amount, "user_id": principal.user_id }),
            version: 0,
        }];

        if let Some(previous_bidder) = previous_top_bidder {
            if previous_bidder != principal.user_id {
                events.push(AuctionEvent {
                    kind: AuctionEventKind::Outbid,
                    auction_id,
                    payload: serde_json::json!({ "user_id": previous_bidder, "new_amount": amount }),
                    version: 0,
                });
            }
        }

        // Anti-sniping extension, computed immediately while still holding
        // the auction row (spec.md §4.E).
        let remaining = auction.end_at - now;
        // `0` is a deliberate "no anti-sniping window" configuration (spec.md's
        // [0,60] range), distinct from the column being unset; only an unset
        // column falls back to the global default.
        let anti_sniping_minutes = auction.anti_sniping_minutes.unwrap_or_else(|| self.default_anti_sniping_minutes());
        let effective_max = auction.effective_max_extensions(self.default_max_extensions());
        let extension_allowed = effective_max == 0 || auction.extensions_count < effective_max;

        if remaining <= ChronoDuration::minutes(anti_sniping_minutes as i64) && extension_allowed {
            let new_end = auction.end_at + ChronoDuration::minutes(anti_sniping_minutes as i64);
            let extended: Option<(Uuid,)> = sqlx::query_as(
                r#"
                UPDATE auctions
                SET end_at = $1, extensions_count = extensions_count + 1, updated_at = now()
                WHERE id = $2 AND end_at = $3
                RETURNING id
                "#,
            )
            .bind(new_end)
            .bind(auction_id)
            .bind(auction.end_at)
            .fetch_optional(&mut *tx)
            .await?;

            if extended.is_some() {
                sqlx::query(
                    r#"
                    INSERT INTO auction_extensions (id, auction_id, extended_by_bid_id, old_end_at, new_end_at, created_at)
                    VALUES ($1, $2, $3, $4, $5, now())
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(auction_id)
                .bind(bid.id)
                .bind(auction.end_at)
                .bind(new_end)
                .execute(&mut *tx)
                .await?;

                events.push(AuctionEvent {
                    kind: AuctionEventKind::Extended,
                    auction_id,
                    payload: serde_json::json!({ "old_end_at": auction.end_at, "new_end_at": new_end }),
                    version: 0,
                });
            }
        }

        tx.commit().await?;

        for event in events {
            self.realtime.publish(event);
        }

        Ok(bid)
    }
}
