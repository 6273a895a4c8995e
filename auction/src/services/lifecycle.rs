use std::sync::Arc;

use chrono::{Datelike, Utc};
use marketplace_shared::db::DbPool;
use marketplace_shared::error::Result;
use marketplace_shared::events::{AuctionEvent, AuctionEventKind};
use marketplace_shared::money::{round_half_up, vat_from_gross};
use marketplace_shared::settings::SettingsProvider;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Auction, AuctionSnapshot, AuctionStatus, Outcome, ReserveStatus};
use crate::realtime::AuctionBroadcastRegistry;

pub struct AuctionLifecycleService {
    pool: DbPool,
    settings: Arc<SettingsProvider>,
    realtime: Arc<AuctionBroadcastRegistry>,
}

impl AuctionLifecycleService {
    pub fn new(pool: DbPool, settings: Arc<SettingsProvider>, realtime: Arc<AuctionBroadcastRegistry>) -> Self {
        Self { pool, settings, realtime }
    }

    /// Reserve status query (spec.md §4.E), derived monotonically from the
    /// current bids rather than cached anywhere.
    pub async fn reserve_status(&self, auction_id: Uuid) -> Result<ReserveStatus> {
        let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1")
            .bind(auction_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| marketplace_shared::error::Error::NotFound("auction not found".into()))?;

        let highest: Option<Decimal> = sqlx::query_scalar("SELECT max(amount) FROM bids WHERE auction_id = $1")
            .bind(auction_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(ReserveStatus::compute(auction.reserve_price, highest))
    }

    /// Reconnection snapshot for SSE clients that dropped off the realtime
    /// fan-out and must re-sync (spec.md §4.F): `{current_price, bid_count,
    /// end_at, status, reserve_met}`.
    pub async fn reconnection_snapshot(&self, auction_id: Uuid) -> Result<AuctionSnapshot> {
        let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1")
            .bind(auction_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| marketplace_shared::error::Error::NotFound("auction not found".into()))?;

        let highest: Option<Decimal> = sqlx::query_scalar("SELECT max(amount) FROM bids WHERE auction_id = $1")
            .bind(auction_id)
            .fetch_one(&self.pool)
            .await?;
        let bid_count: i64 = sqlx::query_scalar("SELECT count(*) FROM bids WHERE auction_id = $1")
            .bind(auction_id)
            .fetch_one(&self.pool)
            .await?;

        let reserve_status = ReserveStatus::compute(auction.reserve_price, highest);

        Ok(AuctionSnapshot {
            current_price: highest.unwrap_or(auction.start_price),
            bid_count,
            end_at: auction.end_at,
            status: auction.status,
            reserve_met: reserve_status.reserve_met,
        })
    }

    fn vat_rate(&self) -> Decimal {
        self.settings.get_typed("vat.rate", Decimal::new(15, 2))
    }

    fn free_shipping_threshold(&self) -> Decimal {
        self.settings.get_typed("shipping.free_shipping_threshold", Decimal::new(50000, 2))
    }

    fn default_shipping_fee_net(&self) -> Decimal {
        self.settings.get_typed("shipping.default_fee_net", Decimal::new(2500, 2))
    }

    /// Time-based `scheduled -> live` activation (spec.md §4.I).
    pub async fn activate_scheduled(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE auctions SET status = 'live', updated_at = now() WHERE status = 'scheduled' AND start_at <= now()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Time-based `live -> ended`, then outcome resolution (spec.md §4.I).
    pub async fn close_ended(&self) -> Result<u64> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM auctions WHERE status = 'live' AND end_at <= now()",
        )
        .fetch_all(&self.pool)
        .await?;

        for id in &ids {
            self.resolve_outcome(*id).await?;
        }
        Ok(ids.len() as u64)
    }

    /// End-of-auction resolution, spec.md §4.E.
    pub async fn resolve_outcome(&self, auction_id: Uuid) -> Result<Outcome> {
        let mut tx = self.pool.begin().await?;

        let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
            .bind(auction_id)
            .fetch_one(&mut *tx)
            .await?;

        let highest: Option<(Uuid, Decimal)> = sqlx::query_as(
            "SELECT user_id, amount FROM bids WHERE auction_id = $1 ORDER BY amount DESC, created_at ASC LIMIT 1",
        )
        .bind(auction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match &highest {
            None => Outcome::NoBids,
            Some((_, amount)) => match auction.reserve_price {
                Some(reserve) if *amount < reserve => Outcome::ReserveNotMet,
                _ => Outcome::Winner,
            },
        };

        sqlx::query("UPDATE auctions SET status = 'ended', updated_at = now() WHERE id = $1")
            .bind(auction_id)
            .execute(&mut *tx)
            .await?;

        let reserve_met = match (auction.reserve_price, highest.as_ref()) {
            (Some(reserve), Some((_, amount))) => *amount >= reserve,
            (None, _) => true,
            (Some(_), None) => false,
        };

        match outcome {
            Outcome::NoBids | Outcome::ReserveNotMet => {
                sqlx::query(
                    "UPDATE products SET status = 'available', updated_at = now() WHERE id = $1 AND status IN ('in_auction', 'auction_hold')",
                )
                .bind(auction.product_id)
                .execute(&mut *tx)
                .await?;
            }
            Outcome::Winner => {
                let (winner_id, amount_gross) = highest.expect("winner outcome implies a highest bid");

                sqlx::query("UPDATE products SET status = 'auction_hold', updated_at = now() WHERE id = $1")
                    .bind(auction.product_id)
                    .execute(&mut *tx)
                    .await?;

                self.synthesize_winning_order(&mut tx, auction.product_id, winner_id, amount_gross).await?;
            }
        }

        tx.commit().await?;

        self.realtime.publish(AuctionEvent {
            kind: AuctionEventKind::Ended,
            auction_id,
            payload: serde_json::json!({
                "outcome": outcome,
                "amount": highest.map(|(_, a)| a),
                "reserve_met": reserve_met,
            }),
            version: 0,
        });

        Ok(outcome)
    }

    /// Synthesizes a direct-equivalent order for the winner: one line at the
    /// winning gross amount, VAT extracted from gross, shipping looked up the
    /// same way checkout does (spec.md §4.E).
    async fn synthesize_winning_order(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        product_id: Uuid,
        winner_id: Uuid,
        amount_gross: Decimal,
    ) -> Result<()> {
        let vat_rate = self.vat_rate();
        let vat_amount = vat_from_gross(amount_gross, vat_rate);
        let subtotal_gross = amount_gross;

        let shipping_fee_net = self.default_shipping_fee_net();
        let shipping_fee_gross = if subtotal_gross >= self.free_shipping_threshold() {
            Decimal::ZERO
        } else {
            round_half_up(shipping_fee_net * (Decimal::ONE + vat_rate), 2)
        };
        let grand_total = subtotal_gross + shipping_fee_gross;

        let order_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, source, status, subtotal_gross, vat_amount, shipping_fee_gross, grand_total, created_at, updated_at)
            VALUES ($1, $2, 'auction', 'pending_payment', $3, $4, $5, $6, now(), now())
            "#,
        )
        .bind(order_id)
        .bind(winner_id)
        .bind(subtotal_gross)
        .bind(vat_amount)
        .bind(shipping_fee_gross)
        .bind(grand_total)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO order_items (id, order_id, product_id, qty, unit_price_gross, line_total_gross)
            VALUES ($1, $2, $3, 1, $4, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(product_id)
        .bind(amount_gross)
        .execute(&mut **tx)
        .await?;

        let year = Utc::now().year();
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_sequences (year, next_val) VALUES ($1, 2)
            ON CONFLICT (year) DO UPDATE SET next_val = invoice_sequences.next_val + 1
            RETURNING next_val - 1
            "#,
        )
        .bind(year)
        .fetch_one(&mut **tx)
        .await?;
        let number = format!("INV-{}-{:06}", year, seq);

        sqlx::query(
            r#"
            INSERT INTO invoices (id, order_id, number, status, vat_rate_snapshot, totals, created_at, updated_at)
            VALUES ($1, $2, $3, 'unpaid', $4, $5, now(), now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(&number)
        .bind(vat_rate)
        .bind(serde_json::json!({}))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
