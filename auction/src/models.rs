use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "auction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Draft,
    Scheduled,
    Live,
    Ended,
    Cancelled,
    WinnerUnpaid,
}

impl AuctionStatus {
    pub fn can_transition_to(self, next: AuctionStatus) -> bool {
        use AuctionStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Scheduled, Live)
                | (Scheduled, Cancelled)
                | (Live, Ended)
                | (Live, Cancelled)
                | (Ended, WinnerUnpaid)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Auction {
    pub id: Uuid,
    pub product_id: Uuid,
    pub start_price: Decimal,
    pub bid_step: Decimal,
    pub reserve_price: Option<Decimal>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub anti_sniping_minutes: Option<i32>,
    pub status: AuctionStatus,
    pub extensions_count: i32,
    pub max_extensions_override: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auction {
    pub fn effective_max_extensions(&self, settings_default: i32) -> i32 {
        self.max_extensions_override.unwrap_or(settings_default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bid {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub bidder_name_snapshot: String,
    pub bidder_city_id_snapshot: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuctionExtension {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub extended_by_bid_id: Uuid,
    pub old_end_at: DateTime<Utc>,
    pub new_end_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    NoBids,
    ReserveNotMet,
    Winner,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReserveStatus {
    pub has_reserve: bool,
    pub reserve_price: Option<Decimal>,
    pub highest_bid: Option<Decimal>,
    pub reserve_met: bool,
    pub amount_to_reserve: Option<Decimal>,
}

impl ReserveStatus {
    /// Derived monotonically from the current bids (spec.md §4.E).
    pub fn compute(reserve_price: Option<Decimal>, highest_bid: Option<Decimal>) -> Self {
        let reserve_met = match (reserve_price, highest_bid) {
            (Some(reserve), Some(highest)) => highest >= reserve,
            (None, _) => true,
            (Some(_), None) => false,
        };
        let amount_to_reserve = match (reserve_price, highest_bid) {
            (Some(reserve), Some(highest)) if highest < reserve => Some(reserve - highest),
            (Some(reserve), None) => Some(reserve),
            _ => None,
        };
        Self {
            has_reserve: reserve_price.is_some(),
            reserve_price,
            highest_bid,
            reserve_met,
            amount_to_reserve,
        }
    }
}

/// Reconnection snapshot for SSE clients resyncing after a dropped
/// connection (spec.md §4.F).
#[derive(Debug, Clone, Serialize)]
pub struct AuctionSnapshot {
    pub current_price: Decimal,
    pub bid_count: i64,
    pub end_at: DateTime<Utc>,
    pub status: AuctionStatus,
    pub reserve_met: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case::met_exactly(Some(dec!(1500)), Some(dec!(1500)), true, None)]
    #[case::not_met_computes_gap(Some(dec!(1500)), Some(dec!(1020)), false, Some(dec!(480)))]
    #[case::no_reserve_always_met(None, Some(dec!(1020)), true, None)]
    #[case::no_bids_reserve_unmet(Some(dec!(1500)), None, false, Some(dec!(1500)))]
    fn reserve_status_computes_expected_outcome(
        #[case] reserve_price: Option<Decimal>,
        #[case] highest_bid: Option<Decimal>,
        #[case] expected_met: bool,
        #[case] expected_gap: Option<Decimal>,
    ) {
        let status = ReserveStatus::compute(reserve_price, highest_bid);
        assert_eq!(status.reserve_met, expected_met);
        assert_eq!(status.amount_to_reserve, expected_gap);
    }
}
