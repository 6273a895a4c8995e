// ============================================================================
// MARKETPLACE COMMERCE - MODELS
// Module: commerce/src/models.rs
// Description: Product catalog, cart, order, invoice and payment entities
// ============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "product_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Pigeon,
    Supply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "product_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Available,
    Reserved,
    PaymentInProgress,
    InAuction,
    AuctionHold,
    Sold,
    OutOfStock,
    Archived,
}

impl ProductStatus {
    /// `available -> sold` directly is forbidden; every sale passes through
    /// `payment_in_progress` (spec.md §3 invariants).
    pub fn can_transition_to(self, next: ProductStatus) -> bool {
        use ProductStatus::*;
        match (self, next) {
            (Available, Sold) => false,
            (Available, Reserved | InAuction | Archived | OutOfStock) => true,
            (Reserved, Available | PaymentInProgress) => true,
            (PaymentInProgress, Available | Sold) => true,
            (InAuction, AuctionHold | Available) => true,
            (AuctionHold, Available | Sold) => true,
            (OutOfStock, Available | Archived) => true,
            (same, other) if same == other => true,
            _ => false,
        }
    }
}

/// Common product header (spec.md §3). Pigeon/supply-specific fields live in
/// the sidecar tables and are joined in at the service layer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub product_type: ProductType,
    pub title: String,
    pub slug: String,
    pub price_net: Decimal,
    pub status: ProductStatus,
    pub reserved_by: Option<Uuid>,
    pub reserved_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// P1: `status=reserved` iff both reservation fields are set.
    pub fn reservation_is_consistent(&self) -> bool {
        (self.status == ProductStatus::Reserved)
            == (self.reserved_by.is_some() && self.reserved_expires_at.is_some())
    }

    pub fn is_available_for_cart(&self) -> bool {
        self.status == ProductStatus::Available
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "sex", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Cock,
    Hen,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PigeonDetails {
    pub product_id: Uuid,
    pub ring_number: String,
    pub sex: Sex,
    pub birth_date: Option<chrono::NaiveDate>,
    pub lineage: Option<String>,
    pub origin_proof: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SupplyDetails {
    pub product_id: Uuid,
    pub sku: Option<String>,
    pub stock_qty: i32,
    pub low_stock_threshold: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CartItem {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub qty: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StockReservation {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub qty: i32,
    pub expires_at: DateTime<Utc>,
    pub invoice_id: Option<Uuid>,
}

impl StockReservation {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.invoice_id.is_some() || self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "order_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    Direct,
    Auction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Cancelled,
    RefundRequired,
    Refunded,
    AwaitingAdminRefund,
}

/// City shipping profile. `GET /cities` lists these; checkout/shipment
/// lookups use `shipping_fee_net` to compute the gross shipping fee (spec.md
/// §4.E, §4.G). Address management and the rest of the shipment lifecycle
/// are external-collaborator concerns per spec.md §1.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct City {
    pub id: Uuid,
    pub name: String,
    pub shipping_fee_net: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "shipment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    Packed,
    Shipped,
    Delivered,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Shipment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub city_id: Option<Uuid>,
    pub status: ShipmentStatus,
    pub tracking_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: OrderSource,
    pub status: OrderStatus,
    pub subtotal_gross: Decimal,
    pub vat_amount: Decimal,
    pub shipping_fee_gross: Decimal,
    pub grand_total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub qty: i32,
    pub unit_price_gross: Decimal,
    pub line_total_gross: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    PaymentInProgress,
    Paid,
    Failed,
    RefundRequired,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub order_id: Uuid,
    pub number: String,
    pub status: InvoiceStatus,
    pub vat_rate_snapshot: Decimal,
    pub totals: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn idem_key(&self) -> Option<&str> {
        self.totals.get("idem_key").and_then(|v| v.as_str())
    }

    pub fn pay_idem_key(&self) -> Option<&str> {
        self.totals.get("pay_idem_key").and_then(|v| v.as_str())
    }

    pub fn pay_method(&self) -> Option<&str> {
        self.totals.get("pay_method").and_then(|v| v.as_str())
    }

    pub fn pay_started_at(&self) -> Option<DateTime<Utc>> {
        self.totals
            .get("pay_started_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Initiated,
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Monotonic status progression relied on for webhook idempotency
    /// (spec.md §9): a transition is accepted only if it advances the
    /// pipeline, so redelivering an old event is a no-op. `Paid` and `Failed`
    /// share a rank because they're alternative terminal outcomes of the same
    /// pending session, not a strict ordering of one before the other — a
    /// `captured` event arriving after a recorded `Failed` is not a stale
    /// redelivery, so callers must check for that combination explicitly
    /// before relying on `rank()` (see `PaymentCoordinator::handle_captured`).
    pub fn rank(self) -> u8 {
        match self {
            PaymentStatus::Initiated => 0,
            PaymentStatus::Pending => 1,
            PaymentStatus::Paid => 2,
            PaymentStatus::Failed => 2,
            PaymentStatus::Refunded => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub gateway: String,
    pub gateway_ref: String,
    pub status: PaymentStatus,
    pub amount_authorized: Decimal,
    pub amount_captured: Decimal,
    pub amount_refunded: Decimal,
    pub refund_partial: bool,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_to_sold_directly_is_forbidden() {
        assert!(!ProductStatus::Available.can_transition_to(ProductStatus::Sold));
    }

    #[test]
    fn available_to_payment_in_progress_via_reserved() {
        assert!(ProductStatus::Available.can_transition_to(ProductStatus::Reserved));
        assert!(ProductStatus::Reserved.can_transition_to(ProductStatus::PaymentInProgress));
        assert!(ProductStatus::PaymentInProgress.can_transition_to(ProductStatus::Sold));
    }

    #[test]
    fn payment_status_rank_is_monotonic_for_terminal_states() {
        assert!(PaymentStatus::Paid.rank() > PaymentStatus::Pending.rank());
        assert!(PaymentStatus::Refunded.rank() > PaymentStatus::Paid.rank());
    }

    #[test]
    fn paid_and_failed_share_a_rank_as_alternative_terminal_outcomes() {
        assert_eq!(PaymentStatus::Paid.rank(), PaymentStatus::Failed.rank());
    }
}
