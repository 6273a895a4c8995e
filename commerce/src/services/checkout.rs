use std::sync::Arc;

use chrono::{Datelike, Utc};
use marketplace_shared::db::{advisory_key, advisory_lock, DbPool};
use marketplace_shared::error::{Error, Result};
use marketplace_shared::money::{net_to_gross, round_half_up};
use marketplace_shared::principal::Principal;
use marketplace_shared::settings::SettingsProvider;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{CartItem, Invoice, Product, ProductStatus, ProductType};

pub struct CheckoutService {
    pool: DbPool,
    settings: Arc<SettingsProvider>,
}

/// `round(net * (1+vat), 2) half-up`, shared by checkout line totals and the
/// end-of-auction order synthesis (spec.md §4.E, §4.G).
pub fn compute_shipping_gross(subtotal_gross: Decimal, shipping_fee_net: Decimal, vat_rate: Decimal, free_threshold: Decimal) -> Decimal {
    if subtotal_gross >= free_threshold {
        Decimal::ZERO
    } else {
        net_to_gross(shipping_fee_net, vat_rate)
    }
}

impl CheckoutService {
    pub fn new(pool: DbPool, settings: Arc<SettingsProvider>) -> Self {
        Self { pool, settings }
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

    /// Checkout transaction shape, spec.md §4.G.
    pub async fn checkout(
        &self,
        principal: &Principal,
        idem_key: &str,
        city_id: Option<Uuid>,
    ) -> Result<Invoice> {
        principal.require_verified_email()?;

        let mut tx = self.pool.begin().await?;

        // 1. Serialize identical retries on this idem key.
        advisory_lock(&mut tx, advisory_key(idem_key)).await?;

        // 2. Idempotent replay: an invoice already carries this key.
        let existing: Option<Invoice> = sqlx::query_as(
            r#"
            SELECT i.* FROM invoices i
            WHERE i.totals ->> 'idem_key' = $1
              AND i.status IN ('unpaid', 'payment_in_progress', 'paid')
            "#,
        )
        .bind(idem_key)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(invoice) = existing {
            tx.commit().await?;
            return Ok(invoice);
        }

        let cart_items: Vec<CartItem> = sqlx::query_as(
            "SELECT * FROM cart_items WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(principal.user_id)
        .fetch_all(&mut *tx)
        .await?;

        if cart_items.is_empty() {
            return Err(Error::Validation("cart is empty".into()));
        }

        let mut products = Vec::with_capacity(cart_items.len());
        for item in &cart_items {
            let product: Product = sqlx::query_as("SELECT * FROM products WHERE id = $1 FOR UPDATE")
                .bind(item.product_id)
                .fetch_one(&mut *tx)
                .await?;

            match product.product_type {
                ProductType::Pigeon => {
                    if product.status != ProductStatus::Reserved || product.reserved_by != Some(principal.user_id) {
                        // A pigeon already in payment_in_progress for this
                        // user belongs to another in-flight invoice.
                        if product.status == ProductStatus::PaymentInProgress {
                            return Err(Error::conflict(
                                "ORD_PIGEON_ALREADY_PENDING",
                                "pigeon is already pending payment on another invoice",
                            ));
                        }
                        return Err(Error::conflict("PRODUCT_UNAVAILABLE", "pigeon is no longer held"));
                    }
                }
                ProductType::Supply => {
                    if item.qty <= 0 {
                        return Err(Error::Validation("supply qty must be > 0".into()));
                    }
                    let stock_qty: i32 = sqlx::query_scalar(
                        "SELECT stock_qty FROM supply_details WHERE product_id = $1",
                    )
                    .bind(product.id)
                    .fetch_one(&mut *tx)
                    .await?;
                    if stock_qty < item.qty {
                        return Err(Error::conflict("RES_STOCK_INSUFFICIENT", "insufficient stock"));
                    }
                }
            }
            products.push(product);
        }

        // 3. Create order + order items.
        let order_id = Uuid::new_v4();
        let vat_rate = self.vat_rate();
        let mut subtotal_gross = Decimal::ZERO;

        for (item, product) in cart_items.iter().zip(products.iter()) {
            let unit_price_gross = net_to_gross(product.price_net, vat_rate);
            let line_total_gross = unit_price_gross * Decimal::from(item.qty);
            subtotal_gross += line_total_gross;

            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, qty, unit_price_gross, line_total_gross)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(order_id)
            .bind(product.id)
            .bind(item.qty)
            .bind(unit_price_gross)
            .bind(line_total_gross)
            .execute(&mut *tx)
            .await?;
        }

        // 4. Totals.
        let vat_amount = round_half_up(subtotal_gross * vat_rate / (Decimal::ONE + vat_rate), 2);
        let shipping_fee_net = match city_id {
            Some(id) => sqlx::query_scalar("SELECT shipping_fee_net FROM cities WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .unwrap_or_else(|| self.default_shipping_fee_net()),
            None => self.default_shipping_fee_net(),
        };
        let shipping_fee_gross = compute_shipping_gross(subtotal_gross, shipping_fee_net, vat_rate, self.free_shipping_threshold());
        let grand_total = subtotal_gross + shipping_fee_gross;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, source, status, subtotal_gross, vat_amount, shipping_fee_gross, grand_total, created_at, updated_at)
            VALUES ($1, $2, 'direct', 'pending_payment', $3, $4, $5, $6, now(), now())
            "#,
        )
        .bind(order_id)
        .bind(principal.user_id)
        .bind(subtotal_gross)
        .bind(vat_amount)
        .bind(shipping_fee_gross)
        .bind(grand_total)
        .execute(&mut *tx)
        .await?;

        // 5. Next invoice number, atomically, per year.
        let year = Utc::now().year();
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_sequences (year, next_val) VALUES ($1, 2)
            ON CONFLICT (year) DO UPDATE SET next_val = invoice_sequences.next_val + 1
            RETURNING next_val - 1
            "#,
        )
        .bind(year)
        .fetch_one(&mut *tx)
        .await?;
        let number = format!("INV-{}-{:06}", year, seq);

        let invoice: Invoice = sqlx::query_as(
            r#"
            INSERT INTO invoices (id, order_id, number, status, vat_rate_snapshot, totals, created_at, updated_at)
            VALUES ($1, $2, $3, 'unpaid', $4, $5, now(), now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(&number)
        .bind(vat_rate)
        .bind(serde_json::json!({ "idem_key": idem_key }))
        .fetch_one(&mut *tx)
        .await?;

        // Clear the cart now that its contents became an order.
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(principal.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn shipping_waived_above_free_threshold() {
        let fee = compute_shipping_gross(dec!(600), dec!(25), dec!(0.15), dec!(500));
        assert_eq!(fee, Decimal::ZERO);
    }

    #[test]
    fn shipping_charged_below_threshold() {
        let fee = compute_shipping_gross(dec!(100), dec!(25), dec!(0.15), dec!(500));
        assert_eq!(fee, dec!(28.75));
    }
}
