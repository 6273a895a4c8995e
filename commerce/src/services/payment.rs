use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use marketplace_shared::db::DbPool;
use marketplace_shared::error::{Error, Result};
use marketplace_shared::events::PaymentEvent;
use marketplace_shared::money::to_minor_units;
use marketplace_shared::principal::Principal;
use marketplace_shared::settings::SettingsProvider;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Invoice, InvoiceStatus, Payment, PaymentStatus, ProductType};
use crate::services::gateway::PaymentGateway;
use crate::services::rate_limiter::RateLimiter;
use crate::services::reservation::ReservationService;

const ALLOWED_PAYMENT_METHODS: &[&str] = &["card", "apple_pay", "mada"];
const WEBHOOK_QUEUE_KEY: &str = "marketplace:payments:webhook_queue";

#[derive(Debug, Serialize)]
pub struct PaymentInitResponse {
    pub payment_id: Uuid,
    pub session_url: String,
}

pub struct PaymentCoordinator {
    pool: DbPool,
    settings: Arc<SettingsProvider>,
    gateway: Arc<dyn PaymentGateway>,
    reservations: Arc<ReservationService>,
    rate_limiter: RateLimiter,
    redis: ConnectionManager,
}

impl PaymentCoordinator {
    pub fn new(
        pool: DbPool,
        settings: Arc<SettingsProvider>,
        gateway: Arc<dyn PaymentGateway>,
        reservations: Arc<ReservationService>,
        redis: ConnectionManager,
    ) -> Self {
        let rate_limiter = RateLimiter::new(pool.clone());
        Self {
            pool,
            settings,
            gateway,
            reservations,
            rate_limiter,
            redis,
        }
    }

    fn session_ttl_minutes(&self) -> i64 {
        self.settings.get_typed("payments.session_ttl_minutes", 30)
    }

    fn currency(&self) -> String {
        self.settings.get_typed("payments.currency", "SAR".to_string())
    }

    fn rate_limit(&self) -> i64 {
        self.settings.get_typed("payments.rate_limit_per_5min", 5)
    }

    /// Session creation, per spec.md §4.H "Init payment".
    pub async fn init_payment(
        &self,
        principal: &Principal,
        invoice_id: Uuid,
        method: &str,
        idem_key: &str,
    ) -> Result<PaymentInitResponse> {
        if !ALLOWED_PAYMENT_METHODS.contains(&method) {
            return Err(Error::conflict("PAY_METHOD_DISABLED", "payment method is not enabled"));
        }
        self.rate_limiter
            .check_payment_init_rate(principal.user_id, self.rate_limit(), 5)
            .await?;

        let mut tx = self.pool.begin().await?;

        let invoice: Invoice = sqlx::query_as(
            r#"
            SELECT i.* FROM invoices i
            JOIN orders o ON o.id = i.order_id
            WHERE i.id = $1 AND o.user_id = $2
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .bind(principal.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound("invoice not found".into()))?;

        if !matches!(invoice.status, InvoiceStatus::Unpaid | InvoiceStatus::Failed) {
            return Err(Error::conflict("PAY_SESSION_EXISTS", "invoice is not in a payable state"));
        }

        if invoice.status == InvoiceStatus::Unpaid {
            if let (Some(existing_key), Some(existing_method)) = (invoice.pay_idem_key(), invoice.pay_method()) {
                if existing_key == idem_key && existing_method == method {
                    let payment_id: Option<Uuid> = invoice
                        .totals
                        .get("payment_id")
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse().ok());
                    let session_url = invoice
                        .totals
                        .get("pay_session")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    if let Some(payment_id) = payment_id {
                        tx.commit().await?;
                        return Ok(PaymentInitResponse { payment_id, session_url });
                    }
                } else if existing_key != idem_key {
                    return Err(Error::conflict("PAY_SESSION_EXISTS", "another idempotency key already holds an active session"));
                } else if existing_method != method {
                    return Err(Error::conflict("PAY_IDEM_MISMATCH", "idempotency key replayed with a different method"));
                }
            }
        }

        let grand_total: Decimal = sqlx::query_scalar("SELECT grand_total FROM orders WHERE id = $1")
            .bind(invoice.order_id)
            .fetch_one(&mut *tx)
            .await?;

        let amount_minor = to_minor_units(grand_total);
        let currency = self.currency();
        let session = self
            .gateway
            .create_session(&invoice.number, amount_minor, &currency)
            .await?;

        let payment: Payment = sqlx::query_as(
            r#"
            INSERT INTO payments (id, invoice_id, gateway, gateway_ref, status, amount_authorized, amount_captured, amount_refunded, refund_partial, currency, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'initiated', $5, 0, 0, false, $6, now(), now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice.id)
        .bind(self.settings.get_typed("payments.provider", "mock".to_string()))
        .bind(&session.gateway_ref)
        .bind(grand_total)
        .bind(&currency)
        .fetch_one(&mut *tx)
        .await?;

        let started_at = Utc::now();
        let session_expires_at = started_at + ChronoDuration::minutes(self.session_ttl_minutes());

        self.reservations
            .link_supply_reservations_to_invoice(&mut tx, principal.user_id, invoice.id, session_expires_at)
            .await?;

        let pigeon_product_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT oi.product_id FROM order_items oi
            JOIN products p ON p.id = oi.product_id
            WHERE oi.order_id = $1 AND p.product_type = 'pigeon'
            "#,
        )
        .bind(invoice.order_id)
        .fetch_all(&mut *tx)
        .await?;

        for product_id in pigeon_product_ids {
            sqlx::query(
                r#"
                UPDATE products SET status = 'payment_in_progress', updated_at = now()
                WHERE id = $1 AND status = 'reserved' AND reserved_by = $2
                "#,
            )
            .bind(product_id)
            .bind(principal.user_id)
            .execute(&mut *tx)
            .await?;
        }

        let totals = serde_json::json!({
            "idem_key": invoice.idem_key(),
            "pay_idem_key": idem_key,
            "pay_method": method,
            "pay_session": session.session_url,
            "payment_id": payment.id,
            "pay_started_at": started_at.to_rfc3339(),
            "pay_currency": currency,
            "pay_amount": amount_minor,
            "session_ttl_minutes": self.session_ttl_minutes(),
        });

        sqlx::query("UPDATE invoices SET status = 'payment_in_progress', totals = $1, updated_at = now() WHERE id = $2")
            .bind(totals)
            .bind(invoice.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(invoice_id = %invoice.id, payment_id = %payment.id, "payment session initiated");

        Ok(PaymentInitResponse {
            payment_id: payment.id,
            session_url: session.session_url,
        })
    }

    /// Pushes a validated webhook event onto the at-least-once queue and
    /// returns immediately; the HTTP handler must respond within 1s after
    /// signature check (spec.md §5).
    pub async fn enqueue_webhook_event(&self, event: PaymentEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(WEBHOOK_QUEUE_KEY, payload)
            .await
            .map_err(Error::Redis)?;
        Ok(())
    }

    /// Blocking pop used by the worker loop. Returns `None` on timeout so
    /// the caller can check its cancellation signal between polls.
    pub async fn dequeue_webhook_event(&self, timeout_secs: f64) -> Result<Option<PaymentEvent>> {
        let mut conn = self.redis.clone();
        let result: Option<(String, String)> = conn
            .brpop(WEBHOOK_QUEUE_KEY, timeout_secs)
            .await
            .map_err(Error::Redis)?;
        match result {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Processes one delivery. Idempotent in the strict sense required by
    /// spec.md §8 P8: reprocessing the same event yields the same final
    /// state, because payment status only ever advances (§9).
    pub async fn process_webhook_event(&self, event: &PaymentEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let payment: Option<Payment> = sqlx::query_as(
            "SELECT * FROM payments WHERE gateway_ref = $1 FOR UPDATE",
        )
        .bind(&event.gateway_ref)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(payment) = payment else {
            tracing::warn!(gateway_ref = %event.gateway_ref, "webhook event for unknown payment, skipping");
            return Ok(());
        };

        if payment.currency != event.currency {
            tracing::warn!(gateway_ref = %event.gateway_ref, "currency mismatch on webhook event, ignoring");
            return Ok(());
        }

        let invoice: Invoice = sqlx::query_as("SELECT * FROM invoices WHERE id = $1 FOR UPDATE")
            .bind(payment.invoice_id)
            .fetch_one(&mut *tx)
            .await?;

        match event.status.as_str() {
            "authorized" => self.handle_authorized(&mut tx, &payment, &invoice).await?,
            "paid" | "captured" | "succeeded" => {
                self.handle_captured(&mut tx, &payment, &invoice, event).await?
            }
            "failed" | "canceled" | "cancelled" => {
                self.handle_failed(&mut tx, &payment, &invoice).await?
            }
            other => {
                tracing::warn!(status = other, gateway_ref = %event.gateway_ref, "unrecognized webhook status, recording only");
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn handle_authorized(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        payment: &Payment,
        invoice: &Invoice,
    ) -> Result<()> {
        if payment.status.rank() >= PaymentStatus::Pending.rank() {
            return Ok(());
        }
        let expired = invoice
            .pay_started_at()
            .map(|started| Utc::now() > started + ChronoDuration::minutes(self.session_ttl_minutes()))
            .unwrap_or(false);

        if expired {
            self.fail_payment_and_invoice(tx, payment.id, invoice).await?;
        } else {
            sqlx::query("UPDATE payments SET status = 'pending', updated_at = now() WHERE id = $1")
                .bind(payment.id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn handle_captured(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        payment: &Payment,
        invoice: &Invoice,
        event: &PaymentEvent,
    ) -> Result<()> {
        if payment.status == PaymentStatus::Failed {
            // A genuine capture arriving after we already recorded a failure
            // is not a stale redelivery (rank() treats Paid/Failed as
            // siblings) — funds moved after we gave up on this session, so
            // route it to admin review instead of silently absorbing it.
            sqlx::query("UPDATE payments SET status = 'paid', amount_captured = $1, updated_at = now() WHERE id = $2")
                .bind(marketplace_shared::money::from_minor_units(event.captured))
                .bind(payment.id)
                .execute(&mut **tx)
                .await?;
            sqlx::query("UPDATE invoices SET status = 'refund_required', updated_at = now() WHERE id = $1")
                .bind(invoice.id)
                .execute(&mut **tx)
                .await?;
            sqlx::query("UPDATE orders SET status = 'awaiting_admin_refund', updated_at = now() WHERE id = $1")
                .bind(invoice.order_id)
                .execute(&mut **tx)
                .await?;
            tracing::warn!(
                invoice_id = %invoice.id,
                "capture confirmed after payment was already marked failed, routed to admin refund"
            );
            return Ok(());
        }

        if payment.status.rank() >= PaymentStatus::Paid.rank() {
            return Ok(());
        }

        let captured = marketplace_shared::money::from_minor_units(event.captured);
        sqlx::query("UPDATE payments SET status = 'paid', amount_captured = $1, updated_at = now() WHERE id = $2")
            .bind(captured)
            .bind(payment.id)
            .execute(&mut **tx)
            .await?;

        let expired = invoice
            .pay_started_at()
            .map(|started| Utc::now() > started + ChronoDuration::minutes(self.session_ttl_minutes()))
            .unwrap_or(false);

        if expired {
            // Late success (spec.md GLOSSARY): capture confirmed after TTL.
            sqlx::query("UPDATE invoices SET status = 'refund_required', updated_at = now() WHERE id = $1")
                .bind(invoice.id)
                .execute(&mut **tx)
                .await?;
            sqlx::query("UPDATE orders SET status = 'awaiting_admin_refund', updated_at = now() WHERE id = $1")
                .bind(invoice.order_id)
                .execute(&mut **tx)
                .await?;
            tracing::warn!(invoice_id = %invoice.id, "late payment success, routed to admin refund");
        } else {
            sqlx::query("UPDATE invoices SET status = 'paid', updated_at = now() WHERE id = $1")
                .bind(invoice.id)
                .execute(&mut **tx)
                .await?;
            sqlx::query("UPDATE orders SET status = 'paid', updated_at = now() WHERE id = $1")
                .bind(invoice.order_id)
                .execute(&mut **tx)
                .await?;

            let lines: Vec<(Uuid, ProductType, i32)> = sqlx::query_as(
                r#"
                SELECT p.id, p.product_type, oi.qty FROM order_items oi
                JOIN products p ON p.id = oi.product_id
                WHERE oi.order_id = $1
                "#,
            )
            .bind(invoice.order_id)
            .fetch_all(&mut **tx)
            .await?;

            for (product_id, product_type, qty) in lines {
                match product_type {
                    ProductType::Pigeon => {
                        sqlx::query(
                            "UPDATE products SET status = 'sold', reserved_by = NULL, reserved_expires_at = NULL, updated_at = now() WHERE id = $1",
                        )
                        .bind(product_id)
                        .execute(&mut **tx)
                        .await?;
                    }
                    ProductType::Supply => {
                        sqlx::query(
                            "UPDATE supply_details SET stock_qty = stock_qty - $1 WHERE product_id = $2",
                        )
                        .bind(qty)
                        .bind(product_id)
                        .execute(&mut **tx)
                        .await?;
                        sqlx::query("DELETE FROM stock_reservations WHERE invoice_id = $1 AND product_id = $2")
                            .bind(invoice.id)
                            .bind(product_id)
                            .execute(&mut **tx)
                            .await?;
                    }
                }
            }
            tracing::info!(invoice_id = %invoice.id, "invoice paid, products transitioned");
        }
        Ok(())
    }

    async fn handle_failed(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        payment: &Payment,
        invoice: &Invoice,
    ) -> Result<()> {
        if payment.status.rank() >= PaymentStatus::Failed.rank() {
            return Ok(());
        }
        self.fail_payment_and_invoice(tx, payment.id, invoice).await
    }

    async fn fail_payment_and_invoice(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        payment_id: Uuid,
        invoice: &Invoice,
    ) -> Result<()> {
        sqlx::query("UPDATE payments SET status = 'failed', updated_at = now() WHERE id = $1")
            .bind(payment_id)
            .execute(&mut **tx)
            .await?;
        sqlx::query("UPDATE invoices SET status = 'failed', updated_at = now() WHERE id = $1")
            .bind(invoice.id)
            .execute(&mut **tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE products SET status = 'available', reserved_by = NULL, reserved_expires_at = NULL, updated_at = now()
            WHERE id IN (SELECT product_id FROM order_items WHERE order_id = $1)
              AND product_type = 'pigeon' AND status = 'payment_in_progress'
            "#,
        )
        .bind(invoice.order_id)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM stock_reservations WHERE invoice_id = $1")
            .bind(invoice.id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Admin refund (spec.md §4.H). `amount <= amount_captured - amount_refunded`.
    pub async fn refund(&self, payment_id: Uuid, amount: Decimal) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let payment: Payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
            .bind(payment_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound("payment not found".into()))?;

        let refundable = payment.amount_captured - payment.amount_refunded;
        if amount > refundable {
            return Err(Error::conflict("PAY_REFUND_EXCEEDS", "refund amount exceeds capturable balance"));
        }

        let refund = self
            .gateway
            .refund(&payment.gateway_ref, to_minor_units(amount))
            .await?;
        tracing::info!(payment_id = %payment_id, gateway_refund_ref = %refund.gateway_refund_ref, "refund issued");

        let new_refunded = payment.amount_refunded + amount;
        let fully_refunded = new_refunded >= payment.amount_captured;
        let partial = !fully_refunded && new_refunded > Decimal::ZERO;

        sqlx::query(
            r#"
            UPDATE payments
            SET amount_refunded = $1, refund_partial = $2,
                status = CASE WHEN $3 THEN 'refunded' ELSE status END,
                updated_at = now()
            WHERE id = $4
            "#,
        )
        .bind(new_refunded)
        .bind(partial)
        .bind(fully_refunded)
        .bind(payment_id)
        .execute(&mut *tx)
        .await?;

        let invoice_status = if fully_refunded { "refunded" } else { "refund_required" };
        sqlx::query("UPDATE invoices SET status = $1, updated_at = now() WHERE id = $2")
            .bind(invoice_status)
            .bind(payment.invoice_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
