use std::sync::Arc;

use marketplace_shared::db::DbPool;
use marketplace_shared::settings::SettingsProvider;

use crate::services::cart::CartService;
use crate::services::checkout::CheckoutService;
use crate::services::payment::PaymentCoordinator;
use crate::services::reservation::ReservationService;

#[derive(Clone)]
pub struct CommerceState {
    pub pool: DbPool,
    pub settings: Arc<SettingsProvider>,
    pub reservations: Arc<ReservationService>,
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentCoordinator>,
    /// Read once from the process environment at boot; never logged, never
    /// part of the settings snapshot (spec.md §6).
    pub webhook_secret: Option<Arc<String>>,
    pub webhook_test_mode: bool,
}
