use axum::Router;

use crate::handlers::{admin, cart, checkout, payments, products, shipments};
use crate::state::CommerceState;

pub fn create_router(state: CommerceState) -> Router {
    Router::new()
        .merge(products::router())
        .merge(cart::router())
        .merge(checkout::router())
        .merge(payments::router())
        .merge(admin::router())
        .merge(shipments::router())
        .with_state(state)
}
