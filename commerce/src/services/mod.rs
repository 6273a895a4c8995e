pub mod cart;
pub mod checkout;
pub mod gateway;
pub mod janitor;
pub mod payment;
pub mod rate_limiter;
pub mod reservation;
