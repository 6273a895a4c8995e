pub mod admin;
pub mod cart;
pub mod checkout;
pub mod payments;
pub mod products;
pub mod shipments;
