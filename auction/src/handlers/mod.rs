pub mod auctions;
pub mod bids;
pub mod events;
