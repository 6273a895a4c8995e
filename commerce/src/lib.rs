pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod state;

pub use router::create_router;
pub use state::CommerceState;
