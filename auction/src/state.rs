use std::sync::Arc;

use marketplace_shared::db::DbPool;
use marketplace_shared::settings::SettingsProvider;

use crate::realtime::AuctionBroadcastRegistry;
use crate::services::admin::AuctionAdminService;
use crate::services::bidding::BiddingService;
use crate::services::lifecycle::AuctionLifecycleService;

#[derive(Clone)]
pub struct AuctionState {
    pub pool: DbPool,
    pub settings: Arc<SettingsProvider>,
    pub realtime: Arc<AuctionBroadcastRegistry>,
    pub bidding: Arc<BiddingService>,
    pub lifecycle: Arc<AuctionLifecycleService>,
    pub admin: Arc<AuctionAdminService>,
}
