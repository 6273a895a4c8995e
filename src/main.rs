use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use redis::aio::ConnectionManager;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketplace_auction::realtime::AuctionBroadcastRegistry;
use marketplace_auction::services::admin::AuctionAdminService;
use marketplace_auction::services::bidding::BiddingService;
use marketplace_auction::services::lifecycle::AuctionLifecycleService;
use marketplace_auction::AuctionState;
use marketplace_commerce::services::cart::CartService;
use marketplace_commerce::services::checkout::CheckoutService;
use marketplace_commerce::services::gateway::{MockGateway, PaymentGateway};
use marketplace_commerce::services::janitor::CommerceJanitor;
use marketplace_commerce::services::payment::PaymentCoordinator;
use marketplace_commerce::services::reservation::ReservationService;
use marketplace_commerce::CommerceState;
use marketplace_shared::config::AppConfig;
use marketplace_shared::settings::SettingsProvider;

mod health;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketplace=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;
    config.validate().map_err(anyhow::Error::msg)?;
    info!("configuration loaded");

    let pool = marketplace_shared::db::connect(&config.database).await?;
    info!("database connected");

    let settings = Arc::new(SettingsProvider::new(pool.clone()));
    if let Err(err) = settings.reload().await {
        warn!(error = %err, "initial settings reload failed, falling back to defaults");
    }
    spawn_settings_reload_loop(settings.clone(), config.settings_provider.reload_interval_secs);

    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let redis_conn = ConnectionManager::new(redis_client).await?;
    info!("redis connected");

    // Secrets are read only from the process environment, never stored in
    // `AppConfig` (spec.md §6).
    let webhook_secret = std::env::var("PAYMENT_WEBHOOK_SECRET").ok().map(Arc::new);
    let gateway_base_url =
        std::env::var("PAYMENT_GATEWAY_BASE_URL").unwrap_or_else(|_| "https://sandbox.gateway.test".into());
    let gateway: Arc<dyn PaymentGateway> = Arc::new(MockGateway { base_url: gateway_base_url });

    let reservations = Arc::new(ReservationService::new(pool.clone()));
    let cart = Arc::new(CartService::new(pool.clone(), settings.clone(), reservations.clone()));
    let checkout = Arc::new(CheckoutService::new(pool.clone(), settings.clone()));
    let payments = Arc::new(PaymentCoordinator::new(
        pool.clone(),
        settings.clone(),
        gateway,
        reservations.clone(),
        redis_conn,
    ));

    let commerce_state = CommerceState {
        pool: pool.clone(),
        settings: settings.clone(),
        reservations: reservations.clone(),
        cart,
        checkout,
        payments: payments.clone(),
        webhook_secret,
        webhook_test_mode: config.payments.test_mode,
    };

    let realtime = Arc::new(AuctionBroadcastRegistry::new());
    let bidding = Arc::new(BiddingService::new(pool.clone(), settings.clone(), realtime.clone()));
    let lifecycle = Arc::new(AuctionLifecycleService::new(pool.clone(), settings.clone(), realtime.clone()));
    let admin = Arc::new(AuctionAdminService::new(pool.clone(), realtime.clone()));

    let auction_state = AuctionState {
        pool: pool.clone(),
        settings: settings.clone(),
        realtime,
        bidding,
        lifecycle: lifecycle.clone(),
        admin,
    };

    let commerce_janitor = Arc::new(CommerceJanitor::new(pool.clone(), reservations.clone()));
    spawn_janitor_loop(commerce_janitor, lifecycle);
    spawn_webhook_worker(payments);

    let health_state = health::HealthState {
        pool: pool.clone(),
        settings: settings.clone(),
        started_at: Instant::now(),
    };

    let app = Router::new()
        .merge(marketplace_commerce::create_router(commerce_state))
        .merge(marketplace_auction::create_router(auction_state))
        .route("/health", axum::routing::get(health::health_check))
        .with_state(health_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(axum::middleware::from_fn(marketplace_shared::correlation::propagate)),
        );

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "marketplace core starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Reload cadence is configurable and also triggered on demand (spec.md
/// §4.B); this is the periodic half.
fn spawn_settings_reload_loop(settings: Arc<SettingsProvider>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            if let Err(err) = settings.reload().await {
                warn!(error = %err, "settings reload failed, keeping last good snapshot");
            }
        }
    });
}

/// Periodic sweep (spec.md §4.I), default every minute: reservation/session
/// expiry plus the `scheduled->live->ended` half of the auction lifecycle.
fn spawn_janitor_loop(janitor: Arc<CommerceJanitor>, lifecycle: Arc<AuctionLifecycleService>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            if let Err(err) = janitor.sweep().await {
                warn!(error = %err, "commerce janitor sweep failed");
            }
            if let Err(err) = lifecycle.activate_scheduled().await {
                warn!(error = %err, "auction activation sweep failed");
            }
            if let Err(err) = lifecycle.close_ended().await {
                warn!(error = %err, "auction close sweep failed");
            }
        }
    });
}

/// At-least-once webhook consumer (spec.md §4.H, §5): blocks on the queue
/// and processes one event per transaction holding the payment row.
fn spawn_webhook_worker(payments: Arc<PaymentCoordinator>) {
    tokio::spawn(async move {
        loop {
            match payments.dequeue_webhook_event(5.0).await {
                Ok(Some(event)) => {
                    if let Err(err) = payments.process_webhook_event(&event).await {
                        warn!(error = %err, gateway_ref = %event.gateway_ref, "webhook event processing failed, re-queuing for retry");
                        if let Err(requeue_err) = payments.enqueue_webhook_event(event).await {
                            warn!(error = %requeue_err, "failed to re-queue webhook event, delivery lost");
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "webhook queue poll failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });
}
