//! Health endpoint. Metrics/log sinks are out of scope (spec.md §1); the
//! core only exposes pool and settings-reload liveness.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use marketplace_shared::db::DbPool;
use marketplace_shared::settings::SettingsProvider;

#[derive(Clone)]
pub struct HealthState {
    pub pool: DbPool,
    pub settings: Arc<SettingsProvider>,
    pub started_at: Instant,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    timestamp: DateTime<Utc>,
    uptime_seconds: u64,
    database: &'static str,
    settings_loaded: bool,
}

pub async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    let database = match marketplace_shared::db::health_check(&state.pool).await {
        Ok(()) => "operational",
        Err(_) => "degraded",
    };
    let settings_loaded = !state.settings.get_all().get_raw("vat.rate").unwrap_or_default().is_empty();
    let status = if database == "operational" { "healthy" } else { "degraded" };

    let body = HealthBody {
        status,
        timestamp: Utc::now(),
        uptime_seconds: Instant::now().saturating_duration_since(state.started_at).as_secs(),
        database,
        settings_loaded,
    };
    let code = if status == "healthy" { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}
