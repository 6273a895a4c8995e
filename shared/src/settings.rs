//! Hot-reloaded key/value settings, distinct from [`crate::config::AppConfig`].
//!
//! Modeled on the teacher's CRUD-over-a-table configuration service but
//! reshaped around the snapshot-swap discipline: a reload produces a brand
//! new immutable map which is published with a single atomic pointer swap, so
//! readers never observe a partially-updated view (see `spec.md` §9).

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use sqlx::PgPool;

use crate::error::Result;

pub type ChangeListener = Box<dyn Fn(&SettingsSnapshot) + Send + Sync>;

/// A fully-materialized key -> string map, plus the defaults used to fill in
/// anything the backing store doesn't have a row for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsSnapshot {
    values: HashMap<String, String>,
}

impl SettingsSnapshot {
    fn with_defaults(mut values: HashMap<String, String>, defaults: &HashMap<String, String>) -> Self {
        for (k, v) in defaults {
            values.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Self { values }
    }

    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_typed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get_raw(key)
            .and_then(|v| v.parse::<T>().ok())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_typed(key, default)
    }
}

fn default_map() -> HashMap<String, String> {
    // Recognized keys from spec.md §4.B, grouped. These are the fallback
    // values used whenever the backing `settings` table has no row, or is
    // unreachable on reload.
    [
        ("vat.enabled", "true"),
        ("vat.rate", "0.15"),
        ("payments.enabled", "true"),
        ("payments.provider", "mock"),
        ("payments.test_mode", "true"),
        ("payments.session_ttl_minutes", "30"),
        ("payments.currency", "SAR"),
        ("payments.rate_limit_per_5min", "5"),
        ("auctions.max_extensions", "3"),
        ("auctions.default_anti_sniping_minutes", "10"),
        ("bids.rate_limit_per_minute", "10"),
        ("ws.max_connections_per_host", "1000"),
        ("ws.msgs_per_minute", "600"),
        ("shipping.default_fee_net", "25.00"),
        ("shipping.free_shipping_threshold", "500.00"),
        ("checkout.hold_minutes", "15"),
        ("checkout.max_active_holds_per_user", "5"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Hot-reloaded settings provider. `get_all`/`get_typed` never block on I/O;
/// `reload` is the only operation that touches the store.
pub struct SettingsProvider {
    pool: PgPool,
    defaults: HashMap<String, String>,
    current: Arc<ArcSwap<SettingsSnapshot>>,
    listeners: std::sync::Mutex<Vec<ChangeListener>>,
}

impl SettingsProvider {
    pub fn new(pool: PgPool) -> Self {
        let defaults = default_map();
        let initial = SettingsSnapshot::with_defaults(HashMap::new(), &defaults);
        Self {
            pool,
            defaults,
            current: Arc::new(ArcSwap::from_pointee(initial)),
            listeners: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn get_all(&self) -> Arc<SettingsSnapshot> {
        self.current.load_full()
    }

    pub fn get_typed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.current.load().get_typed(key, default)
    }

    pub fn on_change(&self, listener: ChangeListener) {
        self.listeners.lock().expect("settings listener lock poisoned").push(listener);
    }

    /// Pulls the full `settings` table, builds a new snapshot, and swaps it
    /// in atomically. If the row fetch fails, the last good snapshot is kept
    /// untouched and the error is surfaced to the caller (the janitor's
    /// reload loop logs it and retries on the next tick).
    pub async fn reload(&self) -> Result<()> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM settings")
                .fetch_all(&self.pool)
                .await?;

        let values: HashMap<String, String> = rows.into_iter().collect();
        let next = SettingsSnapshot::with_defaults(values, &self.defaults);
        let previous = self.current.load_full();

        if *previous == next {
            return Ok(());
        }

        self.current.store(Arc::new(next.clone()));
        for listener in self.listeners.lock().expect("settings listener lock poisoned").iter() {
            listener(&next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_falls_back_to_defaults() {
        let defaults = default_map();
        let snap = SettingsSnapshot::with_defaults(HashMap::new(), &defaults);
        assert_eq!(snap.get_typed("auctions.max_extensions", 0u32), 3);
        assert_eq!(snap.get_typed("checkout.max_active_holds_per_user", 0u32), 5);
    }

    #[test]
    fn snapshot_overrides_defaults() {
        let defaults = default_map();
        let mut overrides = HashMap::new();
        overrides.insert("vat.rate".to_string(), "0.20".to_string());
        let snap = SettingsSnapshot::with_defaults(overrides, &defaults);
        assert_eq!(snap.get_typed("vat.rate", 0.0f64), 0.20);
    }

    #[test]
    fn unknown_key_uses_caller_default() {
        let snap = SettingsSnapshot::with_defaults(HashMap::new(), &HashMap::new());
        assert_eq!(snap.get_typed("media.cdn_base_url", 7u32), 7);
    }
}
