//! Per-organization freshness gate for the forecast sync.
//!
//! Callers ask `ensure_fresh(org)` before they read weather data. The gate
//! keeps one `SyncState` per organization and runs the organization-wide
//! sync only when the last attempt (successful or not) is older than the
//! TTL. Without a cache entry it falls back to the creation time of the
//! newest persisted forecast record, so a restart does not force a resync.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::db::SharedDb;

use super::client::ForecastSource;
use super::sync::sync_for_organization_at;
use super::WeatherSyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Syncing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub organization_id: String,
    pub last_sync_at: DateTime<Utc>,
    pub status: SyncStatus,
}

/// Keyed store of sync states, one entry per organization.
pub trait SyncStateCache: Send + Sync {
    fn get(&self, organization_id: &str) -> Option<SyncState>;
    fn set(&self, state: SyncState);
    /// Atomically move the organization to `syncing` unless it already is.
    /// Returns false when another caller holds the slot.
    fn try_begin(&self, organization_id: &str, now: DateTime<Utc>) -> bool;
    fn clear(&self, organization_id: &str);
    fn clear_all(&self);
    fn entries(&self) -> Vec<SyncState>;
}

/// Process-local cache.
#[derive(Default)]
pub struct InMemorySyncCache {
    states: DashMap<String, SyncState>,
}

impl InMemorySyncCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStateCache for InMemorySyncCache {
    fn get(&self, organization_id: &str) -> Option<SyncState> {
        self.states.get(organization_id).map(|s| s.value().clone())
    }

    fn set(&self, state: SyncState) {
        self.states.insert(state.organization_id.clone(), state);
    }

    fn try_begin(&self, organization_id: &str, now: DateTime<Utc>) -> bool {
        let syncing = SyncState {
            organization_id: organization_id.to_string(),
            last_sync_at: now,
            status: SyncStatus::Syncing,
        };
        match self.states.entry(organization_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().status == SyncStatus::Syncing {
                    return false;
                }
                entry.insert(syncing);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(syncing);
                true
            }
        }
    }

    fn clear(&self, organization_id: &str) {
        self.states.remove(organization_id);
    }

    fn clear_all(&self) {
        self.states.clear();
    }

    fn entries(&self) -> Vec<SyncState> {
        let mut all: Vec<SyncState> = self.states.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.organization_id.cmp(&b.organization_id));
        all
    }
}

/// The `syncing` entry of one in-flight attempt. Dropping it unsettled (the
/// caller's future was cancelled, e.g. by a timeout) records `failed` so the
/// organization is re-evaluated by the TTL rule instead of staying `syncing`.
struct SyncAttempt<'a> {
    cache: &'a dyn SyncStateCache,
    organization_id: &'a str,
    started_at: DateTime<Utc>,
    settled: bool,
}

impl<'a> SyncAttempt<'a> {
    fn new(
        cache: &'a dyn SyncStateCache,
        organization_id: &'a str,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cache,
            organization_id,
            started_at,
            settled: false,
        }
    }

    fn settle(mut self, status: SyncStatus) {
        self.record(status);
        self.settled = true;
    }

    fn record(&self, status: SyncStatus) {
        self.cache.set(SyncState {
            organization_id: self.organization_id.to_string(),
            last_sync_at: self.started_at,
            status,
        });
    }
}

impl Drop for SyncAttempt<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        log::warn!(
            "Weather sync for {} abandoned before completion",
            self.organization_id
        );
        self.record(SyncStatus::Failed);
    }
}

pub struct WeatherSyncGate {
    db: SharedDb,
    source: Arc<dyn ForecastSource>,
    cache: Arc<dyn SyncStateCache>,
    ttl: Duration,
    single_flight: bool,
}

impl WeatherSyncGate {
    pub fn new(db: SharedDb, source: Arc<dyn ForecastSource>, config: &WeatherSyncConfig) -> Self {
        Self::with_cache(db, source, Arc::new(InMemorySyncCache::new()), config)
    }

    pub fn with_cache(
        db: SharedDb,
        source: Arc<dyn ForecastSource>,
        cache: Arc<dyn SyncStateCache>,
        config: &WeatherSyncConfig,
    ) -> Self {
        Self {
            db,
            source,
            cache,
            ttl: Duration::hours(i64::from(config.ttl_hours)),
            single_flight: config.single_flight,
        }
    }

    /// Sync the organization's forecast if it is stale.
    ///
    /// Returns true only when a sync ran and succeeded.
    pub async fn ensure_fresh(&self, organization_id: &str) -> bool {
        self.ensure_fresh_at(organization_id, Utc::now()).await
    }

    pub async fn ensure_fresh_at(&self, organization_id: &str, now: DateTime<Utc>) -> bool {
        if let Some(state) = self.cache.get(organization_id) {
            if state.status == SyncStatus::Syncing {
                log::debug!("Weather sync for {} already in progress", organization_id);
                return false;
            }
        }

        if !self.is_stale(organization_id, now) {
            return false;
        }

        if self.single_flight {
            if !self.cache.try_begin(organization_id, now) {
                log::debug!("Weather sync for {} claimed by another caller", organization_id);
                return false;
            }
        } else {
            self.cache.set(SyncState {
                organization_id: organization_id.to_string(),
                last_sync_at: now,
                status: SyncStatus::Syncing,
            });
        }

        log::info!("Weather sync for {} started", organization_id);
        let attempt = SyncAttempt::new(self.cache.as_ref(), organization_id, now);
        let result =
            sync_for_organization_at(&self.db, self.source.as_ref(), organization_id, now).await;

        let status = match &result {
            Ok(summary) => {
                log::info!(
                    "Weather sync for {} completed: {} records, {} failed plots",
                    organization_id,
                    summary.total_records,
                    summary.failed_plots.len()
                );
                SyncStatus::Completed
            }
            Err(e) => {
                log::warn!("Weather sync for {} failed: {}", organization_id, e);
                SyncStatus::Failed
            }
        };
        attempt.settle(status);

        result.is_ok()
    }

    /// A completed or failed cache entry decides on its own. Otherwise the
    /// newest persisted forecast record does; none (or a read error) is stale.
    fn is_stale(&self, organization_id: &str, now: DateTime<Utc>) -> bool {
        let last = match self.cache.get(organization_id) {
            Some(state) if state.status != SyncStatus::Syncing => Some(state.last_sync_at),
            _ => match self.db.lock().latest_forecast_created_at(organization_id) {
                Ok(ts) => ts,
                Err(e) => {
                    log::warn!(
                        "Could not read last forecast time for {}: {}",
                        organization_id,
                        e
                    );
                    None
                }
            },
        };

        match last {
            Some(ts) => now - ts >= self.ttl,
            None => true,
        }
    }

    pub fn state(&self, organization_id: &str) -> Option<SyncState> {
        self.cache.get(organization_id)
    }

    pub fn states(&self) -> Vec<SyncState> {
        self.cache.entries()
    }

    pub fn clear(&self, organization_id: &str) {
        self.cache.clear(organization_id);
    }

    pub fn clear_all(&self) {
        self.cache.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    use chrono::TimeZone;

    use super::*;
    use crate::db::test_utils::insert_weather;
    use crate::weather::sync::tests::{seeded_db, FakeForecast};

    fn at(hour_offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap() + Duration::hours(hour_offset)
    }

    fn gate(source: Arc<FakeForecast>) -> WeatherSyncGate {
        WeatherSyncGate::new(seeded_db(), source, &WeatherSyncConfig::default())
    }

    #[tokio::test]
    async fn test_first_call_syncs_then_fresh() {
        let source = Arc::new(FakeForecast::new());
        let gate = gate(source.clone());

        assert!(gate.ensure_fresh_at("org1", at(0)).await);
        let state = gate.state("org1").unwrap();
        assert_eq!(state.status, SyncStatus::Completed);
        assert_eq!(state.last_sync_at, at(0));

        assert!(!gate.ensure_fresh_at("org1", at(1)).await);
        assert_eq!(source.calls(), 1);

        assert!(gate.ensure_fresh_at("org1", at(25)).await);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_has_no_early_retry() {
        let source = Arc::new(FakeForecast::new());
        let db = seeded_db();
        db.lock()
            .conn_ref()
            .execute_batch("ALTER TABLE plots RENAME TO plots_archived;")
            .unwrap();
        let gate = WeatherSyncGate::new(db, source.clone(), &WeatherSyncConfig::default());

        assert!(!gate.ensure_fresh_at("org1", at(0)).await);
        assert_eq!(gate.state("org1").unwrap().status, SyncStatus::Failed);

        assert!(!gate.ensure_fresh_at("org1", at(2)).await);
        assert_eq!(gate.state("org1").unwrap().last_sync_at, at(0), "failed org waits out the TTL");

        assert!(!gate.ensure_fresh_at("org1", at(24)).await);
        let state = gate.state("org1").unwrap();
        assert_eq!(state.last_sync_at, at(24), "retried once the TTL elapsed");
        assert_eq!(state.status, SyncStatus::Failed);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_sync_is_recorded_as_failed() {
        let source = Arc::new(FakeForecast::new());
        source.delay_ms.store(5_000, Ordering::SeqCst);
        let gate = gate(source.clone());

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            gate.ensure_fresh_at("org1", at(0)),
        )
        .await;
        assert!(outcome.is_err(), "sync outlived the caller's timeout");

        let state = gate.state("org1").unwrap();
        assert_eq!(state.status, SyncStatus::Failed);
        assert_eq!(state.last_sync_at, at(0));

        source.delay_ms.store(0, Ordering::SeqCst);
        assert!(!gate.ensure_fresh_at("org1", at(1)).await, "TTL still applies");
        assert!(gate.ensure_fresh_at("org1", at(24)).await);
        assert_eq!(gate.state("org1").unwrap().status, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn test_syncing_state_short_circuits() {
        let source = Arc::new(FakeForecast::new());
        let gate = gate(source.clone());
        gate.cache.set(SyncState {
            organization_id: "org1".into(),
            last_sync_at: at(-48),
            status: SyncStatus::Syncing,
        });

        assert!(!gate.ensure_fresh_at("org1", at(0)).await);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_persisted_forecast_counts_as_fresh() {
        let source = Arc::new(FakeForecast::new());
        let db = seeded_db();
        // created_at is 2026-10-18T06:00:00Z, six hours before at(0).
        insert_weather(
            &db.lock(),
            "p-north",
            "2026-10-18",
            "forecast",
            None,
            Some(10.0),
            Some(5.0),
            None,
        );
        let gate = WeatherSyncGate::new(db, source.clone(), &WeatherSyncConfig::default());

        assert!(!gate.ensure_fresh_at("org1", at(0)).await);
        assert_eq!(source.calls(), 0);
        assert!(gate.state("org1").is_none());

        assert!(gate.ensure_fresh_at("org1", at(18)).await);
    }

    #[tokio::test]
    async fn test_clear_forces_fallback_check() {
        let source = Arc::new(FakeForecast::new());
        let gate = gate(source.clone());
        gate.ensure_fresh_at("org1", at(0)).await;
        gate.ensure_fresh_at("org2", at(0)).await;
        assert_eq!(gate.states().len(), 2);

        gate.clear("org2");
        assert_eq!(gate.states().len(), 1);
        gate.clear_all();
        assert!(gate.states().is_empty());

        // Records written by the first sync keep org1 fresh after a clear.
        assert!(!gate.ensure_fresh_at("org1", at(1)).await);
    }

    #[test]
    fn test_try_begin_is_exclusive() {
        let cache = InMemorySyncCache::new();
        assert!(cache.try_begin("org1", at(0)));
        assert!(!cache.try_begin("org1", at(0)));

        cache.set(SyncState {
            organization_id: "org1".into(),
            last_sync_at: at(0),
            status: SyncStatus::Completed,
        });
        assert!(cache.try_begin("org1", at(1)));
        assert_eq!(cache.get("org1").unwrap().status, SyncStatus::Syncing);
    }

    #[tokio::test]
    async fn test_single_flight_loser_returns_false() {
        let source = Arc::new(FakeForecast::new());
        let cache = Arc::new(InMemorySyncCache::new());
        let config = WeatherSyncConfig {
            ttl_hours: 24,
            single_flight: true,
        };
        let gate = WeatherSyncGate::with_cache(seeded_db(), source.clone(), cache.clone(), &config);

        // Another worker holds the slot.
        assert!(cache.try_begin("org1", at(0)));
        assert!(!gate.ensure_fresh_at("org1", at(0)).await);
        assert_eq!(source.calls(), 0);

        cache.clear("org1");
        assert!(gate.ensure_fresh_at("org1", at(0)).await);
        assert_eq!(source.calls(), 1);
    }

    /// Holds the first read of each of two callers until both have read,
    /// so both observe the same pre-sync state.
    struct LockstepCache {
        inner: InMemorySyncCache,
        barrier: Barrier,
        reads: AtomicUsize,
    }

    impl LockstepCache {
        fn new() -> Self {
            Self {
                inner: InMemorySyncCache::new(),
                barrier: Barrier::new(2),
                reads: AtomicUsize::new(0),
            }
        }
    }

    impl SyncStateCache for LockstepCache {
        fn get(&self, organization_id: &str) -> Option<SyncState> {
            let state = self.inner.get(organization_id);
            if self.reads.fetch_add(1, Ordering::SeqCst) < 2 {
                self.barrier.wait();
            }
            state
        }
        fn set(&self, state: SyncState) {
            self.inner.set(state)
        }
        fn try_begin(&self, organization_id: &str, now: DateTime<Utc>) -> bool {
            self.inner.try_begin(organization_id, now)
        }
        fn clear(&self, organization_id: &str) {
            self.inner.clear(organization_id)
        }
        fn clear_all(&self) {
            self.inner.clear_all()
        }
        fn entries(&self) -> Vec<SyncState> {
            self.inner.entries()
        }
    }

    async fn concurrent_syncs(single_flight: bool) -> (usize, usize) {
        let source = Arc::new(FakeForecast::new());
        source.delay_ms.store(200, Ordering::SeqCst);
        let config = WeatherSyncConfig {
            ttl_hours: 24,
            single_flight,
        };
        let gate = Arc::new(WeatherSyncGate::with_cache(
            seeded_db(),
            source.clone(),
            Arc::new(LockstepCache::new()),
            &config,
        ));

        let first = tokio::spawn({
            let gate = gate.clone();
            async move { gate.ensure_fresh_at("org1", at(0)).await }
        });
        let second = tokio::spawn({
            let gate = gate.clone();
            async move { gate.ensure_fresh_at("org1", at(0)).await }
        });
        let synced = [first.await.unwrap(), second.await.unwrap()]
            .iter()
            .filter(|ran| **ran)
            .count();
        (synced, source.calls())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_relaxed_mode_lets_concurrent_callers_both_sync() {
        let (synced, calls) = concurrent_syncs(false).await;
        assert_eq!(synced, 2);
        assert_eq!(calls, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_flight_lets_one_concurrent_caller_sync() {
        let (synced, calls) = concurrent_syncs(true).await;
        assert_eq!(synced, 1);
        assert_eq!(calls, 1);
    }
}
