//! Time-boxed cache in front of the aggregation pass.
//!
//! An entry is served while it is younger than the validity window and was
//! computed on the same calendar day. At most one pass runs at a time:
//! callers that find the cache invalid while a pass is running wait for it
//! and take its result instead of starting their own.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub mod store;

pub use store::{CacheStore, MemoryStore, SqliteStore};

use crate::error::OverviewError;
use crate::event::AggregationResult;
use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};
use crate::today::is_today;

/// One full pass: fetch, normalize, aggregate.
#[async_trait]
pub trait Aggregation: Send + Sync {
    async fn run(&self, reference_now: DateTime<Local>) -> Result<AggregationResult, OverviewError>;
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: Arc<AggregationResult>,
    pub computed_at: DateTime<Local>,
}

impl CacheEntry {
    pub fn is_valid(&self, now: &DateTime<Local>, validity: Duration) -> bool {
        now.signed_duration_since(self.computed_at) < validity && is_today(&self.computed_at, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Valid,
    Stale,
}

pub struct CacheManager<A: Aggregation> {
    aggregation: A,
    store: Box<dyn CacheStore>,
    validity: Duration,
    flight: Arc<Mutex<()>>,
}

impl<A: Aggregation + 'static> CacheManager<A> {
    pub fn new(aggregation: A, store: Box<dyn CacheStore>, validity: Duration) -> Self {
        Self {
            aggregation,
            store,
            validity,
            flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory(aggregation: A, validity: Duration) -> Self {
        Self::new(aggregation, Box::new(MemoryStore::new()), validity)
    }

    fn current(&self, now: &DateTime<Local>) -> Option<CacheEntry> {
        match self.store.load(now) {
            Ok(entry) => entry,
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::Cache,
                    "load_failed",
                    obj(&[("error", v_str(&err.to_string()))]),
                );
                None
            }
        }
    }

    fn valid_entry(&self, now: &DateTime<Local>) -> Option<CacheEntry> {
        self.current(now).filter(|e| e.is_valid(now, self.validity))
    }

    pub fn state(&self, now: &DateTime<Local>) -> CacheState {
        match self.current(now) {
            None => CacheState::Empty,
            Some(e) if e.is_valid(now, self.validity) => CacheState::Valid,
            Some(_) => CacheState::Stale,
        }
    }

    /// Run a pass and swap its result in. The previous entry stays on failure.
    async fn compute_and_store(&self, now: DateTime<Local>) -> Result<Arc<AggregationResult>, OverviewError> {
        let _profile = ProfileScope::new("aggregation_pass");
        let result = self.aggregation.run(now).await?;
        let entry = CacheEntry {
            result: Arc::new(result),
            computed_at: now,
        };
        if let Err(err) = self.store.save(&entry) {
            log(
                Level::Warn,
                Domain::Cache,
                "save_failed",
                obj(&[("error", v_str(&err.to_string()))]),
            );
        }
        log(
            Level::Info,
            Domain::Cache,
            "stored",
            obj(&[("computed_at", v_str(&now.to_rfc3339()))]),
        );
        Ok(entry.result)
    }

    /// Cached result if still valid, otherwise one synchronous pass.
    pub async fn get_or_compute(&self, now: DateTime<Local>) -> Result<Arc<AggregationResult>, OverviewError> {
        if let Some(entry) = self.valid_entry(&now) {
            log(Level::Debug, Domain::Cache, "hit", obj(&[]));
            return Ok(entry.result);
        }
        let _guard = self.flight.lock().await;
        if let Some(entry) = self.valid_entry(&now) {
            log(Level::Debug, Domain::Cache, "coalesced", obj(&[]));
            return Ok(entry.result);
        }
        log(Level::Info, Domain::Cache, "miss", obj(&[("state", v_str(&format!("{:?}", self.state(&now))))]));
        self.compute_and_store(now).await
    }

    /// Recompute regardless of validity.
    ///
    /// If a pass is already running, its result is taken instead, but only
    /// when it succeeded with a reference time no older than `now`. Otherwise
    /// a pass of our own runs once the lock is free.
    pub async fn force_refresh(&self, now: DateTime<Local>) -> Result<Arc<AggregationResult>, OverviewError> {
        if let Ok(_guard) = self.flight.try_lock() {
            return self.compute_and_store(now).await;
        }
        let _guard = self.flight.lock().await;
        match self.valid_entry(&now).filter(|e| e.computed_at >= now) {
            Some(entry) => {
                log(Level::Debug, Domain::Cache, "refresh_coalesced", obj(&[]));
                Ok(entry.result)
            }
            None => self.compute_and_store(now).await,
        }
    }

    /// Start a background pass and return at once.
    ///
    /// `None` when a pass is already in flight. A failed pass leaves the
    /// current entry untouched.
    pub fn spawn_refresh(self: &Arc<Self>, now: DateTime<Local>) -> Option<JoinHandle<()>> {
        let guard = match self.flight.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                log(Level::Debug, Domain::Cache, "refresh_coalesced", obj(&[]));
                return None;
            }
        };
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _guard = guard;
            if let Err(err) = this.compute_and_store(now).await {
                log(
                    Level::Warn,
                    Domain::Cache,
                    "refresh_failed",
                    obj(&[("error", v_str(&err.to_string()))]),
                );
            }
        }))
    }

    pub fn invalidate(&self) -> Result<(), OverviewError> {
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Category, CompletionEvent};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct Counting {
        runs: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
        gate: Option<Arc<Notify>>,
    }

    impl Counting {
        fn new() -> Self {
            Self {
                runs: Arc::new(AtomicUsize::new(0)),
                fail: Arc::new(AtomicBool::new(false)),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl Aggregation for Counting {
        async fn run(&self, reference_now: DateTime<Local>) -> Result<AggregationResult, OverviewError> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(OverviewError::SourceFetch { endpoint: "buildings", message: "503".into() });
            }
            Ok(crate::aggregate::bucket(vec![CompletionEvent {
                category: Category::BuildingExtension,
                label: format!("run {}", n),
                context: Some("Wache".into()),
                completes_at: reference_now,
                source_ref: None,
            }]))
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 10, h, m, 0).earliest().unwrap()
    }

    fn label(r: &AggregationResult) -> String {
        r.get(Category::BuildingExtension)[0].label.clone()
    }

    #[test]
    fn test_entry_validity() {
        let window = Duration::minutes(5);
        let entry = CacheEntry {
            result: Arc::new(AggregationResult::default()),
            computed_at: at(10, 0),
        };
        assert!(entry.is_valid(&at(10, 0), window));
        assert!(entry.is_valid(&at(10, 4), window));
        assert!(!entry.is_valid(&at(10, 5), window));

        let late = CacheEntry {
            result: Arc::new(AggregationResult::default()),
            computed_at: at(23, 58),
        };
        assert!(late.is_valid(&at(23, 59), window));
        // Numerically inside the window, but past midnight.
        assert!(!late.is_valid(&(at(23, 58) + Duration::minutes(3)), window));
    }

    #[tokio::test]
    async fn test_reuse_within_window() {
        let agg = Counting::new();
        let runs = agg.runs.clone();
        let cache = CacheManager::in_memory(agg, Duration::minutes(5));
        assert_eq!(cache.state(&at(10, 0)), CacheState::Empty);

        let a = cache.get_or_compute(at(10, 0)).await.unwrap();
        let b = cache.get_or_compute(at(10, 4)).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.state(&at(10, 4)), CacheState::Valid);

        assert_eq!(cache.state(&at(10, 5)), CacheState::Stale);
        let c = cache.get_or_compute(at(10, 5)).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(label(&c), "run 2");
    }

    #[tokio::test]
    async fn test_day_rollover_recomputes() {
        let agg = Counting::new();
        let runs = agg.runs.clone();
        let cache = CacheManager::in_memory(agg, Duration::hours(1));
        cache.get_or_compute(at(23, 50)).await.unwrap();
        let after_midnight = at(23, 50) + Duration::minutes(15);
        cache.get_or_compute(after_midnight).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_failure_propagates_and_caches_nothing() {
        let agg = Counting::new();
        agg.fail.store(true, Ordering::SeqCst);
        let cache = CacheManager::in_memory(agg, Duration::minutes(5));
        let err = cache.get_or_compute(at(9, 0)).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(cache.state(&at(9, 0)), CacheState::Empty);
    }

    #[tokio::test]
    async fn test_force_refresh_replaces_valid_entry() {
        let agg = Counting::new();
        let runs = agg.runs.clone();
        let cache = CacheManager::in_memory(agg, Duration::minutes(5));
        cache.get_or_compute(at(10, 0)).await.unwrap();
        let fresh = cache.force_refresh(at(10, 1)).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(label(&fresh), "run 2");
        let again = cache.get_or_compute(at(10, 2)).await.unwrap();
        assert!(Arc::ptr_eq(&fresh, &again));
    }

    #[tokio::test]
    async fn test_background_refresh_swaps_on_success() {
        let agg = Counting::new();
        let cache = Arc::new(CacheManager::in_memory(agg, Duration::minutes(5)));
        cache.get_or_compute(at(10, 0)).await.unwrap();

        let handle = cache.spawn_refresh(at(10, 1)).unwrap();
        handle.await.unwrap();
        let now = cache.get_or_compute(at(10, 2)).await.unwrap();
        assert_eq!(label(&now), "run 2");
    }

    #[tokio::test]
    async fn test_background_refresh_failure_keeps_entry() {
        let agg = Counting::new();
        let fail = agg.fail.clone();
        let runs = agg.runs.clone();
        let cache = Arc::new(CacheManager::in_memory(agg, Duration::minutes(5)));
        let before = cache.get_or_compute(at(10, 0)).await.unwrap();

        fail.store(true, Ordering::SeqCst);
        cache.spawn_refresh(at(10, 1)).unwrap().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let after = cache.get_or_compute(at(10, 2)).await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(cache.state(&at(10, 2)), CacheState::Valid);
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_pass() {
        let gate = Arc::new(Notify::new());
        let mut agg = Counting::new();
        agg.gate = Some(gate.clone());
        let runs = agg.runs.clone();
        let cache = Arc::new(CacheManager::in_memory(agg, Duration::minutes(5)));

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_compute(at(10, 0)).await })
        };
        let second = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_compute(at(10, 0)).await })
        };
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        gate.notify_one();

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_force_refresh_behind_failed_pass_runs_again() {
        let gate = Arc::new(Notify::new());
        let mut agg = Counting::new();
        agg.gate = Some(gate.clone());
        let runs = agg.runs.clone();
        let fail = agg.fail.clone();
        let cache = Arc::new(CacheManager::in_memory(agg, Duration::minutes(5)));

        gate.notify_one();
        let before = cache.get_or_compute(at(10, 0)).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        fail.store(true, Ordering::SeqCst);
        let background = cache.spawn_refresh(at(10, 1)).unwrap();
        let forced = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.force_refresh(at(10, 1)).await })
        };
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // One wake for the background pass, one stored for the forced pass.
        gate.notify_one();
        gate.notify_one();
        background.await.unwrap();
        let forced = forced.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(forced.is_err());
        // The old entry is still served to plain readers.
        let current = cache.get_or_compute(at(10, 2)).await.unwrap();
        assert!(Arc::ptr_eq(&before, &current));
    }

    #[tokio::test]
    async fn test_force_refresh_takes_fresh_concurrent_pass() {
        let gate = Arc::new(Notify::new());
        let mut agg = Counting::new();
        agg.gate = Some(gate.clone());
        let runs = agg.runs.clone();
        let cache = Arc::new(CacheManager::in_memory(agg, Duration::minutes(5)));

        let background = cache.spawn_refresh(at(10, 1)).unwrap();
        let forced = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.force_refresh(at(10, 1)).await })
        };
        settle().await;
        gate.notify_one();
        background.await.unwrap();

        let forced = forced.await.unwrap().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(label(&forced), "run 1");
    }

    #[tokio::test]
    async fn test_single_flight_while_refresh_running() {
        let gate = Arc::new(Notify::new());
        let mut agg = Counting::new();
        agg.gate = Some(gate.clone());
        let runs = agg.runs.clone();
        let cache = Arc::new(CacheManager::in_memory(agg, Duration::minutes(5)));

        let handle = cache.spawn_refresh(at(10, 0)).unwrap();
        // A second background request coalesces into the running one.
        assert!(cache.spawn_refresh(at(10, 0)).is_none());

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_compute(at(10, 0)).await })
        };
        tokio::task::yield_now().await;
        gate.notify_one();
        handle.await.unwrap();
        let result = waiter.await.unwrap().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(label(&result), "run 1");
    }
}
