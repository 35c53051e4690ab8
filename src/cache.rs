//! In-process corpus cache.
//!
//! [`CacheManager`] keeps the latest [`CorpusSnapshot`] behind an `Arc` that
//! is replaced wholesale on every successful fetch. Readers clone the `Arc`
//! and keep a consistent view no matter what a concurrent refresh does. A
//! failed or cancelled fetch never touches the committed snapshot.
//!
//! State machine: `Empty -> Fresh -> Stale -> Fresh` (refetch ok) or
//! `Stale -> Stale` (refetch failed, old snapshot kept).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::corpus::{CategoryIndex, CorpusItem, CorpusSnapshot, CorpusSource, FetchError, ItemId};

/// Time source, injected so tests can move time by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Empty,
    Fresh,
    Stale,
}

#[derive(Default)]
struct CacheEntry {
    snapshot: Option<Arc<CorpusSnapshot>>,
    last_fetch: Option<DateTime<Utc>>,
}

/// A snapshot, optionally narrowed to one category.
///
/// Filtering happens while iterating; the snapshot itself is shared.
#[derive(Debug, Clone)]
pub struct CorpusView {
    snapshot: Arc<CorpusSnapshot>,
    category: Option<String>,
}

impl CorpusView {
    pub fn new(snapshot: Arc<CorpusSnapshot>, category: Option<&str>) -> Self {
        Self {
            snapshot,
            category: category.map(str::to_string),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CorpusItem> + Clone + '_ {
        let category = self.category.as_deref();
        self.snapshot
            .items()
            .iter()
            .filter(move |item| category.map_or(true, |c| item.in_category(c)))
    }

    pub fn get(&self, id: ItemId) -> Option<&CorpusItem> {
        self.iter().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        match self.category {
            Some(_) => self.iter().count(),
            None => self.snapshot.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.category {
            Some(_) => self.iter().next().is_none(),
            None => self.snapshot.is_empty(),
        }
    }

    pub fn snapshot(&self) -> &Arc<CorpusSnapshot> {
        &self.snapshot
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }
}

impl<'a> IntoIterator for &'a CorpusView {
    type Item = &'a CorpusItem;
    type IntoIter = Box<dyn Iterator<Item = &'a CorpusItem> + Send + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

pub struct CacheManager {
    source: Arc<dyn CorpusSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    fetch_timeout: Duration,

    entry: RwLock<CacheEntry>,
    categories: Mutex<Option<Arc<CategoryIndex>>>,
    generation: AtomicU64,
    /// Single-flight guard of the periodic refresher
    periodic_running: AtomicBool,
}

impl CacheManager {
    pub fn new(
        source: Arc<dyn CorpusSource>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            clock,
            ttl,
            fetch_timeout,
            entry: RwLock::new(CacheEntry::default()),
            categories: Mutex::new(None),
            generation: AtomicU64::new(0),
            periodic_running: AtomicBool::new(false),
        }
    }

    /// The cached corpus, refetched first when forced, empty or past ttl.
    ///
    /// Never fails: on fetch failure the previous snapshot (or an empty one)
    /// is served.
    pub async fn get_snapshot(&self, force_refresh: bool, category: Option<&str>) -> CorpusView {
        if force_refresh || self.state() != CacheState::Fresh {
            // failure already logged, previous snapshot stays
            let _ = self.refresh().await;
        }

        CorpusView::new(self.current(), category)
    }

    /// Categories of the current snapshot, recomputed only when the snapshot
    /// has been replaced since the last call.
    pub async fn get_category_index(&self, force_refresh: bool) -> Arc<CategoryIndex> {
        let view = self.get_snapshot(force_refresh, None).await;
        let snapshot = view.snapshot();

        let mut cached = match self.categories.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match cached.as_ref() {
            Some(index) if index.generation() == snapshot.generation() => index.clone(),
            _ => {
                let index = Arc::new(CategoryIndex::from_snapshot(snapshot));
                log::debug!(
                    "rebuilt category index generation={} categories={}",
                    index.generation(),
                    index.categories().len()
                );
                *cached = Some(index.clone());
                index
            }
        }
    }

    /// Fetch from the source and swap the snapshot in. Returns the new item
    /// count.
    pub async fn refresh(&self) -> Result<usize, FetchError> {
        let started = self.clock.now();
        let source = self.source.name().to_string();

        let result = match tokio::time::timeout(self.fetch_timeout, self.source.fetch(None)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
        };

        let items = match result {
            Ok(items) => items,
            Err(err) => {
                log::warn!(
                    "source={source} outcome=error err={err} serving={:?} last_fetch={:?}",
                    self.state(),
                    self.last_fetch()
                );
                return Err(err);
            }
        };

        let count = items.len();
        let fetched_at = self.clock.now();

        // last writer wins; the generation is taken under the write lock so
        // it only grows in commit order
        let snapshot = {
            let mut entry = match self.entry.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let snapshot = Arc::new(CorpusSnapshot::new(items, fetched_at, generation));
            entry.snapshot = Some(snapshot.clone());
            entry.last_fetch = Some(fetched_at);
            snapshot
        };

        log::info!(
            "source={source} outcome=ok items={count} generation={} fetched_at={} took={}ms",
            snapshot.generation(),
            snapshot.fetched_at().to_rfc3339(),
            (fetched_at - started).num_milliseconds()
        );
        Ok(count)
    }

    /// Forced refresh for the background task. Skipped when the previous
    /// periodic refresh is still running. Returns whether a fetch was made.
    pub async fn refresh_periodic(&self) -> bool {
        if self
            .periodic_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("periodic refresh still running, skipping tick");
            return false;
        }

        let _guard = FlightGuard(&self.periodic_running);
        let _ = self.refresh().await;
        true
    }

    /// Refresh every `interval`, starting one interval from now.
    pub fn spawn_periodic_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            log::info!("periodic cache refresh every {interval:?}");
            loop {
                ticker.tick().await;
                cache.refresh_periodic().await;
            }
        })
    }

    /// Current snapshot without triggering a fetch.
    pub fn current(&self) -> Arc<CorpusSnapshot> {
        let entry = match self.entry.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        entry
            .snapshot
            .clone()
            .unwrap_or_else(|| Arc::new(CorpusSnapshot::empty()))
    }

    pub fn state(&self) -> CacheState {
        let entry = match self.entry.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match (&entry.snapshot, entry.last_fetch) {
            (Some(_), Some(last_fetch)) => {
                let age = (self.clock.now() - last_fetch)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if age >= self.ttl {
                    CacheState::Stale
                } else {
                    CacheState::Fresh
                }
            }
            _ => CacheState::Empty,
        }
    }

    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        match self.entry.read() {
            Ok(guard) => guard.last_fetch,
            Err(poisoned) => poisoned.into_inner().last_fetch,
        }
    }
}

struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fakes::{ManualClock, ScriptedSource};

    fn items() -> Vec<CorpusItem> {
        vec![
            CorpusItem::new(1, "one").with_category("happy"),
            CorpusItem::new(2, "two").with_category("sad"),
            CorpusItem::new(3, "three").with_category("happy"),
        ]
    }

    fn manager(source: Arc<ScriptedSource>, clock: Arc<ManualClock>) -> CacheManager {
        CacheManager::new(
            source,
            clock,
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_view_filters_without_copying() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(items())]));
        let cache = manager(source, Arc::new(ManualClock::default()));

        let happy = cache.get_snapshot(false, Some("happy")).await;
        let ids: Vec<ItemId> = happy.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(happy.len(), 2);
        assert!(happy.get(2).is_none());

        let all = cache.get_snapshot(false, None).await;
        assert_eq!(all.len(), 3);
        assert!(Arc::ptr_eq(happy.snapshot(), all.snapshot()));

        let unknown = cache.get_snapshot(false, Some("nope")).await;
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(items()),
            Err(FetchError::Status(503)),
        ]));
        let clock = Arc::new(ManualClock::default());
        let cache = manager(source, clock.clone());

        assert_eq!(cache.state(), CacheState::Empty);
        cache.get_snapshot(false, None).await;
        assert_eq!(cache.state(), CacheState::Fresh);

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.state(), CacheState::Stale);

        // refetch fails, old snapshot stays and state stays stale
        let view = cache.get_snapshot(false, None).await;
        assert_eq!(view.len(), 3);
        assert_eq!(cache.state(), CacheState::Stale);
    }

    #[tokio::test]
    async fn test_refresh_reports_errors() {
        let source = Arc::new(ScriptedSource::new(vec![Err(FetchError::Status(500))]));
        let cache = manager(source, Arc::new(ManualClock::default()));

        assert!(matches!(cache.refresh().await, Err(FetchError::Status(500))));
        assert!(cache.current().is_empty());
        assert!(cache.last_fetch().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out() {
        let source = Arc::new(
            ScriptedSource::new(vec![Ok(items())]).with_delay(Duration::from_secs(30)),
        );
        let cache = manager(source, Arc::new(ManualClock::default()));

        assert!(matches!(cache.refresh().await, Err(FetchError::Timeout(_))));
        assert_eq!(cache.state(), CacheState::Empty);
    }
}
