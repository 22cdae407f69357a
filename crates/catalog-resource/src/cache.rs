//! Query cache with single-flight fetches
//!
//! Entries are keyed by `QueryKey`. Each entry holds the last data, the last
//! error and at most one attached in-flight fetch. A fetch runs as a spawned
//! task wrapped in a `Shared` future, so every caller asking for the same key
//! awaits the same request, and a caller giving up does not abort it.
//!
//! Every fetch gets a unique id. A settling fetch only writes into its entry
//! if it is still the attached one; invalidation detaches the current fetch,
//! so a response that was already in flight can never mark the entry fresh.
//!
//! Entries untouched for `gc_time` are swept on the next read once the
//! previous sweep is at least `gc_time` old.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ResourceError, Result};
use crate::key::QueryKey;

pub(crate) type SharedFetch<T> = Shared<BoxFuture<'static, Result<Arc<T>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Disabled query; nothing will be fetched.
    Idle,
    /// No data yet, first fetch pending.
    Loading,
    Success,
    /// Last fetch failed. Previous data, if any, is still exposed.
    Error,
}

/// Point-in-time view of one query.
#[derive(Debug)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<ResourceError>,
    pub is_fetching: bool,
    /// Data is older than `stale_time` or was invalidated.
    pub is_stale: bool,
    pub updated_at: Option<Instant>,
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
            updated_at: self.updated_at,
        }
    }
}

impl<T> QueryState<T> {
    pub(crate) fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            is_fetching: false,
            is_stale: false,
            updated_at: None,
        }
    }
}

pub(crate) enum Lookup<T> {
    Fresh(Arc<T>),
    Pending(SharedFetch<T>),
}

struct InFlight<T> {
    id: u64,
    fetch: SharedFetch<T>,
}

struct Entry<T> {
    data: Option<Arc<T>>,
    error: Option<ResourceError>,
    updated_at: Option<Instant>,
    last_access: Instant,
    invalidated: bool,
    in_flight: Option<InFlight<T>>,
}

impl<T> Entry<T> {
    fn new() -> Self {
        Self {
            data: None,
            error: None,
            updated_at: None,
            last_access: Instant::now(),
            invalidated: false,
            in_flight: None,
        }
    }

    /// Not fetching and not read within `gc_time`.
    fn is_unused(&self, gc_time: Duration) -> bool {
        self.in_flight.is_none() && self.last_access.elapsed() >= gc_time
    }

    fn is_stale(&self, stale_time: Duration) -> bool {
        self.invalidated
            || self
                .updated_at
                .is_none_or(|at| at.elapsed() >= stale_time)
    }

    fn state(&self, stale_time: Duration) -> QueryState<T> {
        let status = if self.error.is_some() {
            QueryStatus::Error
        } else if self.data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Loading
        };
        QueryState {
            status,
            data: self.data.clone(),
            error: self.error.clone(),
            is_fetching: self.in_flight.is_some(),
            is_stale: self.is_stale(stale_time),
            updated_at: self.updated_at,
        }
    }
}

pub(crate) struct QueryCache<T> {
    entries: Mutex<HashMap<QueryKey, Entry<T>>>,
    gc_time: Duration,
    last_sweep: Mutex<Instant>,
    next_fetch: AtomicU64,
    /// Parent of every fetch token; cancelled when the cache is dropped.
    root: CancellationToken,
}

impl<T> Drop for QueryCache<T> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl<T: Send + Sync + 'static> QueryCache<T> {
    pub(crate) fn new(gc_time: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            gc_time,
            last_sweep: Mutex::new(Instant::now()),
            next_fetch: AtomicU64::new(0),
            root: CancellationToken::new(),
        }
    }

    /// Fresh cached data, or the fetch for `key` (started with `start` when
    /// nothing is in flight).
    pub(crate) fn lookup<F>(self: &Arc<Self>, key: &QueryKey, stale_time: Duration, start: F) -> Lookup<T>
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, Result<T>>,
    {
        let mut entries = self.entries.lock();
        self.maybe_sweep(&mut entries, key);
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        entry.last_access = Instant::now();

        if !entry.is_stale(stale_time)
            && let Some(data) = &entry.data
        {
            return Lookup::Fresh(Arc::clone(data));
        }
        Lookup::Pending(self.attach(key, entry, start))
    }

    /// Snapshot of `key`, starting a background fetch when the data is
    /// missing or stale. A failed entry is only refetched after invalidation
    /// or an explicit `lookup`.
    pub(crate) fn observe<F>(self: &Arc<Self>, key: &QueryKey, stale_time: Duration, start: F) -> QueryState<T>
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, Result<T>>,
    {
        let mut entries = self.entries.lock();
        self.maybe_sweep(&mut entries, key);
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        entry.last_access = Instant::now();

        let failed = entry.error.is_some() && !entry.invalidated;
        if entry.is_stale(stale_time) && entry.in_flight.is_none() && !failed {
            // the spawned task drives the fetch; observers only read the entry
            let _fetch = self.attach(key, entry, start);
        }
        entry.state(stale_time)
    }

    /// Evict unused entries if the last sweep is older than `gc_time`.
    /// `current` survives the sweep; the caller is about to touch it.
    fn maybe_sweep(&self, entries: &mut HashMap<QueryKey, Entry<T>>, current: &QueryKey) {
        let mut last_sweep = self.last_sweep.lock();
        if last_sweep.elapsed() < self.gc_time {
            return;
        }
        *last_sweep = Instant::now();
        let before = entries.len();
        entries.retain(|key, entry| key == current || !entry.is_unused(self.gc_time));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "swept unused queries");
        }
    }

    fn attach<F>(self: &Arc<Self>, key: &QueryKey, entry: &mut Entry<T>, start: F) -> SharedFetch<T>
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, Result<T>>,
    {
        if let Some(in_flight) = &entry.in_flight {
            return in_flight.fetch.clone();
        }

        let id = self.next_fetch.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let future = start(token.clone());
        let cache = Arc::downgrade(self);
        let settle_key = key.clone();

        let task = tokio::spawn(async move {
            let result = tokio::select! {
                result = future => result.map(Arc::new),
                _ = token.cancelled() => Err(ResourceError::Aborted("resource dropped".into())),
            };
            if let Some(cache) = cache.upgrade() {
                cache.settle(&settle_key, id, &result);
            }
            result
        });

        let fetch = async move {
            task.await
                .unwrap_or_else(|e| Err(ResourceError::Aborted(format!("fetch task failed: {e}"))))
        }
        .boxed()
        .shared();

        debug!(key = %key, fetch = id, "fetch started");
        entry.in_flight = Some(InFlight {
            id,
            fetch: fetch.clone(),
        });
        fetch
    }

    fn settle(&self, key: &QueryKey, id: u64, result: &Result<Arc<T>>) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.in_flight.as_ref().is_none_or(|f| f.id != id) {
            debug!(key = %key, fetch = id, "discarding result of detached fetch");
            return;
        }

        entry.in_flight = None;
        match result {
            Ok(data) => {
                entry.data = Some(Arc::clone(data));
                entry.error = None;
                entry.updated_at = Some(Instant::now());
                entry.invalidated = false;
            }
            Err(e) => {
                debug!(key = %key, error = %e, "fetch failed");
                entry.error = Some(e.clone());
            }
        }
    }

    /// Snapshot without triggering a fetch.
    #[cfg(test)]
    pub(crate) fn peek(&self, key: &QueryKey, stale_time: Duration) -> Option<QueryState<T>> {
        self.entries.lock().get(key).map(|e| e.state(stale_time))
    }

    /// Cached data regardless of freshness.
    pub(crate) fn get(&self, key: &QueryKey) -> Option<Arc<T>> {
        self.entries.lock().get(key).and_then(|e| e.data.clone())
    }

    /// Mark every entry under `prefix` stale and detach its fetch.
    pub(crate) fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.entries.lock();
        let mut count = 0;
        for (key, entry) in entries.iter_mut() {
            if prefix.matches(key) {
                entry.invalidated = true;
                entry.in_flight = None;
                count += 1;
            }
        }
        count
    }

    /// Detach in-flight fetches under `prefix` so they cannot overwrite
    /// data written by the caller.
    pub(crate) fn detach(&self, prefix: &QueryKey) {
        let mut entries = self.entries.lock();
        for (key, entry) in entries.iter_mut() {
            if prefix.matches(key) {
                entry.in_flight = None;
            }
        }
    }

    /// Entries under `prefix` that currently hold data.
    pub(crate) fn with_data(&self, prefix: &QueryKey) -> Vec<(QueryKey, Arc<T>)> {
        self.entries
            .lock()
            .iter()
            .filter(|(key, _)| prefix.matches(key))
            .filter_map(|(key, entry)| entry.data.clone().map(|data| (key.clone(), data)))
            .collect()
    }

    /// Overwrite the data of an existing entry. Timestamps are untouched.
    pub(crate) fn set_data(&self, key: &QueryKey, data: Arc<T>) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.data = Some(data);
        }
    }

    /// Drop entries not accessed within `gc_time` and not fetching.
    pub(crate) fn evict_unused(&self, gc_time: Duration) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_unused(gc_time));
        before - entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{ListParams, QueryKeys};
    use std::sync::atomic::AtomicUsize;

    const GC_TIME: Duration = Duration::from_secs(60);

    fn delayed(value: &'static str, delay_ms: u64, calls: Arc<AtomicUsize>) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, Result<String>> {
        move |_token| {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(value.to_string())
            }
            .boxed()
        }
    }

    fn pending(lookup: Lookup<String>) -> SharedFetch<String> {
        match lookup {
            Lookup::Pending(fetch) => fetch,
            Lookup::Fresh(_) => panic!("expected pending fetch"),
        }
    }

    #[tokio::test]
    async fn identical_keys_share_one_fetch() {
        let cache = Arc::new(QueryCache::<String>::new(GC_TIME));
        let key = QueryKeys::new("brands").list(&ListParams::new().page(1));
        let calls = Arc::new(AtomicUsize::new(0));

        let a = pending(cache.lookup(&key, Duration::ZERO, delayed("one", 50, calls.clone())));
        let b = pending(cache.lookup(&key, Duration::ZERO, delayed("two", 50, calls.clone())));

        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap().as_str(), "one");
        assert_eq!(b.unwrap().as_str(), "one");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_never_share() {
        let cache = Arc::new(QueryCache::<String>::new(GC_TIME));
        let keys = QueryKeys::new("brands");
        let calls = Arc::new(AtomicUsize::new(0));

        let a = pending(cache.lookup(
            &keys.list(&ListParams::new().page(1)),
            Duration::ZERO,
            delayed("p1", 10, calls.clone()),
        ));
        let b = pending(cache.lookup(
            &keys.list(&ListParams::new().page(2)),
            Duration::ZERO,
            delayed("p2", 10, calls.clone()),
        ));
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap().as_str(), "p1");
        assert_eq!(b.unwrap().as_str(), "p2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fresh_data_skips_the_fetch() {
        let cache = Arc::new(QueryCache::<String>::new(GC_TIME));
        let key = QueryKeys::new("brands").detail("1");
        let calls = Arc::new(AtomicUsize::new(0));

        pending(cache.lookup(&key, Duration::from_secs(60), delayed("v1", 0, calls.clone())))
            .await
            .unwrap();
        match cache.lookup(&key, Duration::from_secs(60), delayed("v2", 0, calls.clone())) {
            Lookup::Fresh(data) => assert_eq!(data.as_str(), "v1"),
            Lookup::Pending(_) => panic!("fresh entry must not refetch"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate(&QueryKeys::new("brands").details());
        let refetched = pending(cache.lookup(&key, Duration::from_secs(60), delayed("v2", 0, calls.clone())))
            .await
            .unwrap();
        assert_eq!(refetched.as_str(), "v2");
    }

    #[tokio::test]
    async fn invalidated_fetch_cannot_mark_entry_fresh() {
        let cache = Arc::new(QueryCache::<String>::new(GC_TIME));
        let key = QueryKeys::new("products").list(&ListParams::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let old = pending(cache.lookup(&key, Duration::ZERO, delayed("old", 100, calls.clone())));
        assert_eq!(cache.invalidate(&QueryKeys::new("products").lists()), 1);

        // The detached fetch still answers its own caller
        assert_eq!(old.await.unwrap().as_str(), "old");
        let state = cache.peek(&key, Duration::from_secs(60)).unwrap();
        assert!(state.data.is_none());
        assert!(state.is_stale);

        // A newer fetch that settles first is not overwritten by an older one
        let slow = pending(cache.lookup(&key, Duration::ZERO, delayed("slow", 100, calls.clone())));
        cache.invalidate(&key);
        let quick = pending(cache.lookup(&key, Duration::ZERO, delayed("quick", 10, calls.clone())));
        assert_eq!(quick.await.unwrap().as_str(), "quick");
        assert_eq!(slow.await.unwrap().as_str(), "slow");
        assert_eq!(cache.get(&key).unwrap().as_str(), "quick");
    }

    #[tokio::test]
    async fn dropping_the_cache_aborts_fetches() {
        let cache = Arc::new(QueryCache::<String>::new(GC_TIME));
        let key = QueryKeys::new("brands").all();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = pending(cache.lookup(&key, Duration::ZERO, delayed("never", 5_000, calls)));
        drop(cache);

        let err = tokio::time::timeout(Duration::from_secs(1), fetch)
            .await
            .expect("fetch must settle once the cache is gone")
            .unwrap_err();
        assert!(matches!(err, ResourceError::Aborted(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn observe_starts_background_fetch() {
        let cache = Arc::new(QueryCache::<String>::new(GC_TIME));
        let key = QueryKeys::new("categories").detail("9");
        let calls = Arc::new(AtomicUsize::new(0));

        let state = cache.observe(&key, Duration::from_secs(60), delayed("cat", 10, calls.clone()));
        assert_eq!(state.status, QueryStatus::Loading);
        assert!(state.is_fetching);

        // A second observer joins instead of starting another fetch
        cache.observe(&key, Duration::from_secs(60), delayed("cat", 10, calls.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = cache.observe(&key, Duration::from_secs(60), delayed("cat", 10, calls.clone()));
        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.data.unwrap().as_str(), "cat");
        assert!(!state.is_fetching);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_entry_keeps_error_until_refetched() {
        let cache = Arc::new(QueryCache::<String>::new(GC_TIME));
        let key = QueryKeys::new("brands").detail("404");

        let fetch = pending(cache.lookup(&key, Duration::ZERO, |_| {
            async { Err::<String, _>(ResourceError::Disabled("boom".into())) }.boxed()
        }));
        assert!(fetch.await.is_err());

        let calls = Arc::new(AtomicUsize::new(0));
        let state = cache.observe(&key, Duration::ZERO, delayed("x", 0, calls.clone()));
        assert_eq!(state.status, QueryStatus::Error);
        assert!(!state.is_fetching);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unused_entries_are_evicted() {
        let cache = Arc::new(QueryCache::<String>::new(GC_TIME));
        let keys = QueryKeys::new("brands");
        let calls = Arc::new(AtomicUsize::new(0));

        pending(cache.lookup(&keys.detail("1"), Duration::ZERO, delayed("a", 0, calls.clone())))
            .await
            .unwrap();
        let _busy = pending(cache.lookup(&keys.detail("2"), Duration::ZERO, delayed("b", 500, calls)));

        assert_eq!(cache.evict_unused(Duration::from_secs(60)), 0);
        assert_eq!(cache.evict_unused(Duration::ZERO), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn reads_sweep_entries_past_gc_time() {
        let cache = Arc::new(QueryCache::<String>::new(Duration::from_millis(200)));
        let keys = QueryKeys::new("brands");
        let calls = Arc::new(AtomicUsize::new(0));

        for page in 1..=50 {
            let key = keys.list(&ListParams::new().page(page));
            pending(cache.lookup(&key, Duration::ZERO, delayed("p", 0, calls.clone())))
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 50);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let current = keys.detail("1");
        cache.observe(&current, Duration::ZERO, delayed("d", 0, calls.clone()));

        // only the entry being read survives
        assert_eq!(cache.len(), 1);
        assert!(cache.peek(&current, Duration::ZERO).is_some());
    }

    #[tokio::test]
    async fn sweep_keeps_fetching_entries() {
        let cache = Arc::new(QueryCache::<String>::new(Duration::from_millis(10)));
        let keys = QueryKeys::new("brands");
        let calls = Arc::new(AtomicUsize::new(0));

        let busy = pending(cache.lookup(&keys.detail("slow"), Duration::ZERO, delayed("s", 200, calls.clone())));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.observe(&keys.detail("other"), Duration::ZERO, delayed("o", 0, calls.clone()));

        assert_eq!(cache.len(), 2);
        assert_eq!(busy.await.unwrap().as_str(), "s");
        assert_eq!(cache.get(&keys.detail("slow")).unwrap().as_str(), "s");
    }
}
