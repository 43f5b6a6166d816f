//! The process-wide query store.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::{hash_map, HashMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::key::{QueryFilter, QueryKey};
use super::options::QueryOptions;
use super::QueryState;
use crate::error::FetchError;

type AnyValue = Arc<dyn Any + Send + Sync>;
type FetchResult = Result<AnyValue, FetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;
type ErasedFetcher = Arc<dyn Fn() -> BoxFuture<'static, FetchResult> + Send + Sync>;

/// Lifecycle of an entry: `Idle → Fetching → Success | Error`, and back to
/// `Fetching` on any refetch. Staleness is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  Idle,
  Fetching,
  Success,
  Error,
}

struct PendingFetch {
  seq: u64,
  future: SharedFetch,
  /// Started by an invalidation, so already reflects it
  from_invalidation: bool,
}

struct Entry {
  status: QueryStatus,
  /// Last committed value, kept while a refetch is pending
  value: Option<AnyValue>,
  error: Option<FetchError>,
  updated_at: Option<Instant>,
  invalidated: bool,
  pending: Option<PendingFetch>,
  /// Latest sequence number issued for this key
  seq: u64,
  failure_count: u32,
  fetcher: ErasedFetcher,
  options: QueryOptions,
  observers: usize,
  unobserved_since: Option<Instant>,
  notify: watch::Sender<u64>,
}

impl Entry {
  fn new(fetcher: ErasedFetcher, options: QueryOptions, now: Instant) -> Self {
    let (notify, _) = watch::channel(0);
    Self {
      status: QueryStatus::Idle,
      value: None,
      error: None,
      updated_at: None,
      invalidated: false,
      pending: None,
      seq: 0,
      failure_count: 0,
      fetcher,
      options,
      observers: 0,
      unobserved_since: Some(now),
      notify,
    }
  }

  fn is_stale(&self, now: Instant) -> bool {
    self.invalidated
      || self
        .updated_at
        .map(|t| now.saturating_duration_since(t) >= self.options.stale_time)
        .unwrap_or(true)
  }

  /// Whether a read or mount should start a fetch.
  fn should_fetch(&self, now: Instant) -> bool {
    self.options.enabled
      && self.pending.is_none()
      && (matches!(self.status, QueryStatus::Idle | QueryStatus::Error) || self.is_stale(now))
  }

  /// Status to fall back to when a pending fetch is abandoned.
  fn settled_status(&self) -> QueryStatus {
    if self.value.is_some() {
      QueryStatus::Success
    } else if self.error.is_some() {
      QueryStatus::Error
    } else {
      QueryStatus::Idle
    }
  }

  fn touch(&mut self, now: Instant) {
    if self.observers == 0 {
      self.unobserved_since = Some(now);
    }
  }

  fn bump(&self) {
    self.notify.send_modify(|version| *version += 1);
  }
}

#[derive(Default)]
struct Store {
  entries: HashMap<QueryKey, Entry>,
  /// tag -> keys carrying that tag
  tags: HashMap<String, HashSet<QueryKey>>,
}

impl Store {
  fn keys_matching(&self, filter: &QueryFilter) -> Vec<QueryKey> {
    match filter {
      QueryFilter::All => self.entries.keys().cloned().collect(),
      QueryFilter::Key(key) => self
        .entries
        .contains_key(key)
        .then(|| key.clone())
        .into_iter()
        .collect(),
      QueryFilter::Tag(tag) => self
        .tags
        .get(tag)
        .map(|keys| keys.iter().cloned().collect())
        .unwrap_or_default(),
    }
  }

  fn remove(&mut self, key: &QueryKey) {
    self.entries.remove(key);
    for tag in key.tags() {
      if let Some(keys) = self.tags.get_mut(&tag) {
        keys.remove(key);
        if keys.is_empty() {
          self.tags.remove(&tag);
        }
      }
    }
  }
}

struct Inner {
  store: Mutex<Store>,
}

/// Shared query store. Construct one per process (or per test) and pass
/// clones to every reader and writer.
///
/// Fetches run on spawned tokio tasks, so methods that may start a fetch
/// must be called from within a tokio runtime. A fetch that completes after
/// every caller went away still updates the cache.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl Default for QueryClient {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryClient {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Inner {
        store: Mutex::new(Store::default()),
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Store> {
    // Entries stay consistent across a panic in another holder
    self.inner.store.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Synchronous read for rendering.
  ///
  /// Creates the entry on first use and starts a background fetch when the
  /// entry is idle, errored, stale or invalidated. The committed value is
  /// returned meanwhile (stale-while-revalidate).
  pub fn read<T, F, Fut>(&self, key: &QueryKey, options: &QueryOptions, fetcher: F) -> QuerySnapshot<T>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let now = Instant::now();
    let mut store = self.lock();
    let entry = register(&mut store, key, options, erase(fetcher), now);

    if entry.should_fetch(now) {
      self.start_fetch(entry, key, false);
    }
    snapshot(entry, now)
  }

  /// Resolve the key to data, fetching only when the cached value is
  /// missing, stale or invalidated. Joins an in-flight fetch if present.
  pub async fn fetch_query<T, F, Fut>(
    &self,
    key: &QueryKey,
    options: &QueryOptions,
    fetcher: F,
  ) -> Result<Arc<T>, FetchError>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let future = {
      let now = Instant::now();
      let mut store = self.lock();
      let entry = register(&mut store, key, options, erase(fetcher), now);

      if let Some(value) = entry.value.as_ref().filter(|_| !entry.is_stale(now)) {
        return downcast(value.clone());
      }
      let pending = entry.pending.as_ref().map(|p| p.future.clone());
      match pending {
        Some(future) => future,
        None => self.start_fetch(entry, key, false),
      }
    };

    downcast(future.await?)
  }

  /// Always fetch the key, regardless of freshness. An in-flight fetch for
  /// the same key is joined instead of issuing a second request.
  pub async fn refetch(&self, key: &QueryKey) -> Result<(), FetchError> {
    let future = {
      let mut store = self.lock();
      let Some(entry) = store.entries.get_mut(key) else {
        debug!(?key, "refetch of unknown key ignored");
        return Ok(());
      };
      let pending = entry.pending.as_ref().map(|p| p.future.clone());
      match pending {
        Some(future) => future,
        None => self.start_fetch(entry, key, false),
      }
    };

    future.await.map(|_| ())
  }

  /// Mark matching entries invalidated. Observed entries refetch right away,
  /// the rest on their next read. Returns the number of entries touched.
  pub fn invalidate(&self, filter: &QueryFilter) -> usize {
    let mut store = self.lock();
    let keys = store.keys_matching(filter);
    for key in &keys {
      self.invalidate_key(&mut store, key);
    }
    keys.len()
  }

  /// Like [`invalidate`](Self::invalidate), then wait for the refetches it
  /// started. Failures stay on their entries; returns how many refetched.
  pub async fn invalidate_and_wait(&self, filter: &QueryFilter) -> usize {
    let refetches: Vec<SharedFetch> = {
      let mut store = self.lock();
      let keys = store.keys_matching(filter);
      let refetches: Vec<SharedFetch> = keys
        .iter()
        .filter_map(|key| self.invalidate_key(&mut store, key))
        .collect();
      refetches
    };

    let count = refetches.len();
    futures::future::join_all(refetches).await;
    count
  }

  fn invalidate_key(&self, store: &mut Store, key: &QueryKey) -> Option<SharedFetch> {
    let entry = store.entries.get_mut(key)?;
    entry.invalidated = true;

    if entry.observers > 0 && entry.options.enabled {
      // Overlapping invalidations share one refetch. Any other in-flight
      // fetch is superseded: it may predate the mutation behind this call.
      if let Some(pending) = entry.pending.as_ref().filter(|p| p.from_invalidation) {
        return Some(pending.future.clone());
      }
      return Some(self.start_fetch(entry, key, true));
    }

    if entry.pending.take().is_some() {
      // Orphan the in-flight fetch so its late result is discarded
      entry.seq += 1;
      entry.status = entry.settled_status();
    }
    entry.bump();
    None
  }

  /// Register an observer (a mounted view). Mounting refetches stale data
  /// when `refetch_on_mount` is set; dropping the observer starts the
  /// entry's garbage-collection clock.
  pub fn subscribe<T, F, Fut>(&self, key: &QueryKey, options: &QueryOptions, fetcher: F) -> QueryObserver<T>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let now = Instant::now();
    let mut store = self.lock();
    let entry = register(&mut store, key, options, erase(fetcher), now);
    entry.observers += 1;
    entry.unobserved_since = None;
    let changes = entry.notify.subscribe();

    if options.refetch_on_mount && entry.should_fetch(now) {
      self.start_fetch(entry, key, false);
    }

    QueryObserver {
      client: self.clone(),
      key: key.clone(),
      changes,
      _marker: PhantomData,
    }
  }

  fn unsubscribe(&self, key: &QueryKey) {
    let now = Instant::now();
    let mut store = self.lock();
    if let Some(entry) = store.entries.get_mut(key) {
      entry.observers = entry.observers.saturating_sub(1);
      if entry.observers == 0 {
        entry.unobserved_since = Some(now);
      }
    }
  }

  /// The window regained focus: refetch stale, observed entries that opted in.
  pub fn on_window_focus(&self) -> usize {
    let now = Instant::now();
    let mut store = self.lock();
    let keys: Vec<QueryKey> = store
      .entries
      .iter()
      .filter(|(_, e)| e.observers > 0 && e.options.refetch_on_window_focus && e.should_fetch(now))
      .map(|(k, _)| k.clone())
      .collect();

    for key in &keys {
      if let Some(entry) = store.entries.get_mut(key) {
        self.start_fetch(entry, key, false);
      }
    }
    keys.len()
  }

  /// Current state of a key without triggering anything.
  pub fn peek<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<QuerySnapshot<T>> {
    let store = self.lock();
    store.entries.get(key).map(|e| snapshot(e, Instant::now()))
  }

  /// Number of entries currently cached.
  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drop entries that have been unobserved for longer than their `gc_time`
  /// and have no fetch in flight. Returns the number removed.
  pub fn gc(&self) -> usize {
    let now = Instant::now();
    let mut store = self.lock();
    let expired: Vec<QueryKey> = store
      .entries
      .iter()
      .filter(|(_, e)| {
        e.observers == 0
          && e.pending.is_none()
          && e
            .unobserved_since
            .map(|t| now.saturating_duration_since(t) >= e.options.gc_time)
            .unwrap_or(false)
      })
      .map(|(k, _)| k.clone())
      .collect();

    for key in &expired {
      debug!(?key, "garbage-collecting query");
      store.remove(key);
    }
    expired.len()
  }

  /// Run [`gc`](Self::gc) periodically until the client is dropped.
  pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(&self.inner);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else { break };
        QueryClient { inner }.gc();
      }
    })
  }

  /// Start a new fetch for `key`, superseding any in-flight one.
  fn start_fetch(&self, entry: &mut Entry, key: &QueryKey, from_invalidation: bool) -> SharedFetch {
    entry.seq += 1;
    let seq = entry.seq;
    let fetcher = entry.fetcher.clone();
    let options = entry.options.clone();
    let weak = Arc::downgrade(&self.inner);
    let task_key = key.clone();

    debug!(?key, seq, "starting fetch");
    let future = async move {
      let (result, failures) = fetch_with_retry(&fetcher, &options, &task_key).await;
      if let Some(inner) = weak.upgrade() {
        QueryClient { inner }.commit(&task_key, seq, result.clone(), failures);
      }
      result
    }
    .boxed()
    .shared();

    entry.pending = Some(PendingFetch {
      seq,
      future: future.clone(),
      from_invalidation,
    });
    entry.status = QueryStatus::Fetching;
    entry.bump();

    // Drive the fetch even if every waiter goes away
    tokio::spawn(future.clone());
    future
  }

  /// Apply a completed fetch, unless a newer fetch was issued meanwhile.
  fn commit(&self, key: &QueryKey, seq: u64, result: FetchResult, failures: u32) {
    let now = Instant::now();
    let mut store = self.lock();
    let Some(entry) = store.entries.get_mut(key) else {
      return;
    };
    if seq != entry.seq {
      debug!(?key, seq, latest = entry.seq, "discarding superseded fetch result");
      return;
    }

    entry.pending = None;
    match result {
      Ok(value) => {
        entry.value = Some(value);
        entry.error = None;
        entry.status = QueryStatus::Success;
        entry.updated_at = Some(now);
        entry.invalidated = false;
        entry.failure_count = 0;
      }
      Err(error) => {
        warn!(?key, %error, failures, "query failed");
        entry.error = Some(error);
        entry.status = QueryStatus::Error;
        entry.failure_count = failures;
      }
    }
    entry.touch(now);
    entry.bump();
  }
}

/// Run the fetcher, retrying retryable failures with exponential backoff.
/// Returns the final result and the number of failed attempts.
async fn fetch_with_retry(
  fetcher: &ErasedFetcher,
  options: &QueryOptions,
  key: &QueryKey,
) -> (FetchResult, u32) {
  let mut failures = 0u32;
  loop {
    match fetcher().await {
      Ok(value) => return (Ok(value), failures),
      Err(error) => {
        failures += 1;
        if failures > options.retry || !error.is_retryable() {
          return (Err(error), failures);
        }
        let delay = options.retry_delay(failures - 1);
        debug!(?key, %error, attempt = failures, ?delay, "retrying fetch");
        tokio::time::sleep(delay).await;
      }
    }
  }
}

fn register<'a>(
  store: &'a mut Store,
  key: &QueryKey,
  options: &QueryOptions,
  fetcher: ErasedFetcher,
  now: Instant,
) -> &'a mut Entry {
  if !store.entries.contains_key(key) {
    for tag in key.tags() {
      store.tags.entry(tag).or_default().insert(key.clone());
    }
  }

  match store.entries.entry(key.clone()) {
    hash_map::Entry::Occupied(occupied) => {
      let entry = occupied.into_mut();
      // Latest registration wins, like observer options in a render pass
      entry.fetcher = fetcher;
      entry.options = options.clone();
      entry.touch(now);
      entry
    }
    hash_map::Entry::Vacant(vacant) => vacant.insert(Entry::new(fetcher, options.clone(), now)),
  }
}

fn erase<T, F, Fut>(fetcher: F) -> ErasedFetcher
where
  T: Send + Sync + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
  Arc::new(move || {
    let future = fetcher();
    async move { future.await.map(|value| Arc::new(value) as AnyValue) }.boxed()
  })
}

fn downcast<T: Send + Sync + 'static>(value: AnyValue) -> Result<Arc<T>, FetchError> {
  value.downcast::<T>().map_err(|_| {
    // Two call sites used one key for different payload types
    FetchError::Transport("Cached value has an unexpected type".to_string())
  })
}

fn snapshot<T: Send + Sync + 'static>(entry: &Entry, now: Instant) -> QuerySnapshot<T> {
  QuerySnapshot {
    status: entry.status,
    data: entry
      .value
      .as_ref()
      .and_then(|v| v.clone().downcast::<T>().ok()),
    error: entry.error.clone(),
    is_fetching: entry.pending.is_some(),
    is_stale: entry.is_stale(now),
    updated_at: entry.updated_at,
    failure_count: entry.failure_count,
  }
}

/// Point-in-time view of a cache entry.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
  pub status: QueryStatus,
  /// Last committed value; present during a background refetch
  pub data: Option<Arc<T>>,
  pub error: Option<FetchError>,
  pub is_fetching: bool,
  pub is_stale: bool,
  pub updated_at: Option<Instant>,
  pub failure_count: u32,
}

impl<T> QuerySnapshot<T> {
  /// Loading means fetching with nothing to show yet.
  pub fn is_loading(&self) -> bool {
    self.is_fetching && self.data.is_none()
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  pub fn state(&self) -> QueryState<Arc<T>> {
    match (&self.status, &self.data, &self.error) {
      (QueryStatus::Error, _, Some(error)) => QueryState::Error(error.to_string()),
      (_, Some(data), _) => QueryState::Success(data.clone()),
      (QueryStatus::Fetching, None, _) => QueryState::Loading,
      _ => QueryState::Idle,
    }
  }
}

/// A mounted view's subscription to one key. Dropping it unmounts.
pub struct QueryObserver<T> {
  client: QueryClient,
  key: QueryKey,
  changes: watch::Receiver<u64>,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn snapshot(&self) -> Option<QuerySnapshot<T>> {
    self.client.peek(&self.key)
  }

  /// Wait until the entry changes (fetch started, committed or invalidated).
  /// Returns `false` once the entry has been removed.
  pub async fn changed(&mut self) -> bool {
    self.changes.changed().await.is_ok()
  }

  pub async fn refetch(&self) -> Result<(), FetchError> {
    self.client.refetch(&self.key).await
  }
}

impl<T> Drop for QueryObserver<T> {
  fn drop(&mut self) {
    self.client.unsubscribe(&self.key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  type Calls = Arc<AtomicU32>;

  /// Fetcher returning the call number after `delay`.
  fn counting(calls: &Calls, delay: Duration) -> impl Fn() -> BoxFuture<'static, Result<u32, FetchError>> + Send + Sync + 'static {
    let calls = calls.clone();
    move || {
      let calls = calls.clone();
      async move {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(delay).await;
        Ok(n)
      }
      .boxed()
    }
  }

  fn options() -> QueryOptions {
    QueryOptions::events()
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_reads_share_one_fetch() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::participants("E123", "tok");
    let opts = options();

    let (a, b) = tokio::join!(
      client.fetch_query(&key, &opts, counting(&calls, Duration::from_millis(50))),
      client.fetch_query(&key, &opts, counting(&calls, Duration::from_millis(50))),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_value_is_served_without_fetch() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::events("tok");

    let first = client
      .fetch_query(&key, &options(), counting(&calls, Duration::ZERO))
      .await
      .unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    let second = client
      .fetch_query(&key, &options(), counting(&calls, Duration::ZERO))
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_read_serves_old_value_while_revalidating() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::events("tok");
    client
      .fetch_query(&key, &options(), counting(&calls, Duration::from_millis(10)))
      .await
      .unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;
    let snap: QuerySnapshot<u32> = client.read(&key, &options(), counting(&calls, Duration::from_millis(10)));
    assert_eq!(snap.data.as_deref(), Some(&1));
    assert!(snap.is_fetching);
    assert!(snap.is_stale);
    assert!(!snap.is_loading());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let snap = client.peek::<u32>(&key).unwrap();
    assert_eq!(snap.data.as_deref(), Some(&2));
    assert_eq!(snap.status, QueryStatus::Success);
    assert!(!snap.is_stale);
  }

  #[tokio::test(start_paused = true)]
  async fn test_read_on_absent_key_starts_fetch() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::events("tok");

    let snap: QuerySnapshot<u32> = client.read(&key, &options(), counting(&calls, Duration::from_millis(10)));
    assert_eq!(snap.status, QueryStatus::Fetching);
    assert!(snap.state().is_loading());

    // A second read joins the pending fetch
    let _: QuerySnapshot<u32> = client.read(&key, &options(), counting(&calls, Duration::from_millis(10)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_then_read_fetches_again() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::participants("E1", "tok");
    client
      .fetch_query(&key, &options(), counting(&calls, Duration::ZERO))
      .await
      .unwrap();

    assert_eq!(client.invalidate(&QueryFilter::tag("participants-E1")), 1);
    // Unobserved: nothing fetched until the next read
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let value = client
      .fetch_query(&key, &options(), counting(&calls, Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(*value, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidation_discards_in_flight_result() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::participants("E1", "tok");

    // Slow fetch in flight when the invalidation lands
    let slow = {
      let client = client.clone();
      let key = key.clone();
      let fetcher = counting(&calls, Duration::from_secs(5));
      tokio::spawn(async move { client.fetch_query(&key, &options(), fetcher).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    client.invalidate(&QueryFilter::Key(key.clone()));

    let fresh = client
      .fetch_query(&key, &options(), counting(&calls, Duration::from_secs(1)))
      .await
      .unwrap();
    assert_eq!(*fresh, 2);

    // The old waiter still gets its answer, but it never lands in the cache
    assert_eq!(*slow.await.unwrap().unwrap(), 1);
    assert_eq!(client.peek::<u32>(&key).unwrap().data.as_deref(), Some(&2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_refetch_coalesces_and_is_idempotent() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::events("tok");
    client
      .fetch_query(&key, &options(), counting(&calls, Duration::from_millis(10)))
      .await
      .unwrap();

    let (a, b) = tokio::join!(client.refetch(&key), client.refetch(&key));
    a.unwrap();
    b.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.peek::<u32>(&key).unwrap().data.as_deref(), Some(&2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failures_retry_with_backoff_then_settle() {
    let client = QueryClient::new();
    let attempts: Arc<Mutex<Vec<Instant>>> = Arc::default();
    let key = QueryKey::events("tok");
    let fetcher = {
      let attempts = attempts.clone();
      move || {
        attempts.lock().unwrap().push(Instant::now());
        let n = attempts.lock().unwrap().len();
        async move { Err::<u32, _>(FetchError::transport(&format!("events ({})", n))) }
      }
    };

    let err = client.fetch_query(&key, &options(), fetcher).await.unwrap_err();
    assert_eq!(err.to_string(), "Failed to fetch events (4)");

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 4);
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps[0] >= Duration::from_secs(1));
    assert!(gaps[1] >= Duration::from_secs(2));
    assert!(gaps[2] >= Duration::from_secs(4));

    let snap = client.peek::<u32>(&key).unwrap();
    assert_eq!(snap.status, QueryStatus::Error);
    assert_eq!(snap.failure_count, 4);
    assert_eq!(snap.state().error(), Some("Failed to fetch events (4)"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_unauthorized_is_not_retried() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::events("");
    let fetcher = {
      let calls = calls.clone();
      move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(FetchError::unauthorized()) }
      }
    };

    assert!(client.fetch_query(&key, &options(), fetcher).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_error_keeps_previous_data() {
    let client = QueryClient::new();
    let key = QueryKey::events("tok");
    client
      .fetch_query(&key, &options(), || async { Ok::<_, FetchError>(7u32) })
      .await
      .unwrap();

    client.invalidate(&QueryFilter::All);
    let failing = || async { Err::<u32, _>(FetchError::Unauthorized("Token is missing".into())) };
    assert!(client.fetch_query(&key, &options(), failing).await.is_err());

    let snap = client.peek::<u32>(&key).unwrap();
    assert_eq!(snap.data.as_deref(), Some(&7));
    assert!(snap.is_error());
  }

  #[tokio::test(start_paused = true)]
  async fn test_observed_entries_refetch_on_invalidate() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::participants("E1", "tok");

    let mut observer: QueryObserver<u32> =
      client.subscribe(&key, &options(), counting(&calls, Duration::from_millis(10)));
    assert!(observer.changed().await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(observer.snapshot().unwrap().data.as_deref(), Some(&1));

    let refetched = client.invalidate_and_wait(&QueryFilter::tag("participants")).await;
    assert_eq!(refetched, 1);
    assert_eq!(observer.snapshot().unwrap().data.as_deref(), Some(&2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_mount_does_not_refetch_fresh_data() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::events("tok");
    client
      .fetch_query(&key, &options(), counting(&calls, Duration::ZERO))
      .await
      .unwrap();

    let _observer: QueryObserver<u32> = client.subscribe(&key, &options(), counting(&calls, Duration::ZERO));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_window_focus_respects_per_resource_option() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let events = QueryKey::events("tok");
    let participants = QueryKey::participants("E1", "tok");

    let _e: QueryObserver<u32> = client.subscribe(&events, &QueryOptions::events(), counting(&calls, Duration::ZERO));
    let _p: QueryObserver<u32> =
      client.subscribe(&participants, &QueryOptions::participants(), counting(&calls, Duration::ZERO));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(client.on_window_focus(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_gc_removes_only_unobserved_entries() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let kept = QueryKey::events("a");
    let dropped = QueryKey::events("b");

    let _observer: QueryObserver<u32> = client.subscribe(&kept, &options(), counting(&calls, Duration::ZERO));
    {
      let _gone: QueryObserver<u32> = client.subscribe(&dropped, &options(), counting(&calls, Duration::ZERO));
      tokio::time::sleep(Duration::from_millis(1)).await;
    }

    tokio::time::advance(Duration::from_secs(4 * 60)).await;
    assert_eq!(client.gc(), 0);
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(client.gc(), 1);
    assert!(client.peek::<u32>(&kept).is_some());
    assert!(client.peek::<u32>(&dropped).is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_spawned_gc_collects_in_background() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::events("a");
    {
      let _gone: QueryObserver<u32> = client.subscribe(&key, &options(), counting(&calls, Duration::ZERO));
      tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let gc = client.spawn_gc(Duration::from_secs(60));
    tokio::time::advance(Duration::from_secs(6 * 60)).await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(client.is_empty());
    gc.abort();
  }

  #[tokio::test(start_paused = true)]
  async fn test_disabled_query_never_fetches() {
    let client = QueryClient::new();
    let calls = Calls::default();
    let key = QueryKey::participants("", "");

    let snap: QuerySnapshot<u32> = client.read(
      &key,
      &options().enabled(false),
      counting(&calls, Duration::ZERO),
    );
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(snap.status, QueryStatus::Idle);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }
}
