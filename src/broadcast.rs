//! Fan-out of "these queries are stale, refetch them now" to the query store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::query::{tags, QueryClient, QueryFilter};

/// Shared refresh trigger handed to every action that mutates data.
///
/// `is_refreshing` is true while at least one refresh is running. Overlapping
/// refreshes of the same keys are coalesced by the store, so they never issue
/// duplicate requests.
#[derive(Clone)]
pub struct RefreshBroadcaster {
  client: QueryClient,
  active: Arc<AtomicUsize>,
}

impl RefreshBroadcaster {
  pub fn new(client: QueryClient) -> Self {
    Self {
      client,
      active: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn is_refreshing(&self) -> bool {
    self.active.load(Ordering::SeqCst) > 0
  }

  /// Invalidate every query under `tag` and wait for the observed ones to
  /// refetch. Returns the number of refetched queries.
  pub async fn refresh_tagged(&self, tag: &str) -> usize {
    let _active = ActiveGuard::enter(&self.active);
    let refetched = self.client.invalidate_and_wait(&QueryFilter::tag(tag)).await;
    info!(tag, refetched, "refreshed tagged queries");
    refetched
  }

  /// Refresh one event's participants, or every participant list.
  pub async fn refresh_participants(&self, event_uid: Option<&str>) -> usize {
    match event_uid {
      Some(uid) => self.refresh_tagged(&tags::participants_of(uid)).await,
      None => self.refresh_tagged(tags::PARTICIPANTS).await,
    }
  }
}

/// Holds the refreshing flag up until dropped, including on cancellation.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
  fn enter(counter: &'a AtomicUsize) -> Self {
    counter.fetch_add(1, Ordering::SeqCst);
    Self(counter)
  }
}

impl Drop for ActiveGuard<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::FetchError;
  use crate::query::{QueryKey, QueryObserver, QueryOptions};
  use std::sync::atomic::AtomicU32;
  use std::sync::Mutex;
  use std::time::Duration;

  /// In-memory roster standing in for the upstream.
  #[derive(Clone, Default)]
  struct Roster {
    participants: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicU32>,
  }

  impl Roster {
    fn with(names: &[&str]) -> Self {
      let roster = Self::default();
      *roster.participants.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
      roster
    }

    fn fetcher(
      &self,
      delay: Duration,
    ) -> impl Fn() -> futures::future::BoxFuture<'static, Result<Vec<String>, FetchError>> + Send + Sync + 'static
    {
      use futures::FutureExt;
      let roster = self.clone();
      move || {
        let roster = roster.clone();
        async move {
          roster.calls.fetch_add(1, Ordering::SeqCst);
          tokio::time::sleep(delay).await;
          Ok(roster.participants.lock().unwrap().clone())
        }
        .boxed()
      }
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_delete_then_refresh_excludes_participant() {
    let client = QueryClient::new();
    let broadcaster = RefreshBroadcaster::new(client.clone());
    let roster = Roster::with(&["P1", "P2"]);
    let key = QueryKey::participants("E", "tok");

    let observer: QueryObserver<Vec<String>> =
      client.subscribe(&key, &QueryOptions::participants(), roster.fetcher(Duration::ZERO));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(observer.snapshot().unwrap().data.unwrap().len(), 2);

    roster.participants.lock().unwrap().retain(|p| p != "P1");
    assert_eq!(broadcaster.refresh_participants(Some("E")).await, 1);

    let data = observer.snapshot().unwrap().data.unwrap();
    assert_eq!(*data, vec!["P2".to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_flag_is_raised_while_any_refresh_runs() {
    let client = QueryClient::new();
    let broadcaster = RefreshBroadcaster::new(client.clone());
    let roster = Roster::with(&["P1"]);
    let key = QueryKey::participants("E", "tok");
    let _observer: QueryObserver<Vec<String>> =
      client.subscribe(&key, &QueryOptions::participants(), roster.fetcher(Duration::from_secs(1)));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!broadcaster.is_refreshing());

    let first = tokio::spawn({
      let b = broadcaster.clone();
      async move { b.refresh_tagged("participants").await }
    });
    let second = tokio::spawn({
      let b = broadcaster.clone();
      async move { b.refresh_tagged("participants-E").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(broadcaster.is_refreshing());

    assert_eq!(first.await.unwrap(), 1);
    assert_eq!(second.await.unwrap(), 1);
    assert!(!broadcaster.is_refreshing());
    // mount + one shared refetch
    assert_eq!(roster.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unobserved_entries_refetch_lazily() {
    let client = QueryClient::new();
    let broadcaster = RefreshBroadcaster::new(client.clone());
    let roster = Roster::with(&["P1"]);
    let key = QueryKey::participants("E", "tok");
    client
      .fetch_query(&key, &QueryOptions::participants(), roster.fetcher(Duration::ZERO))
      .await
      .unwrap();

    assert_eq!(broadcaster.refresh_participants(None).await, 0);
    assert_eq!(roster.calls.load(Ordering::SeqCst), 1);
    assert!(client.peek::<Vec<String>>(&key).unwrap().is_stale);
  }
}
