//! View-facing accessors over the query store: one per resource, each bound
//! to a store, a proxy client and the resource's freshness policy.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::info;

use crate::api::client::UpstreamClient;
use crate::api::envelope::Envelope;
use crate::api::types::{EventData, ParticipantData, UpdateParticipant};
use crate::broadcast::RefreshBroadcaster;
use crate::error::FetchError;
use crate::query::{QueryClient, QueryFilter, QueryKey, QueryObserver, QueryOptions, QuerySnapshot};

type Fetcher<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

/// What a view renders from.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
  pub data: Option<Arc<T>>,
  pub is_loading: bool,
  pub is_error: bool,
  pub error_message: Option<String>,
}

impl<T> QueryResult<T> {
  fn from_snapshot(snapshot: QuerySnapshot<T>) -> Self {
    Self {
      is_loading: snapshot.is_loading(),
      is_error: snapshot.is_error(),
      error_message: snapshot.error.as_ref().map(ToString::to_string),
      data: snapshot.data,
    }
  }

  fn disabled() -> Self {
    Self {
      data: None,
      is_loading: false,
      is_error: false,
      error_message: None,
    }
  }
}

impl<E> QueryResult<Vec<E>> {
  /// The list, or an empty slice before the first successful fetch.
  pub fn items(&self) -> &[E] {
    self.data.as_deref().map(Vec::as_slice).unwrap_or(&[])
  }
}

/// The organizer's event list.
#[derive(Clone)]
pub struct EventsQuery {
  client: QueryClient,
  api: UpstreamClient,
  options: QueryOptions,
}

impl EventsQuery {
  pub fn new(client: QueryClient, api: UpstreamClient, options: QueryOptions) -> Self {
    Self {
      client,
      api,
      options,
    }
  }

  fn fetcher(&self, token: &str) -> Fetcher<Vec<EventData>> {
    let api = self.api.clone();
    let token = token.to_string();
    Box::new(move || {
      let api = api.clone();
      let token = token.clone();
      async move { api.fetch_events(&token).await }.boxed()
    })
  }

  /// Current events for rendering. Without a token the query stays disabled.
  pub fn result(&self, token: Option<&str>) -> QueryResult<Vec<EventData>> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
      return QueryResult::disabled();
    };
    let key = QueryKey::events(token);
    QueryResult::from_snapshot(self.client.read(&key, &self.options, self.fetcher(token)))
  }

  /// Mount a view on the events of `token`.
  pub fn subscribe(&self, token: &str) -> QueryObserver<Vec<EventData>> {
    self
      .client
      .subscribe(&QueryKey::events(token), &self.options, self.fetcher(token))
  }

  /// Resolve the events, using the cache while fresh.
  pub async fn fetch(&self, token: &str) -> Result<Arc<Vec<EventData>>, FetchError> {
    self
      .client
      .fetch_query(&QueryKey::events(token), &self.options, self.fetcher(token))
      .await
  }

  /// Mark the events stale; observed views refetch immediately.
  pub fn refresh(&self, token: &str) -> usize {
    self.client.invalidate(&QueryFilter::Key(QueryKey::events(token)))
  }

  pub async fn refetch(&self, token: &str) -> Result<(), FetchError> {
    self.client.refetch(&QueryKey::events(token)).await
  }
}

/// One event's participant roster.
#[derive(Clone)]
pub struct ParticipantsQuery {
  client: QueryClient,
  api: UpstreamClient,
  options: QueryOptions,
  broadcaster: RefreshBroadcaster,
}

impl ParticipantsQuery {
  pub fn new(
    client: QueryClient,
    api: UpstreamClient,
    options: QueryOptions,
    broadcaster: RefreshBroadcaster,
  ) -> Self {
    Self {
      client,
      api,
      options,
      broadcaster,
    }
  }

  fn fetcher(&self, token: &str, event_uid: &str) -> Fetcher<Vec<ParticipantData>> {
    let api = self.api.clone();
    let token = token.to_string();
    let event_uid = event_uid.to_string();
    Box::new(move || {
      let api = api.clone();
      let token = token.clone();
      let event_uid = event_uid.clone();
      async move { api.fetch_participants(&token, &event_uid).await }.boxed()
    })
  }

  /// Current roster for rendering. Disabled without a token or event uid,
  /// or when `auto_fetch` is off. Reports loading while a broadcast refresh
  /// is running.
  pub fn result(
    &self,
    token: Option<&str>,
    event_uid: Option<&str>,
    auto_fetch: bool,
  ) -> QueryResult<Vec<ParticipantData>> {
    let (Some(token), Some(event_uid)) = (
      token.filter(|t| !t.is_empty()),
      event_uid.filter(|e| !e.is_empty()),
    ) else {
      return QueryResult::disabled();
    };

    let key = QueryKey::participants(event_uid, token);
    let options = self.options.clone().enabled(auto_fetch);
    let mut result =
      QueryResult::from_snapshot(self.client.read(&key, &options, self.fetcher(token, event_uid)));
    result.is_loading |= self.broadcaster.is_refreshing();
    result
  }

  pub fn subscribe(&self, token: &str, event_uid: &str) -> QueryObserver<Vec<ParticipantData>> {
    self.client.subscribe(
      &QueryKey::participants(event_uid, token),
      &self.options,
      self.fetcher(token, event_uid),
    )
  }

  pub async fn fetch(&self, token: &str, event_uid: &str) -> Result<Arc<Vec<ParticipantData>>, FetchError> {
    self
      .client
      .fetch_query(
        &QueryKey::participants(event_uid, token),
        &self.options,
        self.fetcher(token, event_uid),
      )
      .await
  }

  pub fn refresh(&self, token: &str, event_uid: &str) -> usize {
    self
      .client
      .invalidate(&QueryFilter::Key(QueryKey::participants(event_uid, token)))
  }

  pub async fn refetch(&self, token: &str, event_uid: &str) -> Result<(), FetchError> {
    self
      .client
      .refetch(&QueryKey::participants(event_uid, token))
      .await
  }
}

/// Participant mutations. A successful mutation broadcasts a refresh of the
/// event's participant queries before returning.
#[derive(Clone)]
pub struct ParticipantActions {
  api: UpstreamClient,
  broadcaster: RefreshBroadcaster,
}

impl ParticipantActions {
  pub fn new(api: UpstreamClient, broadcaster: RefreshBroadcaster) -> Self {
    Self { api, broadcaster }
  }

  pub async fn delete(
    &self,
    token: &str,
    event_uid: &str,
    participant_uid: &str,
  ) -> Result<Envelope<serde_json::Value>, FetchError> {
    let envelope = self
      .api
      .delete_participant(token, event_uid, participant_uid)
      .await?;
    info!(event_uid, participant_uid, "participant deleted");
    self.broadcaster.refresh_participants(Some(event_uid)).await;
    Ok(envelope)
  }

  pub async fn update(
    &self,
    token: &str,
    event_uid: &str,
    participant_uid: &str,
    update: &UpdateParticipant,
  ) -> Result<Envelope<serde_json::Value>, FetchError> {
    let envelope = self
      .api
      .update_participant(token, event_uid, participant_uid, update)
      .await?;
    self.broadcaster.refresh_participants(Some(event_uid)).await;
    Ok(envelope)
  }
}
