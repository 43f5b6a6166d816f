//! Cache layer that memoizes upstream calls in front of a storage backend.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::storage::{CacheStorage, CachedEntry};
use super::traits::{CacheDirective, CacheResult};
use crate::error::FetchError;

type SharedCall = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

struct InFlight {
  id: u64,
  tags: Vec<String>,
  future: SharedCall,
}

#[derive(Default)]
struct State {
  inflight: HashMap<String, InFlight>,
  /// tag -> number of invalidations seen so far
  generations: HashMap<String, u64>,
  next_id: u64,
}

impl State {
  fn generation(&self, tag: &str) -> u64 {
    self.generations.get(tag).copied().unwrap_or(0)
  }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
  state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Memoizes calls by function name and arguments.
///
/// Concurrent misses for the same key share one upstream call. Only
/// successful results are stored, and a result whose tags were invalidated
/// while it was being fetched is returned to its callers but not stored.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  state: Arc<Mutex<State>>,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      state: Arc::new(Mutex::new(State::default())),
    }
  }

  /// Return the cached result of `function(args)`, or run `fetch` and cache
  /// its success under `directive`.
  pub async fn cached<A, T, F, Fut>(
    &self,
    function: &str,
    args: &A,
    directive: &CacheDirective,
    fetch: F,
  ) -> Result<CacheResult<T>, FetchError>
  where
    A: Serialize + ?Sized,
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let key = cache_key(function, args)?;

    match self.storage.get(&key) {
      Ok(Some(entry)) if !entry.is_expired(Instant::now()) => {
        match serde_json::from_value::<T>(entry.value) {
          Ok(data) => {
            debug!(function, "server cache hit");
            return Ok(CacheResult::from_cache(data, entry.cached_at));
          }
          Err(e) => warn!(function, error = %e, "cached value no longer decodes"),
        }
      }
      Ok(_) => {}
      Err(e) => warn!(function, error = %e, "cache storage read failed"),
    }

    let value = self.join_or_start(&key, directive, fetch).await?;
    let data = serde_json::from_value(value)
      .map_err(|_| FetchError::Transport("Cached value has an unexpected type".to_string()))?;
    Ok(CacheResult::from_network(data))
  }

  fn join_or_start<T, F, Fut>(&self, key: &str, directive: &CacheDirective, fetch: F) -> SharedCall
  where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let mut state = lock(&self.state);
    if let Some(inflight) = state.inflight.get(key) {
      debug!(key, "joining in-flight call");
      return inflight.future.clone();
    }

    state.next_id += 1;
    let id = state.next_id;
    let seen: Vec<u64> = directive.tags.iter().map(|t| state.generation(t)).collect();

    let call = fetch();
    let storage = Arc::clone(&self.storage);
    let shared_state = Arc::clone(&self.state);
    let key_owned = key.to_string();
    let directive_owned = directive.clone();

    let future = async move {
      let result = call.await.and_then(|data| {
        serde_json::to_value(data)
          .map_err(|_| FetchError::Transport("Failed to serialize cached value".to_string()))
      });

      let mut state = lock(&shared_state);
      if state.inflight.get(&key_owned).map(|f| f.id) == Some(id) {
        state.inflight.remove(&key_owned);
      }

      if let Ok(value) = &result {
        let raced = directive_owned
          .tags
          .iter()
          .zip(&seen)
          .any(|(tag, generation)| state.generation(tag) != *generation);
        if raced {
          debug!(key = %key_owned, "dropping result that raced an invalidation");
        } else {
          let entry = CachedEntry {
            value: value.clone(),
            tags: directive_owned.tags.clone(),
            cached_at: chrono::Utc::now(),
            expires_at: directive_owned.life.duration().map(|d| Instant::now() + d),
          };
          if let Err(e) = storage.put(&key_owned, entry) {
            warn!(key = %key_owned, error = %e, "cache storage write failed");
          }
        }
      }
      result
    }
    .boxed()
    .shared();

    state.inflight.insert(
      key.to_string(),
      InFlight {
        id,
        tags: directive.tags.clone(),
        future: future.clone(),
      },
    );

    // Finish and store even if the requesting handler is dropped
    tokio::spawn(future.clone());
    future
  }

  /// Drop every entry carrying `tag`, and make in-flight calls carrying it
  /// unjoinable and unstorable. Returns the number of entries removed.
  pub fn invalidate_by_tag(&self, tag: &str) -> usize {
    let mut state = lock(&self.state);
    *state.generations.entry(tag.to_string()).or_default() += 1;
    state.inflight.retain(|_, f| !f.tags.iter().any(|t| t == tag));

    match self.storage.invalidate_tag(tag) {
      Ok(removed) => {
        info!(tag, removed, "invalidated server cache tag");
        removed
      }
      Err(e) => {
        warn!(tag, error = %e, "cache storage invalidation failed");
        0
      }
    }
  }

  /// Remove expired entries. Returns the number removed.
  pub fn purge_expired(&self) -> usize {
    match self.storage.purge_expired(Instant::now()) {
      Ok(removed) => removed,
      Err(e) => {
        warn!(error = %e, "cache purge failed");
        0
      }
    }
  }

  /// Run [`purge_expired`](Self::purge_expired) periodically.
  pub fn spawn_purge(&self, interval: Duration) -> JoinHandle<()> {
    let layer = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let removed = layer.purge_expired();
        if removed > 0 {
          debug!(removed, "purged expired server cache entries");
        }
      }
    })
  }

  pub fn len(&self) -> usize {
    self.storage.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      state: Arc::clone(&self.state),
    }
  }
}

/// `<function>:<sha256 of the JSON-encoded arguments>`.
fn cache_key<A: Serialize + ?Sized>(function: &str, args: &A) -> Result<String, FetchError> {
  let encoded = serde_json::to_vec(args)
    .map_err(|_| FetchError::InvalidInput(format!("Arguments of {} are not serializable", function)))?;
  Ok(format!("{}:{}", function, hex::encode(Sha256::digest(&encoded))))
}
