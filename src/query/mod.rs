//! Client-side query cache.
//!
//! Inspired by TanStack Query: a single [`QueryClient`] holds one entry per
//! [`QueryKey`], de-duplicates concurrent fetches of the same key, serves
//! stale data while revalidating in the background, retries failures with
//! exponential backoff and drops entries nobody has observed for a while.
//!
//! # Example
//!
//! ```ignore
//! let client = QueryClient::new();
//! let key = QueryKey::events(&token);
//! let api = proxy.clone();
//! let fetcher = move || {
//!     let api = api.clone();
//!     let token = token.clone();
//!     async move { api.fetch_events(&token).await }
//! };
//!
//! // In render: never blocks, starts a fetch when needed
//! match client.read(&key, &QueryOptions::events(), fetcher).state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(events) => render_events(&events),
//!     QueryState::Error(e) => render_error(&e),
//!     QueryState::Idle => {}
//! }
//! ```

mod client;
mod key;
mod options;

pub use client::{QueryClient, QueryObserver, QuerySnapshot};
pub use key::{tags, QueryFilter, QueryKey};
pub use options::QueryOptions;

/// The state of a query as seen by a view
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is fetching and has no data yet
  Loading,
  /// Data is available (possibly being revalidated)
  Success(T),
  /// Query failed with an error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}
