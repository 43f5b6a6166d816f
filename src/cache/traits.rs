//! Core types for the server-side cache.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Named lifetime class of a cached call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLife {
  Seconds,
  /// Five minutes
  Minutes,
  Hours,
  Days,
  Weeks,
  /// Never expires on its own; only tag invalidation removes it
  Max,
  Custom(Duration),
}

impl CacheLife {
  /// How long an entry stays servable. `None` means until invalidated.
  pub fn duration(&self) -> Option<Duration> {
    match self {
      CacheLife::Seconds => Some(Duration::from_secs(1)),
      CacheLife::Minutes => Some(Duration::from_secs(5 * 60)),
      CacheLife::Hours => Some(Duration::from_secs(60 * 60)),
      CacheLife::Days => Some(Duration::from_secs(24 * 60 * 60)),
      CacheLife::Weeks => Some(Duration::from_secs(7 * 24 * 60 * 60)),
      CacheLife::Max => None,
      CacheLife::Custom(d) => Some(*d),
    }
  }
}

/// Tags and lifetime attached to a cached call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirective {
  pub tags: Vec<String>,
  pub life: CacheLife,
}

impl CacheDirective {
  pub fn new(life: CacheLife) -> Self {
    Self {
      tags: Vec::new(),
      life,
    }
  }

  pub fn tag(mut self, tag: impl Into<String>) -> Self {
    self.tags.push(tag.into());
    self
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched by this call or by a concurrent call it joined
  Network,
  /// Served from a live cache entry
  Cache,
}
