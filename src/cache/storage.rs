//! Cache storage trait and the in-memory implementation.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// A stored call result, serialized to JSON so one store holds every type.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub value: Value,
  pub tags: Vec<String>,
  pub cached_at: DateTime<Utc>,
  /// `None` for entries that live until invalidated
  pub expires_at: Option<Instant>,
}

impl CachedEntry {
  pub fn is_expired(&self, now: Instant) -> bool {
    self.expires_at.map(|at| now >= at).unwrap_or(false)
  }
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Get an entry by key, expired or not.
  fn get(&self, key: &str) -> Result<Option<CachedEntry>>;

  /// Store an entry, replacing any previous one under the same key.
  fn put(&self, key: &str, entry: CachedEntry) -> Result<()>;

  /// Remove every entry carrying `tag`. Returns the number removed.
  fn invalidate_tag(&self, tag: &str) -> Result<usize>;

  /// Remove entries whose lifetime ended before `now`. Returns the number removed.
  fn purge_expired(&self, now: Instant) -> Result<usize>;

  fn len(&self) -> usize;
}

impl<S: CacheStorage + ?Sized> CacheStorage for Box<S> {
  fn get(&self, key: &str) -> Result<Option<CachedEntry>> {
    (**self).get(key)
  }

  fn put(&self, key: &str, entry: CachedEntry) -> Result<()> {
    (**self).put(key, entry)
  }

  fn invalidate_tag(&self, tag: &str) -> Result<usize> {
    (**self).invalidate_tag(tag)
  }

  fn purge_expired(&self, now: Instant) -> Result<usize> {
    (**self).purge_expired(now)
  }

  fn len(&self) -> usize {
    (**self).len()
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when the server cache is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<CachedEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _key: &str, _entry: CachedEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn invalidate_tag(&self, _tag: &str) -> Result<usize> {
    Ok(0)
  }

  fn purge_expired(&self, _now: Instant) -> Result<usize> {
    Ok(0)
  }

  fn len(&self) -> usize {
    0
  }
}

#[derive(Default)]
struct Tables {
  entries: HashMap<String, CachedEntry>,
  /// tag -> keys carrying that tag
  tags: HashMap<String, HashSet<String>>,
}

impl Tables {
  fn remove(&mut self, key: &str) -> Option<CachedEntry> {
    let entry = self.entries.remove(key)?;
    for tag in &entry.tags {
      if let Some(keys) = self.tags.get_mut(tag) {
        keys.remove(key);
        if keys.is_empty() {
          self.tags.remove(tag);
        }
      }
    }
    Some(entry)
  }
}

/// Process-local storage with a tag index.
#[derive(Default)]
pub struct MemoryStorage {
  tables: Mutex<Tables>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Tables> {
    self.tables.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<CachedEntry>> {
    Ok(self.lock().entries.get(key).cloned())
  }

  fn put(&self, key: &str, entry: CachedEntry) -> Result<()> {
    let mut tables = self.lock();
    tables.remove(key);
    for tag in &entry.tags {
      tables
        .tags
        .entry(tag.clone())
        .or_default()
        .insert(key.to_string());
    }
    tables.entries.insert(key.to_string(), entry);
    Ok(())
  }

  fn invalidate_tag(&self, tag: &str) -> Result<usize> {
    let mut tables = self.lock();
    let keys: Vec<String> = tables
      .tags
      .get(tag)
      .map(|keys| keys.iter().cloned().collect())
      .unwrap_or_default();
    for key in &keys {
      tables.remove(key);
    }
    Ok(keys.len())
  }

  fn purge_expired(&self, now: Instant) -> Result<usize> {
    let mut tables = self.lock();
    let expired: Vec<String> = tables
      .entries
      .iter()
      .filter(|(_, e)| e.is_expired(now))
      .map(|(k, _)| k.clone())
      .collect();
    for key in &expired {
      tables.remove(key);
    }
    Ok(expired.len())
  }

  fn len(&self) -> usize {
    self.lock().entries.len()
  }
}
