use std::time::Duration;

/// Per-resource freshness, retry and refetch-trigger policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
  /// Data younger than this is served without a fetch
  pub stale_time: Duration,
  /// Unobserved entries are dropped after this long
  pub gc_time: Duration,
  /// Retries after the first failed attempt
  pub retry: u32,
  /// First retry delay; doubles per attempt
  pub retry_base: Duration,
  /// Upper bound for a single retry delay
  pub retry_cap: Duration,
  pub refetch_on_mount: bool,
  pub refetch_on_window_focus: bool,
  /// Disabled queries never fetch on their own
  pub enabled: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(60),
      gc_time: Duration::from_secs(5 * 60),
      retry: 3,
      retry_base: Duration::from_secs(1),
      retry_cap: Duration::from_secs(30),
      refetch_on_mount: true,
      refetch_on_window_focus: true,
      enabled: true,
    }
  }
}

impl QueryOptions {
  /// Event lists: 60s fresh, kept 5 minutes, refetched on focus.
  pub fn events() -> Self {
    Self::default()
  }

  /// Participant rosters change more often: 30s fresh, kept 10 minutes,
  /// and no focus refetch to avoid churn while editing a roster.
  pub fn participants() -> Self {
    Self {
      stale_time: Duration::from_secs(30),
      gc_time: Duration::from_secs(10 * 60),
      refetch_on_window_focus: false,
      ..Self::default()
    }
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  /// Delay before retry number `attempt` (0-based): `min(base * 2^attempt, cap)`.
  pub fn retry_delay(&self, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    self
      .retry_base
      .checked_mul(factor)
      .unwrap_or(self.retry_cap)
      .min(self.retry_cap)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_retry_delay_backoff() {
    let options = QueryOptions::default();
    assert_eq!(options.retry_delay(0), Duration::from_secs(1));
    assert_eq!(options.retry_delay(1), Duration::from_secs(2));
    assert_eq!(options.retry_delay(2), Duration::from_secs(4));
    assert_eq!(options.retry_delay(5), Duration::from_secs(30));
    assert_eq!(options.retry_delay(40), Duration::from_secs(30));
  }

  #[test]
  fn test_presets() {
    let participants = QueryOptions::participants();
    assert_eq!(participants.stale_time, Duration::from_secs(30));
    assert!(!participants.refetch_on_window_focus);
    assert!(QueryOptions::events().refetch_on_window_focus);
  }
}
