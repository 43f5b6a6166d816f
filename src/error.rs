//! Typed errors shared by the fetchers and both cache layers.

use thiserror::Error;

/// Failure of a single resource fetch.
///
/// Errors are `Clone` because one failed fetch can be observed by every
/// caller coalesced onto it. The `Display` text is user-facing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// Missing or invalid credentials; raised before any network call.
  #[error("{0}")]
  Unauthorized(String),

  /// Upstream answered with `success=false`; message is passed through verbatim.
  #[error("{message}")]
  Upstream { status: u16, message: String },

  /// Transport, HTTP-layer or decoding failure.
  #[error("{0}")]
  Transport(String),

  /// A required request field was missing.
  #[error("{0}")]
  InvalidInput(String),
}

impl FetchError {
  pub fn unauthorized() -> Self {
    Self::Unauthorized("Unauthorized".to_string())
  }

  /// Generic transport failure for a resource, e.g. "Failed to fetch events".
  pub fn transport(resource: &str) -> Self {
    Self::Transport(format!("Failed to fetch {}", resource))
  }

  /// Credential and input errors fail the same way on every attempt.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Upstream { .. } | Self::Transport(_))
  }

  /// HTTP status that best describes this error when re-emitted by a proxy route.
  pub fn status(&self) -> u16 {
    match self {
      Self::Unauthorized(_) => 401,
      Self::Upstream { status, .. } => {
        if *status >= 400 {
          *status
        } else {
          500
        }
      }
      Self::Transport(_) => 500,
      Self::InvalidInput(_) => 400,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_messages_are_user_facing() {
    assert_eq!(FetchError::unauthorized().to_string(), "Unauthorized");
    assert_eq!(
      FetchError::transport("participants").to_string(),
      "Failed to fetch participants"
    );
    let err = FetchError::Upstream {
      status: 403,
      message: "Event is locked".to_string(),
    };
    assert_eq!(err.to_string(), "Event is locked");
  }

  #[test]
  fn test_status_mapping() {
    assert_eq!(FetchError::unauthorized().status(), 401);
    assert_eq!(FetchError::InvalidInput("x".into()).status(), 400);
    assert_eq!(FetchError::transport("events").status(), 500);
    // A failure envelope that claims 200 is still a failure
    let err = FetchError::Upstream {
      status: 200,
      message: "nope".into(),
    };
    assert_eq!(err.status(), 500);
  }
}
