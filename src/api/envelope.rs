//! The uniform `{success, status, message, data}` shape every upstream
//! endpoint answers with, and that the proxy routes re-emit.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
  pub success: bool,
  #[serde(default)]
  pub status: u16,
  #[serde(default)]
  pub message: String,
  pub data: Option<T>,
}

impl<T> Envelope<T> {
  pub fn ok(message: impl Into<String>, data: T) -> Self {
    Self {
      success: true,
      status: 200,
      message: message.into(),
      data: Some(data),
    }
  }

  pub fn failure(status: u16, message: impl Into<String>) -> Self {
    Self {
      success: false,
      status,
      message: message.into(),
      data: None,
    }
  }

  /// `success=false` is authoritative regardless of the status code.
  pub fn is_failure(&self) -> bool {
    !self.success
  }

  /// Failure rule used by the server actions: only a failed envelope that
  /// also reports a non-200 status counts as failed.
  pub fn is_hard_failure(&self) -> bool {
    !self.success && self.status != 200
  }

  /// Message to surface for a failure, falling back to `default` when the
  /// upstream sent none.
  pub fn message_or(&self, default: &str) -> String {
    if self.message.is_empty() {
      default.to_string()
    } else {
      self.message.clone()
    }
  }
}
