use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use thiserror::Error;

use crate::api::Envelope;
use crate::error::FetchError;

/// Errors returned by route handlers, rendered as a failure envelope whose
/// `status` matches the HTTP status.
#[derive(Error, Debug)]
pub enum ApiError {
  #[error("{0}")]
  Unauthorized(String),

  #[error("Forbidden")]
  Forbidden,

  #[error("{0}")]
  BadRequest(String),

  #[error("{0}")]
  NotFound(String),

  /// Upstream failure passed through with its own status
  #[error("{message}")]
  Upstream { status: StatusCode, message: String },

  #[error("{0}")]
  Internal(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
  pub fn unauthorized() -> Self {
    Self::Unauthorized("Unauthorized".to_string())
  }

  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      ApiError::Forbidden => StatusCode::FORBIDDEN,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Upstream { status, .. } => *status,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<FetchError> for ApiError {
  fn from(err: FetchError) -> Self {
    match err {
      FetchError::Unauthorized(message) => ApiError::Unauthorized(message),
      FetchError::InvalidInput(message) => ApiError::BadRequest(message),
      FetchError::Transport(message) => ApiError::Internal(message),
      upstream @ FetchError::Upstream { .. } => {
        let status =
          StatusCode::from_u16(upstream.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ApiError::Upstream {
          status,
          message: upstream.to_string(),
        }
      }
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    match &self {
      ApiError::Internal(message) => tracing::error!(%status, error = %message, "request failed"),
      ApiError::Upstream { message, .. } => tracing::warn!(%status, reason = %message, "upstream rejected request"),
      _ => tracing::debug!(%status, reason = %self, "request rejected"),
    }

    let body = Envelope::<()>::failure(status.as_u16(), self.to_string());
    (status, Json(body)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fetch_error_mapping() {
    assert_eq!(ApiError::from(FetchError::unauthorized()).status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
      ApiError::from(FetchError::InvalidInput("Event UID is required".into())).status(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      ApiError::from(FetchError::transport("events")).status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );

    let err = ApiError::from(FetchError::Upstream {
      status: 403,
      message: "Not your event".into(),
    });
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
    assert_eq!(err.to_string(), "Not your event");
  }
}
