//! Resource proxy routes used by the client-side query cache.
//!
//! Each route takes the upstream bearer token from its own `Authorization`
//! header, validates its parameters and forwards to the upstream, re-emitting
//! the envelope shape with this service's status mapping.

use axum::{
  extract::{Multipart, Path, State},
  http::{header::AUTHORIZATION, HeaderMap, StatusCode},
  Json,
};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::api::types::{LogoFile, LogoSlot, UpdateParticipant};
use crate::api::{Envelope, Forwarded};
use crate::cache::{CacheDirective, CacheLife};
use crate::error::FetchError;
use crate::query::tags;

/// Upstream responses behind the proxy are reused for this long.
const REVALIDATE: Duration = Duration::from_secs(60);

/// Bearer token from the `Authorization` header.
pub(crate) fn bearer(headers: &HeaderMap) -> Option<String> {
  let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
  let (_, token) = value.split_once(' ')?;
  let token = token.trim();
  (!token.is_empty()).then(|| token.to_string())
}

fn require_bearer(headers: &HeaderMap, message: &str) -> ApiResult<String> {
  bearer(headers).ok_or_else(|| ApiError::Unauthorized(message.to_string()))
}

/// Apply the pass-through rule: an HTTP failure or `success=false` fails with
/// the upstream's status and message.
fn settle(forwarded: Forwarded<Value>, failure: &str) -> Result<Option<Value>, FetchError> {
  let Forwarded { status, envelope } = forwarded;
  if status.is_success() && !envelope.is_failure() {
    return Ok(envelope.data);
  }
  let status = if status.is_success() {
    envelope.status
  } else {
    status.as_u16()
  };
  Err(FetchError::Upstream {
    status,
    message: envelope.message_or(failure),
  })
}

type Reply = ApiResult<Json<Envelope<Value>>>;

fn ok(message: &str, data: Option<Value>) -> Reply {
  Ok(Json(Envelope {
    success: true,
    status: StatusCode::OK.as_u16(),
    message: message.to_string(),
    data,
  }))
}

pub async fn events(State(state): State<AppState>, headers: HeaderMap) -> Reply {
  let token = require_bearer(&headers, "Unauthorized")?;
  let forwarded = state.upstream.forward_events(&token).await?;
  let data = settle(forwarded, "Failed to fetch events")?;
  ok("Events fetched successfully", data)
}

pub async fn participants(
  State(state): State<AppState>,
  Path(event_uid): Path<String>,
  headers: HeaderMap,
) -> Reply {
  let token = require_bearer(&headers, "Authorization token is required")?;
  if event_uid.trim().is_empty() {
    return Err(ApiError::BadRequest("Event UID is required".to_string()));
  }

  let directive = CacheDirective::new(CacheLife::Custom(REVALIDATE)).tag(tags::PARTICIPANTS);
  let upstream = state.upstream.clone();
  let (t, uid) = (token.clone(), event_uid.clone());
  let result = state
    .cache
    .cached("proxy.participants", &(&token, &event_uid), &directive, || async move {
      let forwarded = upstream.forward_participants(&t, &uid).await?;
      settle(forwarded, "Failed fetching participants")
    })
    .await?;

  debug!(event_uid, source = ?result.source, "participants proxied");
  ok("Participants fetched successfully", result.data)
}

pub async fn user(State(state): State<AppState>, headers: HeaderMap) -> Reply {
  let token = require_bearer(&headers, "Unauthorized")?;
  let user_id = headers
    .get("userId")
    .and_then(|v| v.to_str().ok())
    .filter(|v| !v.is_empty())
    .map(str::to_string)
    .ok_or_else(|| ApiError::Unauthorized("User ID not found".to_string()))?;

  let directive = CacheDirective::new(CacheLife::Custom(REVALIDATE)).tag(tags::user(&user_id));
  let upstream = state.upstream.clone();
  let t = token.clone();
  let result = state
    .cache
    .cached("proxy.user", &(&token, &user_id), &directive, || async move {
      let forwarded = upstream.forward_user(&t).await?;
      match settle(forwarded, "Failed to fetch user data")? {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(FetchError::Upstream {
          status: 404,
          message: "User data not found".to_string(),
        }),
      }
    })
    .await?;

  ok("User data fetched successfully", Some(result.data))
}

pub async fn upload_logo(
  State(state): State<AppState>,
  Path((event_uid, option)): Path<(String, String)>,
  headers: HeaderMap,
  mut multipart: Multipart,
) -> Reply {
  let token = require_bearer(&headers, "Unauthorized")?;
  if event_uid.trim().is_empty() {
    return Err(ApiError::BadRequest("Event UID is required".to_string()));
  }
  let slot = LogoSlot::parse(&option).ok_or_else(|| ApiError::BadRequest("Invalid option".to_string()))?;

  let mut file = None;
  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
  {
    if field.name() != Some(slot.field_name().as_str()) {
      continue;
    }
    let file_name = field.file_name().unwrap_or("logo").to_string();
    let content_type = field.content_type().map(str::to_string);
    let bytes = field
      .bytes()
      .await
      .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?;
    file = Some(LogoFile {
      file_name,
      content_type,
      bytes: bytes.to_vec(),
    });
    break;
  }
  let file = file.ok_or_else(|| ApiError::BadRequest("File is required".to_string()))?;

  let forwarded = state
    .upstream
    .forward_upload_logo(&token, &event_uid, slot, file)
    .await?;
  let data = settle(forwarded, "Failed to upload event logo")?;

  info!(event_uid, slot = slot.as_str(), "event logo uploaded");
  state.cache.invalidate_by_tag(tags::EVENTS);
  ok("Event logo uploaded successfully", data)
}

pub async fn delete_participant(
  State(state): State<AppState>,
  Path((event_uid, participant_uid)): Path<(String, String)>,
  headers: HeaderMap,
) -> Reply {
  let token = require_bearer(&headers, "Unauthorized")?;
  let envelope = state
    .upstream
    .delete_participant(&token, &event_uid, &participant_uid)
    .await?;
  invalidate_participants(&state, &event_uid);
  ok(&envelope.message_or("Participant deleted successfully"), envelope.data)
}

pub async fn update_participant(
  State(state): State<AppState>,
  Path((event_uid, participant_uid)): Path<(String, String)>,
  headers: HeaderMap,
  Json(update): Json<UpdateParticipant>,
) -> Reply {
  let token = require_bearer(&headers, "Unauthorized")?;
  let envelope = state
    .upstream
    .update_participant(&token, &event_uid, &participant_uid, &update)
    .await?;
  invalidate_participants(&state, &event_uid);
  ok(&envelope.message_or("Participant updated successfully"), envelope.data)
}

pub(crate) fn invalidate_participants(state: &AppState, event_uid: &str) {
  state.cache.invalidate_by_tag(&tags::participants_of(event_uid));
  state.cache.invalidate_by_tag(tags::PARTICIPANTS);
}
