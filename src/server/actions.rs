//! Session-scoped server actions.
//!
//! Reads go through the server cache under the resource's tags; mutations
//! invalidate those tags once the upstream accepted them.

use axum::{
  extract::{Path, State},
  http::StatusCode,
  Extension, Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use super::error::{ApiError, ApiResult};
use super::proxy::invalidate_participants;
use super::state::AppState;
use crate::api::types::{EventData, ParticipantData, UpdateParticipant, UserData, UsersData};
use crate::api::{Envelope, Forwarded};
use crate::cache::{CacheDirective, CacheLife};
use crate::error::FetchError;
use crate::query::tags;
use crate::session::{RequestSession, Session};

fn current(session: &RequestSession) -> ApiResult<Arc<Session>> {
  session.get_session().ok_or_else(ApiError::unauthorized)
}

/// Server-side failure rule: only an envelope that is unsuccessful and also
/// reports a non-200 status counts as failed.
fn hard_failure<T>(envelope: &Envelope<T>, failure: &str) -> Option<FetchError> {
  envelope.is_hard_failure().then(|| FetchError::Upstream {
    status: envelope.status,
    message: envelope.message_or(failure),
  })
}

fn accept(forwarded: Forwarded<Value>, failure: &str) -> ApiResult<Envelope<Value>> {
  let envelope = forwarded.envelope;
  match hard_failure(&envelope, failure) {
    Some(err) => Err(ApiError::from(err)),
    None => Ok(envelope),
  }
}

/// Decode the data of a read; an absent or null `data` yields `None`.
fn read<T: DeserializeOwned>(forwarded: Forwarded<Value>, failure: &str) -> Result<Option<T>, FetchError> {
  let envelope = forwarded.envelope;
  if let Some(err) = hard_failure(&envelope, failure) {
    return Err(err);
  }
  envelope
    .data
    .filter(|data| !data.is_null())
    .map(serde_json::from_value)
    .transpose()
    .map_err(|_| FetchError::Transport(failure.to_string()))
}

pub async fn events(
  State(state): State<AppState>,
  Extension(session): Extension<RequestSession>,
) -> ApiResult<Json<Envelope<Vec<EventData>>>> {
  let session = current(&session)?;
  let directive = CacheDirective::new(CacheLife::Minutes).tag(tags::EVENTS);
  let upstream = state.upstream.clone();
  let token = session.token.clone();

  let result = state
    .cache
    .cached("actions.events", &session.token, &directive, || async move {
      let forwarded = upstream.forward_events(&token).await?;
      Ok(read::<Vec<EventData>>(forwarded, "Failed to fetch events")?.unwrap_or_default())
    })
    .await?;
  Ok(Json(Envelope::ok("Events fetched successfully", result.data)))
}

pub async fn participants(
  State(state): State<AppState>,
  Extension(session): Extension<RequestSession>,
  Path(event_uid): Path<String>,
) -> ApiResult<Json<Envelope<Vec<ParticipantData>>>> {
  if event_uid.trim().is_empty() {
    return Err(ApiError::BadRequest("Event UID is required".to_string()));
  }
  let session = current(&session)?;
  let directive = CacheDirective::new(CacheLife::Minutes)
    .tag(tags::PARTICIPANTS)
    .tag(tags::participants_of(&event_uid));
  let upstream = state.upstream.clone();
  let (token, uid) = (session.token.clone(), event_uid.clone());

  let result = state
    .cache
    .cached(
      "actions.participants",
      &(&session.token, &event_uid),
      &directive,
      || async move {
        let forwarded = upstream.forward_participants(&token, &uid).await?;
        // No roster yet
        if forwarded.status == StatusCode::NOT_FOUND
          || (!forwarded.envelope.success && forwarded.envelope.status == 404)
        {
          return Ok(Vec::new());
        }
        Ok(read::<Vec<ParticipantData>>(forwarded, "Failed to fetch participants")?.unwrap_or_default())
      },
    )
    .await?;
  Ok(Json(Envelope::ok("Participants fetched successfully", result.data)))
}

pub async fn delete_participant(
  State(state): State<AppState>,
  Extension(session): Extension<RequestSession>,
  Path((event_uid, participant_uid)): Path<(String, String)>,
) -> ApiResult<Json<Envelope<Value>>> {
  let session = current(&session)?;
  let forwarded = state
    .upstream
    .forward_delete_participant(&session.token, &event_uid, &participant_uid)
    .await?;
  let envelope = accept(forwarded, "Failed to delete participant")?;
  invalidate_participants(&state, &event_uid);
  Ok(Json(envelope))
}

pub async fn update_participant(
  State(state): State<AppState>,
  Extension(session): Extension<RequestSession>,
  Path((event_uid, participant_uid)): Path<(String, String)>,
  Json(update): Json<UpdateParticipant>,
) -> ApiResult<Json<Envelope<Value>>> {
  let session = current(&session)?;
  let forwarded = state
    .upstream
    .forward_update_participant(&session.token, &event_uid, &participant_uid, &update)
    .await?;
  let envelope = accept(forwarded, "Failed to update participant")?;
  invalidate_participants(&state, &event_uid);
  Ok(Json(envelope))
}

pub async fn user(
  State(state): State<AppState>,
  Extension(session): Extension<RequestSession>,
) -> ApiResult<Json<Envelope<UserData>>> {
  let session = current(&session)?;
  let user_id = session.user.id.clone();
  let directive = CacheDirective::new(CacheLife::Minutes).tag(tags::user(&user_id));
  let upstream = state.upstream.clone();
  let token = session.token.clone();

  let result = state
    .cache
    .cached("actions.user", &(&session.token, &user_id), &directive, || async move {
      let forwarded = upstream.forward_user(&token).await?;
      read::<UserData>(forwarded, "Failed to fetch user data")?.ok_or_else(|| FetchError::Upstream {
        status: 404,
        message: "User data not found".to_string(),
      })
    })
    .await?;
  Ok(Json(Envelope::ok("User data fetched successfully", result.data)))
}

/// Admin listing of every account.
pub async fn users(
  State(state): State<AppState>,
  Extension(session): Extension<RequestSession>,
) -> ApiResult<Json<Envelope<Vec<UsersData>>>> {
  let session = current(&session)?;
  if !session.is_superadmin() {
    return Err(ApiError::Forbidden);
  }
  let directive = CacheDirective::new(CacheLife::Minutes).tag(tags::USERS);
  let upstream = state.upstream.clone();
  let token = session.token.clone();

  let result = state
    .cache
    .cached("actions.users", &session.token, &directive, || async move {
      let forwarded = upstream.forward_users(&token).await?;
      Ok(read::<Vec<UsersData>>(forwarded, "Failed to fetch users data")?.unwrap_or_default())
    })
    .await?;
  Ok(Json(Envelope::ok("Users fetched successfully", result.data)))
}
