//! Session routes and the session cookie middleware.

use axum::{
  body::Body,
  extract::State,
  http::Request,
  middleware::Next,
  response::Response,
  Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_cookies::cookie::{time::Duration, SameSite};
use tower_cookies::{Cookie, Cookies};
use tracing::{debug, info, warn};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::api::Envelope;
use crate::error::FetchError;
use crate::session::{RequestSession, Session, SessionUpdate};

/// Build the session cookie for a signed token.
fn session_cookie(state: &AppState, value: String) -> Cookie<'static> {
  let mut cookie = Cookie::new(state.config.session.cookie_name.clone(), value);
  cookie.set_http_only(true);
  if state.config.server.public_url.starts_with("https://") {
    cookie.set_secure(true);
  }
  cookie.set_same_site(SameSite::Lax);
  cookie.set_max_age(Duration::seconds(state.sessions.max_age().as_secs() as i64));
  cookie.set_path("/");
  cookie
}

fn removal_cookie(state: &AppState) -> Cookie<'static> {
  let mut cookie = Cookie::new(state.config.session.cookie_name.clone(), "");
  cookie.set_path("/");
  cookie
}

/// Attach a [`RequestSession`] to every request, and re-issue sessions that
/// are past the update age.
pub async fn session_layer(
  State(state): State<AppState>,
  cookies: Cookies,
  mut request: Request<Body>,
  next: Next,
) -> Response {
  let cookie = cookies
    .get(&state.config.session.cookie_name)
    .map(|c| c.value().to_string());
  let session = RequestSession::new(Arc::clone(&state.sessions), cookie);

  if let Some(current) = session.get_session() {
    if state.sessions.needs_reissue(&current) {
      match state.sessions.reissue(&current) {
        Ok((_, signed)) => {
          debug!(user_id = %current.user.id, "re-issuing session cookie");
          cookies.add(session_cookie(&state, signed));
        }
        Err(e) => warn!(error = %e, "failed to re-issue session"),
      }
    }
  }

  request.extensions_mut().insert(session);
  next.run(request).await
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
  pub email: String,
  pub password: String,
}

pub async fn sign_in(
  State(state): State<AppState>,
  cookies: Cookies,
  Json(payload): Json<SignInRequest>,
) -> ApiResult<Json<Envelope<Session>>> {
  if payload.email.trim().is_empty() || payload.password.is_empty() {
    return Err(ApiError::BadRequest("Email and password are required".to_string()));
  }

  let token = state
    .upstream
    .sign_in(&payload.email, &payload.password)
    .await
    .map_err(|e| match e {
      FetchError::Unauthorized(_) | FetchError::Upstream { .. } => {
        ApiError::Unauthorized("Invalid credentials".to_string())
      }
      other => ApiError::from(other),
    })?;

  let user = state.sessions.from_upstream_token(&token).map_err(|e| {
    warn!(error = %e, "upstream token failed verification");
    ApiError::Unauthorized("Invalid credentials".to_string())
  })?;

  let (session, signed) = state
    .sessions
    .issue(user, token)
    .map_err(|e| ApiError::Internal(e.to_string()))?;
  cookies.add(session_cookie(&state, signed));

  info!(user_id = %session.user.id, "signed in");
  Ok(Json(Envelope::ok("Signed in successfully", session)))
}

/// The current session; an absent session is not an error.
pub async fn session(Extension(session): Extension<RequestSession>) -> Json<Envelope<Session>> {
  match session.get_session() {
    Some(current) => Json(Envelope::ok("Session found", Session::clone(&current))),
    None => Json(Envelope {
      success: true,
      status: 200,
      message: "No active session".to_string(),
      data: None,
    }),
  }
}

/// Update trigger: merge the given fields into the session and re-issue it.
pub async fn update_session(
  State(state): State<AppState>,
  Extension(session): Extension<RequestSession>,
  cookies: Cookies,
  Json(update): Json<SessionUpdate>,
) -> ApiResult<Json<Envelope<Session>>> {
  let current = session.get_session().ok_or_else(ApiError::unauthorized)?;
  let user = update.apply(current.user.clone());

  let (updated, signed) = state
    .sessions
    .issue(user, current.token.clone())
    .map_err(|e| ApiError::Internal(e.to_string()))?;
  cookies.add(session_cookie(&state, signed));

  info!(user_id = %updated.user.id, "session updated");
  Ok(Json(Envelope::ok("Session updated successfully", updated)))
}

pub async fn sign_out(State(state): State<AppState>, cookies: Cookies) -> Json<Envelope<()>> {
  cookies.remove(removal_cookie(&state));
  Json(Envelope {
    success: true,
    status: 200,
    message: "Signed out successfully".to_string(),
    data: None,
  })
}
