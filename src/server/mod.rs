//! HTTP surface: resource proxy routes, session routes and server actions.

mod actions;
mod auth;
mod error;
mod proxy;
mod state;

use axum::{
  extract::DefaultBodyLimit,
  middleware::from_fn_with_state,
  routing::{delete, get, post},
  Router,
};
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

pub use state::AppState;

use crate::config::Config;

/// Logo uploads may be larger than axum's default body limit.
const UPLOAD_LIMIT: usize = 10 * 1024 * 1024;

/// How often expired server cache entries are dropped.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub fn router(state: AppState) -> Router {
  let proxy_routes = Router::new()
    .route("/api/events", get(proxy::events))
    .route("/api/events/{event_uid}/participants", get(proxy::participants))
    .route(
      "/api/events/{event_uid}/participants/{participant_uid}",
      delete(proxy::delete_participant).put(proxy::update_participant),
    )
    .route(
      "/api/events/{event_uid}/upload-logo/{option}",
      post(proxy::upload_logo).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
    )
    .route("/api/users/user", get(proxy::user));

  let session_routes = Router::new()
    .route("/api/auth/sign-in", post(auth::sign_in))
    .route("/api/auth/session", get(auth::session).post(auth::update_session))
    .route("/api/auth/sign-out", post(auth::sign_out));

  let action_routes = Router::new()
    .route("/actions/events", get(actions::events))
    .route("/actions/events/{event_uid}/participants", get(actions::participants))
    .route(
      "/actions/events/{event_uid}/participants/{participant_uid}",
      delete(actions::delete_participant).put(actions::update_participant),
    )
    .route("/actions/user", get(actions::user))
    .route("/actions/users", get(actions::users));

  Router::new()
    .merge(proxy_routes)
    .merge(session_routes)
    .merge(action_routes)
    .layer(from_fn_with_state(state.clone(), auth::session_layer))
    .layer(CookieManagerLayer::new())
    .layer(
      TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::default())
        .on_request(DefaultOnRequest::default().level(Level::DEBUG))
        .on_response(DefaultOnResponse::default().level(Level::INFO))
        .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
    )
    .with_state(state)
}

/// Run the BFF until interrupted.
pub async fn serve(config: Config, auth_secret: &str, upstream_jwt_secret: &str) -> Result<()> {
  let state = AppState::new(&config, auth_secret, upstream_jwt_secret)?;
  let purge = state.cache.spawn_purge(PURGE_INTERVAL);

  let listener = tokio::net::TcpListener::bind(config.server.listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", config.server.listen, e))?;
  info!(addr = %config.server.listen, "server listening");

  axum::serve(listener, router(state))
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!("shutting down");
    })
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  purge.abort();
  Ok(())
}
