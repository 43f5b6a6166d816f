//! HTTP client for the upstream REST API and for this service's own proxy
//! routes, plus the resource fetchers built on top of it.

use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::api::envelope::Envelope;
use crate::api::types::{
  EventData, LogoFile, LogoSlot, ParticipantData, SignInData, UpdateParticipant,
  UploadLogoData, UserData, UsersData,
};
use crate::error::FetchError;

/// Which HTTP surface a client talks to. Paths differ between the upstream
/// API and the proxy routes this service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
  Upstream,
  Proxy,
}

/// Raw upstream answer: HTTP status plus the decoded envelope.
#[derive(Debug, Clone)]
pub struct Forwarded<T> {
  pub status: StatusCode,
  pub envelope: Envelope<T>,
}

/// Thin reqwest wrapper. Cheap to clone.
#[derive(Clone)]
pub struct UpstreamClient {
  http: reqwest::Client,
  base: Url,
  surface: Surface,
}

impl UpstreamClient {
  pub fn new(base_url: &str, surface: Surface, timeout: Duration) -> Result<Self> {
    let base = Url::parse(base_url).map_err(|e| eyre!("Invalid base URL {}: {}", base_url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Base URL {} cannot carry a path", base_url));
    }

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      surface,
    })
  }

  /// Build a URL from path segments; each segment is percent-encoded.
  fn url(&self, segments: &[&str]) -> Url {
    let mut url = self.base.clone();
    // cannot_be_a_base was rejected in new()
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  fn request(&self, method: Method, segments: &[&str], token: Option<&str>) -> RequestBuilder {
    let builder = self.http.request(method, self.url(segments));
    match token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  /// Send a request and decode the envelope, whatever the HTTP status.
  async fn send<T: DeserializeOwned>(
    &self,
    builder: RequestBuilder,
    resource: &str,
  ) -> Result<Forwarded<T>, FetchError> {
    let response = builder.send().await.map_err(|e| {
      warn!(resource, error = %e, "upstream request failed");
      FetchError::transport(resource)
    })?;

    let status = response.status();
    let envelope = match response.json::<Envelope<T>>().await {
      Ok(envelope) => envelope,
      // A bare 404 still says "not found"; keep the status for the caller
      Err(_) if status == StatusCode::NOT_FOUND => Envelope::failure(404, ""),
      Err(e) => {
        warn!(resource, %status, error = %e, "failed to decode upstream envelope");
        return Err(FetchError::transport(resource));
      }
    };

    debug!(resource, %status, success = envelope.success, "upstream responded");
    Ok(Forwarded { status, envelope })
  }

  /// Turn a forwarded answer into data, applying the failure rules:
  /// `success=false` surfaces the upstream message, an HTTP-layer failure
  /// with `success=true` is a generic transport failure.
  fn settle<T>(forwarded: Forwarded<T>, resource: &str) -> Result<Option<T>, FetchError> {
    let Forwarded { status, envelope } = forwarded;
    if envelope.is_failure() {
      return Err(FetchError::Upstream {
        status: if envelope.status != 0 {
          envelope.status
        } else {
          status.as_u16()
        },
        message: envelope.message_or(&format!("Failed to fetch {}", resource)),
      });
    }
    if !status.is_success() {
      return Err(FetchError::transport(resource));
    }
    Ok(envelope.data)
  }

  fn require_token(token: &str) -> Result<&str, FetchError> {
    if token.trim().is_empty() {
      Err(FetchError::unauthorized())
    } else {
      Ok(token)
    }
  }

  // ==========================================================================
  // Pass-through (used by the proxy routes)
  // ==========================================================================

  /// GET the upstream event list without interpreting the envelope.
  pub async fn forward_events(&self, token: &str) -> Result<Forwarded<Value>, FetchError> {
    let token = Self::require_token(token)?;
    let builder = self.request(Method::GET, &["api", "events"], Some(token));
    self.send(builder, "events").await
  }

  pub async fn forward_participants(
    &self,
    token: &str,
    event_uid: &str,
  ) -> Result<Forwarded<Value>, FetchError> {
    let token = Self::require_token(token)?;
    let builder = self.request(Method::GET, &self.participants_path(event_uid), Some(token));
    self.send(builder, "participants").await
  }

  pub async fn forward_user(&self, token: &str) -> Result<Forwarded<Value>, FetchError> {
    let token = Self::require_token(token)?;
    let builder = self.request(Method::GET, &["api", "users"], Some(token));
    self.send(builder, "user data").await
  }

  pub async fn forward_users(&self, token: &str) -> Result<Forwarded<Value>, FetchError> {
    let token = Self::require_token(token)?;
    let builder = self.request(Method::GET, &["api", "admin", "users"], Some(token));
    self.send(builder, "users data").await
  }

  pub async fn forward_upload_logo(
    &self,
    token: &str,
    event_uid: &str,
    slot: LogoSlot,
    file: LogoFile,
  ) -> Result<Forwarded<Value>, FetchError> {
    let token = Self::require_token(token)?;

    let mut part = reqwest::multipart::Part::bytes(file.bytes).file_name(file.file_name);
    if let Some(mime) = file.content_type.as_deref() {
      part = part
        .mime_str(mime)
        .map_err(|_| FetchError::InvalidInput(format!("Invalid content type {}", mime)))?;
    }
    let form = reqwest::multipart::Form::new().part(slot.field_name(), part);

    let builder = self
      .request(
        Method::POST,
        &["api", "events", event_uid, "upload-logo", slot.as_str()],
        Some(token),
      )
      .multipart(form);
    self.send(builder, "event logo").await
  }

  fn participants_path<'a>(&self, event_uid: &'a str) -> Vec<&'a str> {
    match self.surface {
      Surface::Upstream => vec!["api", "events", "participants", event_uid],
      Surface::Proxy => vec!["api", "events", event_uid, "participants"],
    }
  }

  fn participant_path<'a>(&self, event_uid: &'a str, participant_uid: &'a str) -> Vec<&'a str> {
    let mut path = self.participants_path(event_uid);
    path.push(participant_uid);
    path
  }

  // ==========================================================================
  // Read fetchers
  // ==========================================================================

  /// Fetch the organizer's events. A missing `data` field yields an empty list.
  pub async fn fetch_events(&self, token: &str) -> Result<Vec<EventData>, FetchError> {
    let token = Self::require_token(token)?;
    let builder = self.request(Method::GET, &["api", "events"], Some(token));
    let forwarded = self.send::<Vec<EventData>>(builder, "events").await?;
    Ok(Self::settle(forwarded, "events")?.unwrap_or_default())
  }

  /// Fetch an event's participants.
  ///
  /// A 404, either as HTTP status or inside a failure envelope, means the
  /// event has no participants yet and yields an empty list.
  pub async fn fetch_participants(
    &self,
    token: &str,
    event_uid: &str,
  ) -> Result<Vec<ParticipantData>, FetchError> {
    let token = Self::require_token(token)?;
    if event_uid.trim().is_empty() {
      return Err(FetchError::InvalidInput("Event UID is required".to_string()));
    }

    let builder = self.request(Method::GET, &self.participants_path(event_uid), Some(token));
    let response = builder.send().await.map_err(|e| {
      warn!(event_uid, error = %e, "participants request failed");
      FetchError::transport("participants")
    })?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
      debug!(event_uid, "no participants for event");
      return Ok(Vec::new());
    }

    let envelope = response
      .json::<Envelope<Vec<ParticipantData>>>()
      .await
      .map_err(|_| FetchError::transport("participants"))?;
    if envelope.is_failure() && envelope.status == 404 {
      return Ok(Vec::new());
    }

    Ok(Self::settle(Forwarded { status, envelope }, "participants")?.unwrap_or_default())
  }

  /// Fetch the signed-in user's profile.
  ///
  /// On the proxy surface the user id travels in the `userId` header.
  pub async fn fetch_user(&self, token: &str, user_id: &str) -> Result<UserData, FetchError> {
    let token = Self::require_token(token)?;
    let builder = match self.surface {
      Surface::Upstream => self.request(Method::GET, &["api", "users"], Some(token)),
      Surface::Proxy => {
        if user_id.is_empty() {
          return Err(FetchError::Unauthorized("User ID not found".to_string()));
        }
        self
          .request(Method::GET, &["api", "users", "user"], Some(token))
          .header("userId", user_id)
      }
    };

    let forwarded = self.send::<UserData>(builder, "user data").await?;
    Self::settle(forwarded, "user data")?.ok_or_else(|| FetchError::Upstream {
      status: 404,
      message: "User data not found".to_string(),
    })
  }

  /// Fetch every user account (admin listing).
  pub async fn fetch_users(&self, token: &str) -> Result<Vec<UsersData>, FetchError> {
    let token = Self::require_token(token)?;
    let builder = self.request(Method::GET, &["api", "admin", "users"], Some(token));
    let forwarded = self.send::<Vec<UsersData>>(builder, "users data").await?;
    Ok(Self::settle(forwarded, "users data")?.unwrap_or_default())
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  /// DELETE a participant without interpreting the envelope.
  pub async fn forward_delete_participant(
    &self,
    token: &str,
    event_uid: &str,
    participant_uid: &str,
  ) -> Result<Forwarded<Value>, FetchError> {
    let token = Self::require_token(token)?;
    let builder = self.request(
      Method::DELETE,
      &self.participant_path(event_uid, participant_uid),
      Some(token),
    );
    self.send(builder, "delete participant").await
  }

  pub async fn forward_update_participant(
    &self,
    token: &str,
    event_uid: &str,
    participant_uid: &str,
    update: &UpdateParticipant,
  ) -> Result<Forwarded<Value>, FetchError> {
    let token = Self::require_token(token)?;
    let builder = self
      .request(
        Method::PUT,
        &self.participant_path(event_uid, participant_uid),
        Some(token),
      )
      .json(update);
    self.send(builder, "update participant").await
  }

  pub async fn delete_participant(
    &self,
    token: &str,
    event_uid: &str,
    participant_uid: &str,
  ) -> Result<Envelope<Value>, FetchError> {
    let forwarded = self
      .forward_delete_participant(token, event_uid, participant_uid)
      .await?;
    Self::settle_mutation(forwarded, "delete participant")
  }

  pub async fn update_participant(
    &self,
    token: &str,
    event_uid: &str,
    participant_uid: &str,
    update: &UpdateParticipant,
  ) -> Result<Envelope<Value>, FetchError> {
    let forwarded = self
      .forward_update_participant(token, event_uid, participant_uid, update)
      .await?;
    Self::settle_mutation(forwarded, "update participant")
  }

  /// Upload one of the event's two logos and return the upstream's answer.
  pub async fn upload_logo(
    &self,
    token: &str,
    event_uid: &str,
    slot: LogoSlot,
    file: LogoFile,
  ) -> Result<UploadLogoData, FetchError> {
    let Forwarded { status, envelope } = self.forward_upload_logo(token, event_uid, slot, file).await?;
    if envelope.is_failure() || !status.is_success() {
      return Err(FetchError::Upstream {
        status: status.as_u16(),
        message: envelope.message_or("Failed to upload event logo"),
      });
    }
    let data = envelope
      .data
      .map(serde_json::from_value::<UploadLogoData>)
      .transpose()
      .map_err(|_| FetchError::transport("event logo"))?;
    Ok(data.unwrap_or_default())
  }

  /// Exchange credentials for an upstream bearer token.
  pub async fn sign_in(&self, email: &str, password: &str) -> Result<String, FetchError> {
    #[derive(Serialize)]
    struct Credentials<'a> {
      email: &'a str,
      password: &'a str,
    }

    let builder = self
      .request(Method::POST, &["api", "auth", "sign-in"], None)
      .json(&Credentials { email, password });
    let forwarded = self.send::<SignInData>(builder, "session").await?;
    let status = forwarded.envelope.status;
    if status == 400 || status == 401 {
      return Err(FetchError::Unauthorized(
        forwarded.envelope.message_or("Invalid credentials"),
      ));
    }
    Self::settle(forwarded, "session")?
      .map(|data| data.token)
      .ok_or_else(FetchError::unauthorized)
  }

  fn settle_mutation(forwarded: Forwarded<Value>, action: &str) -> Result<Envelope<Value>, FetchError> {
    let Forwarded { status, envelope } = forwarded;
    if envelope.is_failure() || !status.is_success() {
      return Err(FetchError::Upstream {
        status: status.as_u16(),
        message: envelope.message_or(&format!("Failed to {}", action)),
      });
    }
    Ok(envelope)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::Role;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client(server: &MockServer, surface: Surface) -> UpstreamClient {
    UpstreamClient::new(&server.uri(), surface, Duration::from_secs(5)).unwrap()
  }

  fn participant(uid: &str) -> Value {
    serde_json::json!({
      "uid": uid,
      "name": "Ana",
      "email": "ana@example.com",
      "position": "Speaker",
      "addedAt": "2025-01-01",
      "certificateNumber": "CERT-1"
    })
  }

  #[tokio::test]
  async fn test_missing_token_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let err = client(&server, Surface::Upstream).fetch_events("").await.unwrap_err();
    assert_eq!(err, FetchError::unauthorized());
  }

  #[tokio::test]
  async fn test_events_sends_bearer_and_decodes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/events"))
      .and(header("authorization", "Bearer tok"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "success": true, "status": 200, "message": "ok",
        "data": [{"uid": "E1", "eventName": "Summit"}]
      })))
      .expect(1)
      .mount(&server)
      .await;

    let events = client(&server, Surface::Upstream).fetch_events("tok").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].uid, "E1");
  }

  #[tokio::test]
  async fn test_success_false_surfaces_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/events"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "success": false, "status": 200, "message": "Account suspended", "data": null
      })))
      .mount(&server)
      .await;

    let err = client(&server, Surface::Upstream).fetch_events("tok").await.unwrap_err();
    assert_eq!(err.to_string(), "Account suspended");
  }

  #[tokio::test]
  async fn test_non_json_error_is_generic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/events"))
      .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
      .mount(&server)
      .await;

    let err = client(&server, Surface::Upstream).fetch_events("tok").await.unwrap_err();
    assert_eq!(err, FetchError::transport("events"));
  }

  #[tokio::test]
  async fn test_not_found_policy_differs_by_resource() {
    let server = MockServer::start().await;
    let not_found = serde_json::json!({"success": false, "status": 404, "message": "not found"});
    Mock::given(method("GET"))
      .and(path("/api/events"))
      .respond_with(ResponseTemplate::new(200).set_body_json(not_found.clone()))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/events/participants/E1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(not_found))
      .mount(&server)
      .await;

    let upstream = client(&server, Surface::Upstream);
    assert_eq!(upstream.fetch_participants("tok", "E1").await.unwrap(), vec![]);
    let err = upstream.fetch_events("tok").await.unwrap_err();
    assert_eq!(err.to_string(), "not found");
  }

  #[tokio::test]
  async fn test_users_listing_decodes_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/admin/users"))
      .and(header("authorization", "Bearer tok"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "success": true, "status": 200, "message": "ok",
        "data": [{
          "uid": "U1", "email": "ana@example.com", "isPremium": false,
          "premiumAt": null, "createdAt": "2025-01-01", "premiumPackage": "FREEPLAN",
          "role": "USER", "premiumExpiredAt": null
        }]
      })))
      .expect(1)
      .mount(&server)
      .await;

    let users = client(&server, Surface::Upstream).fetch_users("tok").await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].role, Role::User);
    assert_eq!(users[0].events, 0);
  }

  #[tokio::test]
  async fn test_participants_http_404_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/events/E9/participants"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let proxy = client(&server, Surface::Proxy);
    assert!(proxy.fetch_participants("tok", "E9").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_participants_paths_per_surface() {
    let server = MockServer::start().await;
    let body = serde_json::json!({"success": true, "status": 200, "message": "", "data": [participant("P1")]});
    Mock::given(method("GET"))
      .and(path("/api/events/participants/E1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/events/E1/participants"))
      .respond_with(ResponseTemplate::new(200).set_body_json(body))
      .expect(1)
      .mount(&server)
      .await;

    let a = client(&server, Surface::Upstream).fetch_participants("tok", "E1").await.unwrap();
    let b = client(&server, Surface::Proxy).fetch_participants("tok", "E1").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a[0].uid, "P1");
  }

  #[tokio::test]
  async fn test_proxy_user_requires_user_id_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/users/user"))
      .and(header("userId", "U1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "success": true, "status": 200, "message": "",
        "data": {
          "email": "a@b.c", "roles": "USER", "createdAt": "2025-01-01",
          "isPremium": false, "isVerifiedEmail": true, "premiumAt": null,
          "premiumExpiredAt": null, "premiumPackage": "FREEPLAN"
        }
      })))
      .mount(&server)
      .await;

    let proxy = client(&server, Surface::Proxy);
    let user = proxy.fetch_user("tok", "U1").await.unwrap();
    assert_eq!(user.email, "a@b.c");

    let err = proxy.fetch_user("tok", "").await.unwrap_err();
    assert_eq!(err.to_string(), "User ID not found");
  }

  #[tokio::test]
  async fn test_path_segments_are_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
      .and(path("/api/events/participants/E%2F1/P1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "success": true, "status": 200, "message": "deleted"
      })))
      .expect(1)
      .mount(&server)
      .await;

    let env = client(&server, Surface::Upstream)
      .delete_participant("tok", "E/1", "P1")
      .await
      .unwrap();
    assert_eq!(env.message, "deleted");
  }

  #[tokio::test]
  async fn test_upload_logo_sends_slot_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/events/E1/upload-logo/second"))
      .and(header("authorization", "Bearer tok"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "success": true, "status": 200, "message": "ok",
        "data": {"secondLogo": "/logos/E1-2.png"}
      })))
      .expect(1)
      .mount(&server)
      .await;

    let file = LogoFile {
      file_name: "logo.png".to_string(),
      content_type: Some("image/png".to_string()),
      bytes: vec![0x89, 0x50, 0x4e, 0x47],
    };
    let data = client(&server, Surface::Upstream)
      .upload_logo("tok", "E1", LogoSlot::Second, file)
      .await
      .unwrap();
    assert_eq!(data.fields["secondLogo"], "/logos/E1-2.png");

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"second_logo\""));
  }

  #[tokio::test]
  async fn test_sign_in_rejects_bad_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/auth/sign-in"))
      .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
        "success": false, "status": 401, "message": "Wrong password"
      })))
      .mount(&server)
      .await;

    let err = client(&server, Surface::Upstream).sign_in("a@b.c", "x").await.unwrap_err();
    assert_eq!(err, FetchError::Unauthorized("Wrong password".to_string()));
  }
}
