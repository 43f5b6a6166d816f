use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Deserialize;
use std::time::Duration;

use super::{Session, SessionError, SessionUser};
use crate::api::types::{PremiumPackage, Role};
use crate::config::SessionConfig;

/// Claims of the bearer token the upstream issues on sign-in.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamClaims {
  id_user: String,
  email: String,
  is_premium: bool,
  #[serde(default)]
  is_verified_email: bool,
  premium_package: PremiumPackage,
  roles: Role,
}

/// Signs and verifies session tokens.
pub struct SessionCodec {
  encoding: EncodingKey,
  decoding: DecodingKey,
  upstream: DecodingKey,
  max_age: Duration,
  update_age: Duration,
}

impl SessionCodec {
  pub fn new(secret: &str, upstream_secret: &str, config: &SessionConfig) -> Self {
    Self {
      encoding: EncodingKey::from_secret(secret.as_bytes()),
      decoding: DecodingKey::from_secret(secret.as_bytes()),
      upstream: DecodingKey::from_secret(upstream_secret.as_bytes()),
      max_age: Duration::from_secs(config.max_age_secs),
      update_age: Duration::from_secs(config.update_age_secs),
    }
  }

  pub fn max_age(&self) -> Duration {
    self.max_age
  }

  /// Start a new session for `user`, valid for the configured max age.
  pub fn issue(&self, user: SessionUser, token: String) -> Result<(Session, String), SessionError> {
    let now = Utc::now().timestamp();
    let session = Session {
      user,
      token,
      issued_at: now,
      expires_at: now + self.max_age.as_secs() as i64,
    };
    let signed = self.sign(&session)?;
    Ok((session, signed))
  }

  /// Same user and upstream token, fresh lifetime.
  pub fn reissue(&self, session: &Session) -> Result<(Session, String), SessionError> {
    self.issue(session.user.clone(), session.token.clone())
  }

  pub fn sign(&self, session: &Session) -> Result<String, SessionError> {
    encode(&Header::new(Algorithm::HS256), session, &self.encoding)
      .map_err(|e| SessionError::Signing(e.to_string()))
  }

  /// Verify a session cookie value.
  pub fn verify(&self, signed: &str) -> Result<Session, SessionError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    decode::<Session>(signed, &self.decoding, &validation)
      .map(|data| data.claims)
      .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => SessionError::Expired,
        _ => SessionError::Invalid(e.to_string()),
      })
  }

  /// Sessions older than the update age are re-issued on their next use.
  pub fn needs_reissue(&self, session: &Session) -> bool {
    let age = Utc::now().timestamp() - session.issued_at;
    age >= self.update_age.as_secs() as i64
  }

  /// Build the session user from the bearer token returned by the upstream
  /// sign-in, verifying its signature with the upstream secret.
  pub fn from_upstream_token(&self, jwt: &str) -> Result<SessionUser, SessionError> {
    let mut validation = Validation::new(Algorithm::HS256);
    // The upstream may issue tokens without an expiry
    validation.required_spec_claims.clear();
    let claims = decode::<UpstreamClaims>(jwt, &self.upstream, &validation)
      .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => SessionError::Expired,
        _ => SessionError::Invalid(e.to_string()),
      })?
      .claims;

    Ok(SessionUser {
      id: claims.id_user,
      email: claims.email,
      is_premium: claims.is_premium,
      premium_package: claims.premium_package,
      is_verified_email: claims.is_verified_email,
      roles: claims.roles,
    })
  }
}
