//! Signed session carried in a cookie.
//!
//! The session holds the signed-in user's profile and the upstream bearer
//! token. It is a stateless HS256 token: nothing is stored server side, and
//! a rolling re-issue keeps active users signed in past the original expiry.

mod codec;
mod request;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use codec::SessionCodec;
pub use request::RequestSession;

use crate::api::types::{PremiumPackage, Role};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
  pub id: String,
  pub email: String,
  pub is_premium: bool,
  pub premium_package: PremiumPackage,
  pub is_verified_email: bool,
  pub roles: Role,
}

/// An authenticated session. Immutable once issued; updates produce a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub user: SessionUser,
  /// Upstream bearer token
  pub token: String,
  /// Unix seconds
  #[serde(rename = "iat")]
  pub issued_at: i64,
  #[serde(rename = "exp")]
  pub expires_at: i64,
}

impl Session {
  pub fn is_superadmin(&self) -> bool {
    self.user.roles == Role::Superadmin
  }
}

/// Fields a client may change on its own session after an upstream update
/// (e.g. after upgrading a plan). Absent fields keep their current value.
/// Roles are not among them: they only change on a fresh sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
  pub email: Option<String>,
  pub is_premium: Option<bool>,
  pub premium_package: Option<PremiumPackage>,
  pub is_verified_email: Option<bool>,
}

impl SessionUpdate {
  pub fn apply(self, mut user: SessionUser) -> SessionUser {
    if let Some(email) = self.email {
      user.email = email;
    }
    if let Some(is_premium) = self.is_premium {
      user.is_premium = is_premium;
    }
    if let Some(package) = self.premium_package {
      user.premium_package = package;
    }
    if let Some(verified) = self.is_verified_email {
      user.is_verified_email = verified;
    }
    user
  }
}

#[derive(Debug, Error)]
pub enum SessionError {
  #[error("Session token is invalid: {0}")]
  Invalid(String),

  #[error("Session expired")]
  Expired,

  #[error("Failed to sign session: {0}")]
  Signing(String),
}
