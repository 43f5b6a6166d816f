use std::sync::{Arc, OnceLock};
use tracing::debug;

use super::{Session, SessionCodec};

/// Per-request session accessor.
///
/// Built once per request from the session cookie. The cookie is verified
/// on first use only; every later call, from any handler or helper sharing
/// this request, gets the same `Arc`.
#[derive(Clone)]
pub struct RequestSession {
  inner: Arc<Inner>,
}

struct Inner {
  codec: Arc<SessionCodec>,
  cookie: Option<String>,
  resolved: OnceLock<Option<Arc<Session>>>,
}

impl RequestSession {
  pub fn new(codec: Arc<SessionCodec>, cookie: Option<String>) -> Self {
    Self {
      inner: Arc::new(Inner {
        codec,
        cookie,
        resolved: OnceLock::new(),
      }),
    }
  }

  /// The current session, or `None` when the cookie is absent, invalid or
  /// expired.
  pub fn get_session(&self) -> Option<Arc<Session>> {
    self
      .inner
      .resolved
      .get_or_init(|| {
        let cookie = self.inner.cookie.as_deref()?;
        match self.inner.codec.verify(cookie) {
          Ok(session) => Some(Arc::new(session)),
          Err(e) => {
            debug!(error = %e, "ignoring session cookie");
            None
          }
        }
      })
      .clone()
  }

  /// Upstream bearer token of the current session.
  pub fn token(&self) -> Option<String> {
    self.get_session().map(|s| s.token.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{PremiumPackage, Role};
  use crate::config::SessionConfig;
  use crate::session::SessionUser;

  fn codec() -> Arc<SessionCodec> {
    Arc::new(SessionCodec::new("s", "u", &SessionConfig::default()))
  }

  fn signed(codec: &SessionCodec) -> String {
    let user = SessionUser {
      id: "U1".into(),
      email: "ana@example.com".into(),
      is_premium: false,
      premium_package: PremiumPackage::Freeplan,
      is_verified_email: true,
      roles: Role::User,
    };
    codec.issue(user, "bearer".into()).unwrap().1
  }

  #[test]
  fn test_same_session_within_a_request() {
    let codec = codec();
    let request = RequestSession::new(codec.clone(), Some(signed(&codec)));

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let request = request.clone();
        std::thread::spawn(move || request.get_session().unwrap())
      })
      .collect();
    let first = request.get_session().unwrap();
    for handle in handles {
      assert!(Arc::ptr_eq(&first, &handle.join().unwrap()));
    }
    assert_eq!(request.token().as_deref(), Some("bearer"));
  }

  #[test]
  fn test_missing_or_garbage_cookie_is_no_session() {
    assert!(RequestSession::new(codec(), None).get_session().is_none());
    let request = RequestSession::new(codec(), Some("garbage".into()));
    assert!(request.get_session().is_none());
    assert!(request.get_session().is_none());
  }
}
