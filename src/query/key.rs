//! Query keys and the tag vocabulary used for bulk invalidation.

use sha2::{Digest, Sha256};
use std::fmt;

/// Resource type a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
  Events,
  Participants,
  User,
  Users,
}

impl Resource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Events => "events",
      Self::Participants => "participants",
      Self::User => "user",
      Self::Users => "users",
    }
  }
}

/// Cache key: resource type, optional discriminator (event uid or user id)
/// and the bearer token it was fetched with.
///
/// The token only takes part in the key as a SHA-256 digest, so the cache
/// separates users without keeping their tokens around.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
  resource: Resource,
  scope: Option<String>,
  token_digest: String,
}

impl QueryKey {
  pub fn events(token: &str) -> Self {
    Self::new(Resource::Events, None, token)
  }

  pub fn participants(event_uid: &str, token: &str) -> Self {
    Self::new(Resource::Participants, Some(event_uid), token)
  }

  pub fn user(user_id: &str, token: &str) -> Self {
    Self::new(Resource::User, Some(user_id), token)
  }

  pub fn users(token: &str) -> Self {
    Self::new(Resource::Users, None, token)
  }

  fn new(resource: Resource, scope: Option<&str>, token: &str) -> Self {
    Self {
      resource,
      scope: scope.map(String::from),
      token_digest: digest(token),
    }
  }

  pub fn resource(&self) -> Resource {
    self.resource
  }

  pub fn scope(&self) -> Option<&str> {
    self.scope.as_deref()
  }

  /// Tags this key is indexed under.
  pub fn tags(&self) -> Vec<String> {
    match (self.resource, self.scope.as_deref()) {
      (Resource::Events, _) => vec![tags::EVENTS.to_string()],
      (Resource::Participants, Some(event_uid)) => vec![
        tags::PARTICIPANTS.to_string(),
        tags::participants_of(event_uid),
      ],
      (Resource::Participants, None) => vec![tags::PARTICIPANTS.to_string()],
      (Resource::User, Some(user_id)) => vec![tags::user(user_id)],
      (Resource::User, None) => Vec::new(),
      (Resource::Users, _) => vec![tags::USERS.to_string()],
    }
  }
}

impl fmt::Debug for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Short digest prefix keeps logs readable
    let token = &self.token_digest[..8];
    match &self.scope {
      Some(scope) => write!(f, "[{}, {}, {}]", self.resource.as_str(), scope, token),
      None => write!(f, "[{}, {}]", self.resource.as_str(), token),
    }
  }
}

fn digest(token: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(token.as_bytes());
  hex::encode(hasher.finalize())
}

/// Which entries an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
  All,
  Key(QueryKey),
  Tag(String),
}

impl QueryFilter {
  pub fn tag(tag: impl Into<String>) -> Self {
    Self::Tag(tag.into())
  }
}

/// Tag vocabulary shared by the client store and the server cache layer.
/// Invalidation only works when producers and consumers agree on these.
pub mod tags {
  pub const EVENTS: &str = "events";
  pub const PARTICIPANTS: &str = "participants";
  pub const USERS: &str = "users";

  pub fn participants_of(event_uid: &str) -> String {
    format!("participants-{}", event_uid)
  }

  pub fn user(user_id: &str) -> String {
    format!("user-{}", user_id)
  }
}
