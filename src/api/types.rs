//! Resource payloads carried inside upstream envelopes.
//!
//! Field names follow the upstream's camelCase wire format. Unknown fields on
//! events are kept so the proxy routes pass them through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PremiumPackage {
  Freeplan,
  Silver,
  Platinum,
  Gold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
  User,
  Superadmin,
}

/// An event owned by the signed-in organizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
  pub uid: String,
  #[serde(default)]
  pub event_name: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCode {
  pub path_qr: String,
  pub generated_at: String,
}

/// A participant on an event roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantData {
  pub uid: String,
  pub name: String,
  pub email: String,
  #[serde(default)]
  pub position: String,
  #[serde(default)]
  pub added_at: String,
  #[serde(default)]
  pub certificate_number: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub qr_codes: Option<Vec<QrCode>>,
}

/// Partial participant update; absent fields are left unchanged upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateParticipant {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub position: Option<String>,
}

/// Profile of the signed-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
  pub email: String,
  pub roles: Role,
  pub created_at: String,
  pub is_premium: bool,
  #[serde(default)]
  pub is_verified_email: bool,
  pub premium_at: Option<String>,
  pub premium_expired_at: Option<String>,
  pub premium_package: PremiumPackage,
}

/// One row of the admin user listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersData {
  pub uid: String,
  pub email: String,
  pub is_premium: bool,
  pub premium_at: Option<String>,
  pub created_at: String,
  pub premium_package: PremiumPackage,
  pub role: Role,
  #[serde(default)]
  pub update_at: String,
  pub premium_expired_at: Option<String>,
  #[serde(default)]
  pub events: u64,
}

/// Which of the two event logo slots an upload targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoSlot {
  First,
  Second,
}

impl LogoSlot {
  pub fn parse(option: &str) -> Option<Self> {
    match option {
      "first" => Some(Self::First),
      "second" => Some(Self::Second),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::First => "first",
      Self::Second => "second",
    }
  }

  /// Multipart field name carrying the file, e.g. `first_logo`.
  pub fn field_name(&self) -> String {
    format!("{}_logo", self.as_str())
  }
}

/// Logo file received by a proxy route and forwarded upstream.
#[derive(Debug, Clone)]
pub struct LogoFile {
  pub file_name: String,
  pub content_type: Option<String>,
  pub bytes: Vec<u8>,
}

/// Upstream answer to a logo upload. The shape is owned by the upstream and
/// passed through as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadLogoData {
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignInData {
  pub token: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_event_keeps_unknown_fields() {
    let json = serde_json::json!({
      "uid": "E1",
      "eventName": "Dev Summit",
      "eventDate": "2025-01-01",
    });
    let event: EventData = serde_json::from_value(json.clone()).unwrap();
    assert_eq!(event.event_name, "Dev Summit");
    assert_eq!(serde_json::to_value(&event).unwrap(), json);
  }

  #[test]
  fn test_participant_wire_names() {
    let p: ParticipantData = serde_json::from_value(serde_json::json!({
      "uid": "P1",
      "name": "Ana",
      "email": "ana@example.com",
      "position": "Speaker",
      "addedAt": "2025-01-01T00:00:00Z",
      "certificateNumber": "CERT-001",
      "qrCodes": [{"pathQr": "/qr/P1.png", "generatedAt": "2025-01-02"}]
    }))
    .unwrap();
    assert_eq!(p.certificate_number, "CERT-001");
    assert_eq!(p.qr_codes.unwrap()[0].path_qr, "/qr/P1.png");
  }

  #[test]
  fn test_logo_slot() {
    assert_eq!(LogoSlot::parse("first"), Some(LogoSlot::First));
    assert_eq!(LogoSlot::parse("third"), None);
    assert_eq!(LogoSlot::Second.field_name(), "second_logo");
  }

  #[test]
  fn test_roles_are_uppercase() {
    assert_eq!(serde_json::to_value(Role::Superadmin).unwrap(), "SUPERADMIN");
    let pkg: PremiumPackage = serde_json::from_value("GOLD".into()).unwrap();
    assert_eq!(pkg, PremiumPackage::Gold);
  }
}
