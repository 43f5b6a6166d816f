//! Client commands: read resources through this service's proxy routes via
//! the query store, the same way a view would.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};

use crate::api::types::{EventData, LogoFile, LogoSlot, ParticipantData, UserData};
use crate::api::{Surface, UpstreamClient};
use crate::broadcast::RefreshBroadcaster;
use crate::config::Config;
use crate::hooks::{EventsQuery, ParticipantActions, ParticipantsQuery};
use crate::query::{QueryClient, QueryKey, QueryOptions};

#[derive(Subcommand, Debug, Clone)]
pub enum ClientCommand {
  /// List the organizer's events
  Events,
  /// List an event's participants
  Participants {
    /// Event UID
    event_uid: String,
  },
  /// Show the signed-in user's profile
  User {
    /// User id sent in the userId header
    #[arg(long, env = "EVENTCERT_USER_ID")]
    user_id: String,
  },
  /// Remove a participant from an event, then print the refreshed roster
  RemoveParticipant {
    event_uid: String,
    participant_uid: String,
  },
  /// Upload one of the event's two logos
  UploadLogo {
    event_uid: String,
    /// "first" or "second"
    option: String,
    file: PathBuf,
  },
}

/// Query store and accessors bound to the proxy surface.
pub struct ClientContext {
  queries: QueryClient,
  api: UpstreamClient,
  events: EventsQuery,
  participants: ParticipantsQuery,
  actions: ParticipantActions,
}

impl ClientContext {
  pub fn new(config: &Config) -> Result<Self> {
    let api = UpstreamClient::new(&config.server.public_url, Surface::Proxy, config.upstream.timeout())?;
    let queries = QueryClient::new();
    let broadcaster = RefreshBroadcaster::new(queries.clone());

    Ok(Self {
      events: EventsQuery::new(queries.clone(), api.clone(), config.events_query()),
      participants: ParticipantsQuery::new(
        queries.clone(),
        api.clone(),
        config.participants_query(),
        broadcaster.clone(),
      ),
      actions: ParticipantActions::new(api.clone(), broadcaster),
      queries,
      api,
    })
  }

  /// Run a command and return the lines to print.
  pub async fn run(&self, command: &ClientCommand, token: &str) -> Result<Vec<String>> {
    if token.is_empty() {
      return Err(eyre!("A bearer token is required. Pass --token or set EVENTCERT_TOKEN."));
    }

    match command {
      ClientCommand::Events => {
        let events = self.events.fetch(token).await?;
        Ok(event_lines(&events))
      }
      ClientCommand::Participants { event_uid } => {
        let participants = self.participants.fetch(token, event_uid).await?;
        Ok(participant_lines(&participants))
      }
      ClientCommand::User { user_id } => {
        let api = self.api.clone();
        let (t, id) = (token.to_string(), user_id.clone());
        let user = self
          .queries
          .fetch_query(&QueryKey::user(user_id, token), &QueryOptions::default(), move || {
            let api = api.clone();
            let (t, id) = (t.clone(), id.clone());
            async move { api.fetch_user(&t, &id).await }
          })
          .await?;
        Ok(user_lines(&user))
      }
      ClientCommand::RemoveParticipant {
        event_uid,
        participant_uid,
      } => {
        // An observed roster is refetched by the delete's broadcast
        self.participants.fetch(token, event_uid).await?;
        let _mounted = self.participants.subscribe(token, event_uid);
        let envelope = self.actions.delete(token, event_uid, participant_uid).await?;

        let mut lines = vec![envelope.message_or("Participant deleted")];
        let roster = self.participants.fetch(token, event_uid).await?;
        lines.extend(participant_lines(&roster));
        Ok(lines)
      }
      ClientCommand::UploadLogo {
        event_uid,
        option,
        file,
      } => {
        let slot = LogoSlot::parse(option).ok_or_else(|| eyre!("Invalid option {}", option))?;
        let logo = read_logo(file).await?;
        let data = self.api.upload_logo(token, event_uid, slot, logo).await?;
        self.events.refresh(token);

        let mut lines = vec!["Event logo uploaded successfully".to_string()];
        lines.extend(data.fields.iter().map(|(k, v)| format!("{}: {}", k, v)));
        Ok(lines)
      }
    }
  }
}

async fn read_logo(path: &Path) -> Result<LogoFile> {
  let bytes = tokio::fs::read(path)
    .await
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "logo".to_string());
  let content_type = match path.extension().and_then(|e| e.to_str()) {
    Some("png") => Some("image/png"),
    Some("jpg") | Some("jpeg") => Some("image/jpeg"),
    Some("svg") => Some("image/svg+xml"),
    Some("webp") => Some("image/webp"),
    _ => None,
  };

  Ok(LogoFile {
    file_name,
    content_type: content_type.map(str::to_string),
    bytes,
  })
}

fn event_lines(events: &[EventData]) -> Vec<String> {
  if events.is_empty() {
    return vec!["No events".to_string()];
  }
  events
    .iter()
    .map(|e| format!("{:<24} {}", e.uid, e.event_name))
    .collect()
}

fn participant_lines(participants: &[ParticipantData]) -> Vec<String> {
  if participants.is_empty() {
    return vec!["No participants".to_string()];
  }
  participants
    .iter()
    .map(|p| {
      format!(
        "{:<24} {:<28} {:<32} {}",
        p.uid, p.name, p.email, p.certificate_number
      )
    })
    .collect()
}

fn user_lines(user: &UserData) -> Vec<String> {
  let mut lines = vec![
    format!("email:     {}", user.email),
    format!("role:      {:?}", user.roles),
    format!("package:   {:?}", user.premium_package),
    format!("verified:  {}", user.is_verified_email),
  ];
  if let Some(expires) = &user.premium_expired_at {
    lines.push(format!("premium until: {}", expires));
  }
  lines
}
