use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use crate::api::{Surface, UpstreamClient};
use crate::cache::{CacheLayer, CacheStorage, MemoryStorage, NoopStorage};
use crate::config::Config;
use crate::session::SessionCodec;

/// Server cache with the storage chosen by configuration.
pub type ServerCache = CacheLayer<Box<dyn CacheStorage>>;

/// The application's state, shared by every handler.
#[derive(Clone)]
pub struct AppState {
  pub config: Arc<Config>,
  /// Client for the upstream REST API
  pub upstream: UpstreamClient,
  pub cache: ServerCache,
  pub sessions: Arc<SessionCodec>,
}

impl AppState {
  pub fn new(config: &Config, auth_secret: &str, upstream_jwt_secret: &str) -> Result<Self> {
    let upstream = UpstreamClient::new(&config.upstream.url, Surface::Upstream, config.upstream.timeout())?;
    info!(url = %config.upstream.url, "upstream client initialized");

    let storage: Box<dyn CacheStorage> = if config.cache.server_enabled {
      Box::new(MemoryStorage::new())
    } else {
      info!("server cache disabled");
      Box::new(NoopStorage)
    };

    Ok(Self {
      config: Arc::new(config.clone()),
      upstream,
      cache: CacheLayer::new(storage),
      sessions: Arc::new(SessionCodec::new(auth_secret, upstream_jwt_secret, &config.session)),
    })
  }
}
