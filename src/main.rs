mod api;
mod broadcast;
mod cache;
mod commands;
mod config;
mod error;
mod hooks;
mod logging;
mod query;
mod server;
mod session;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::net::SocketAddr;
use std::path::PathBuf;

use commands::{ClientCommand, ClientContext};

#[derive(Parser, Debug)]
#[command(name = "eventcert")]
#[command(about = "Backend-for-frontend and data-sync layer for event certificates")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/eventcert/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Upstream API base URL, overriding the config file
  #[arg(long, global = true, env = "EVENTCERT_BACKEND_URL")]
  backend_url: Option<String>,

  /// Bearer token for client commands
  #[arg(long, global = true, env = "EVENTCERT_TOKEN", default_value = "", hide_env_values = true)]
  token: String,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the HTTP server
  Serve {
    /// Address to listen on, overriding the config file
    #[arg(long)]
    listen: Option<SocketAddr>,
  },
  #[command(flatten)]
  Client(ClientCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(url) = args.backend_url {
    config.upstream.url = url;
  }

  let _guard = logging::init(&config.logging)?;

  match args.command {
    Command::Serve { listen } => {
      if let Some(listen) = listen {
        config.server.listen = listen;
      }
      let auth_secret = config::Config::get_auth_secret()?;
      let upstream_secret = config::Config::get_upstream_jwt_secret()?;
      server::serve(config, &auth_secret, &upstream_secret).await?;
    }
    Command::Client(command) => {
      let context = ClientContext::new(&config)?;
      for line in context.run(&command, &args.token).await? {
        println!("{}", line);
      }
    }
  }

  Ok(())
}
