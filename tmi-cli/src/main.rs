//! tmi-cli: print Twitch chat to the terminal.
//!
//! Connects with a user token, joins the requested channels, and prints each
//! message as `#channel <DisplayName> text` until Ctrl-C.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tmi_sdk::auth::StaticToken;
use tmi_sdk::users::HelixUsers;
use tmi_sdk::{ChatClient, ChatListener, ConnectConfig, ReconnectConfig, UserProfile};

use crate::config::{Config, Resolved};

#[derive(Parser, Debug)]
#[command(name = "tmi-cli", about = "Read Twitch chat from the terminal")]
pub struct Args {
    /// Chat server address (host:port)
    #[arg(long)]
    server: Option<String>,

    /// Login name
    #[arg(long)]
    nick: Option<String>,

    /// OAuth access token (or set TMI_TOKEN env var)
    #[arg(long, env = "TMI_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Application client id for user lookups (or set TMI_CLIENT_ID env var)
    #[arg(long, env = "TMI_CLIENT_ID")]
    client_id: Option<String>,

    /// Channel to join (repeatable)
    #[arg(short, long = "channel")]
    channels: Vec<String>,

    /// Connect without TLS
    #[arg(long)]
    no_tls: bool,

    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Prints every message it receives.
struct Printer {
    channel: String,
}

impl ChatListener for Printer {
    fn on_message_received(&self, user: &UserProfile, message: &str, emotes: &str) {
        if emotes.is_empty() {
            println!("#{} <{}> {}", self.channel, user.display_name, message);
        } else {
            println!("#{} <{}> {} [emotes {}]", self.channel, user.display_name, message, emotes);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tmi_cli=info,tmi_sdk=info".into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(config::default_path);
    let file = Config::load(&config_path)?;
    let settings = Resolved::merge(&args, &file);

    let token = settings
        .token
        .clone()
        .context("No token: pass --token, set TMI_TOKEN, or add `token` to the config file")?;
    let mut tokens = StaticToken::new(token);
    if let Some(client_id) = &settings.client_id {
        tokens = tokens.with_client_id(client_id.clone());
    }
    let tokens = Arc::new(tokens);

    let connect_config = ConnectConfig {
        server_addr: settings.server.clone(),
        tls: settings.tls,
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_secs(settings.reconnect_initial_secs),
            max_delay: Duration::from_secs(settings.reconnect_max_secs),
            ..ReconnectConfig::default()
        },
        ..ConnectConfig::new(settings.nick.clone())
    };

    tracing::info!(
        server = %settings.server,
        nick = %settings.nick,
        channels = ?settings.channels,
        "Starting tmi-cli"
    );

    let client = ChatClient::builder(connect_config, Arc::new(HelixUsers::new(tokens.clone())))
        .tokens(tokens)
        .build();

    let mut listeners: Vec<(String, Arc<dyn ChatListener>)> = Vec::new();
    for channel in &settings.channels {
        let channel = tmi_sdk::registry::canonical_channel(channel);
        let listener: Arc<dyn ChatListener> = Arc::new(Printer {
            channel: channel.clone(),
        });
        client.join(&channel, listener.clone()).await?;
        listeners.push((channel, listener));
    }

    client.connect().await.context("Failed to connect")?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    for (channel, listener) in &listeners {
        if let Err(e) = client.leave(channel, listener).await {
            tracing::debug!(channel = %channel, error = %e, "PART not delivered");
        }
    }
    client.disconnect().await;
    Ok(())
}
