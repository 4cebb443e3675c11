// murmur: command-line chat client.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use murmur_client::config::ClientConfig;
use murmur_client::connection::SessionEvent;
use murmur_client::identity::IdentityProvider;
use murmur_client::runtime::{self, SyncHandle};
use murmur_common::types::{Identity, Role};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "murmur", about = "Real-time chat sync client")]
struct Cli {
    /// Config file (defaults to ~/.murmur/client.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server endpoint override, e.g. wss://chat.example.com/ws.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Log filter (falls back to RUST_LOG, then `info`).
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stay connected as one identity and log what arrives
    Listen {
        #[arg(long)]
        user: String,
        #[arg(long, value_enum, default_value_t = RoleArg::Primary)]
        role: RoleArg,
    },
    /// Send one message and exit
    Send {
        #[arg(long)]
        user: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        image_url: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Primary,
    Counterparty,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Primary => Role::Primary,
            RoleArg::Counterparty => Role::Counterparty,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_filter.as_deref());

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)
            .with_context(|| format!("failed to load config `{}`", path.display()))?,
        None => ClientConfig::load().context("failed to load client config")?,
    };
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    match cli.command {
        Command::Listen { user, role } => listen(&config, Identity::new(user, role.into())).await,
        Command::Send { user, to, message, image_url } => {
            send(&config, Identity::new(user, Role::Primary), &to, message, image_url).await
        }
    }
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => tracing_subscriber::EnvFilter::new(filter),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn listen(config: &ClientConfig, identity: Identity) -> Result<()> {
    let provider = IdentityProvider::new();
    let handle = runtime::start(config, &provider);
    let mut lifecycle = handle.subscribe_lifecycle();
    let mut presence = handle.presence().subscribe();
    provider.login(identity);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = lifecycle.recv() => match event {
                Ok(event) => info!(event = ?event, "session"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "lifecycle events skipped"),
                Err(RecvError::Closed) => break,
            },
            changed = presence.changed() => {
                if changed.is_err() {
                    break;
                }
                let online: Vec<String> = presence.borrow_and_update().iter().cloned().collect();
                info!(online = ?online, "presence");
            }
        }
    }

    log_summary(&handle).await;
    handle.wait().await;
    Ok(())
}

async fn send(
    config: &ClientConfig,
    identity: Identity,
    to: &str,
    body: Option<String>,
    image_url: Option<String>,
) -> Result<()> {
    let provider = IdentityProvider::new();
    let handle = runtime::start(config, &provider);
    let mut lifecycle = handle.subscribe_lifecycle();
    provider.login(identity);

    tokio::time::timeout(READY_TIMEOUT, wait_ready(&mut lifecycle))
        .await
        .context("timed out waiting for chat session")??;

    handle.send_message(to, body, image_url).await.context("failed to send message")?;
    info!(to, "message sent");
    handle.wait().await;
    Ok(())
}

async fn wait_ready(
    lifecycle: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> Result<()> {
    loop {
        match lifecycle.recv().await {
            Ok(SessionEvent::Ready { session_id, .. }) => {
                info!(session_id = %session_id, "session ready");
                return Ok(());
            }
            Ok(SessionEvent::RetriesExhausted { attempts, .. }) => {
                return Err(anyhow!("server unreachable after {attempts} attempts"));
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return Err(anyhow!("sync runtime stopped")),
        }
    }
}

async fn log_summary(handle: &SyncHandle) {
    let cache = handle.cache();
    let cache = cache.read().await;
    for key in cache.conversation_keys() {
        let preview = cache
            .conversation(&key)
            .and_then(|conversation| conversation.last_message_meta())
            .map(|meta| meta.preview.clone())
            .unwrap_or_default();
        info!(
            conversation = %key,
            messages = cache.messages(&key).len(),
            unread = cache.unread_count(&key),
            preview = %preview,
            "conversation"
        );
    }
}
