//! # Main Entry Point
//!
//! Wires the bot together:
//! - Domain: configuration, types and the collaborator traits
//! - Infrastructure: Matrix channel adapter and the JSON-backed store
//! - Application: dispatcher, sessions, flows and the fan-out engine
//! - Interface: the feature command handlers
//!

mod application;
mod domain;
mod infrastructure;
mod interface;
mod strings;

use anyhow::{Context, Result};
use clap::Parser;
use matrix_sdk::{
    Client,
    config::SyncSettings,
    room::Room,
    ruma::events::room::{
        member::{MembershipState, StrippedRoomMemberEvent},
        message::{MessageType, SyncRoomMessageEvent},
    },
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::application::audit::AuditLog;
use crate::application::dispatcher::{CommandTable, Dispatcher};
use crate::application::inbox::Inbox;
use crate::application::services::Services;
use crate::domain::config::AppConfig;
use crate::infrastructure::matrix::{Inbound, MatrixChannel, normalize};
use crate::infrastructure::store::MemoryStore;
use crate::interface::commands::{self, subscription};
use crate::strings::messages;

#[derive(Debug, Parser)]
#[command(version, about = "Community bot: link suggestions, moderation and topic subscriptions over Matrix")]
struct Args {
    /// Path of the YAML configuration.
    #[arg(short, long, default_value = "data/config.yaml")]
    config: PathBuf,

    /// Overrides `system.data_dir`.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Configuration
    let config = AppConfig::load(&args.config)?;
    let data_dir = args.data_dir.clone().unwrap_or_else(|| config.data_dir());
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    // 2. Logging
    let file_appender = tracing_appender::rolling::never(&data_dir, "session.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(
            "info,matrix_sdk=warn,matrix_sdk_base=warn,matrix_sdk_crypto=error,ruma=warn,hyper=warn",
        )
    });
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::info!("Starting binderbot (data in {})...", data_dir.display());

    // 3. Storage
    let store = Arc::new(MemoryStore::open(data_dir.join("store.json"))?);
    let audit = AuditLog::new(data_dir.join("audit.log"));

    // 4. Matrix
    let matrix = &config.services.matrix;
    let client = Client::builder().homeserver_url(&matrix.homeserver).build().await?;
    client
        .matrix_auth()
        .login_username(&matrix.username, &matrix.password)
        .send()
        .await?;
    tracing::info!("Logged in as {}", matrix.username);

    if let Some(name) = &matrix.display_name {
        if let Err(e) = client.account().set_display_name(Some(name)).await {
            tracing::warn!("Failed to set display name: {}", e);
        }
    }

    // 5. Engines
    let channel = Arc::new(MatrixChannel::new(client.clone()));
    let services = Arc::new(Services::new(config.clone(), channel, store, audit));
    let mut table = CommandTable::new();
    commands::register_all(&mut table)?;
    let dispatcher = Dispatcher::new(services.clone(), table);

    // 6. Session sweeper
    let sweep_dispatcher = dispatcher.clone();
    let ttl = Duration::from_secs(config.sessions.idle_ttl_minutes * 60);
    let interval = Duration::from_secs(config.sessions.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let services = sweep_dispatcher.services();
            for user in sweep_dispatcher.expire_idle(ttl).await {
                tracing::info!(user = %user, "Session expired");
                if let Err(e) = services.reply(&user, messages::SESSION_EXPIRED).await {
                    tracing::warn!(user = %user, "Failed to notify session expiry: {}", e);
                }
            }
            let pruned = sweep_dispatcher.prune_lanes() + services.fanout.prune_lanes();
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned idle lanes");
            }
        }
    });

    // 7. Event loop
    let start_time = SystemTime::now();
    let inbox = Inbox::new(dispatcher.clone());

    client.add_event_handler(move |ev: SyncRoomMessageEvent, room: Room| {
        let inbox = inbox.clone();
        let services = dispatcher.services().clone();

        async move {
            let Some(original_msg) = ev.as_original() else {
                return;
            };

            // Ignore events older than start_time
            let ts = ev.origin_server_ts();
            let event_time = UNIX_EPOCH + Duration::from_millis(ts.get().into());
            if event_time < start_time {
                return;
            }
            if original_msg.sender == room.own_user_id() {
                return;
            }
            let MessageType::Text(text_content) = &original_msg.content.msgtype else {
                return;
            };

            let body = text_content.body.clone();
            let sender = original_msg.sender.to_string();
            tracing::info!("Received message from {} in {}", sender, room.room_id());

            let inbound = normalize(
                &services.config.channels,
                room.room_id().as_str(),
                &sender,
                original_msg.event_id.as_str(),
                &body,
            );

            match inbound {
                // Queued per user, so one user's events are handled in arrival order.
                Inbound::Event(event) => inbox.push(event),
                Inbound::ChannelPost { message, tags } => {
                    let handle = tokio::spawn(async move {
                        if let Err(e) = subscription::broadcast_post(&services, message, tags).await {
                            tracing::error!("Broadcast fan-out failed: {:#}", e);
                        }
                    });
                    tokio::spawn(async move {
                        if let Err(e) = handle.await {
                            tracing::error!("Broadcast task panicked: {}", e);
                        }
                    });
                }
                Inbound::Ignored(reason) => tracing::debug!("Ignoring message from {}: {}", sender, reason),
            }
        }
    });

    // Handle Invites
    client.add_event_handler(|ev: StrippedRoomMemberEvent, room: Room| async move {
        if ev.content.membership == MembershipState::Invite {
            if let Err(e) = room.join().await {
                tracing::warn!("Failed to join {}: {}", room.room_id(), e);
            }
        }
    });

    // 8. Sync forever
    client.sync(SyncSettings::default()).await?;
    Ok(())
}
