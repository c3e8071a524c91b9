//! Headless probe for the signaling hub
//!
//! Joins a room (or places / answers a 1:1 call) with silent synthetic
//! media and logs every state change until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Join a room and offer to everyone in it
//! TANDEM_TOKEN=... cargo run --bin room-probe -- room --room standup --name probe --start-call
//!
//! # Ring a user
//! cargo run --bin room-probe -- --token ... call --peer user-42 --video
//!
//! # Wait for calls and accept them
//! cargo run --bin room-probe -- --token ... listen --auto-accept
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tandem_rtc::{
    CallNotice, CallSession, Collaborators, PeerId, RoomSession, RtcConfig, SilentMediaDevices,
    StaticToken,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tandem signaling probe
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "TANDEM_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling hub URL (overrides the config file)
    #[arg(long, env = "TANDEM_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Session token presented to the hub
    #[arg(long, env = "TANDEM_TOKEN", default_value = "")]
    token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join a multi-party room
    Room {
        #[arg(long)]
        room: String,

        #[arg(long, default_value = "probe")]
        name: String,

        /// Offer to every participant after joining
        #[arg(long, default_value_t = false)]
        start_call: bool,
    },
    /// Ring a peer
    Call {
        #[arg(long)]
        peer: String,

        #[arg(long, default_value_t = false)]
        video: bool,
    },
    /// Wait for incoming calls
    Listen {
        #[arg(long, default_value_t = false)]
        auto_accept: bool,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_config(args: &Args) -> anyhow::Result<RtcConfig> {
    let mut config = match &args.config {
        Some(path) => RtcConfig::load(path)?,
        None => RtcConfig::default(),
    };
    if let Some(url) = &args.signaling_url {
        config.signaling_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = build_config(&args)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        signaling_url = %config.signaling_url,
        "Tandem probe starting"
    );

    let collab = Collaborators::webrtc(
        &config,
        Arc::new(StaticToken(args.token.clone())),
        Arc::new(SilentMediaDevices::new()),
    );

    match args.command {
        Command::Room {
            room,
            name,
            start_call,
        } => run_room(config, collab, &room, &name, start_call).await,
        Command::Call { peer, video } => {
            let calls = CallSession::connect(config, collab).await?;
            calls.start_call(PeerId::from(peer), video).await?;
            watch_calls(calls, false).await
        }
        Command::Listen { auto_accept } => {
            let calls = CallSession::connect(config, collab).await?;
            watch_calls(calls, auto_accept).await
        }
    }
}

async fn run_room(
    config: RtcConfig,
    collab: Collaborators,
    room_id: &str,
    name: &str,
    start_call: bool,
) -> anyhow::Result<()> {
    let room = RoomSession::new(config, collab)?;
    room.connect_to_room(room_id, name).await?;
    if start_call {
        let offered = room.start_call().await?;
        info!("Offered to {} participants", offered);
    }

    let mut states = room.subscribe();
    let mut notices = room.notices();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, leaving room");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                info!(
                    status = ?state.status,
                    participants = state.participants.len(),
                    signaling = ?state.signaling,
                    "Room state"
                );
                if !state.status.is_joined() && state.end_reason.is_some() {
                    warn!("Room closed: {:?}", state.end_reason);
                    break;
                }
            }
            Ok(notice) = notices.recv() => info!(?notice, "Room notice"),
        }
    }

    room.disconnect_from_room().await;
    Ok(())
}

async fn watch_calls(calls: CallSession, auto_accept: bool) -> anyhow::Result<()> {
    let mut states = calls.subscribe();
    let mut notices = calls.notices();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, hanging up");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                info!(
                    status = ?state.status,
                    peer = ?state.peer_id,
                    duration_secs = state.duration_secs,
                    "Call state"
                );
            }
            Ok(notice) = notices.recv() => {
                info!(?notice, "Call notice");
                if auto_accept && matches!(notice, CallNotice::IncomingCall { .. }) {
                    if let Err(e) = calls.accept_call().await {
                        warn!("Could not accept call: {}", e);
                    }
                }
            }
        }
    }

    if let Err(e) = calls.end_call().await {
        warn!("Hang up failed: {}", e);
    }
    calls.disconnect().await;
    Ok(())
}
