use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use huddle::config::Config;
use huddle::coordinator::{CoordinatorError, SessionCoordinator};
use huddle::media::rtc::{RtcTransportFactory, SyntheticCapture};
use huddle::signaling::{ChannelState, SignalingChannel};
use huddle::signaling::websocket::WebSocketConnector;
use huddle::telemetry::logging::{self, LogConfig, LogLevel};
use huddle::view::LogView;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Joins a mesh video conference through a signaling relay")]
struct Cli {
    /// Signaling relay address (http, https, ws or wss)
    #[arg(long, env = "HUDDLE_RELAY_URL")]
    relay_url: Option<String>,

    /// STUN/TURN server url; repeat for several
    #[arg(long = "ice-server", value_name = "URL")]
    ice_servers: Vec<String>,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn, env = "HUDDLE_LOG_LEVEL")]
    log_level: LogLevel,

    #[arg(long, help = "Write logs to a file instead of stderr", env = "HUDDLE_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[arg(long, help = "Exit instead of reconnecting when the relay drops")]
    no_reconnect: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(err) = logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    }) {
        eprintln!("⚠️  {err}");
    }

    match run(cli).await {
        Ok(()) => {}
        Err(err) => {
            let code = match err.downcast_ref::<CoordinatorError>() {
                Some(CoordinatorError::LocalMediaUnavailable(_)) => 2,
                _ => 1,
            };
            eprintln!("❌ {err:#}");
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env();
    if let Some(url) = cli.relay_url {
        config.relay_url = url;
    }
    if !cli.ice_servers.is_empty() {
        config.ice_servers = cli.ice_servers;
    }

    let url = config.relay_websocket_url()?;
    info!(relay = %url, ice_servers = ?config.ice_servers, "starting huddle");

    let channel = SignalingChannel::new(Arc::new(WebSocketConnector::new(url)));
    let factory = RtcTransportFactory::new(config.ice_servers.clone())
        .context("failed to initialise WebRTC")?;
    let coordinator = SessionCoordinator::new(
        channel,
        Arc::new(factory),
        Arc::new(SyntheticCapture::new("huddle-local")),
        LogView::new(),
    );

    match coordinator.join().await {
        Ok(()) => {}
        Err(CoordinatorError::Signaling(err)) if !cli.no_reconnect => {
            warn!(error = %err, "relay unavailable; retrying in the background");
        }
        Err(err) => return Err(err.into()),
    }

    let gave_up = if cli.no_reconnect {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => false,
            _ = wait_disconnected(&coordinator) => {
                warn!("relay connection lost");
                false
            }
        }
    } else {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => false,
            _ = coordinator.keep_connected(&config.reconnect) => true,
        }
    };

    coordinator.leave().await;
    if gave_up {
        anyhow::bail!("relay unreachable; gave up reconnecting");
    }
    Ok(())
}

async fn wait_disconnected(coordinator: &SessionCoordinator) {
    let mut state = coordinator.channel().subscribe_state();
    let _ = state
        .wait_for(|state| *state == ChannelState::Closed)
        .await;
}
