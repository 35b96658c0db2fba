use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use sofa_guest::config::{
    resolve_queue_frames, GuestConfig, ReconnectPolicy, DEFAULT_MAX_RECONNECTS,
    DEFAULT_RECONNECT_DELAY_MS,
};
use sofa_guest::session::{Guest, SessionEnd};
use sofa_guest::storage::{DiagnosticLog, Settings, SettingsStore};
use sofa_transport::TransportFactory;
use sofa_transport_webrtc::WebRtcTransportFactory;

#[derive(Parser, Debug)]
#[command(name = "sofa-guest")]
#[command(about = "Sofa guest - streams remote play from a host through a signaling relay")]
struct Args {
    /// Relay WebSocket URL; falls back to the persisted value
    #[arg(long)]
    relay_url: Option<String>,

    /// Display name announced to the host
    #[arg(long)]
    name: Option<String>,

    /// Preferred gamepad index
    #[arg(long)]
    gamepad: Option<usize>,

    /// Baseline jitter-buffer depth in frames; overrides the persisted value
    #[arg(long)]
    queue_frames: Option<u32>,

    /// STUN server URL(s) for the transport; repeatable
    #[arg(long)]
    stun: Vec<String>,

    /// Directory for settings and the diagnostic log
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Reconnect attempts after an established session drops
    #[arg(long, default_value_t = DEFAULT_MAX_RECONNECTS)]
    max_reconnects: u32,

    /// Delay between reconnect attempts in milliseconds
    #[arg(long, default_value_t = DEFAULT_RECONNECT_DELAY_MS)]
    reconnect_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    sofa_common::init_tracing();
    let args = Args::parse();

    let config_dir = match args.config_dir.clone() {
        Some(dir) => dir,
        None => dirs::config_dir()
            .ok_or_else(|| anyhow!("no config directory on this platform; pass --config-dir"))?
            .join("sofa"),
    };
    let store = SettingsStore::new(&config_dir);
    let diag = DiagnosticLog::new(&config_dir);
    let saved = store.load();

    if let Some(previous) = diag.restore() {
        info!("restored previous diagnostic log ({} bytes)", previous.len());
    }

    let relay_url = args
        .relay_url
        .clone()
        .or_else(|| saved.relay_url.clone())
        .context("no relay URL; pass --relay-url or connect once with one")?;

    let mut config = GuestConfig::new(relay_url.clone());
    config.guest_name = args.name.clone().or_else(|| saved.guest_name.clone());
    config.gamepad_index = args.gamepad.or(saved.gamepad_index);
    config.video_queue_frames = resolve_queue_frames(args.queue_frames, saved.video_queue_frames);

    let mut settings = Settings {
        relay_url: Some(relay_url),
        guest_name: config.guest_name.clone(),
        gamepad_index: config.gamepad_index,
        video_queue_frames: Some(config.video_queue_frames),
    };
    store.save(&settings);

    let factory: Arc<dyn TransportFactory> = Arc::new(WebRtcTransportFactory {
        ice_servers: args.stun.clone(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let _ = shutdown_tx.send(true);
        }
    });

    let guest = Guest::new();
    let reconnect = ReconnectPolicy {
        max_attempts: args.max_reconnects,
        delay: Duration::from_millis(args.reconnect_delay_ms),
    };
    let mut ever_established = false;
    let mut attempts_left = reconnect.max_attempts;

    loop {
        match guest
            .connect(
                config.clone(),
                factory.clone(),
                diag.clone(),
                shutdown_rx.clone(),
            )
            .await
        {
            Ok(outcome) => {
                info!(
                    "session ended ({:?}): {}",
                    outcome.end,
                    if outcome.reason.is_empty() {
                        "no reason given"
                    } else {
                        outcome.reason.as_str()
                    }
                );
                if outcome.established {
                    ever_established = true;
                    attempts_left = reconnect.max_attempts;
                }
                if let Some(index) = outcome.selected_gamepad {
                    config.gamepad_index = Some(index);
                    settings.gamepad_index = Some(index);
                }
                if outcome.end == SessionEnd::UserRequested {
                    break;
                }
            }
            Err(err) => warn!("connect failed: {err}"),
        }

        if *shutdown_rx.borrow() {
            break;
        }
        if !ever_established || attempts_left == 0 {
            break;
        }
        attempts_left -= 1;

        // Persist current settings before the restart, like any orderly exit.
        store.save(&settings);
        diag.append(&format!("reconnecting in {} ms", reconnect.delay.as_millis()));
        info!("reconnecting in {} ms", reconnect.delay.as_millis());
        tokio::time::sleep(reconnect.delay).await;
    }

    store.save(&settings);
    Ok(())
}
