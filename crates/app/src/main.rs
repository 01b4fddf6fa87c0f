use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use soundwatch_app::config::AppConfig;
use soundwatch_app::{logging, notify, runtime};
use soundwatch_audio::list_input_devices;
use soundwatch_foundation::{AppState, ShutdownHandler, StateManager};

#[derive(Parser)]
#[command(name = "soundwatch")]
#[command(version)]
#[command(about = "On-device audio event detector with an A-law monitor stream")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "SOUNDWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Audio input device name (default: host default device)
    #[arg(short = 'D', long)]
    device: Option<String>,

    /// Run against a generated test tone instead of a microphone
    #[arg(long)]
    synth: bool,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.list_devices {
        for name in list_input_devices() {
            println!("{name}");
        }
        return Ok(());
    }

    logging::init()?;
    info!("Starting soundwatch");

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::default(),
    };
    config.validate().context("invalid configuration")?;

    let state_manager = StateManager::new();
    let shutdown = ShutdownHandler::install();

    let opts = runtime::AppRuntimeOptions {
        device: cli.device.clone(),
        synthetic: cli.synth,
        ..Default::default()
    };
    let mut handle = runtime::start(&config, opts).await?;
    state_manager.transition(AppState::Running)?;

    let event_rx = handle
        .take_event_rx()
        .context("event receiver already taken")?;
    let sink_handle =
        notify::spawn_event_sink(event_rx, config.device_id.clone(), config.events_file.clone());

    // No transport is wired up in this binary; drain the packet stream so
    // the streamer keeps its clock running, and surface liveness at debug.
    let mut packet_rx = handle
        .take_packet_rx()
        .context("packet receiver already taken")?;
    let drain_handle = tokio::spawn(async move {
        let mut drained = 0u64;
        while let Some(packet) = packet_rx.recv().await {
            drained += 1;
            if drained % 3000 == 0 {
                debug!(
                    drained,
                    seq = packet.header.sequence,
                    ts = packet.header.timestamp,
                    "packet stream alive"
                );
            }
        }
    });

    let metrics = handle.metrics.clone();
    let mut stats_interval = tokio::time::interval(Duration::from_secs(30));
    // The first tick completes immediately; consume it here.
    stats_interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                info!("Shutdown signal received");
                break;
            }
            _ = stats_interval.tick() => {
                let s = metrics.snapshot();
                info!(
                    capture_frames = s.capture_frames,
                    capture_fps = s.capture_fps,
                    capture_dropped = s.capture_dropped,
                    ring_overruns = s.ring_overruns,
                    detection_cycles = s.detection_cycles,
                    silence_skips = s.silence_skips,
                    events = s.events_emitted,
                    target_confidence = s.target_confidence,
                    packets = s.packets_emitted,
                    underruns = s.streamer_underruns,
                    level_db = s.level_db,
                    "pipeline stats"
                );
            }
        }
    }

    info!("Beginning graceful shutdown");
    state_manager.transition(AppState::Stopping)?;

    handle.shutdown().await;
    // Senders are gone once the tasks stop, so both loops drain and exit.
    let _ = sink_handle.await;
    let _ = drain_handle.await;

    state_manager.transition(AppState::Stopped)?;
    info!("Shutdown complete");

    Ok(())
}
