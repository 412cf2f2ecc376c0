//! handcrafted-player - headless playback of a local FLAC library.
//!
//! Loads the library, picks an output device and plays the queue from the
//! start until it runs out or Ctrl-C is pressed.

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use {
    anyhow::{Result, anyhow},
    clap::Parser,
    tokio::{select, signal::ctrl_c, time::interval},
    tracing::{info, warn},
    tracing_subscriber::EnvFilter,
};

use handcrafted_player::{
    audio::{CpalBackend, Device, HostApi, Player, default_output_device, find_output_device},
    config::SettingsManager,
    error::{ErrorReporter, PlayerError, ResultExt},
};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "handcrafted-player", version, about = "Play a local FLAC library")]
struct Args {
    /// Library directory; defaults to the one in the settings file.
    path: Option<PathBuf>,

    /// Print host APIs and output devices, then exit.
    #[arg(long)]
    list_devices: bool,

    /// Output device name, or part of it.
    #[arg(long)]
    device: Option<String>,

    /// Host API name, or part of it.
    #[arg(long)]
    host_api: Option<String>,

    /// Start with the queue shuffled.
    #[arg(long)]
    shuffle: bool,

    /// Repeat the queue.
    #[arg(long)]
    repeat: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ErrorReporter::error(&e, "handcrafted-player");
            eprintln!("{}", ErrorReporter::to_user_message(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = SettingsManager::new()
        .add_context("Failed to load settings")?
        .get_settings()
        .clone();
    let player = Player::new(Arc::new(CpalBackend::new()), &settings);
    let catalog = player
        .output_devices_by_api()
        .add_context("Failed to enumerate output devices")?;

    if args.list_devices {
        print_catalog(&catalog);
        return Ok(());
    }

    let device_name = args.device.or(settings.audio_device.clone());
    let host_api = args.host_api.or(settings.host_api.clone());
    let device = select_device(&catalog, device_name.as_deref(), host_api.as_deref())
        .ok_or(PlayerError::NoDeviceSelected)?;
    player.set_output_device(device);

    let library = args
        .path
        .or_else(|| settings.library_directory.as_ref().map(PathBuf::from))
        .ok_or_else(|| anyhow!("No library directory given and none configured"))?;
    let count = player
        .load_library(&library)
        .await
        .add_contextf(format!("Failed to load library {}", library.display()))?;
    if count == 0 {
        return Err(PlayerError::EmptyQueue.into());
    }

    if args.shuffle {
        player.shuffle();
    }
    if args.repeat {
        player.repeat();
    }

    player.on_track_changed(|track, device| {
        println!("Now playing: {track} [{}]", device.name);
    });
    player.play(Some(0)).await?;

    let mut poll = interval(Duration::from_millis(250));
    loop {
        select! {
            _ = ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = poll.tick() => {
                if player.is_stopped() {
                    break;
                }
            }
        }
    }

    player.stop();
    if let Some(e) = player.last_stream_error() {
        warn!(error = %e, "Last track ended abnormally");
    }
    Ok(())
}

fn select_device(
    catalog: &[HostApi],
    device_name: Option<&str>,
    host_api: Option<&str>,
) -> Option<Device> {
    let device = match (device_name, host_api) {
        (Some(name), host_api) => find_output_device(catalog, host_api.unwrap_or(""), name),
        (None, Some(host_api)) => catalog
            .iter()
            .filter(|api| api.name.to_lowercase().contains(&host_api.to_lowercase()))
            .find_map(HostApi::default_output_device),
        (None, None) => default_output_device(catalog),
    };
    device.cloned()
}

fn print_catalog(catalog: &[HostApi]) {
    for api in catalog {
        println!("{api}");
        for device in &api.devices {
            println!("    {device}");
        }
    }
}
