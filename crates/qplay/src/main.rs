//! qplay: play a local audio file through the queue engine.
//!
//! Compressed packets are read into a small pool of rotating buffers and handed to a cpal
//! output device, which decodes, resamples, and renders them. Position updates are printed
//! as they arrive.
//!
//! ## Modes
//! - `play`: play a file until it ends, `q` is entered, or Ctrl-C.
//! - `info`: print what the container reports about the default track.

mod cli;

use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::select;
use playback_types::{PlayerEvent, PositionSample};
use queue_engine::output::{CpalBuilder, list_devices};
use queue_engine::player::{Player, PlayerHandle};
use queue_engine::source::{FilePacketSource, PacketSource};
use queue_engine::track::Track;
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,qplay=info,queue_engine=info")
        }))
        .init();

    if args.list_devices {
        print_devices()?;
        return Ok(());
    }

    match &args.cmd {
        Some(cli::Command::Play { path }) => play_file(&args, path),
        Some(cli::Command::Info { path }) => print_info(&args, path),
        None => {
            anyhow::bail!("nothing to do; pass a subcommand or --list-devices (see --help)")
        }
    }
}

fn print_devices() -> Result<()> {
    let host = cpal::default_host();
    let devices = list_devices(&host).context("list output devices")?;
    println!("Output devices:");
    for info in devices {
        let marker = if info.is_default { " (default)" } else { "" };
        match (info.min_rate, info.max_rate) {
            (Some(lo), Some(hi)) => {
                println!("  [{}] {}{} {}-{} Hz", info.index, info.name, marker, lo, hi)
            }
            _ => println!("  [{}] {}{}", info.index, info.name, marker),
        }
    }
    Ok(())
}

fn print_info(args: &cli::Args, path: &Path) -> Result<()> {
    let source = FilePacketSource::open(path, &args.engine_config())
        .with_context(|| format!("open {}", path.display()))?;
    let track = source.track();
    if args.json {
        println!("{}", track_json(track));
        return Ok(());
    }
    println!("codec:            {}", track.codec_name().unwrap_or("unknown"));
    println!("sample rate:      {} Hz", track.sample_rate());
    println!("channels:         {}", track.channels());
    println!(
        "duration:         {}",
        track
            .duration()
            .map(|d| format_clock(d.as_secs_f64()))
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!("max packet bytes: {}", track.max_packet_bytes());
    println!(
        "cookie bytes:     {}",
        track.magic_cookie().map_or(0, <[u8]>::len)
    );
    Ok(())
}

fn track_json(track: &Track) -> serde_json::Value {
    json!({
        "codec": track.codec_name(),
        "sample_rate": track.sample_rate(),
        "channels": track.channels(),
        "duration_secs": track.duration().map(|d| d.as_secs_f64()),
        "total_frames": track.total_frames(),
        "max_packet_bytes": track.max_packet_bytes(),
        "cookie_bytes": track.magic_cookie().map_or(0, <[u8]>::len),
    })
}

fn play_file(args: &cli::Args, path: &Path) -> Result<()> {
    let config = args.engine_config();
    let builder = CpalBuilder::new(&config).device(args.device.clone());
    let player = Player::open_file(path, builder, &config)
        .with_context(|| format!("open {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        codec = player.track().codec_name().unwrap_or("unknown"),
        rate_hz = player.track().sample_rate(),
        channels = player.track().channels(),
        "track opened"
    );

    let handle = player.handle();
    ctrlc::set_handler(move || {
        let _ = handle.stop();
    })
    .context("install Ctrl-C handler")?;
    spawn_keyboard(player.handle());

    let positions = player.subscribe_positions();
    let events = player.subscribe_events();
    player.play().context("start playback")?;

    let total = player.duration();
    loop {
        select! {
            recv(positions) -> msg => match msg {
                Ok(sample) => print_position(args.json, &sample, total),
                Err(_) => break,
            },
            recv(events) -> msg => match msg {
                Ok(event) => {
                    let ended = matches!(event, PlayerEvent::Ended { .. });
                    print_event(args.json, &event)?;
                    if ended {
                        break;
                    }
                }
                Err(_) => break,
            },
        }
    }
    Ok(())
}

/// `p` or a blank line toggles pause, `q` stops.
fn spawn_keyboard(handle: PlayerHandle) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let result = match line.trim() {
                "" | "p" => handle.toggle(),
                "q" => {
                    let _ = handle.stop();
                    break;
                }
                other => {
                    eprintln!("unknown key {other:?}; use p (pause/resume) or q (quit)");
                    continue;
                }
            };
            if let Err(err) = result {
                tracing::warn!(error = %err, "control command failed");
            }
        }
    });
}

fn print_position(as_json: bool, sample: &PositionSample, total: Option<Duration>) {
    if as_json {
        let line = json!({
            "type": "position",
            "seconds": sample.seconds,
            "duration_secs": total.map(|d| d.as_secs_f64()),
        });
        println!("{line}");
        return;
    }
    let total = total
        .map(|d| format_clock(d.as_secs_f64()))
        .unwrap_or_else(|| "--:--".to_string());
    println!("{} / {}", format_clock(sample.seconds), total);
}

fn print_event(as_json: bool, event: &PlayerEvent) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string(event).context("encode event")?);
        return Ok(());
    }
    match event {
        PlayerEvent::StateChanged { state } => tracing::info!(?state, "state"),
        PlayerEvent::Ended { reason } => tracing::info!(?reason, "playback ended"),
        PlayerEvent::Error { message } => tracing::error!(%message, "playback error"),
    }
    Ok(())
}

/// `mm:ss`, with minutes allowed to exceed 59.
fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}
