use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use queue_engine::config::EngineConfig;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "qplay", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Number of packet buffers rotating between reader and device
    #[arg(long, default_value_t = 3)]
    pub buffers: usize,

    /// Max packets read into one buffer per refill
    #[arg(long, default_value_t = 100)]
    pub packets_per_refill: usize,

    /// Position poll period in milliseconds
    #[arg(long, default_value_t = 100)]
    pub position_interval_ms: u64,

    /// Minimum position change (seconds) before an update is printed
    #[arg(long, default_value_t = 0.5)]
    pub position_threshold: f64,

    /// Decoded sample queue target in seconds (per stage)
    #[arg(long, default_value_t = 0.5)]
    pub buffer_seconds: f32,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Playback callback refill cap (frames)
    #[arg(long, default_value_t = 4096)]
    pub refill_max_frames: usize,

    /// Print positions and events as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local file until it ends or is stopped
    Play {
        /// Path to audio file
        path: PathBuf,
    },

    /// Print track details without opening an output device
    Info {
        /// Path to audio file
        path: PathBuf,
    },
}

impl Args {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            buffer_count: self.buffers,
            max_packets_per_refill: self.packets_per_refill,
            position_interval: Duration::from_millis(self.position_interval_ms),
            position_threshold: self.position_threshold,
            buffer_seconds: self.buffer_seconds,
            chunk_frames: self.chunk_frames,
            refill_max_frames: self.refill_max_frames,
            ..EngineConfig::default()
        }
        .sanitized()
    }
}
