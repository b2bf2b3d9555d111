//! Output device discovery and stream config selection.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Largest fixed callback buffer we ask for.
const MAX_BUFFER_FRAMES: u32 = 16_384;

/// Summary of one output device for listings.
#[derive(Clone, Debug)]
pub struct OutputDeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub min_rate: Option<u32>,
    pub max_rate: Option<u32>,
}

/// First output device whose name contains `needle` (case-insensitive), or the host default.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle.filter(|n| !n.trim().is_empty()) else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device"));
    };

    host.output_devices()
        .context("enumerate output devices")?
        .find(|d| device_name(d).is_some_and(|name| matches_device_name(&name, needle)))
        .ok_or_else(|| anyhow!("no output device matched {needle:?}"))
}

/// Pick the output config closest to `target_rate`.
///
/// Prefers the highest rate not above the target, then the lowest rate above it; ties
/// are broken by sample format (float first).
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Rank, cpal::SupportedStreamConfig)> = None;
    for range in device
        .supported_output_configs()
        .context("query output configs")?
    {
        let rate = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let rank = Rank {
            below: rate <= target_rate,
            rate,
            format: sample_format_rank(range.sample_format()),
        };
        if best.as_ref().is_none_or(|(current, _)| rank.beats(current)) {
            best = Some((rank, range.with_sample_rate(rate)));
        }
    }
    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("device reports no output configs"))
}

/// Fixed callback buffer size when the device advertises a range.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_BUFFER_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Enumerate output devices of `host`.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<OutputDeviceInfo>> {
    let default_name = host.default_output_device().and_then(|d| device_name(&d));
    let devices = host.output_devices().context("enumerate output devices")?;
    let mut out = Vec::new();
    for (index, device) in devices.enumerate() {
        let Some(name) = device_name(&device) else {
            continue;
        };
        let (min_rate, max_rate) = match device.supported_output_configs() {
            Ok(ranges) => ranges.fold((None, None), |(lo, hi), r| {
                (
                    Some(lo.map_or(r.min_sample_rate(), |v: u32| v.min(r.min_sample_rate()))),
                    Some(hi.map_or(r.max_sample_rate(), |v: u32| v.max(r.max_sample_rate()))),
                )
            }),
            Err(err) => {
                tracing::debug!(device = %name, error = %err, "output configs unavailable");
                (None, None)
            }
        };
        out.push(OutputDeviceInfo {
            index,
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

pub(crate) fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_string())
}

#[derive(Clone, Copy, Debug)]
struct Rank {
    below: bool,
    rate: u32,
    format: u8,
}

impl Rank {
    fn beats(&self, other: &Rank) -> bool {
        if self.below != other.below {
            return self.below;
        }
        if self.rate != other.rate {
            // Below target: closer means higher. Above target: closer means lower.
            return if self.below {
                self.rate > other.rate
            } else {
                self.rate < other.rate
            };
        }
        self.format < other.format
    }
}

fn clamp_rate(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}
