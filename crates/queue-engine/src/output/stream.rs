//! Output stream stage.
//!
//! `cpal::Stream` is not `Send`, so the stream is built and owned by a dedicated thread
//! that also picks the device and config. The real-time callback pulls from the output
//! queue without blocking, maps channels, converts to the device sample format, and
//! outputs silence while paused or starved.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use super::OutputShared;
use super::queue::{Pop, SampleQueue};
use super::resample::{ResampleSpec, spawn_resampler};
use super::select;
use crate::device::{DeviceEvent, DeviceEventHandler};
use crate::error::DeviceError;

pub(crate) enum StreamCommand {
    Play(Sender<Result<(), DeviceError>>),
    Shutdown,
}

/// Everything the stream thread needs to open the device.
pub(crate) struct StreamSetup {
    pub device: Option<String>,
    pub src_rate: u32,
    pub source_queue: Arc<SampleQueue>,
    pub shared: Arc<OutputShared>,
    pub chunk_frames: usize,
    pub buffer_seconds: f32,
    pub refill_max_frames: usize,
    pub handler: DeviceEventHandler,
}

/// What the stream thread opened.
pub(crate) struct StreamReady {
    pub device_name: String,
    pub rate: u32,
    pub channels: u16,
    pub sample_format: cpal::SampleFormat,
    pub output_queue: Arc<SampleQueue>,
    pub resampler: Option<JoinHandle<()>>,
}

/// Spawn the stream thread and wait until the stream is built (or failed to build).
pub(crate) fn spawn_stream_thread(
    setup: StreamSetup,
) -> Result<(StreamReady, Sender<StreamCommand>, JoinHandle<()>), DeviceError> {
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
    let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
    let handle = thread::spawn(move || match open_stream(setup) {
        Ok((stream, ready)) => {
            let _ = ready_tx.send(Ok(ready));
            serve(stream, commands_rx);
        }
        Err(err) => {
            let _ = ready_tx.send(Err(err));
        }
    });
    match ready_rx.recv() {
        Ok(Ok(ready)) => Ok((ready, commands_tx, handle)),
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(err)
        }
        Err(_) => {
            let _ = handle.join();
            Err(DeviceError::Build("stream thread exited during setup".to_string()))
        }
    }
}

fn serve(stream: cpal::Stream, commands: Receiver<StreamCommand>) {
    for command in commands.iter() {
        match command {
            StreamCommand::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|err| DeviceError::Play(err.to_string()));
                let _ = reply.send(result);
            }
            StreamCommand::Shutdown => break,
        }
    }
    if let Err(err) = stream.pause() {
        tracing::debug!(error = %err, "stream pause on shutdown failed");
    }
    tracing::debug!("output stream closed");
}

fn open_stream(setup: StreamSetup) -> Result<(cpal::Stream, StreamReady), DeviceError> {
    let host = cpal::default_host();
    let device = select::pick_device(&host, setup.device.as_deref())
        .map_err(|err| DeviceError::NoDevice(format!("{err:#}")))?;
    let device_name = select::device_name(&device).unwrap_or_else(|| "unknown".to_string());

    let supported = select::pick_output_config(&device, setup.src_rate)
        .map_err(|err| DeviceError::Config(format!("{err:#}")))?;
    let mut stream_config: cpal::StreamConfig = supported.config();
    if let Some(buffer_size) = select::pick_buffer_size(&supported) {
        stream_config.buffer_size = buffer_size;
    }
    let dst_rate = stream_config.sample_rate;

    let (output_queue, resampler) = if dst_rate == setup.src_rate {
        tracing::info!(rate_hz = dst_rate, "resample skipped");
        (setup.source_queue.clone(), None)
    } else {
        let spec = ResampleSpec {
            src_rate: setup.src_rate,
            dst_rate,
            channels: setup.source_queue.channels(),
            chunk_frames: setup.chunk_frames,
            buffer_seconds: setup.buffer_seconds,
        };
        let (queue, handle) = spawn_resampler(setup.source_queue.clone(), spec)
            .map_err(|err| DeviceError::Config(format!("{err:#}")))?;
        (queue, Some(handle))
    };

    let handler = setup.handler.clone();
    let on_error = move |err: cpal::StreamError| {
        tracing::warn!(error = %err, "output stream error");
        handler(DeviceEvent::Error(DeviceError::Stream(err.to_string())));
    };
    let callback = Callback {
        queue: output_queue.clone(),
        shared: setup.shared.clone(),
        refill_max_frames: setup.refill_max_frames.max(1),
        out_channels: stream_config.channels as usize,
        local: Vec::new(),
        pos: 0,
    };
    let sample_format = supported.sample_format();
    let stream = build_stream(&device, &stream_config, sample_format, callback, on_error)
        .map_err(|err| DeviceError::Build(format!("{err:#}")))?;

    tracing::info!(
        device = %device_name,
        rate_hz = dst_rate,
        channels = stream_config.channels,
        format = ?supported.sample_format(),
        buffer = ?stream_config.buffer_size,
        "output stream ready"
    );
    Ok((
        stream,
        StreamReady {
            device_name,
            rate: dst_rate,
            channels: stream_config.channels,
            sample_format: supported.sample_format(),
            output_queue,
            resampler,
        },
    ))
}

fn build_stream<E>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    callback: Callback,
    on_error: E,
) -> Result<cpal::Stream>
where
    E: FnMut(cpal::StreamError) + Send + 'static,
{
    match sample_format {
        cpal::SampleFormat::F32 => build_typed::<f32, E>(device, config, callback, on_error),
        cpal::SampleFormat::I32 => build_typed::<i32, E>(device, config, callback, on_error),
        cpal::SampleFormat::I16 => build_typed::<i16, E>(device, config, callback, on_error),
        cpal::SampleFormat::U16 => build_typed::<u16, E>(device, config, callback, on_error),
        other => Err(anyhow!("unsupported sample format {other:?}")),
    }
}

fn build_typed<T, E>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut callback: Callback,
    on_error: E,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
    E: FnMut(cpal::StreamError) + Send + 'static,
{
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| callback.fill(data),
        on_error,
        None,
    )?;
    Ok(stream)
}

/// State owned by the real-time callback.
struct Callback {
    queue: Arc<SampleQueue>,
    shared: Arc<OutputShared>,
    refill_max_frames: usize,
    out_channels: usize,
    /// Interleaved samples already taken from the queue.
    local: Vec<f32>,
    pos: usize,
}

impl Callback {
    fn fill<T>(&mut self, data: &mut [T])
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let silence = T::from_sample(0.0f32);
        if self.shared.paused.load(Ordering::Relaxed) || self.out_channels == 0 {
            data.fill(silence);
            return;
        }

        let frames = data.len() / self.out_channels;
        let mut written = 0usize;
        while written < frames {
            if self.pos >= self.local.len() && !self.refill() {
                let missing = frames - written;
                self.shared.underrun_events.fetch_add(1, Ordering::Relaxed);
                self.shared
                    .underrun_frames
                    .fetch_add(missing as u64, Ordering::Relaxed);
                data[written * self.out_channels..].fill(silence);
                break;
            }
            let frame = &mut data[written * self.out_channels..(written + 1) * self.out_channels];
            for (ch, out) in frame.iter_mut().enumerate() {
                *out = T::from_sample(self.mapped_sample(ch));
            }
            self.pos += self.queue.channels();
            written += 1;
        }
        if written > 0 {
            self.shared
                .played_frames
                .fetch_add(written as u64, Ordering::Relaxed);
        }
    }

    fn refill(&mut self) -> bool {
        self.pos = 0;
        self.local.clear();
        match self.queue.pop(Pop::Available {
            max_frames: self.refill_max_frames,
        }) {
            Some(samples) => {
                self.local = samples;
                true
            }
            None => false,
        }
    }

    fn mapped_sample(&self, out_ch: usize) -> f32 {
        map_channel(&self.local[self.pos..], self.queue.channels(), self.out_channels, out_ch)
    }
}

/// One output sample for `out_ch` from the source frame at the start of `frame`.
///
/// Mono is duplicated, stereo to mono is averaged, anything else clamps to the last
/// available source channel.
fn map_channel(frame: &[f32], src_channels: usize, out_channels: usize, out_ch: usize) -> f32 {
    let get = |ch: usize| frame.get(ch).copied().unwrap_or(0.0);
    match (src_channels, out_channels) {
        (2, 1) => 0.5 * (get(0) + get(1)),
        (1, _) => get(0),
        _ => get(out_ch.min(src_channels.saturating_sub(1))),
    }
}
