//! cpal-backed output device.
//!
//! Stage wiring:
//! - engine → `enqueue` → decode worker (Symphonia) → source queue
//! - source queue → resampler (Rubato, only when rates differ) → output queue
//! - output queue → cpal callback on the stream thread
//!
//! Buffers come back to the engine from the decode worker once their samples are queued.

mod decode;
pub(crate) mod queue;
mod resample;
mod select;
mod stream;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use crossbeam_channel::SendError;
use symphonia::core::codecs::DecoderOptions;

use crate::buffer::AudioBuffer;
use crate::config::EngineConfig;
use crate::device::{
    DeviceBuilder, DeviceClock, DeviceEventHandler, DeviceTimestamp, EnqueueRejected, OutputDevice,
};
use crate::error::{DeviceError, DeviceResult};
use crate::track::Track;

use decode::{DecodeMessage, DecodeWorker};
use queue::{SampleQueue, capacity_for};
use stream::{StreamCommand, StreamSetup, spawn_stream_thread};

pub use select::{OutputDeviceInfo, list_devices};

/// Flags and counters shared between the device handle, the decode worker, and the
/// real-time callback.
#[derive(Debug, Default)]
pub(crate) struct OutputShared {
    /// Callback outputs silence and leaves the queue untouched.
    pub paused: AtomicBool,
    /// `start` has succeeded at least once.
    pub started: AtomicBool,
    /// Immediate stop or dispose in progress.
    pub cancel: AtomicBool,
    pub played_frames: AtomicU64,
    pub underrun_frames: AtomicU64,
    pub underrun_events: AtomicU64,
}

/// Creates a [`CpalOutput`] for a track.
#[derive(Clone, Debug, Default)]
pub struct CpalBuilder {
    device: Option<String>,
    config: EngineConfig,
}

impl CpalBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            device: None,
            config: config.clone(),
        }
    }

    /// Select the first output device whose name contains `needle`; `None` uses the default.
    pub fn device(mut self, needle: Option<String>) -> Self {
        self.device = needle;
        self
    }
}

impl DeviceBuilder for CpalBuilder {
    type Device = CpalOutput;

    fn create(self, track: &Track, handler: DeviceEventHandler) -> DeviceResult<CpalOutput> {
        let config = self.config.sanitized();
        let decoder = symphonia::default::get_codecs()
            .make(track.codec_parameters(), &DecoderOptions::default())
            .map_err(|err| DeviceError::Decoder(err.to_string()))?;

        let channels = usize::from(track.channels());
        let src_rate = track.sample_rate();
        let source_queue = Arc::new(SampleQueue::new(
            channels,
            capacity_for(src_rate, channels, config.buffer_seconds),
        ));
        let shared = Arc::new(OutputShared::default());
        shared.paused.store(true, Ordering::Release);

        let (ready, stream, stream_thread) = spawn_stream_thread(StreamSetup {
            device: self.device,
            src_rate,
            source_queue: source_queue.clone(),
            shared: shared.clone(),
            chunk_frames: config.chunk_frames,
            buffer_seconds: config.buffer_seconds,
            refill_max_frames: config.refill_max_frames,
            handler: handler.clone(),
        })?;

        let mut threads = vec![stream_thread];
        threads.extend(ready.resampler);

        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded();
        let worker = DecodeWorker::new(
            decoder,
            source_queue.clone(),
            ready.output_queue.clone(),
            shared.clone(),
            handler,
        );
        threads.push(thread::spawn(move || worker.run(jobs_rx)));

        tracing::info!(
            device = %ready.device_name,
            codec = track.codec_name().unwrap_or("unknown"),
            src_rate_hz = src_rate,
            dst_rate_hz = ready.rate,
            channels = ready.channels,
            format = ?ready.sample_format,
            "output device created"
        );

        Ok(CpalOutput {
            clock: Arc::new(CpalClock {
                shared: shared.clone(),
                src_rate,
                dst_rate: ready.rate,
            }),
            shared,
            source_queue,
            output_queue: ready.output_queue,
            jobs: Some(jobs_tx),
            stream: Some(stream),
            threads,
            device_name: ready.device_name,
        })
    }
}

/// [`OutputDevice`] rendering through cpal.
pub struct CpalOutput {
    shared: Arc<OutputShared>,
    clock: Arc<CpalClock>,
    source_queue: Arc<SampleQueue>,
    output_queue: Arc<SampleQueue>,
    jobs: Option<Sender<DecodeMessage>>,
    stream: Option<Sender<StreamCommand>>,
    threads: Vec<JoinHandle<()>>,
    device_name: String,
}

impl CpalOutput {
    fn send_job(&self, message: DecodeMessage) -> DeviceResult<()> {
        let jobs = self.jobs.as_ref().ok_or(DeviceError::Closed)?;
        jobs.send(message).map_err(|_| DeviceError::Closed)
    }

    fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Release);
        self.shared.paused.store(true, Ordering::Release);
        self.source_queue.close();
        self.output_queue.close();
    }
}

impl OutputDevice for CpalOutput {
    fn enqueue(&mut self, buffer: AudioBuffer) -> Result<(), EnqueueRejected> {
        let Some(jobs) = self.jobs.as_ref().filter(|_| !self.source_queue.is_closed()) else {
            return Err(EnqueueRejected {
                buffer,
                error: DeviceError::Closed,
            });
        };
        let sent = jobs.send(DecodeMessage::Buffer(buffer));
        if let Err(SendError(DecodeMessage::Buffer(buffer))) = sent {
            return Err(EnqueueRejected {
                buffer,
                error: DeviceError::Closed,
            });
        }
        Ok(())
    }

    fn start(&mut self) -> DeviceResult<()> {
        let stream = self.stream.as_ref().ok_or(DeviceError::Closed)?;
        if !self.shared.started.load(Ordering::Acquire) {
            let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
            stream
                .send(StreamCommand::Play(reply_tx))
                .map_err(|_| DeviceError::Closed)?;
            reply_rx.recv().map_err(|_| DeviceError::Closed)??;
            self.shared.started.store(true, Ordering::Release);
        }
        self.shared.paused.store(false, Ordering::Release);
        tracing::debug!(device = %self.device_name, "output started");
        Ok(())
    }

    fn pause(&mut self) -> DeviceResult<()> {
        if self.stream.is_none() {
            return Err(DeviceError::Closed);
        }
        self.shared.paused.store(true, Ordering::Release);
        tracing::debug!(device = %self.device_name, "output paused");
        Ok(())
    }

    fn stop(&mut self, immediate: bool) -> DeviceResult<()> {
        if immediate {
            self.cancel();
            self.send_job(DecodeMessage::Flush)
        } else {
            self.send_job(DecodeMessage::Finish)
        }
    }

    fn clock(&self) -> Arc<dyn DeviceClock> {
        self.clock.clone()
    }

    fn dispose(&mut self) {
        if self.jobs.is_none() && self.stream.is_none() && self.threads.is_empty() {
            return;
        }
        self.cancel();
        if let Some(stream) = self.stream.take() {
            let _ = stream.send(StreamCommand::Shutdown);
        }
        // The decode worker returns any queued buffers, then exits on disconnect.
        self.jobs.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        tracing::debug!(
            device = %self.device_name,
            played_frames = self.shared.played_frames.load(Ordering::Relaxed),
            underrun_frames = self.shared.underrun_frames.load(Ordering::Relaxed),
            underrun_events = self.shared.underrun_events.load(Ordering::Relaxed),
            discarded_frames = self.output_queue.len_frames(),
            "output disposed"
        );
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Rendered frames scaled back to the track's sample rate.
struct CpalClock {
    shared: Arc<OutputShared>,
    src_rate: u32,
    dst_rate: u32,
}

impl DeviceClock for CpalClock {
    fn current_time(&self) -> Option<DeviceTimestamp> {
        if !self.shared.started.load(Ordering::Acquire) {
            return None;
        }
        let frames = self.shared.played_frames.load(Ordering::Relaxed) as f64;
        Some(DeviceTimestamp {
            sample_time: track_sample_time(frames, self.src_rate, self.dst_rate),
        })
    }
}

fn track_sample_time(output_frames: f64, src_rate: u32, dst_rate: u32) -> f64 {
    if dst_rate == 0 {
        return 0.0;
    }
    output_frames * f64::from(src_rate) / f64::from(dst_rate)
}
