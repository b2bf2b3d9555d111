//! Refill/resubmit loop.
//!
//! [`PlaybackEngine`] owns the packet source, the buffer pool, and the output device. It is
//! driven by a single owner: every user command and every [`DeviceEvent`] must be applied
//! from the same thread (the [`crate::player::Player`] worker does this), so engine state
//! needs no locking. State and cursor are mirrored into [`EngineStatus`] for readers on
//! other threads.
//!
//! Lifecycle of one pass:
//! - `open` fills and submits every buffer; state is `Stopped` (primed).
//! - `play` starts the device; each drained buffer is refilled and resubmitted.
//! - A refill reading zero packets moves `Playing → Draining` and asks the device for a
//!   graceful stop; the device's `Stopped` event completes `Draining → Stopped`.
//! - `stop` flushes the device immediately and ends the pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use playback_types::{PlaybackEndReason, PlaybackState, PlayerEvent};

use crate::buffer::{AudioBuffer, BufferId, BufferPool};
use crate::config::EngineConfig;
use crate::device::{DeviceBuilder, DeviceClock, DeviceEvent, DeviceEventHandler, OutputDevice};
use crate::error::{DeviceError, OpenError, PlayerError};
use crate::observers::Observers;
use crate::source::PacketSource;
use crate::track::Track;

/// Lock-free mirror of engine state for other threads.
#[derive(Debug, Default)]
pub struct EngineStatus {
    state: AtomicU8,
    cursor: AtomicU64,
    ended: AtomicBool,
}

impl EngineStatus {
    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Packets read from the source and submitted to the device so far.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// `true` once the pass reached its terminal `Stopped` state.
    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn set_state(&self, state: PlaybackState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn set_cursor(&self, cursor: u64) {
        self.cursor.store(cursor, Ordering::Release);
    }
}

pub struct PlaybackEngine<S: PacketSource, D: OutputDevice> {
    source: S,
    device: D,
    pool: BufferPool,
    max_packets_per_refill: usize,
    cursor: u64,
    state: PlaybackState,
    /// The source has returned zero packets (or failed); no more refills.
    end_of_stream: bool,
    /// Reason reported once the drain completes.
    drain_reason: PlaybackEndReason,
    /// A graceful device stop has been requested for this pass.
    stop_requested: bool,
    /// The pass reached its terminal `Stopped` state.
    ended: bool,
    status: Arc<EngineStatus>,
    events: Observers<PlayerEvent>,
}

impl<S: PacketSource, D: OutputDevice> PlaybackEngine<S, D> {
    /// Create the device, allocate the buffer pool, and submit one filled buffer per pool
    /// slot so the device has a full pipeline before playback starts.
    ///
    /// On failure everything acquired so far is released, including the device.
    pub fn open<B>(
        source: S,
        builder: B,
        handler: DeviceEventHandler,
        config: &EngineConfig,
    ) -> Result<Self, OpenError>
    where
        B: DeviceBuilder<Device = D>,
    {
        let config = config.clone().sanitized();
        let track = source.track().clone();

        let mut device = builder.create(&track, handler).map_err(OpenError::Device)?;

        let max_packets = config.max_packets_per_refill;
        let byte_capacity = max_packets.saturating_mul(track.max_packet_bytes());
        let allocated =
            BufferPool::allocate(&mut device, config.buffer_count, byte_capacity, max_packets);
        let pool = match allocated {
            Ok(pool) => pool,
            Err(err) => {
                device.dispose();
                return Err(OpenError::Device(err));
            }
        };

        let mut engine = Self {
            source,
            device,
            pool,
            max_packets_per_refill: max_packets,
            cursor: 0,
            state: PlaybackState::Stopped,
            end_of_stream: false,
            drain_reason: PlaybackEndReason::Eof,
            stop_requested: false,
            ended: false,
            status: Arc::new(EngineStatus::default()),
            events: Observers::new(),
        };
        // Dropping `engine` on failure disposes the device.
        engine.prime()?;

        tracing::info!(
            buffers = engine.pool.len(),
            byte_capacity,
            max_packets,
            primed_packets = engine.cursor,
            end_of_stream = engine.end_of_stream,
            "playback engine opened"
        );
        Ok(engine)
    }

    /// Fill and submit every idle buffer. A read failure ends the stream early; whatever
    /// was already submitted still plays.
    fn prime(&mut self) -> Result<(), OpenError> {
        while let Some(mut buffer) = self.pool.take_idle() {
            let read = match self.source.read_packets(self.max_packets_per_refill, &mut buffer) {
                Ok(read) => read,
                Err(err) => {
                    self.return_to_pool(buffer);
                    tracing::warn!(
                        error = %err,
                        cursor = self.cursor,
                        "packet read failed while priming; ending stream early"
                    );
                    self.events.publish(PlayerEvent::Error {
                        message: err.to_string(),
                    });
                    self.end_of_stream = true;
                    self.drain_reason = PlaybackEndReason::Error;
                    break;
                }
            };
            if read.is_end_of_stream() {
                self.return_to_pool(buffer);
                self.end_of_stream = true;
                break;
            }
            if let Err(rejected) = self.device.enqueue(buffer) {
                self.return_to_pool(rejected.buffer);
                return Err(OpenError::Device(rejected.error));
            }
            self.advance_cursor(read.packets);
        }
        Ok(())
    }

    pub fn track(&self) -> &Track {
        self.source.track()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// `true` once the pass has reached its terminal state.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn status(&self) -> Arc<EngineStatus> {
        self.status.clone()
    }

    pub fn events(&self) -> Observers<PlayerEvent> {
        self.events.clone()
    }

    pub fn clock(&self) -> Arc<dyn DeviceClock> {
        self.device.clock()
    }

    /// Start or resume the device.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        match self.state {
            PlaybackState::Playing | PlaybackState::Draining => return Ok(()),
            PlaybackState::Stopped if self.ended => return Err(PlayerError::Ended),
            PlaybackState::Stopped | PlaybackState::Paused => {}
        }

        if let Err(err) = self.device.start() {
            self.fail(err.clone());
            return Err(err.into());
        }

        if self.end_of_stream {
            self.set_state(PlaybackState::Draining);
            self.request_graceful_stop();
        } else {
            self.set_state(PlaybackState::Playing);
        }
        Ok(())
    }

    /// Pause the device without discarding submitted buffers.
    pub fn pause(&mut self) -> Result<(), PlayerError> {
        if !self.state.is_audible() {
            return Ok(());
        }
        if let Err(err) = self.device.pause() {
            self.fail(err.clone());
            return Err(err.into());
        }
        self.set_state(PlaybackState::Paused);
        Ok(())
    }

    /// Flush the device immediately and end the pass. No-op when already stopped.
    pub fn stop(&mut self) -> Result<(), PlayerError> {
        if self.state == PlaybackState::Stopped {
            return Ok(());
        }
        let result = self.device.stop(true);
        if let Err(err) = &result {
            tracing::warn!(error = %err, "device stop failed");
            self.events.publish(PlayerEvent::Error {
                message: err.to_string(),
            });
        }
        self.finish(PlaybackEndReason::Stopped);
        result.map_err(PlayerError::from)
    }

    /// Apply one device notification.
    pub fn handle(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::BufferDrained(buffer) => self.on_buffer_drained(buffer),
            DeviceEvent::Stopped => self.on_device_stopped(),
            DeviceEvent::Error(err) => self.fail(err),
        }
    }

    /// The device is done with `buffer`: refill and resubmit it while the pass is live.
    ///
    /// A device may hand primed buffers back before `play`; those are refilled too, so
    /// the pipeline is full again when playback starts.
    pub fn on_buffer_drained(&mut self, buffer: AudioBuffer) {
        let id = buffer.id();
        self.return_to_pool(buffer);
        if self.ended || self.end_of_stream {
            return;
        }
        self.refill(id);
    }

    /// The device reports it has stopped rendering.
    pub fn on_device_stopped(&mut self) {
        match self.state {
            PlaybackState::Draining => self.finish(self.drain_reason),
            PlaybackState::Paused if self.stop_requested => self.finish(self.drain_reason),
            PlaybackState::Stopped => {}
            PlaybackState::Playing | PlaybackState::Paused => {
                self.fail(DeviceError::Stream("output stopped unexpectedly".to_string()));
            }
        }
    }

    fn refill(&mut self, id: BufferId) {
        let Some(mut buffer) = self.pool.take(id) else {
            return;
        };
        match self.source.read_packets(self.max_packets_per_refill, &mut buffer) {
            Ok(read) if !read.is_end_of_stream() => match self.device.enqueue(buffer) {
                Ok(()) => {
                    self.advance_cursor(read.packets);
                    tracing::trace!(
                        buffer = %id,
                        packets = read.packets,
                        bytes = read.bytes,
                        cursor = self.cursor,
                        "buffer resubmitted"
                    );
                }
                Err(rejected) => {
                    self.return_to_pool(rejected.buffer);
                    self.fail(rejected.error);
                }
            },
            Ok(_) => {
                self.return_to_pool(buffer);
                tracing::info!(cursor = self.cursor, "end of stream");
                self.begin_drain(PlaybackEndReason::Eof);
            }
            Err(err) => {
                self.return_to_pool(buffer);
                tracing::warn!(error = %err, cursor = self.cursor, "packet read failed; draining");
                self.events.publish(PlayerEvent::Error {
                    message: err.to_string(),
                });
                self.begin_drain(PlaybackEndReason::Error);
            }
        }
    }

    fn begin_drain(&mut self, reason: PlaybackEndReason) {
        self.end_of_stream = true;
        self.drain_reason = reason;
        // While paused the stop request waits for `play`.
        if self.state == PlaybackState::Playing {
            self.set_state(PlaybackState::Draining);
            self.request_graceful_stop();
        }
    }

    fn request_graceful_stop(&mut self) {
        if self.stop_requested {
            return;
        }
        self.stop_requested = true;
        if let Err(err) = self.device.stop(false) {
            self.fail(err);
        }
    }

    fn fail(&mut self, err: DeviceError) {
        tracing::error!(error = %err, state = ?self.state, "output device failure");
        self.events.publish(PlayerEvent::Error {
            message: err.to_string(),
        });
        if self.ended {
            return;
        }
        if self.state != PlaybackState::Stopped {
            let _ = self.device.stop(true);
        }
        self.finish(PlaybackEndReason::Error);
    }

    fn finish(&mut self, reason: PlaybackEndReason) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.set_state(PlaybackState::Stopped);
        self.status.ended.store(true, Ordering::Release);
        tracing::info!(?reason, cursor = self.cursor, "playback ended");
        self.events.publish(PlayerEvent::Ended { reason });
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = ?self.state, to = ?state, "playback state");
        self.state = state;
        self.status.set_state(state);
        self.events.publish(PlayerEvent::StateChanged { state });
    }

    fn advance_cursor(&mut self, packets: usize) {
        self.cursor += packets as u64;
        self.status.set_cursor(self.cursor);
    }

    fn return_to_pool(&mut self, buffer: AudioBuffer) {
        if let Err(err) = self.pool.release(buffer) {
            tracing::error!(error = %err, "buffer pool bookkeeping error");
        }
    }
}

impl<S: PacketSource, D: OutputDevice> Drop for PlaybackEngine<S, D> {
    fn drop(&mut self) {
        if self.state != PlaybackState::Stopped {
            let _ = self.device.stop(true);
        }
        self.device.dispose();
    }
}
