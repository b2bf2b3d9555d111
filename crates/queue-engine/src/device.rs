//! Output device contract.
//!
//! The engine talks to the device only through [`OutputDevice`]. Buffers move into the
//! device on [`OutputDevice::enqueue`] and come back through the [`DeviceEvent`] handler
//! registered at creation time.

use std::sync::Arc;

use crate::buffer::{AudioBuffer, BufferId};
use crate::error::{DeviceError, DeviceResult};
use crate::track::Track;

/// Asynchronous notifications delivered by a device.
#[derive(Debug)]
pub enum DeviceEvent {
    /// The device finished with this buffer (played it out or discarded it on flush).
    BufferDrained(AudioBuffer),
    /// The device has stopped: either a graceful stop finished playing everything
    /// submitted, or an immediate stop flushed the queue.
    Stopped,
    /// The device hit an unrecoverable error.
    Error(DeviceError),
}

/// Callback the device invokes from its own scheduling context.
///
/// Devices must never call the handler synchronously from inside an [`OutputDevice`]
/// method; the engine may be holding exclusive access while it calls into the device.
pub type DeviceEventHandler = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Device-reported playback time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceTimestamp {
    /// Frames rendered since start, expressed at the track sample rate.
    pub sample_time: f64,
}

/// Read-only view of device playback time, shareable with a polling thread.
pub trait DeviceClock: Send + Sync {
    /// Current playback time, or `None` while the device has not been started.
    fn current_time(&self) -> Option<DeviceTimestamp>;
}

/// Buffer handed back by a failed [`OutputDevice::enqueue`].
#[derive(Debug)]
pub struct EnqueueRejected {
    pub buffer: AudioBuffer,
    pub error: DeviceError,
}

/// Output device consuming packet buffers.
pub trait OutputDevice: Send {
    /// Create one buffer for the pool. Called only while the pool is being set up.
    fn allocate_buffer(
        &mut self,
        id: BufferId,
        byte_capacity: usize,
        max_packets: usize,
    ) -> DeviceResult<AudioBuffer> {
        Ok(AudioBuffer::new(id, byte_capacity, max_packets))
    }

    /// Submit a filled buffer. Ownership passes to the device until it is drained.
    fn enqueue(&mut self, buffer: AudioBuffer) -> Result<(), EnqueueRejected>;

    /// Start or resume rendering.
    fn start(&mut self) -> DeviceResult<()>;

    /// Pause rendering, keeping submitted buffers.
    fn pause(&mut self) -> DeviceResult<()>;

    /// Stop rendering. `immediate == false` lets submitted buffers play out first;
    /// `immediate == true` discards them. Both end with [`DeviceEvent::Stopped`].
    fn stop(&mut self, immediate: bool) -> DeviceResult<()>;

    /// Shared clock used by the position tracker.
    fn clock(&self) -> Arc<dyn DeviceClock>;

    /// Release device resources. Called exactly once by the engine.
    fn dispose(&mut self);
}

/// Creates an [`OutputDevice`] for a track.
pub trait DeviceBuilder {
    type Device: OutputDevice + 'static;

    /// Create a device configured for `track` (format and codec configuration blob) that
    /// reports through `handler`.
    fn create(self, track: &Track, handler: DeviceEventHandler) -> DeviceResult<Self::Device>;
}
