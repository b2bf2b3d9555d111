//! Scriptable output device and packet sources for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use symphonia::core::codecs::{CODEC_TYPE_PCM_S16LE, CodecParameters};

use crate::buffer::{AudioBuffer, BufferId};
use crate::device::{
    DeviceBuilder, DeviceClock, DeviceEvent, DeviceEventHandler, DeviceTimestamp, EnqueueRejected,
    OutputDevice,
};
use crate::error::{DeviceError, DeviceResult, SourceError, SourceResult};
use crate::source::{MemoryPacketSource, PacketSource, PacketsRead};
use crate::track::{StreamFormat, Track};

pub(crate) const TEST_RATE: u32 = 44_100;
const TEST_FRAMES_PER_PACKET: u64 = 1024;

/// Stereo 16-bit PCM track with fixed-size packets.
pub(crate) fn test_track(max_packet_bytes: usize) -> Track {
    let format = StreamFormat {
        codec: CODEC_TYPE_PCM_S16LE,
        sample_rate: TEST_RATE,
        channels: 2,
        bits_per_sample: Some(16),
        frames_per_packet: Some(TEST_FRAMES_PER_PACKET),
    };
    Track::new(format, None, None, max_packet_bytes, CodecParameters::new())
}

/// `count` packets of `packet_len` bytes; packet `i` is filled with `i as u8`.
pub(crate) fn uniform_source(count: usize, packet_len: usize) -> MemoryPacketSource {
    MemoryPacketSource::new(
        test_track(packet_len),
        (0..count).map(|i| vec![i as u8; packet_len]),
    )
}

/// Wraps a source, logging every read result and optionally failing one call.
pub(crate) struct ScriptedSource {
    inner: MemoryPacketSource,
    reads: Arc<Mutex<Vec<usize>>>,
    fail_on_call: Option<usize>,
    calls: usize,
}

impl ScriptedSource {
    pub(crate) fn new(inner: MemoryPacketSource) -> (Self, Arc<Mutex<Vec<usize>>>) {
        let reads = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner,
                reads: reads.clone(),
                fail_on_call: None,
                calls: 0,
            },
            reads,
        )
    }

    /// Fail the `call`-th read (0-based) with an I/O error.
    pub(crate) fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }
}

impl PacketSource for ScriptedSource {
    fn track(&self) -> &Track {
        self.inner.track()
    }

    fn read_packets(
        &mut self,
        max_count: usize,
        buffer: &mut AudioBuffer,
    ) -> SourceResult<PacketsRead> {
        let call = self.calls;
        self.calls += 1;
        if self.fail_on_call == Some(call) {
            return Err(SourceError::Io(std::io::Error::other("scripted read failure")));
        }
        let read = self.inner.read_packets(max_count, buffer)?;
        self.reads.lock().unwrap().push(read.packets);
        Ok(read)
    }
}

/// Device calls recorded by [`MockDevice`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum DeviceCall {
    Enqueue { id: BufferId, packets: usize },
    Start,
    Pause,
    Stop { immediate: bool },
    Dispose,
}

#[derive(Default)]
struct MockShared {
    queue: VecDeque<AudioBuffer>,
    discarded: Vec<AudioBuffer>,
    calls: Vec<DeviceCall>,
    handler: Option<DeviceEventHandler>,
    allocations: usize,
    fail_allocation_at: Option<usize>,
    fail_enqueue: bool,
    fail_start: bool,
    graceful_stop: bool,
    stopped_sent: bool,
}

#[derive(Default)]
struct MockClock {
    sample_time: Mutex<Option<f64>>,
}

impl DeviceClock for MockClock {
    fn current_time(&self) -> Option<DeviceTimestamp> {
        self.sample_time
            .lock()
            .ok()
            .and_then(|t| *t)
            .map(|sample_time| DeviceTimestamp { sample_time })
    }
}

/// In-memory device that holds enqueued buffers until the test drains them.
pub(crate) struct MockDevice {
    shared: Arc<Mutex<MockShared>>,
    clock: Arc<MockClock>,
}

/// Test-side handle to a [`MockDevice`].
#[derive(Clone)]
pub(crate) struct MockControl {
    shared: Arc<Mutex<MockShared>>,
    clock: Arc<MockClock>,
}

impl MockDevice {
    pub(crate) fn new() -> (Self, MockControl) {
        let shared = Arc::new(Mutex::new(MockShared::default()));
        let clock = Arc::new(MockClock::default());
        (
            Self {
                shared: shared.clone(),
                clock: clock.clone(),
            },
            MockControl { shared, clock },
        )
    }
}

impl OutputDevice for MockDevice {
    fn allocate_buffer(
        &mut self,
        id: BufferId,
        byte_capacity: usize,
        max_packets: usize,
    ) -> DeviceResult<AudioBuffer> {
        let mut shared = self.shared.lock().unwrap();
        let index = shared.allocations;
        shared.allocations += 1;
        if shared.fail_allocation_at == Some(index) {
            return Err(DeviceError::Allocate("scripted allocation failure".to_string()));
        }
        Ok(AudioBuffer::new(id, byte_capacity, max_packets))
    }

    fn enqueue(&mut self, buffer: AudioBuffer) -> Result<(), EnqueueRejected> {
        let mut shared = self.shared.lock().unwrap();
        assert!(
            shared.queue.iter().all(|queued| queued.id() != buffer.id()),
            "buffer {} enqueued while already in flight",
            buffer.id()
        );
        if shared.fail_enqueue {
            return Err(EnqueueRejected {
                buffer,
                error: DeviceError::Enqueue("scripted enqueue failure".to_string()),
            });
        }
        shared.calls.push(DeviceCall::Enqueue {
            id: buffer.id(),
            packets: buffer.packet_count(),
        });
        shared.queue.push_back(buffer);
        Ok(())
    }

    fn start(&mut self) -> DeviceResult<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.calls.push(DeviceCall::Start);
        if shared.fail_start {
            return Err(DeviceError::Play("scripted start failure".to_string()));
        }
        Ok(())
    }

    fn pause(&mut self) -> DeviceResult<()> {
        self.shared.lock().unwrap().calls.push(DeviceCall::Pause);
        Ok(())
    }

    fn stop(&mut self, immediate: bool) -> DeviceResult<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.calls.push(DeviceCall::Stop { immediate });
        if immediate {
            let flushed: Vec<AudioBuffer> = shared.queue.drain(..).collect();
            shared.discarded.extend(flushed);
        } else {
            shared.graceful_stop = true;
        }
        Ok(())
    }

    fn clock(&self) -> Arc<dyn DeviceClock> {
        self.clock.clone()
    }

    fn dispose(&mut self) {
        self.shared.lock().unwrap().calls.push(DeviceCall::Dispose);
    }
}

impl MockControl {
    pub(crate) fn calls(&self) -> Vec<DeviceCall> {
        self.shared.lock().unwrap().calls.clone()
    }

    pub(crate) fn count_calls(&self, call: &DeviceCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub(crate) fn enqueue_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DeviceCall::Enqueue { .. }))
            .count()
    }

    pub(crate) fn graceful_stop_requested(&self) -> bool {
        self.shared.lock().unwrap().graceful_stop
    }

    pub(crate) fn fail_allocation_at(&self, index: usize) {
        self.shared.lock().unwrap().fail_allocation_at = Some(index);
    }

    pub(crate) fn fail_enqueue(&self, fail: bool) {
        self.shared.lock().unwrap().fail_enqueue = fail;
    }

    pub(crate) fn fail_start(&self, fail: bool) {
        self.shared.lock().unwrap().fail_start = fail;
    }

    pub(crate) fn set_time(&self, sample_time: Option<f64>) {
        *self.clock.sample_time.lock().unwrap() = sample_time;
    }

    /// Pop the oldest queued buffer as if the device finished playing it.
    pub(crate) fn take_next(&self) -> Option<AudioBuffer> {
        self.shared.lock().unwrap().queue.pop_front()
    }

    /// Buffers discarded by an immediate stop.
    pub(crate) fn take_discarded(&self) -> Vec<AudioBuffer> {
        std::mem::take(&mut self.shared.lock().unwrap().discarded)
    }

    /// Drain the oldest buffer through the registered handler. Once a graceful stop was
    /// requested and nothing is left queued, reports `Stopped` (once).
    ///
    /// Returns `true` if an event was delivered.
    pub(crate) fn complete_next(&self) -> bool {
        let (event, handler) = {
            let mut shared = self.shared.lock().unwrap();
            let Some(handler) = shared.handler.clone() else {
                return false;
            };
            if let Some(buffer) = shared.queue.pop_front() {
                (DeviceEvent::BufferDrained(buffer), handler)
            } else if shared.graceful_stop && !shared.stopped_sent {
                shared.stopped_sent = true;
                (DeviceEvent::Stopped, handler)
            } else {
                return false;
            }
        };
        handler(event);
        true
    }

    /// Hand discarded buffers back through the handler, then report `Stopped`.
    pub(crate) fn deliver_flush(&self) {
        let (buffers, handler) = {
            let mut shared = self.shared.lock().unwrap();
            let Some(handler) = shared.handler.clone() else {
                return;
            };
            shared.stopped_sent = true;
            (std::mem::take(&mut shared.discarded), handler)
        };
        for buffer in buffers {
            handler(DeviceEvent::BufferDrained(buffer));
        }
        handler(DeviceEvent::Stopped);
    }

    /// Report an asynchronous device failure.
    pub(crate) fn raise(&self, error: DeviceError) {
        let handler = self.shared.lock().unwrap().handler.clone();
        if let Some(handler) = handler {
            handler(DeviceEvent::Error(error));
        }
    }
}

/// Builder handing out a prepared [`MockDevice`].
pub(crate) struct MockBuilder {
    device: MockDevice,
    fail: Option<DeviceError>,
}

impl MockBuilder {
    pub(crate) fn new() -> (Self, MockControl) {
        let (device, control) = MockDevice::new();
        (Self { device, fail: None }, control)
    }

    pub(crate) fn failing(error: DeviceError) -> Self {
        let (device, _control) = MockDevice::new();
        Self {
            device,
            fail: Some(error),
        }
    }
}

impl DeviceBuilder for MockBuilder {
    type Device = MockDevice;

    fn create(self, _track: &Track, handler: DeviceEventHandler) -> DeviceResult<MockDevice> {
        if let Some(error) = self.fail {
            return Err(error);
        }
        self.device.shared.lock().unwrap().handler = Some(handler);
        Ok(self.device)
    }
}

/// Handler that records every event for synchronous engine tests.
pub(crate) fn recording_handler() -> (DeviceEventHandler, Arc<Mutex<Vec<DeviceEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let handler: DeviceEventHandler = Arc::new(move |event| sink.lock().unwrap().push(event));
    (handler, events)
}
