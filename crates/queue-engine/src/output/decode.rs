//! Decode worker.
//!
//! Receives submitted buffers in order, decodes their packets with a Symphonia decoder
//! configured from the track's codec parameters, and pushes interleaved `f32` samples into
//! the source queue. A buffer is handed back through `BufferDrained` once all of its
//! samples are queued, so the bounded queue paces the refill loop.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::Decoder;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use super::OutputShared;
use super::queue::SampleQueue;
use crate::buffer::AudioBuffer;
use crate::device::{DeviceEvent, DeviceEventHandler};
use crate::error::DeviceError;

/// Time left for the callback to play out its local buffer after the queue drains.
const TAIL_GRACE: Duration = Duration::from_millis(100);

pub(crate) enum DecodeMessage {
    Buffer(AudioBuffer),
    /// Graceful stop: close the queues after everything before this, then report `Stopped`
    /// once the output has played out.
    Finish,
    /// Immediate stop: report `Stopped` after returning everything before this.
    Flush,
}

pub(crate) struct DecodeWorker {
    decoder: Box<dyn Decoder>,
    source_queue: Arc<SampleQueue>,
    output_queue: Arc<SampleQueue>,
    shared: Arc<OutputShared>,
    handler: DeviceEventHandler,
    samples: Option<SampleBuffer<f32>>,
    ts: u64,
    failed: bool,
    stopped_sent: bool,
}

impl DecodeWorker {
    pub(crate) fn new(
        decoder: Box<dyn Decoder>,
        source_queue: Arc<SampleQueue>,
        output_queue: Arc<SampleQueue>,
        shared: Arc<OutputShared>,
        handler: DeviceEventHandler,
    ) -> Self {
        Self {
            decoder,
            source_queue,
            output_queue,
            shared,
            handler,
            samples: None,
            ts: 0,
            failed: false,
            stopped_sent: false,
        }
    }

    pub(crate) fn run(mut self, jobs: Receiver<DecodeMessage>) {
        for message in jobs.iter() {
            match message {
                DecodeMessage::Buffer(buffer) => {
                    if !self.failed && !self.shared.cancel.load(Ordering::Acquire) {
                        self.decode_buffer(&buffer);
                    }
                    (self.handler)(DeviceEvent::BufferDrained(buffer));
                }
                DecodeMessage::Finish => self.finish(),
                DecodeMessage::Flush => self.notify_stopped(),
            }
        }
        tracing::debug!(frames_decoded = self.ts, "decode worker exiting");
    }

    fn decode_buffer(&mut self, buffer: &AudioBuffer) {
        for (desc, bytes) in buffer.iter_packets() {
            let packet = Packet::new_from_slice(0, self.ts, u64::from(desc.frames), bytes);
            self.ts += u64::from(desc.frames);
            let err = match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    let frames = decoded.frames() as u64;
                    if self
                        .samples
                        .as_ref()
                        .is_none_or(|buf| (buf.capacity() as u64) < frames)
                    {
                        self.samples = Some(SampleBuffer::new(frames, spec));
                    }
                    let Some(samples) = self.samples.as_mut() else {
                        continue;
                    };
                    samples.copy_interleaved_ref(decoded);
                    if !self.source_queue.push_blocking(samples.samples()) {
                        return;
                    }
                    continue;
                }
                Err(err) => err,
            };
            match err {
                SymphoniaError::DecodeError(msg) => {
                    tracing::warn!(
                        buffer = %buffer.id(),
                        error = msg,
                        "skipping undecodable packet"
                    );
                }
                SymphoniaError::ResetRequired => {
                    tracing::debug!("decoder reset");
                    self.decoder.reset();
                }
                err => {
                    self.failed = true;
                    tracing::error!(error = %err, "decoder failed");
                    (self.handler)(DeviceEvent::Error(DeviceError::Decoder(err.to_string())));
                    return;
                }
            }
        }
    }

    fn finish(&mut self) {
        self.source_queue.close();
        if self.output_queue.wait_drained(&self.shared.cancel) {
            thread::sleep(TAIL_GRACE);
            self.notify_stopped();
        }
    }

    fn notify_stopped(&mut self) {
        if self.stopped_sent {
            return;
        }
        self.stopped_sent = true;
        (self.handler)(DeviceEvent::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferId;
    use crate::config::EngineConfig;
    use crate::mock::recording_handler;
    use crate::output::queue::Pop;
    use crate::source::{FilePacketSource, PacketSource};
    use std::path::PathBuf;
    use symphonia::core::codecs::DecoderOptions;

    const FRAMES: u32 = 6_000;

    fn wav_fixture(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "queue-engine-decode-{name}-{}.wav",
            std::process::id()
        ));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..FRAMES {
            writer.write_sample(((i % 64) as i16 - 32) * 256).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn worker_for(
        source: &FilePacketSource,
        shared: Arc<OutputShared>,
        handler: DeviceEventHandler,
    ) -> (DecodeWorker, Arc<SampleQueue>) {
        let decoder = symphonia::default::get_codecs()
            .make(source.track().codec_parameters(), &DecoderOptions::default())
            .unwrap();
        let queue = Arc::new(SampleQueue::new(1, 1 << 16));
        let worker = DecodeWorker::new(decoder, queue.clone(), queue.clone(), shared, handler);
        (worker, queue)
    }

    fn read_all(source: &mut FilePacketSource) -> Vec<AudioBuffer> {
        let capacity = source.track().max_packet_bytes() * 4;
        let mut buffers = Vec::new();
        loop {
            let mut buffer = AudioBuffer::new(BufferId(buffers.len()), capacity, 4);
            if source.read_packets(4, &mut buffer).unwrap().is_end_of_stream() {
                return buffers;
            }
            buffers.push(buffer);
        }
    }

    #[test]
    fn decodes_buffers_in_order_and_returns_each() {
        let path = wav_fixture("order");
        let mut source = FilePacketSource::open(&path, &EngineConfig::default()).unwrap();
        let _ = std::fs::remove_file(&path);
        let buffers = read_all(&mut source);
        let submitted = buffers.len();

        let (handler, events) = recording_handler();
        let (worker, queue) = worker_for(&source, Arc::new(OutputShared::default()), handler);
        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded();
        for buffer in buffers {
            jobs_tx.send(DecodeMessage::Buffer(buffer)).unwrap();
        }
        jobs_tx.send(DecodeMessage::Flush).unwrap();
        drop(jobs_tx);
        worker.run(jobs_rx);

        assert_eq!(queue.len_frames(), FRAMES as usize);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), submitted + 1);
        for (i, event) in events[..submitted].iter().enumerate() {
            assert!(matches!(event, DeviceEvent::BufferDrained(b) if b.id() == BufferId(i)));
        }
        assert!(matches!(events[submitted], DeviceEvent::Stopped));
    }

    #[test]
    fn cancelled_worker_returns_buffers_without_decoding() {
        let path = wav_fixture("cancel");
        let mut source = FilePacketSource::open(&path, &EngineConfig::default()).unwrap();
        let _ = std::fs::remove_file(&path);
        let buffers = read_all(&mut source);
        let submitted = buffers.len();

        let shared = Arc::new(OutputShared::default());
        shared.cancel.store(true, Ordering::Release);
        let (handler, events) = recording_handler();
        let (worker, queue) = worker_for(&source, shared, handler);
        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded();
        for buffer in buffers {
            jobs_tx.send(DecodeMessage::Buffer(buffer)).unwrap();
        }
        jobs_tx.send(DecodeMessage::Flush).unwrap();
        jobs_tx.send(DecodeMessage::Flush).unwrap();
        drop(jobs_tx);
        worker.run(jobs_rx);

        assert_eq!(queue.len_frames(), 0);
        let events = events.lock().unwrap();
        let stopped = events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Stopped))
            .count();
        assert_eq!(stopped, 1);
        assert_eq!(events.len(), submitted + 1);
    }

    #[test]
    fn finish_reports_stopped_once_output_drains() {
        let path = wav_fixture("finish");
        let mut source = FilePacketSource::open(&path, &EngineConfig::default()).unwrap();
        let _ = std::fs::remove_file(&path);
        let buffers = read_all(&mut source);

        let (handler, events) = recording_handler();
        let (worker, queue) = worker_for(&source, Arc::new(OutputShared::default()), handler);
        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded();
        for buffer in buffers {
            jobs_tx.send(DecodeMessage::Buffer(buffer)).unwrap();
        }
        jobs_tx.send(DecodeMessage::Finish).unwrap();
        drop(jobs_tx);

        let consumer = queue.clone();
        let drain = thread::spawn(move || {
            let mut frames = 0;
            while let Some(chunk) = consumer.pop(Pop::UpTo { max_frames: 512 }) {
                frames += chunk.len();
            }
            frames
        });
        worker.run(jobs_rx);

        assert_eq!(drain.join().unwrap(), FRAMES as usize);
        let events = events.lock().unwrap();
        assert!(matches!(events.last(), Some(DeviceEvent::Stopped)));
    }
}
