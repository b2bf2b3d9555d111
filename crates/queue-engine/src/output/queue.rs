//! Bounded queue of interleaved `f32` samples shared by the output stages.
//!
//! Producers (decode worker, resampler) block when the queue is full; the real-time
//! callback only ever pops without blocking. `close()` ends the stream: blocked pushes
//! return, blocking pops return `None` once the queue is empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Minimum spacing between two low-watermark log lines.
const LOW_WATERMARK_LOG_INTERVAL: Duration = Duration::from_secs(1);

pub struct SampleQueue {
    channels: usize,
    capacity_samples: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    created: Instant,
    last_low_log_ms: AtomicU64,
}

struct QueueInner {
    samples: VecDeque<f32>,
    closed: bool,
}

/// How many frames a pop should wait for.
#[derive(Clone, Copy, Debug)]
pub enum Pop {
    /// Wait for exactly `frames`; `None` if closed first.
    Exact { frames: usize },
    /// Wait for at least one frame, take up to `max_frames`.
    UpTo { max_frames: usize },
    /// Take up to `max_frames` already queued; `None` if empty.
    Available { max_frames: usize },
}

/// Queue capacity in samples for `seconds` of audio (2 s when `seconds` is unusable).
pub fn capacity_for(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let seconds = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * seconds).ceil() as usize;
    frames.max(1).saturating_mul(channels.max(1))
}

impl SampleQueue {
    pub fn new(channels: usize, capacity_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            capacity_samples: capacity_samples.max(channels),
            inner: Mutex::new(QueueInner {
                samples: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
            created: Instant::now(),
            last_low_log_ms: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Close the queue and wake every waiter. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.cv.notify_all();
    }

    /// Push samples, blocking while the queue is full.
    ///
    /// Returns `false` if the queue was closed before every sample was accepted.
    pub fn push_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        while offset < samples.len() {
            let mut inner = self.lock();
            while inner.samples.len() >= self.capacity_samples && !inner.closed {
                inner = self.cv.wait(inner).unwrap_or_else(PoisonError::into_inner);
            }
            if inner.closed {
                return false;
            }
            let room = self.capacity_samples - inner.samples.len();
            let end = samples.len().min(offset + room);
            inner.samples.extend(&samples[offset..end]);
            offset = end;
            drop(inner);
            self.cv.notify_all();
        }
        true
    }

    /// Pop interleaved frames. `None` when nothing can satisfy the request.
    pub fn pop(&self, pop: Pop) -> Option<Vec<f32>> {
        let mut inner = self.lock();
        let take_samples = match pop {
            Pop::Exact { frames } => {
                let want = frames * self.channels;
                while inner.samples.len() < want && !inner.closed {
                    inner = self.cv.wait(inner).unwrap_or_else(PoisonError::into_inner);
                }
                if inner.samples.len() < want {
                    return None;
                }
                want
            }
            Pop::UpTo { max_frames } => {
                while inner.samples.len() < self.channels && !inner.closed {
                    inner = self.cv.wait(inner).unwrap_or_else(PoisonError::into_inner);
                }
                self.whole_frames(inner.samples.len(), max_frames)
            }
            Pop::Available { max_frames } => self.whole_frames(inner.samples.len(), max_frames),
        };
        if take_samples == 0 {
            return None;
        }

        let out: Vec<f32> = inner.samples.drain(..take_samples).collect();
        let remaining = inner.samples.len();
        drop(inner);
        self.cv.notify_all();
        self.note_low_watermark(remaining);
        Some(out)
    }

    fn whole_frames(&self, queued_samples: usize, max_frames: usize) -> usize {
        (queued_samples / self.channels).min(max_frames) * self.channels
    }

    fn note_low_watermark(&self, queued: usize) {
        let threshold = (self.capacity_samples / 8).max(self.channels * 16);
        if queued == 0 || queued >= threshold {
            return;
        }
        let now_ms = self.created.elapsed().as_millis() as u64;
        let last = self.last_low_log_ms.load(Ordering::Relaxed);
        let interval_ms = LOW_WATERMARK_LOG_INTERVAL.as_millis() as u64;
        if last == 0 || now_ms.saturating_sub(last) >= interval_ms {
            self.last_low_log_ms.store(now_ms.max(1), Ordering::Relaxed);
            tracing::debug!(
                queued_samples = queued,
                threshold_samples = threshold,
                "sample queue low watermark"
            );
        }
    }

    /// Block until the queue is closed and empty, or `cancel` is set.
    ///
    /// Returns `true` if it drained normally.
    pub fn wait_drained(&self, cancel: &AtomicBool) -> bool {
        let mut inner = self.lock();
        loop {
            if cancel.load(Ordering::Acquire) {
                return false;
            }
            if inner.closed && inner.samples.is_empty() {
                return true;
            }
            inner = self
                .cv
                .wait_timeout(inner, Duration::from_millis(50))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
