//! Periodic playback position polling.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, select};
use playback_types::PositionSample;

use crate::device::DeviceClock;
use crate::observers::Observers;

/// Suppresses positions that moved less than `threshold` seconds since the last emission.
#[derive(Clone, Debug)]
pub struct PositionCoalescer {
    threshold: f64,
    last: Option<f64>,
}

impl PositionCoalescer {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: if threshold.is_finite() { threshold.max(0.0) } else { 0.0 },
            last: None,
        }
    }

    /// Returns `true` if `seconds` should be published; remembers it if so.
    pub fn accept(&mut self, seconds: f64) -> bool {
        let emit = match self.last {
            None => true,
            Some(last) => {
                let delta = (seconds - last).abs();
                delta > 0.0 && delta >= self.threshold
            }
        };
        if emit {
            self.last = Some(seconds);
        }
        emit
    }
}

/// Background thread publishing coalesced device positions.
///
/// Only reads the device clock; engine state is never touched. Dropping the tracker stops
/// the thread and joins it.
pub struct PositionTracker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PositionTracker {
    pub fn spawn(
        clock: Arc<dyn DeviceClock>,
        sample_rate: u32,
        interval: Duration,
        threshold: f64,
        observers: Observers<PositionSample>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::spawn(move || {
            let ticker = crossbeam_channel::tick(interval);
            let mut coalescer = PositionCoalescer::new(threshold);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let Some(now) = clock.current_time() else {
                            continue;
                        };
                        let sample = PositionSample::from_sample_time(now.sample_time, sample_rate);
                        if coalescer.accept(sample.seconds) {
                            tracing::trace!(seconds = sample.seconds, "position");
                            observers.publish(sample);
                        }
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            }
            tracing::debug!("position tracker stopped");
        });
        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stop polling and wait for the thread to exit.
    pub fn shutdown(&mut self) {
        // Dropping the sender disconnects the shutdown channel.
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PositionTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
