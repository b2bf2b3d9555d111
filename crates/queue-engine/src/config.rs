use std::time::Duration;

/// Engine tuning parameters shared by the refill loop, the position tracker, and the
/// cpal output device.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Number of buffers rotating between the pool and the device.
    pub buffer_count: usize,
    /// Max packets packed into one buffer per refill.
    pub max_packets_per_refill: usize,
    /// Packet size bound used when the container does not provide one.
    pub fallback_max_packet_bytes: usize,
    /// Period of the position poll.
    pub position_interval: Duration,
    /// Minimum change (seconds) before a new position is published.
    pub position_threshold: f64,
    /// Decoded-sample queue target in seconds (cpal output).
    pub buffer_seconds: f32,
    /// Resampler chunk size in frames (cpal output).
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill (cpal output).
    pub refill_max_frames: usize,
}

/// Smallest pool that still lets one buffer refill while another plays.
pub const MIN_BUFFER_COUNT: usize = 2;

impl EngineConfig {
    /// Clamp values that would make the engine unusable.
    pub fn sanitized(mut self) -> Self {
        self.buffer_count = self.buffer_count.max(MIN_BUFFER_COUNT);
        self.max_packets_per_refill = self.max_packets_per_refill.max(1);
        self.fallback_max_packet_bytes = self.fallback_max_packet_bytes.max(1);
        if self.position_interval.is_zero() {
            self.position_interval = Duration::from_millis(100);
        }
        if !self.position_threshold.is_finite() || self.position_threshold < 0.0 {
            self.position_threshold = 0.0;
        }
        self.chunk_frames = self.chunk_frames.max(1);
        self.refill_max_frames = self.refill_max_frames.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            max_packets_per_refill: 100,
            fallback_max_packet_bytes: 16 * 1024,
            position_interval: Duration::from_millis(100),
            position_threshold: 0.5,
            buffer_seconds: 0.5,
            chunk_frames: 1024,
            refill_max_frames: 4096,
        }
    }
}
