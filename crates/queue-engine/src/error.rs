//! Error taxonomy for the packet source, the output device, and the player.

use thiserror::Error;

/// Failures raised by a [`crate::source::PacketSource`].
#[derive(Error, Debug)]
pub enum SourceError {
    /// Underlying read failed.
    #[error("packet read failed: {0}")]
    Io(#[from] std::io::Error),

    /// Container or stream format could not be determined.
    #[error("unsupported or unreadable format: {0}")]
    Format(String),

    /// A single packet does not fit into an empty buffer.
    #[error("packet of {packet_bytes} bytes exceeds buffer capacity of {capacity} bytes")]
    OversizedPacket { packet_bytes: usize, capacity: usize },
}

/// Failures raised by an [`crate::device::OutputDevice`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no output device: {0}")]
    NoDevice(String),

    #[error("output device config error: {0}")]
    Config(String),

    #[error("failed to build output stream: {0}")]
    Build(String),

    #[error("failed to start output: {0}")]
    Play(String),

    #[error("failed to pause output: {0}")]
    Pause(String),

    #[error("decoder error: {0}")]
    Decoder(String),

    #[error("buffer allocation failed: {0}")]
    Allocate(String),

    #[error("enqueue failed: {0}")]
    Enqueue(String),

    #[error("output stream error: {0}")]
    Stream(String),

    /// The device has been disposed or its worker threads are gone.
    #[error("output device closed")]
    Closed,
}

/// Failures returned by [`crate::buffer::BufferPool`] bookkeeping.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("buffer {0} does not belong to this pool")]
    UnknownBuffer(usize),

    #[error("buffer {0} was returned while already idle")]
    NotInFlight(usize),
}

/// Construction failures. No partially opened engine is ever returned.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("open source: {0}")]
    Source(#[source] SourceError),

    #[error("create output device: {0}")]
    Device(#[source] DeviceError),
}

/// Failures returned by player control calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The playback pass has reached its terminal state.
    #[error("playback has ended")]
    Ended,

    /// The player worker is no longer running.
    #[error("player is closed")]
    Closed,
}

pub type SourceResult<T> = Result<T, SourceError>;
pub type DeviceResult<T> = Result<T, DeviceError>;
