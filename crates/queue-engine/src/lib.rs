//! Streaming packet playback over a fixed pool of rotating buffers.
//!
//! Compressed packets are read from a [`source::PacketSource`] into the buffers of a
//! [`buffer::BufferPool`], submitted to an [`device::OutputDevice`], and refilled as the
//! device hands each buffer back. [`player::Player`] wraps the engine in a worker thread
//! and publishes coalesced playback positions.

pub mod buffer;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod observers;
pub mod output;
pub mod player;
pub mod position;
pub mod source;
pub mod track;

#[cfg(test)]
mod mock;

pub use playback_types::{PlaybackEndReason, PlaybackState, PlayerEvent, PositionSample};
