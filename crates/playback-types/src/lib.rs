use serde::{Deserialize, Serialize};

/// Lifecycle state of a playback pass.
///
/// `Stopped` is both the initial state (buffers primed, device idle) and the
/// terminal state once a pass has finished or been stopped.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
    /// Last packet has been read; already-submitted buffers are still playing out.
    Draining,
}

impl PlaybackState {
    /// Compact encoding used for lock-free state sharing.
    pub fn as_u8(self) -> u8 {
        match self {
            PlaybackState::Stopped => 0,
            PlaybackState::Playing => 1,
            PlaybackState::Paused => 2,
            PlaybackState::Draining => 3,
        }
    }

    /// Inverse of [`PlaybackState::as_u8`]; unknown values map to `Stopped`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            3 => PlaybackState::Draining,
            _ => PlaybackState::Stopped,
        }
    }

    /// `true` while the output device is (or will keep) producing sound.
    pub fn is_audible(self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Draining)
    }
}

/// Reason why a playback pass ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Natural end of stream.
    Eof,
    /// Read, decode, or device failure interrupted playback.
    Error,
    /// Playback was explicitly stopped.
    Stopped,
}

/// Device-reported playback position.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PositionSample {
    /// Raw device sample time, in frames at the track sample rate.
    pub sample_time: f64,
    /// `sample_time` divided by the track sample rate.
    pub seconds: f64,
}

impl PositionSample {
    pub fn from_sample_time(sample_time: f64, sample_rate: u32) -> Self {
        let seconds = if sample_rate > 0 {
            sample_time / sample_rate as f64
        } else {
            0.0
        };
        Self {
            sample_time,
            seconds,
        }
    }
}

/// Notifications published by the player to its observers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    StateChanged { state: PlaybackState },
    Ended { reason: PlaybackEndReason },
    Error { message: String },
}
