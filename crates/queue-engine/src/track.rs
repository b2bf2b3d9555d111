//! Immutable description of an opened track.

use std::time::Duration;

use symphonia::core::codecs::{CodecParameters, CodecType};

/// Sample format of the compressed stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub codec: CodecType,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bits per coded sample, when the container reports one.
    pub bits_per_sample: Option<u32>,
    /// Decoded frames carried by each packet; `None` for variable-size packets.
    pub frames_per_packet: Option<u64>,
}

/// Everything the engine and the output device need to know about a track.
///
/// Built once when the source is opened and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct Track {
    format: StreamFormat,
    duration: Option<Duration>,
    total_frames: Option<u64>,
    magic_cookie: Option<Box<[u8]>>,
    max_packet_bytes: usize,
    codec_params: CodecParameters,
}

impl Track {
    pub fn new(
        format: StreamFormat,
        total_frames: Option<u64>,
        magic_cookie: Option<Box<[u8]>>,
        max_packet_bytes: usize,
        codec_params: CodecParameters,
    ) -> Self {
        let duration =
            total_frames.and_then(|frames| duration_from_frames(frames, format.sample_rate));
        Self {
            format,
            duration,
            total_frames,
            magic_cookie,
            max_packet_bytes: max_packet_bytes.max(1),
            codec_params,
        }
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    /// Estimated duration, when the container reports a frame count.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    /// Codec configuration blob passed once to the output device.
    pub fn magic_cookie(&self) -> Option<&[u8]> {
        self.magic_cookie.as_deref()
    }

    /// Upper bound on a single packet's size, used to size buffers up front.
    pub fn max_packet_bytes(&self) -> usize {
        self.max_packet_bytes
    }

    /// Codec parameters for building a decoder for this track's packets.
    pub fn codec_parameters(&self) -> &CodecParameters {
        &self.codec_params
    }

    /// Best-effort codec label used for logs and `info` output.
    pub fn codec_name(&self) -> Option<&'static str> {
        codec_name(self.format.codec)
    }
}

fn duration_from_frames(frames: u64, sample_rate: u32) -> Option<Duration> {
    if sample_rate == 0 {
        return None;
    }
    let rate = sample_rate as u64;
    let secs = frames / rate;
    let nanos = (frames % rate).saturating_mul(1_000_000_000) / rate;
    Some(Duration::new(secs, nanos as u32))
}

fn codec_name(codec: CodecType) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}
