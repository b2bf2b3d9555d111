//! Container-backed packet source.
//!
//! Uses Symphonia to probe the container and demux packets of the default track. No
//! decoding happens here; packets are forwarded to the output device as-is.

use std::fs::File;
use std::io;
use std::path::Path;

use symphonia::core::codecs::CodecParameters;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{PackState, PacketSource, PacketsRead, RawPacket};
use crate::buffer::AudioBuffer;
use crate::config::EngineConfig;
use crate::error::{SourceError, SourceResult};
use crate::track::{StreamFormat, Track};

/// Per-packet framing overhead allowed on top of the raw sample payload.
const PACKET_HEADER_SLACK: usize = 64;

/// Reads compressed packets from an audio file.
pub struct FilePacketSource {
    format: Box<dyn FormatReader>,
    track_id: u32,
    track: Track,
    state: PackState,
}

impl FilePacketSource {
    /// Open and probe a local file.
    pub fn open(path: impl AsRef<Path>, config: &EngineConfig) -> SourceResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        tracing::debug!(path = %path.display(), "opening packet source");
        Self::from_media_source(Box::new(file), hint, config)
    }

    /// Probe an arbitrary Symphonia [`MediaSource`].
    pub fn from_media_source(
        source: Box<dyn MediaSource>,
        hint: Hint,
        config: &EngineConfig,
    ) -> SourceResult<Self> {
        let mss = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| match e {
                // Running off the end while probing means no format matched.
                SymphoniaError::IoError(err) if err.kind() != io::ErrorKind::UnexpectedEof => {
                    SourceError::Io(err)
                }
                other => SourceError::Format(other.to_string()),
            })?;

        let format = probed.format;
        let default_track = format
            .default_track()
            .ok_or_else(|| SourceError::Format("no default audio track".to_string()))?;
        let track_id = default_track.id;
        let track = track_from_codec_params(
            &default_track.codec_params,
            config.fallback_max_packet_bytes,
        )?;

        tracing::info!(
            codec = track.codec_name().unwrap_or("unknown"),
            rate_hz = track.sample_rate(),
            channels = track.channels(),
            max_packet_bytes = track.max_packet_bytes(),
            cookie_bytes = track.magic_cookie().map(|c| c.len()).unwrap_or(0),
            "packet source opened"
        );

        Ok(Self {
            format,
            track_id,
            track,
            state: PackState::default(),
        })
    }
}

impl PacketSource for FilePacketSource {
    fn track(&self) -> &Track {
        &self.track
    }

    fn read_packets(
        &mut self,
        max_count: usize,
        buffer: &mut AudioBuffer,
    ) -> SourceResult<PacketsRead> {
        let format = &mut self.format;
        let track_id = self.track_id;
        self.state
            .fill(max_count, buffer, || next_track_packet(&mut **format, track_id))
    }
}

/// Pull the next packet of `track_id`, skipping packets of other tracks.
fn next_track_packet(
    format: &mut dyn FormatReader,
    track_id: u32,
) -> SourceResult<Option<RawPacket>> {
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() != track_id => continue,
            Ok(packet) => {
                return Ok(Some(RawPacket {
                    frames: u32::try_from(packet.dur).unwrap_or(u32::MAX),
                    data: packet.data,
                }));
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(SymphoniaError::ResetRequired) => {
                tracing::warn!("stream reset required; treating as end of stream");
                return Ok(None);
            }
            Err(SymphoniaError::IoError(e)) => return Err(SourceError::Io(e)),
            Err(other) => return Err(SourceError::Io(io::Error::other(other.to_string()))),
        }
    }
}

/// Build the immutable [`Track`] from the container's codec parameters.
fn track_from_codec_params(
    params: &CodecParameters,
    fallback_max_packet_bytes: usize,
) -> SourceResult<Track> {
    let sample_rate = params
        .sample_rate
        .filter(|rate| *rate > 0)
        .ok_or_else(|| SourceError::Format("unknown sample rate".to_string()))?;
    let channels = params
        .channels
        .map(|c| c.count())
        .filter(|count| *count > 0)
        .ok_or_else(|| SourceError::Format("unknown channel layout".to_string()))?;

    let format = StreamFormat {
        codec: params.codec,
        sample_rate,
        channels: channels as u16,
        bits_per_sample: params.bits_per_coded_sample.or(params.bits_per_sample),
        frames_per_packet: params.max_frames_per_packet,
    };

    Ok(Track::new(
        format,
        params.n_frames,
        params.extra_data.clone(),
        max_packet_bytes(params, fallback_max_packet_bytes),
        params.clone(),
    ))
}

/// Upper bound on a packet's size derived from the codec parameters.
///
/// Uses `max_frames_per_packet × channels × bytes per sample` plus framing slack when
/// all three are known, otherwise `fallback`.
fn max_packet_bytes(params: &CodecParameters, fallback: usize) -> usize {
    let frames = params.max_frames_per_packet;
    let channels = params.channels.map(|c| c.count() as u64);
    let bits = params.bits_per_coded_sample.or(params.bits_per_sample);
    match (frames, channels, bits) {
        (Some(frames), Some(channels), Some(bits)) if frames > 0 && channels > 0 && bits > 0 => {
            let bytes_per_sample = (bits as u64).div_ceil(8);
            let raw = frames
                .saturating_mul(channels)
                .saturating_mul(bytes_per_sample);
            let bound = usize::try_from(raw).unwrap_or(usize::MAX);
            bound.saturating_add(bound / 64).saturating_add(PACKET_HEADER_SLACK)
        }
        _ => fallback.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferId;
    use symphonia::core::audio::Channels;
    use symphonia::core::codecs::CODEC_TYPE_FLAC;

    fn write_wav(path: &Path, frames: u32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let v = (i % 128) as i16;
            writer.write_sample(v).unwrap();
            writer.write_sample(-v).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn temp_wav(name: &str, frames: u32) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "queue-engine-{name}-{}.wav",
            std::process::id()
        ));
        write_wav(&path, frames);
        path
    }

    #[test]
    fn max_packet_bytes_uses_codec_bounds() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        params.max_frames_per_packet = Some(4096);
        params.channels = Some(Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        params.bits_per_sample = Some(24);
        let raw = 4096 * 2 * 3;
        assert_eq!(max_packet_bytes(&params, 1000), raw + raw / 64 + PACKET_HEADER_SLACK);
    }

    #[test]
    fn max_packet_bytes_falls_back_when_unknown() {
        let params = CodecParameters::new();
        assert_eq!(max_packet_bytes(&params, 1234), 1234);
        assert_eq!(max_packet_bytes(&params, 0), 1);
    }

    #[test]
    fn track_requires_sample_rate_and_channels() {
        let mut params = CodecParameters::new();
        assert!(matches!(
            track_from_codec_params(&params, 1024),
            Err(SourceError::Format(_))
        ));
        params.sample_rate = Some(44_100);
        assert!(matches!(
            track_from_codec_params(&params, 1024),
            Err(SourceError::Format(_))
        ));
        params.channels = Some(Channels::FRONT_LEFT);
        params.n_frames = Some(44_100);
        params.extra_data = Some(vec![0xAB; 34].into_boxed_slice());
        let track = track_from_codec_params(&params, 1024).unwrap();
        assert_eq!(track.channels(), 1);
        assert_eq!(track.duration(), Some(std::time::Duration::from_secs(1)));
        assert_eq!(track.magic_cookie().map(|c| c.len()), Some(34));
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let err = FilePacketSource::open("/definitely/not/here.flac", &EngineConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Io(_)));
    }

    #[test]
    fn open_garbage_is_format_error() {
        let name = format!("queue-engine-garbage-{}.bin", std::process::id());
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, b"this is not an audio container at all").unwrap();
        let result = FilePacketSource::open(&path, &EngineConfig::default());
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result.err(), Some(SourceError::Format(_))));
    }

    #[test]
    fn wav_file_reads_every_frame_then_signals_end() {
        let frames = 20_000;
        let path = temp_wav("frames", frames);
        let mut source = FilePacketSource::open(&path, &EngineConfig::default()).unwrap();
        assert_eq!(source.track().sample_rate(), 8_000);
        assert_eq!(source.track().channels(), 2);
        assert_eq!(source.track().total_frames(), Some(frames as u64));

        let capacity = source.track().max_packet_bytes() * 4;
        let mut buffer = AudioBuffer::new(BufferId(0), capacity, 4);
        let mut total_frames = 0u64;
        let mut total_bytes = 0usize;
        loop {
            let read = source.read_packets(4, &mut buffer).unwrap();
            if read.is_end_of_stream() {
                break;
            }
            assert!(read.packets <= 4);
            assert_eq!(read.bytes, buffer.bytes().len());
            total_frames += buffer.packets().iter().map(|p| p.frames as u64).sum::<u64>();
            total_bytes += read.bytes;
        }
        let _ = std::fs::remove_file(&path);

        assert_eq!(total_frames, frames as u64);
        assert_eq!(total_bytes, frames as usize * 4);
        assert!(source.read_packets(4, &mut buffer).unwrap().is_end_of_stream());
    }
}
