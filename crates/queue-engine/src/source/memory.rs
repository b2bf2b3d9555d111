use std::collections::VecDeque;

use super::{PackState, PacketSource, PacketsRead, RawPacket};
use crate::buffer::AudioBuffer;
use crate::error::SourceResult;
use crate::track::Track;

/// Packet source over packets already held in memory.
pub struct MemoryPacketSource {
    track: Track,
    packets: VecDeque<RawPacket>,
    state: PackState,
}

impl MemoryPacketSource {
    /// Each packet carries `track.format().frames_per_packet` frames (0 if unknown).
    pub fn new<I>(track: Track, packets: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let frames = track
            .format()
            .frames_per_packet
            .and_then(|f| u32::try_from(f).ok())
            .unwrap_or(0);
        Self::with_frames(track, packets.into_iter().map(|data| (data, frames)))
    }

    /// Packets with explicit per-packet frame counts.
    pub fn with_frames<I>(track: Track, packets: I) -> Self
    where
        I: IntoIterator<Item = (Vec<u8>, u32)>,
    {
        let packets = packets
            .into_iter()
            .map(|(data, frames)| RawPacket {
                data: data.into_boxed_slice(),
                frames,
            })
            .collect();
        Self {
            track,
            packets,
            state: PackState::default(),
        }
    }

    /// Packets not yet handed out (excluding one held back for the next read).
    pub fn remaining(&self) -> usize {
        self.packets.len()
    }
}

impl PacketSource for MemoryPacketSource {
    fn track(&self) -> &Track {
        &self.track
    }

    fn read_packets(
        &mut self,
        max_count: usize,
        buffer: &mut AudioBuffer,
    ) -> SourceResult<PacketsRead> {
        let packets = &mut self.packets;
        self.state.fill(max_count, buffer, || Ok(packets.pop_front()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferId;
    use crate::mock::test_track;

    #[test]
    fn reads_in_order_with_track_frame_count() {
        let track = test_track(8);
        let mut source = MemoryPacketSource::new(track, (0..3u8).map(|i| vec![i; 4]));
        let mut buffer = AudioBuffer::new(BufferId(0), 64, 2);

        let read = source.read_packets(10, &mut buffer).unwrap();
        assert_eq!(read, PacketsRead { packets: 2, bytes: 8 });
        assert_eq!(buffer.packets()[1].frames, 1024);
        assert_eq!(buffer.packet_bytes(1), Some(&[1u8; 4][..]));

        let read = source.read_packets(10, &mut buffer).unwrap();
        assert_eq!(read.packets, 1);
        assert_eq!(buffer.packet_bytes(0), Some(&[2u8; 4][..]));
        assert_eq!(source.remaining(), 0);
        assert!(source.read_packets(10, &mut buffer).unwrap().is_end_of_stream());
    }
}
