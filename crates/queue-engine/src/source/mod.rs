//! Sequential packet readers.
//!
//! A [`PacketSource`] yields compressed packets in container order, packing as many as
//! fit into the buffer it is given. It never re-reads: a packet that does not fit is held
//! back and becomes the first packet of the next call.

mod file;
mod memory;

pub use file::FilePacketSource;
pub use memory::MemoryPacketSource;

use crate::buffer::AudioBuffer;
use crate::error::{SourceError, SourceResult};
use crate::track::Track;

/// Outcome of one [`PacketSource::read_packets`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketsRead {
    pub packets: usize,
    pub bytes: usize,
}

impl PacketsRead {
    /// `true` when the source had nothing left.
    pub fn is_end_of_stream(&self) -> bool {
        self.packets == 0
    }
}

/// Sequential reader over an audio container.
pub trait PacketSource: Send {
    /// Format, duration, codec configuration, and packet size bound of the stream.
    fn track(&self) -> &Track;

    /// Replace the contents of `buffer` with up to `max_count` packets, bounded by the
    /// buffer's byte and descriptor capacity.
    ///
    /// Returns `packets == 0` exactly at end of stream.
    fn read_packets(
        &mut self,
        max_count: usize,
        buffer: &mut AudioBuffer,
    ) -> SourceResult<PacketsRead>;
}

/// One compressed packet pulled from a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RawPacket {
    pub(crate) data: Box<[u8]>,
    pub(crate) frames: u32,
}

/// Carry-over between reads: a held-back packet, an error seen after some packets were
/// already packed, and whether the underlying reader is exhausted.
#[derive(Debug, Default)]
pub(crate) struct PackState {
    pending: Option<RawPacket>,
    deferred: Option<SourceError>,
    exhausted: bool,
}

impl PackState {
    /// Fill `buffer` from `next`, honoring the held-back packet first.
    ///
    /// `next` returns `Ok(None)` at end of stream. An error raised after at least one
    /// packet was packed is deferred to the following call so no packet is lost.
    pub(crate) fn fill<F>(
        &mut self,
        max_count: usize,
        buffer: &mut AudioBuffer,
        mut next: F,
    ) -> SourceResult<PacketsRead>
    where
        F: FnMut() -> SourceResult<Option<RawPacket>>,
    {
        buffer.clear();
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let mut read = PacketsRead::default();
        while read.packets < max_count {
            let packet = match self.pending.take() {
                Some(packet) => packet,
                None => {
                    if self.exhausted {
                        break;
                    }
                    match next() {
                        Ok(Some(packet)) => packet,
                        Ok(None) => {
                            self.exhausted = true;
                            break;
                        }
                        Err(err) if read.packets > 0 => {
                            self.deferred = Some(err);
                            break;
                        }
                        Err(err) => return Err(err),
                    }
                }
            };

            if packet.data.len() > buffer.byte_capacity() {
                if read.packets > 0 {
                    self.pending = Some(packet);
                    break;
                }
                return Err(SourceError::OversizedPacket {
                    packet_bytes: packet.data.len(),
                    capacity: buffer.byte_capacity(),
                });
            }

            if !buffer.push_packet(&packet.data, packet.frames) {
                self.pending = Some(packet);
                break;
            }
            read.packets += 1;
            read.bytes += packet.data.len();
        }
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferId;
    use std::collections::VecDeque;

    fn packet(len: usize) -> RawPacket {
        RawPacket {
            data: vec![len as u8; len].into_boxed_slice(),
            frames: 10,
        }
    }

    fn feeder(
        packets: Vec<SourceResult<Option<RawPacket>>>,
    ) -> impl FnMut() -> SourceResult<Option<RawPacket>> {
        let mut queue: VecDeque<_> = packets.into();
        move || queue.pop_front().unwrap_or(Ok(None))
    }

    #[test]
    fn fill_holds_back_packet_that_does_not_fit() {
        let mut state = PackState::default();
        let mut buffer = AudioBuffer::new(BufferId(0), 10, 8);
        let mut next = feeder(vec![Ok(Some(packet(6))), Ok(Some(packet(6))), Ok(Some(packet(3)))]);

        let first = state.fill(8, &mut buffer, &mut next).unwrap();
        assert_eq!(first, PacketsRead { packets: 1, bytes: 6 });

        let second = state.fill(8, &mut buffer, &mut next).unwrap();
        assert_eq!(second, PacketsRead { packets: 2, bytes: 9 });
        assert_eq!(buffer.packet_bytes(0), Some(&[6u8; 6][..]));

        let end = state.fill(8, &mut buffer, &mut next).unwrap();
        assert!(end.is_end_of_stream());
        assert!(buffer.is_empty());
    }

    #[test]
    fn fill_respects_max_count() {
        let mut state = PackState::default();
        let mut buffer = AudioBuffer::new(BufferId(0), 100, 8);
        let mut next = feeder((0..5).map(|_| Ok(Some(packet(2)))).collect());

        assert_eq!(state.fill(3, &mut buffer, &mut next).unwrap().packets, 3);
        assert_eq!(state.fill(3, &mut buffer, &mut next).unwrap().packets, 2);
        assert_eq!(state.fill(3, &mut buffer, &mut next).unwrap().packets, 0);
    }

    #[test]
    fn fill_defers_error_after_partial_read() {
        let mut state = PackState::default();
        let mut buffer = AudioBuffer::new(BufferId(0), 100, 8);
        let mut next = feeder(vec![
            Ok(Some(packet(2))),
            Err(SourceError::Io(std::io::Error::other("disk gone"))),
        ]);

        assert_eq!(state.fill(8, &mut buffer, &mut next).unwrap().packets, 1);
        assert!(matches!(state.fill(8, &mut buffer, &mut next), Err(SourceError::Io(_))));
    }

    #[test]
    fn fill_reports_oversized_packet_on_empty_buffer() {
        let mut state = PackState::default();
        let mut buffer = AudioBuffer::new(BufferId(0), 4, 8);
        let mut next = feeder(vec![Ok(Some(packet(2))), Ok(Some(packet(9)))]);

        assert_eq!(state.fill(8, &mut buffer, &mut next).unwrap().packets, 1);
        let err = state.fill(8, &mut buffer, &mut next).unwrap_err();
        assert!(matches!(
            err,
            SourceError::OversizedPacket { packet_bytes: 9, capacity: 4 }
        ));
    }

    #[test]
    fn fill_stops_calling_reader_once_exhausted() {
        let mut state = PackState::default();
        let mut buffer = AudioBuffer::new(BufferId(0), 100, 8);
        let mut calls = 0;
        let mut next = || {
            calls += 1;
            Ok(None)
        };
        assert!(state.fill(8, &mut buffer, &mut next).unwrap().is_end_of_stream());
        assert!(state.fill(8, &mut buffer, &mut next).unwrap().is_end_of_stream());
        assert_eq!(calls, 1);
    }
}
