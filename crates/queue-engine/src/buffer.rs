//! Fixed-capacity packet buffers and the pool that owns them.
//!
//! All buffers are created once when a track is opened and freed together when the
//! pool is dropped. A buffer is either idle in the pool or owned by the output device;
//! the pool keeps a per-slot flag so a buffer can never be handed out twice.

use crate::device::OutputDevice;
use crate::error::{DeviceResult, PoolError};

/// Stable index of a buffer within its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Location and size of one packet inside an [`AudioBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketDescription {
    /// Byte offset of the packet within the buffer data.
    pub offset: usize,
    /// Packet length in bytes.
    pub length: usize,
    /// Decoded frames in this packet (0 when the container does not say).
    pub frames: u32,
}

/// Scratch region holding a batch of compressed packets plus their descriptors.
///
/// Capacity is fixed at creation; pushing never reallocates.
#[derive(Debug)]
pub struct AudioBuffer {
    id: BufferId,
    data: Box<[u8]>,
    len: usize,
    packets: Vec<PacketDescription>,
    max_packets: usize,
}

impl AudioBuffer {
    pub fn new(id: BufferId, byte_capacity: usize, max_packets: usize) -> Self {
        Self {
            id,
            data: vec![0u8; byte_capacity].into_boxed_slice(),
            len: 0,
            packets: Vec::with_capacity(max_packets),
            max_packets,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Total bytes this buffer can hold.
    pub fn byte_capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes still free.
    pub fn remaining_bytes(&self) -> usize {
        self.data.len() - self.len
    }

    /// `true` when another packet of `bytes` length would fit.
    pub fn fits(&self, bytes: usize) -> bool {
        self.packets.len() < self.max_packets && bytes <= self.remaining_bytes()
    }

    /// Append one packet. Returns `false` (leaving the buffer untouched) if it does not fit.
    pub fn push_packet(&mut self, bytes: &[u8], frames: u32) -> bool {
        if !self.fits(bytes.len()) {
            return false;
        }
        let offset = self.len;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        self.packets.push(PacketDescription {
            offset,
            length: bytes.len(),
            frames,
        });
        true
    }

    /// Forget the current contents; capacity is kept.
    pub fn clear(&mut self) {
        self.len = 0;
        self.packets.clear();
    }

    /// Filled portion of the data region.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn packets(&self) -> &[PacketDescription] {
        &self.packets
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Bytes of the packet at `index`.
    pub fn packet_bytes(&self, index: usize) -> Option<&[u8]> {
        let desc = self.packets.get(index)?;
        self.data.get(desc.offset..desc.offset + desc.length)
    }

    /// Iterate `(descriptor, bytes)` pairs in submission order.
    pub fn iter_packets(&self) -> impl Iterator<Item = (&PacketDescription, &[u8])> {
        self.packets
            .iter()
            .map(|desc| (desc, &self.data[desc.offset..desc.offset + desc.length]))
    }
}

enum Slot {
    Idle(AudioBuffer),
    InFlight,
}

/// Fixed set of buffers rotating between the engine and the output device.
pub struct BufferPool {
    slots: Vec<Slot>,
}

impl BufferPool {
    /// Eagerly create `count` buffers through the device.
    ///
    /// If any allocation fails, the buffers created so far are dropped and the error is
    /// returned.
    pub fn allocate<D>(
        device: &mut D,
        count: usize,
        byte_capacity: usize,
        max_packets: usize,
    ) -> DeviceResult<Self>
    where
        D: OutputDevice + ?Sized,
    {
        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            let buffer = device.allocate_buffer(BufferId(index), byte_capacity, max_packets)?;
            slots.push(Slot::Idle(buffer));
        }
        tracing::debug!(count, byte_capacity, max_packets, "buffer pool allocated");
        Ok(Self { slots })
    }

    /// Number of buffers in the pool.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn idle_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Idle(_)))
            .count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.slots.len() - self.idle_count()
    }

    /// Whether the buffer with `id` is currently out of the pool.
    pub fn is_in_flight(&self, id: BufferId) -> bool {
        matches!(self.slots.get(id.0), Some(Slot::InFlight))
    }

    /// Take a specific idle buffer, marking it in flight.
    pub fn take(&mut self, id: BufferId) -> Option<AudioBuffer> {
        let slot = self.slots.get_mut(id.0)?;
        match std::mem::replace(slot, Slot::InFlight) {
            Slot::Idle(buffer) => Some(buffer),
            Slot::InFlight => None,
        }
    }

    /// Take the lowest-numbered idle buffer, marking it in flight.
    pub fn take_idle(&mut self) -> Option<AudioBuffer> {
        let index = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Slot::Idle(_)))?;
        self.take(BufferId(index))
    }

    /// Return a buffer to its slot.
    pub fn release(&mut self, buffer: AudioBuffer) -> Result<(), PoolError> {
        let id = buffer.id();
        let slot = self
            .slots
            .get_mut(id.0)
            .ok_or(PoolError::UnknownBuffer(id.0))?;
        match slot {
            Slot::InFlight => {
                *slot = Slot::Idle(buffer);
                Ok(())
            }
            Slot::Idle(_) => Err(PoolError::NotInFlight(id.0)),
        }
    }
}
