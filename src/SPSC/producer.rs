// src/SPSC/producer.rs

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::Core::sync::Role;
use crate::Core::SharedMemoryBackend;
use crate::SPSC::Buffer::{RingBuffer, RingState};
use crate::SPSC::Structs::{Packet, TransferIdGenerator};

/// The writing end (Tx) of one ring buffer.
///
/// Push operations take `&mut self`: the ring has exactly one producer, and
/// one `Producer` value stands for it. Wrap it in a [`SharedProducer`] when
/// several threads need to write.
pub struct Producer {
    pub(crate) region: Arc<dyn SharedMemoryBackend>,
    pub(crate) ring: RingBuffer,
    pub(crate) ids: Arc<TransferIdGenerator>,
}

impl Producer {
    pub(crate) fn new(
        region: Arc<dyn SharedMemoryBackend>,
        ring: RingBuffer,
        ids: Arc<TransferIdGenerator>,
    ) -> Self {
        Self { region, ring, ids }
    }

    /// Builds a packet stamped with this producer's next transfer id.
    pub fn packet(&self, payload: impl Into<Vec<u8>>) -> Packet {
        Packet::new(payload, &self.ids)
    }

    /// Enqueues `packet`, busy-waiting for the buffer lock.
    ///
    /// # Returns
    /// * `Ok(())` once the message is queued, or immediately for an empty payload
    /// * `Err(Overflow)` if it does not fit right now; nothing was written
    pub fn push(&mut self, packet: &Packet) -> Result<()> {
        self.ring.push(packet)
    }

    /// Single attempt at the buffer lock; `WouldBlock` if the consumer holds it.
    pub fn try_push(&mut self, packet: &Packet) -> Result<()> {
        self.ring.try_push(packet)
    }

    /// Wraps `message` in a packet and pushes it. Returns the transfer id.
    pub fn send<T: AsRef<[u8]>>(&mut self, message: T) -> Result<u32> {
        let packet = self.packet(message.as_ref());
        self.push(&packet)?;
        Ok(packet.transfer_id())
    }

    /// True if not even a one-byte message fits right now.
    pub fn is_full(&self) -> bool {
        let free = self.state().free_space;
        free < self.ring.header_size() + self.ring.config().alignment.get()
    }

    pub fn free_space(&self) -> u32 {
        self.state().free_space
    }

    pub fn capacity(&self) -> u32 {
        self.ring.capacity()
    }

    /// Largest payload an empty ring accepts.
    pub fn max_message_size(&self) -> u32 {
        self.ring.capacity() - self.ring.header_size()
    }

    /// Lock-protected snapshot of the ring bookkeeping.
    pub fn state(&self) -> RingState {
        self.ring.state(Role::Producer)
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn region(&self) -> &dyn SharedMemoryBackend {
        self.region.as_ref()
    }

    pub fn transfer_ids(&self) -> &Arc<TransferIdGenerator> {
        &self.ids
    }
}

/// A [`Producer`] that several threads can write through.
///
/// The ring protocol stays single-producer; this serialises the writers in
/// front of it.
pub struct SharedProducer {
    inner: Mutex<Producer>,
}

impl SharedProducer {
    pub fn new(producer: Producer) -> Self {
        Self {
            inner: Mutex::new(producer),
        }
    }

    pub fn push(&self, packet: &Packet) -> Result<()> {
        self.inner.lock().push(packet)
    }

    pub fn send<T: AsRef<[u8]>>(&self, message: T) -> Result<u32> {
        self.inner.lock().send(message)
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().is_full()
    }

    pub fn into_inner(self) -> Producer {
        self.inner.into_inner()
    }
}

impl From<Producer> for SharedProducer {
    fn from(producer: Producer) -> Self {
        Self::new(producer)
    }
}
