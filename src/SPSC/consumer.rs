// src/SPSC/consumer.rs

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::Core::sync::Role;
use crate::Core::SharedMemoryBackend;
use crate::SPSC::Buffer::{RingBuffer, RingState};
use crate::SPSC::Structs::Packet;

/// The reading end (Rx) of one ring buffer.
pub struct Consumer {
    pub(crate) region: Arc<dyn SharedMemoryBackend>,
    pub(crate) ring: RingBuffer,
}

impl Consumer {
    pub(crate) fn new(region: Arc<dyn SharedMemoryBackend>, ring: RingBuffer) -> Self {
        Self { region, ring }
    }

    /// Dequeues the oldest message.
    ///
    /// # Returns
    /// * `Ok(packet)` with a freshly allocated copy of the message
    /// * `Err(EmptyBuffer)` if nothing is queued; callers poll
    pub fn pop(&mut self) -> Result<Packet> {
        self.ring.pop()
    }

    /// Single attempt at the buffer lock; `WouldBlock` if the producer holds it.
    pub fn try_pop(&mut self) -> Result<Packet> {
        self.ring.try_pop()
    }

    /// Same as [`Consumer::pop`], but an empty ring yields `Ok(None)`.
    pub fn pull(&mut self) -> Result<Option<Packet>> {
        match self.ring.pop() {
            Ok(packet) => Ok(Some(packet)),
            Err(Error::EmptyBuffer { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn message_count(&self) -> u32 {
        self.ring.message_count(Role::Consumer)
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty(Role::Consumer)
    }

    pub fn capacity(&self) -> u32 {
        self.ring.capacity()
    }

    /// Lock-protected snapshot of the ring bookkeeping.
    pub fn state(&self) -> RingState {
        self.ring.state(Role::Consumer)
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn region(&self) -> &dyn SharedMemoryBackend {
        self.region.as_ref()
    }
}
