use std::fmt;

use crate::Core::SharedMemory::{HeapMemory, SharedMemoryBackend};
use crate::SPSC::Buffer::RingBuffer;
use crate::SPSC::{Consumer, Pipe, Producer};

// Debug output for types holding raw pointers into shared memory. None of
// these take the buffer lock; they only show what is local to the view.

impl fmt::Debug for HeapMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapMemory")
            .field("ptr", &format_args!("{:p}", self.as_ptr()))
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(unix)]
impl fmt::Debug for crate::Core::SharedMemory::PosixSharedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PosixSharedMemory")
            .field("name", &self.name())
            .field("size", &self.size())
            .field("handle", &self.raw_handle())
            .field("owner", &self.is_owner())
            .finish_non_exhaustive()
    }
}

/// Safely displays the ring's location and configuration without touching
/// the shared control block.
impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("control", &format_args!("0x{:x}", self.control.as_ptr() as usize))
            .field("capacity", &self.capacity)
            .field("header_size", &self.header_size)
            .field("config", &self.config)
            .finish()
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("region", &self.region.name())
            .field("ring", &self.ring)
            .field("next_transfer_id", &self.ids.peek())
            .finish()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("region", &self.region.name())
            .field("ring", &self.ring)
            .finish()
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("name", &self.name)
            .field("tx", &self.tx)
            .field("rx", &self.rx)
            .finish()
    }
}
