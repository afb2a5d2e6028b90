use snafu::{ensure, OptionExt};

use super::layout::{LockGranularity, MESSAGE_LOCK_SIZE};
use super::Buffer::{BufferGuard, RingBuffer, RingState};
use crate::error::{self, Result};
use crate::Core::sync::{Role, SpinLock};
use crate::SPSC::Structs::{Packet, PacketHeader, PACKET_HEADER_SIZE};

/// Where a message sits in the data region, worked out under the lock.
#[derive(Clone, Copy, Debug)]
struct Placement {
    /// Bytes skipped at the end of the region so the header is not split.
    skip: u32,
    header_at: u32,
    payload_at: u32,
    /// Aligned payload size.
    payload_size: u32,
}

impl Placement {
    fn claimed(&self, header_size: u32) -> u32 {
        self.skip + header_size + self.payload_size
    }
}

impl RingBuffer {
    /// Bytes to skip at `offset` so a header starting there stays contiguous.
    #[inline]
    fn header_skip(&self, offset: u32) -> u32 {
        if offset + self.header_size > self.capacity {
            self.capacity - offset
        } else {
            0
        }
    }

    fn place(&self, offset: u32, payload_size: u32) -> Placement {
        let skip = self.header_skip(offset);
        let header_at = if skip > 0 { 0 } else { offset };
        Placement {
            skip,
            header_at,
            payload_at: self.advance(header_at, self.header_size),
            payload_size,
        }
    }

    #[inline]
    fn lock_cell_size(&self) -> u32 {
        match self.config.granularity {
            LockGranularity::Coarse => 0,
            LockGranularity::Fine => MESSAGE_LOCK_SIZE,
        }
    }

    /// The per-message spinlock in front of a fine-grained header.
    fn message_lock(&self, header_at: u32) -> SpinLock<'_> {
        // SAFETY: the cell lies inside the data region, which outlives
        // `self`, and always holds 0 or 1 once a header was written there.
        unsafe { SpinLock::from_ptr(self.data_at(header_at) as *mut bool) }
    }

    fn acquire(&self, role: Role, wait: bool) -> Result<BufferGuard<'_>> {
        if wait {
            Ok(self.lock(role))
        } else {
            self.try_lock(role).context(error::WouldBlockSnafu)
        }
    }

    /// Enqueues `packet`, spinning on the buffer lock. Producer side only.
    pub(crate) fn push(&self, packet: &Packet) -> Result<()> {
        self.push_inner(packet, true)
    }

    /// Like [`RingBuffer::push`] but fails with `WouldBlock` instead of
    /// spinning when the consumer holds the lock.
    pub(crate) fn try_push(&self, packet: &Packet) -> Result<()> {
        self.push_inner(packet, false)
    }

    fn push_inner(&self, packet: &Packet, wait: bool) -> Result<()> {
        let payload = packet.payload.as_slice();
        if payload.is_empty() {
            return Ok(());
        }

        ensure!(
            payload.len() <= u32::MAX as usize,
            error::InvalidArgumentSnafu {
                detail: format!("payload of {} bytes exceeds u32 sizes", payload.len()),
            }
        );
        let len = payload.len() as u32;
        let payload_size = self.config.alignment.aligned_size_u64(len as u64);
        let needed = self.header_size as u64 + payload_size;

        let guard = self.acquire(Role::Producer, wait)?;
        // SAFETY: lock held.
        let mut state = unsafe { self.load_state() };

        let skip = self.header_skip(state.write_offset);
        ensure!(
            needed + skip as u64 <= state.free_space as u64,
            error::OverflowSnafu {
                needed: needed + skip as u64,
                free: state.free_space,
            }
        );

        // Fits in free space, so it also fits in u32.
        let at = self.place(state.write_offset, payload_size as u32);
        state.write_offset = self.advance(at.payload_at, at.payload_size);
        state.free_space -= at.claimed(self.header_size);
        state.message_count += 1;

        let header = PacketHeader {
            size: len,
            ..packet.header
        };
        let mut header_bytes = [0u8; MESSAGE_LOCK_SIZE as usize + PACKET_HEADER_SIZE];
        let cell = self.lock_cell_size() as usize;
        header_bytes[cell..cell + PACKET_HEADER_SIZE].copy_from_slice(&header.to_bytes());

        match self.config.granularity {
            LockGranularity::Coarse => unsafe {
                self.write_wrapping(at.header_at, &header_bytes[..PACKET_HEADER_SIZE]);
                self.write_wrapping(at.payload_at, payload);
                self.store_state(&state);
                drop(guard);
            },
            LockGranularity::Fine => unsafe {
                // Header goes out with its message lock already taken; the
                // consumer may claim it as soon as the buffer lock drops.
                header_bytes[0] = 1;
                self.write_wrapping(at.header_at, &header_bytes);
                self.store_state(&state);
                drop(guard);

                self.write_wrapping(at.payload_at, payload);
                self.message_lock(at.header_at).unlock();
            },
        }

        tracing::trace!(
            len,
            transfer_id = header.transfer_id,
            skip = at.skip,
            header_at = at.header_at,
            free = state.free_space,
            "pushed message"
        );
        Ok(())
    }

    /// Dequeues the oldest message, spinning on the buffer lock. Consumer
    /// side only. Fails with `EmptyBuffer` when nothing is queued.
    pub(crate) fn pop(&self) -> Result<Packet> {
        self.pop_inner(true)
    }

    pub(crate) fn try_pop(&self) -> Result<Packet> {
        self.pop_inner(false)
    }

    fn pop_inner(&self, wait: bool) -> Result<Packet> {
        let guard = self.acquire(Role::Consumer, wait)?;
        // SAFETY: lock held.
        let mut state = unsafe { self.load_state() };
        ensure!(state.message_count > 0, error::EmptyBufferSnafu);

        let skip = self.header_skip(state.read_offset);
        let header_at = if skip > 0 { 0 } else { state.read_offset };

        let mut raw = [0u8; PACKET_HEADER_SIZE];
        unsafe { self.read_wrapping(header_at + self.lock_cell_size(), &mut raw) };
        let header = PacketHeader::from_bytes(&raw);

        let used = (self.capacity - state.free_space) as u64;
        let payload_size = self.config.alignment.aligned_size_u64(header.size as u64);
        let claimed = skip as u64 + self.header_size as u64 + payload_size;
        ensure!(
            header.size > 0 && claimed <= used,
            error::CorruptedHeaderSnafu {
                detail: format!(
                    "header at {} claims {} bytes, {} in use",
                    header_at, claimed, used
                ),
            }
        );

        let at = self.place(state.read_offset, payload_size as u32);
        state.read_offset = self.advance(at.payload_at, at.payload_size);
        state.message_count -= 1;

        let mut payload = vec![0u8; header.size as usize];

        match self.config.granularity {
            LockGranularity::Coarse => unsafe {
                self.read_wrapping(at.payload_at, &mut payload);
                self.scrub(&at);
                self.release(&mut state, claimed as u32);
                self.store_state(&state);
                drop(guard);
            },
            LockGranularity::Fine => {
                unsafe { self.store_state(&state) };
                drop(guard);

                let message = self.message_lock(at.header_at);
                message.lock();
                unsafe { self.read_wrapping(at.payload_at, &mut payload) };
                message.unlock();
                unsafe { self.scrub(&at) };

                // The range is ours until credited back, so this waits even
                // for try_pop.
                let _guard = self.lock(Role::Consumer);
                unsafe {
                    state = self.load_state();
                    self.release(&mut state, claimed as u32);
                    self.store_state(&state);
                }
            }
        }

        tracing::trace!(
            len = header.size,
            transfer_id = header.transfer_id,
            skip = at.skip,
            header_at = at.header_at,
            free = state.free_space,
            "popped message"
        );
        Ok(Packet::from_parts(header, payload))
    }

    /// Credits a consumed message back and re-synchronises the offsets once
    /// the ring is fully drained.
    fn release(&self, state: &mut RingState, claimed: u32) {
        state.free_space += claimed;
        if state.free_space == self.capacity {
            state.read_offset = 0;
            state.write_offset = 0;
        }
    }

    /// Zero-fills a consumed message in debug builds.
    ///
    /// # Safety
    /// The consumer must still own the message's bytes.
    unsafe fn scrub(&self, at: &Placement) {
        if !cfg!(debug_assertions) {
            return;
        }
        if at.skip > 0 {
            self.zero_wrapping(self.capacity - at.skip, at.skip);
        }
        self.zero_wrapping(at.header_at, self.header_size);
        self.zero_wrapping(at.payload_at, at.payload_size);
    }

    /// True when no bytes are claimed by queued messages.
    pub fn is_empty(&self, role: Role) -> bool {
        self.state(role).free_space == self.capacity
    }

    pub fn message_count(&self, role: Role) -> u32 {
        self.state(role).message_count
    }
}
