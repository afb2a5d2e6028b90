// View over a byte-oriented SPSC ring placed in shared memory.

use std::ptr::{self, NonNull};

use snafu::ensure;

use super::layout::{
    BufferLockKind, ControlBlock, RingConfig, CONTROL_BLOCK_SIZE, MAX_REGION_SIZE,
};
use crate::error::{self, Result};
use crate::Core::sync::{Role, SpinLock, TwoPartyLock};

/// Snapshot of the control block bookkeeping, taken under the buffer lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingState {
    pub read_offset: u32,
    pub write_offset: u32,
    pub free_space: u32,
    pub message_count: u32,
}

/// A ring buffer view over memory it does not own.
///
/// The control block sits at the start of the memory, the circular data
/// region right after it. Producer and consumer each hold their own view
/// over the same bytes, possibly in different processes.
///
/// ### Concurrency Design:
/// - The control block offsets and counters are only touched while holding
///   the buffer lock (two-party or spin, see [`BufferLockKind`]).
/// - Data bytes are written only by the producer and read only by the
///   consumer, each within the range it claimed under the lock.
pub struct RingBuffer {
    pub(crate) control: NonNull<ControlBlock>,
    pub(crate) data: NonNull<u8>,
    pub(crate) capacity: u32,
    pub(crate) header_size: u32,
    pub(crate) config: RingConfig,
}

unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Initialises a fresh ring over `total_size` bytes at `memory`.
    ///
    /// Zeroes the lock cells and offsets, writes the configuration into the
    /// flags byte and sets `free_space` to the capacity.
    ///
    /// # Safety
    /// `memory` must be valid for reads and writes of `total_size` bytes for
    /// as long as any view over it is used, and no other party may be using
    /// a ring in that memory while it is created.
    pub unsafe fn create(memory: *mut u8, total_size: usize, config: RingConfig) -> Result<Self> {
        let ring = Self::view(memory, total_size, config)?;

        let c = ring.control.as_ptr();
        ptr::write(
            c,
            ControlBlock {
                reader_waiting: Default::default(),
                writer_waiting: Default::default(),
                turn: Default::default(),
                flags: config.to_flags(),
                read_offset: 0,
                write_offset: 0,
                free_space: ring.capacity,
                message_count: 0,
            },
        );

        tracing::debug!(
            capacity = ring.capacity,
            alignment = config.alignment.get(),
            granularity = ?config.granularity,
            buffer_lock = ?config.buffer_lock,
            "created ring buffer"
        );
        Ok(ring)
    }

    /// Attaches to a ring some other party already created in `memory`.
    ///
    /// The configuration is read back from the flags byte; nothing in the
    /// control block is reset. The bookkeeping is validated under the
    /// buffer lock, taken as `role`, since the peer may already be using
    /// the ring.
    ///
    /// # Safety
    /// Same as [`RingBuffer::create`], and the memory must hold a ring
    /// created with [`RingBuffer::create`].
    pub unsafe fn attach(memory: *mut u8, total_size: usize, role: Role) -> Result<Self> {
        ensure!(
            !memory.is_null() && total_size > CONTROL_BLOCK_SIZE,
            error::InvalidArgumentSnafu {
                detail: format!("ring of {} bytes has no room for a control block", total_size),
            }
        );

        let flags = ptr::addr_of!((*(memory as *const ControlBlock)).flags).read();
        let config = RingConfig::from_flags(flags)?;
        let ring = Self::view(memory, total_size, config)?;

        let state = {
            let _guard = ring.lock(role);
            ring.load_state()
        };
        ensure!(
            state.free_space <= ring.capacity
                && state.read_offset < ring.capacity
                && state.write_offset < ring.capacity,
            error::CorruptedHeaderSnafu {
                detail: format!("control block {:?} does not fit capacity {}", state, ring.capacity),
            }
        );

        tracing::debug!(
            capacity = ring.capacity,
            ?config,
            ?state,
            ?role,
            "attached ring buffer"
        );
        Ok(ring)
    }

    unsafe fn view(memory: *mut u8, total_size: usize, config: RingConfig) -> Result<Self> {
        let Some(base) = NonNull::new(memory) else {
            return error::InvalidArgumentSnafu {
                detail: "ring memory pointer is null",
            }
            .fail();
        };

        ensure!(
            config.alignment.is_aligned_ptr(memory),
            error::InvalidArgumentSnafu {
                detail: format!(
                    "ring memory {:p} is not aligned to {}",
                    memory,
                    config.alignment.get()
                ),
            }
        );
        ensure!(
            total_size > CONTROL_BLOCK_SIZE,
            error::InvalidArgumentSnafu {
                detail: format!(
                    "ring of {} bytes has no room after the {} byte control block",
                    total_size, CONTROL_BLOCK_SIZE
                ),
            }
        );
        ensure!(
            total_size <= MAX_REGION_SIZE,
            error::InvalidArgumentSnafu {
                detail: format!("ring of {} bytes exceeds the 2 GiB limit", total_size),
            }
        );

        let capacity = config.capacity_for(total_size) as u32;
        let header_size = config.header_size();
        ensure!(
            capacity >= header_size + config.alignment.get(),
            error::InvalidArgumentSnafu {
                detail: format!(
                    "capacity {} cannot hold a {} byte header and one aligned payload",
                    capacity, header_size
                ),
            }
        );

        Ok(Self {
            control: base.cast(),
            data: NonNull::new_unchecked(memory.add(CONTROL_BLOCK_SIZE)),
            capacity,
            header_size,
            config,
        })
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn config(&self) -> RingConfig {
        self.config
    }

    /// Bytes each message header occupies, lock cell and padding included.
    #[inline]
    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    /// Bytes a message with a `len` byte payload takes in the data region,
    /// not counting any skip at the end of the region.
    pub fn message_footprint(&self, len: u32) -> u64 {
        self.header_size as u64 + self.config.alignment.aligned_size_u64(len as u64)
    }

    /// Builds this side's handle on the buffer lock.
    pub(crate) fn buffer_lock(&self, role: Role) -> BufferLock<'_> {
        let c = self.control.as_ptr();
        // SAFETY: the control block outlives `self`. Only the atomic lock
        // cells are borrowed; the offsets stay behind the raw pointer.
        unsafe {
            match self.config.buffer_lock {
                BufferLockKind::TwoParty => BufferLock::TwoParty(TwoPartyLock::new(
                    &(*c).writer_waiting,
                    &(*c).reader_waiting,
                    &(*c).turn,
                    role,
                )),
                BufferLockKind::Spin => BufferLock::Spin(SpinLock::new(&(*c).turn)),
            }
        }
    }

    pub(crate) fn lock(&self, role: Role) -> BufferGuard<'_> {
        let lock = self.buffer_lock(role);
        lock.lock();
        BufferGuard { lock }
    }

    pub(crate) fn try_lock(&self, role: Role) -> Option<BufferGuard<'_>> {
        let lock = self.buffer_lock(role);
        lock.try_lock().then(|| BufferGuard { lock })
    }

    /// Lock-protected copy of the bookkeeping, taken as `role`.
    pub fn state(&self, role: Role) -> RingState {
        let _guard = self.lock(role);
        unsafe { self.load_state() }
    }

    /// # Safety
    /// The buffer lock must be held, or the ring must not be shared yet.
    pub(crate) unsafe fn load_state(&self) -> RingState {
        let c = self.control.as_ptr();
        RingState {
            read_offset: ptr::addr_of!((*c).read_offset).read(),
            write_offset: ptr::addr_of!((*c).write_offset).read(),
            free_space: ptr::addr_of!((*c).free_space).read(),
            message_count: ptr::addr_of!((*c).message_count).read(),
        }
    }

    /// # Safety
    /// The buffer lock must be held.
    pub(crate) unsafe fn store_state(&self, state: &RingState) {
        let c = self.control.as_ptr();
        ptr::addr_of_mut!((*c).read_offset).write(state.read_offset);
        ptr::addr_of_mut!((*c).write_offset).write(state.write_offset);
        ptr::addr_of_mut!((*c).free_space).write(state.free_space);
        ptr::addr_of_mut!((*c).message_count).write(state.message_count);
    }

    #[inline]
    pub(crate) fn data_at(&self, offset: u32) -> *mut u8 {
        debug_assert!(offset < self.capacity);
        // SAFETY: offsets are always reduced modulo capacity.
        unsafe { self.data.as_ptr().add(offset as usize) }
    }

    /// Copies `src` into the data region at `offset`, continuing at 0 when
    /// the end of the region is reached.
    ///
    /// # Safety
    /// The caller must own the byte range (claimed under the buffer lock).
    pub(crate) unsafe fn write_wrapping(&self, offset: u32, src: &[u8]) {
        let (head, tail) = self.split_at_end(offset, src.len());
        ptr::copy_nonoverlapping(src.as_ptr(), self.data_at(offset), head);
        if tail > 0 {
            ptr::copy_nonoverlapping(src.as_ptr().add(head), self.data_at(0), tail);
        }
    }

    /// Counterpart of [`RingBuffer::write_wrapping`].
    ///
    /// # Safety
    /// The caller must own the byte range (claimed under the buffer lock).
    pub(crate) unsafe fn read_wrapping(&self, offset: u32, dst: &mut [u8]) {
        let (head, tail) = self.split_at_end(offset, dst.len());
        ptr::copy_nonoverlapping(self.data_at(offset), dst.as_mut_ptr(), head);
        if tail > 0 {
            ptr::copy_nonoverlapping(self.data_at(0), dst.as_mut_ptr().add(head), tail);
        }
    }

    /// Zero-fills `len` bytes at `offset`, wrapping like the copies do.
    ///
    /// # Safety
    /// The caller must own the byte range.
    pub(crate) unsafe fn zero_wrapping(&self, offset: u32, len: u32) {
        let (head, tail) = self.split_at_end(offset, len as usize);
        ptr::write_bytes(self.data_at(offset), 0, head);
        if tail > 0 {
            ptr::write_bytes(self.data_at(0), 0, tail);
        }
    }

    #[inline]
    fn split_at_end(&self, offset: u32, len: usize) -> (usize, usize) {
        let room = (self.capacity - offset) as usize;
        if len <= room {
            (len, 0)
        } else {
            (room, len - room)
        }
    }

    /// `(offset + n) mod capacity` without overflowing `u32`.
    #[inline]
    pub(crate) fn advance(&self, offset: u32, n: u32) -> u32 {
        ((offset as u64 + n as u64) % self.capacity as u64) as u32
    }
}

/// Either flavour of buffer lock, bound to one side of the ring.
pub(crate) enum BufferLock<'a> {
    TwoParty(TwoPartyLock<'a>),
    Spin(SpinLock<'a>),
}

impl BufferLock<'_> {
    fn lock(&self) {
        match self {
            BufferLock::TwoParty(lock) => lock.lock(),
            BufferLock::Spin(lock) => lock.lock(),
        }
    }

    fn try_lock(&self) -> bool {
        match self {
            BufferLock::TwoParty(lock) => lock.try_lock(),
            BufferLock::Spin(lock) => lock.try_lock(),
        }
    }

    fn unlock(&self) {
        match self {
            BufferLock::TwoParty(lock) => lock.unlock(),
            BufferLock::Spin(lock) => lock.unlock(),
        }
    }
}

/// Holds the buffer lock until dropped.
pub(crate) struct BufferGuard<'a> {
    lock: BufferLock<'a>,
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
