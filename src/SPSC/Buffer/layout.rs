use std::mem::size_of;
use std::sync::atomic::AtomicBool;

use snafu::ensure;

use crate::error::{self, Result};
use crate::Core::align::Alignment;

/// Hard cap on the total region a ring may span; offsets are `u32`.
pub const MAX_REGION_SIZE: usize = 2048 * 1024 * 1024;

/// The fixed control block at the start of the ring's memory.
///
/// Field order and sizes are part of the wire layout shared by both
/// processes. The byte after the three lock cells carries the ring
/// configuration (see [`RingConfig::to_flags`]); it is zero for the default
/// configuration, where older peers expect plain padding.
#[repr(C)]
pub struct ControlBlock {
    /// "Want" cell of the consumer side.
    pub reader_waiting: AtomicBool,
    /// "Want" cell of the producer side.
    pub writer_waiting: AtomicBool,
    /// Tie breaker of the two-party lock. Doubles as the CAS flag when the
    /// ring is configured with [`BufferLockKind::Spin`].
    pub turn: AtomicBool,
    pub flags: u8,

    /// Offset of the oldest unread message.
    pub read_offset: u32,
    /// Offset where the next message will be written.
    pub write_offset: u32,
    /// Bytes not claimed by any queued message.
    pub free_space: u32,
    /// Fully written, not yet read messages.
    pub message_count: u32,
}

pub const CONTROL_BLOCK_SIZE: usize = size_of::<ControlBlock>();

const _: () = assert!(CONTROL_BLOCK_SIZE == 20);

/// How much of push/pop runs under the buffer-level lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LockGranularity {
    /// The whole push/pop body runs under the buffer lock.
    #[default]
    Coarse,
    /// Only the metadata update runs under the buffer lock. Each message
    /// carries a spinlock cell in front of its header that covers the
    /// payload copy.
    Fine,
}

/// Primitive used for the buffer-level lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BufferLockKind {
    /// Dekker-style lock built from loads and stores only.
    #[default]
    TwoParty,
    /// Test-and-set spinlock; needs an atomic exchange on both sides.
    Spin,
}

/// Ring configuration, persisted in the control block by the creator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RingConfig {
    pub alignment: Alignment,
    pub granularity: LockGranularity,
    pub buffer_lock: BufferLockKind,
}

const FLAG_FINE: u8 = 1 << 0;
const FLAG_SPIN: u8 = 1 << 1;
const ALIGN_SHIFT: u8 = 2;
const ALIGN_MASK: u8 = 0b1_1111 << ALIGN_SHIFT;
const KNOWN_FLAGS: u8 = FLAG_FINE | FLAG_SPIN | ALIGN_MASK;

impl RingConfig {
    pub fn new(
        alignment: Alignment,
        granularity: LockGranularity,
        buffer_lock: BufferLockKind,
    ) -> Self {
        Self {
            alignment,
            granularity,
            buffer_lock,
        }
    }

    /// Encodes the configuration into the control block flags byte.
    pub fn to_flags(&self) -> u8 {
        let mut flags = ((self.alignment.log2() - 2) as u8) << ALIGN_SHIFT;
        if self.granularity == LockGranularity::Fine {
            flags |= FLAG_FINE;
        }
        if self.buffer_lock == BufferLockKind::Spin {
            flags |= FLAG_SPIN;
        }
        flags
    }

    pub fn from_flags(flags: u8) -> Result<Self> {
        ensure!(
            flags & !KNOWN_FLAGS == 0,
            error::InvalidArgumentSnafu {
                detail: format!("unknown control block flags {:#04x}", flags),
            }
        );

        let alignment = Alignment::from_log2(((flags & ALIGN_MASK) >> ALIGN_SHIFT) as u32 + 2)?;
        let granularity = if flags & FLAG_FINE != 0 {
            LockGranularity::Fine
        } else {
            LockGranularity::Coarse
        };
        let buffer_lock = if flags & FLAG_SPIN != 0 {
            BufferLockKind::Spin
        } else {
            BufferLockKind::TwoParty
        };

        Ok(Self {
            alignment,
            granularity,
            buffer_lock,
        })
    }

    /// Bytes a message header occupies in the data region, padding included.
    ///
    /// With fine granularity a 4-byte lock cell precedes the header fields.
    pub fn header_size(&self) -> u32 {
        let lock_cell = match self.granularity {
            LockGranularity::Coarse => 0,
            LockGranularity::Fine => MESSAGE_LOCK_SIZE,
        };
        self.alignment
            .aligned_size(lock_cell + crate::SPSC::Structs::PACKET_HEADER_SIZE as u32)
    }

    /// Data region size for a ring spanning `total_size` bytes.
    pub fn capacity_for(&self, total_size: usize) -> usize {
        self.alignment
            .align_down(total_size.saturating_sub(CONTROL_BLOCK_SIZE))
    }
}

/// Size of the per-message lock cell used with [`LockGranularity::Fine`].
pub const MESSAGE_LOCK_SIZE: u32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_encodes_to_zero() {
        assert_eq!(RingConfig::default().to_flags(), 0);
        assert_eq!(RingConfig::from_flags(0).unwrap(), RingConfig::default());
    }

    #[test]
    fn flags_round_trip() {
        let config = RingConfig::new(
            Alignment::new(64).unwrap(),
            LockGranularity::Fine,
            BufferLockKind::Spin,
        );
        let flags = config.to_flags();
        assert_eq!(flags & FLAG_FINE, FLAG_FINE);
        assert_eq!(flags & FLAG_SPIN, FLAG_SPIN);
        assert_eq!(RingConfig::from_flags(flags).unwrap(), config);
    }

    #[test]
    fn rejects_alignment_out_of_range() {
        // log2 field of 31 decodes to an alignment far above the maximum.
        assert!(RingConfig::from_flags(ALIGN_MASK).is_err());
    }

    #[test]
    fn header_size_follows_granularity() {
        let coarse = RingConfig::default();
        assert_eq!(coarse.header_size(), 20);

        let fine = RingConfig {
            granularity: LockGranularity::Fine,
            ..coarse
        };
        assert_eq!(fine.header_size(), 24);

        let wide = RingConfig {
            alignment: Alignment::new(16).unwrap(),
            ..coarse
        };
        assert_eq!(wide.header_size(), 32);
    }

    #[test]
    fn capacity_excludes_control_block() {
        let config = RingConfig::default();
        assert_eq!(config.capacity_for(128 + CONTROL_BLOCK_SIZE), 128);
        assert_eq!(config.capacity_for(CONTROL_BLOCK_SIZE), 0);

        let eight = RingConfig {
            alignment: Alignment::new(8).unwrap(),
            ..config
        };
        assert_eq!(eight.capacity_for(128), 104);
    }
}
