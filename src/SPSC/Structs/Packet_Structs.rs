// Message envelope written ahead of every payload in the ring.

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};

/// Fixed header preceding each payload.
///
/// Five native-endian `u32`s in declaration order. `checksum` is reserved and
/// always zero. `packet_id` / `packet_count` are carried for wire
/// compatibility; nothing fragments messages yet, so both stay zero.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketHeader {
    pub checksum: u32,
    pub size: u32,
    pub packet_id: u32,
    pub packet_count: u32,
    pub transfer_id: u32,
}

pub const PACKET_HEADER_SIZE: usize = size_of::<PacketHeader>();

const _: () = assert!(PACKET_HEADER_SIZE == 20);

impl PacketHeader {
    pub fn new(size: u32, transfer_id: u32) -> Self {
        Self {
            size,
            transfer_id,
            ..Self::default()
        }
    }

    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut out = [0u8; PACKET_HEADER_SIZE];
        let fields = [
            self.checksum,
            self.size,
            self.packet_id,
            self.packet_count,
            self.transfer_id,
        ];
        for (chunk, field) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_ne_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; PACKET_HEADER_SIZE]) -> Self {
        let field = |i: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            u32::from_ne_bytes(word)
        };
        Self {
            checksum: field(0),
            size: field(1),
            packet_id: field(2),
            packet_count: field(3),
            transfer_id: field(4),
        }
    }
}

/// An owned message: header plus payload bytes.
///
/// Lives on the heap of whichever side holds it; only its serialised bytes
/// ever sit in shared memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Wraps `payload`, stamping it with the next id from `ids`.
    ///
    /// Payloads longer than `u32::MAX` are rejected when pushed, not here;
    /// the header size saturates so the check can see it.
    pub fn new(payload: impl Into<Vec<u8>>, ids: &TransferIdGenerator) -> Self {
        let payload = payload.into();
        let size = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        Self {
            header: PacketHeader::new(size, ids.next_id()),
            payload,
        }
    }

    pub(crate) fn from_parts(header: PacketHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    #[inline]
    pub fn transfer_id(&self) -> u32 {
        self.header.transfer_id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Monotonic source of transfer ids, starting at 1.
///
/// Shared by reference (usually behind an `Arc`) between everything in a
/// process that should draw from one sequence.
#[derive(Debug)]
pub struct TransferIdGenerator {
    next: AtomicU32,
}

impl TransferIdGenerator {
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    pub const fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call to [`TransferIdGenerator::next_id`] returns.
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for TransferIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes_are_native_endian_fields_in_order() {
        let header = PacketHeader {
            checksum: 0,
            size: 5,
            packet_id: 0,
            packet_count: 0,
            transfer_id: 0x0102_0304,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[4..8], &5u32.to_ne_bytes());
        assert_eq!(&bytes[16..20], &0x0102_0304u32.to_ne_bytes());
        assert_eq!(PacketHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let ids = TransferIdGenerator::new();
        let first = Packet::new(b"a".to_vec(), &ids);
        let second = Packet::new(b"bc".to_vec(), &ids);

        assert_eq!(first.transfer_id(), 1);
        assert_eq!(second.transfer_id(), 2);
        assert_eq!(second.header.size, 2);
        assert_eq!(second.header.checksum, 0);
        assert_eq!(ids.peek(), 3);
    }
}
