// Layout conformance tests for cross-process compatibility.
// These tests assert sizes, alignments, and field offsets for the ring's
// control block, the message header and the region header. They also print
// the observed values to aid debugging when a mismatch occurs on a platform.
use memoffset::offset_of;
use smipc::Core::SharedMemory::{RegionHeader, REGION_DATA_OFFSET};
use smipc::SPSC::Buffer::{ControlBlock, CONTROL_BLOCK_SIZE};
use smipc::SPSC::Structs::{PacketHeader, PACKET_HEADER_SIZE};
use std::mem::{align_of, size_of};

#[test]
fn test_control_block_layout() {
    // Three lock cells + one flags/padding byte, then four u32 fields.
    let expected = 3 + 1 + 4 * 4;

    let size = size_of::<ControlBlock>();
    let align = align_of::<ControlBlock>();
    let off_reader = offset_of!(ControlBlock, reader_waiting);
    let off_writer = offset_of!(ControlBlock, writer_waiting);
    let off_turn = offset_of!(ControlBlock, turn);
    let off_flags = offset_of!(ControlBlock, flags);
    let off_read = offset_of!(ControlBlock, read_offset);
    let off_write = offset_of!(ControlBlock, write_offset);
    let off_free = offset_of!(ControlBlock, free_space);
    let off_count = offset_of!(ControlBlock, message_count);

    println!(
        "ControlBlock => size: {size}, expected: {expected}, align: {align}, offsets: [reader_waiting:{off_reader}, writer_waiting:{off_writer}, turn:{off_turn}, flags:{off_flags}, read_offset:{off_read}, write_offset:{off_write}, free_space:{off_free}, message_count:{off_count}]"
    );

    assert_eq!(size, expected);
    assert_eq!(size, CONTROL_BLOCK_SIZE);
    assert_eq!(align, align_of::<u32>());
    assert_eq!(off_reader, 0);
    assert_eq!(off_writer, 1);
    assert_eq!(off_turn, 2);
    assert_eq!(off_flags, 3);
    assert_eq!(off_read, 4);
    assert_eq!(off_write, 8);
    assert_eq!(off_free, 12);
    assert_eq!(off_count, 16);
}

#[test]
fn test_packet_header_layout() {
    let size = size_of::<PacketHeader>();
    println!("PacketHeader => size: {size}");

    assert_eq!(size, 5 * 4);
    assert_eq!(size, PACKET_HEADER_SIZE);
    assert_eq!(offset_of!(PacketHeader, checksum), 0);
    assert_eq!(offset_of!(PacketHeader, size), 4);
    assert_eq!(offset_of!(PacketHeader, packet_id), 8);
    assert_eq!(offset_of!(PacketHeader, packet_count), 12);
    assert_eq!(offset_of!(PacketHeader, transfer_id), 16);
}

#[test]
fn test_region_header_layout() {
    assert_eq!(offset_of!(RegionHeader, lock), 0);
    assert_eq!(offset_of!(RegionHeader, ref_count), 4);
    assert_eq!(offset_of!(RegionHeader, signals), 8);
    assert_eq!(offset_of!(RegionHeader, data_size), 12);
    assert!(size_of::<RegionHeader>() <= REGION_DATA_OFFSET);
}
