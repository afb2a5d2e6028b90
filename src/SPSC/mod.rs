mod builder;
mod consumer;
mod pipe;
mod producer;

pub use builder::ChannelBuilder;
pub use consumer::Consumer;
pub use pipe::Pipe;
pub use producer::{Producer, SharedProducer};

pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub mod layout;
    pub use layout::{
        BufferLockKind, ControlBlock, LockGranularity, RingConfig, CONTROL_BLOCK_SIZE,
    };
    pub use Buffer::{RingBuffer, RingState}; // re-export for stable path
}

pub mod Structs {
    pub mod Packet_Structs;
    pub use Packet_Structs::{Packet, PacketHeader, TransferIdGenerator, PACKET_HEADER_SIZE};
}
