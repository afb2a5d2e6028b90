//! Single-producer/single-consumer message transport over shared memory.
//!
//! Each direction of a channel is one byte ring placed in a shared memory
//! region. Producer and consumer arbitrate the ring's control block with a
//! two-party lock that only needs atomic loads and stores.

pub mod error;

// Module naming follows project convention (SPSC = Single-Producer Single-Consumer)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod SPSC;

#[allow(non_snake_case)]
mod Debug {
    pub mod StructDebug;
}

pub mod ffi;

pub use error::{Error, Result};
pub use SPSC::{ChannelBuilder, Consumer, Pipe, Producer, SharedProducer};
