pub mod align;
pub mod sync;
pub mod SharedMemory;

pub use SharedMemory::{
    create_shared_memory, open_shared_memory, HeapMemory, RawHandle, SharedMemoryBackend,
    Signal,
};
