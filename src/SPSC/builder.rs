use std::sync::Arc;

use snafu::ensure;

use super::{Consumer, Pipe, Producer};
use crate::error::{self, Result};
use crate::Core::align::Alignment;
use crate::Core::sync::Role;
use crate::Core::SharedMemory::{
    create_shared_memory, open_shared_memory, HeapMemory, SharedMemoryBackend, Signal,
};
use crate::SPSC::Buffer::{BufferLockKind, LockGranularity, RingBuffer, RingConfig};
use crate::SPSC::Structs::TransferIdGenerator;

/// Configures and opens channels.
///
/// `region_size` is the size of the whole backing region: region header,
/// ring control block and data area.
pub struct ChannelBuilder {
    name: String,
    region_size: usize,
    config: RingConfig,
    transfer_ids: Option<Arc<TransferIdGenerator>>,
}

impl Default for ChannelBuilder {
    fn default() -> Self {
        Self {
            name: "smipc".to_string(),
            region_size: 64 * 1024, // 64KB default
            config: RingConfig::default(),
            transfer_ids: None,
        }
    }
}

impl ChannelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_region_size(mut self, size: usize) -> Self {
        self.region_size = size;
        self
    }

    pub fn with_config(mut self, config: RingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.config.alignment = alignment;
        self
    }

    pub fn with_granularity(mut self, granularity: LockGranularity) -> Self {
        self.config.granularity = granularity;
        self
    }

    pub fn with_buffer_lock(mut self, buffer_lock: BufferLockKind) -> Self {
        self.config.buffer_lock = buffer_lock;
        self
    }

    /// Shares a transfer id sequence with other producers in this process.
    pub fn with_transfer_ids(mut self, ids: Arc<TransferIdGenerator>) -> Self {
        self.transfer_ids = Some(ids);
        self
    }

    fn ids(&self) -> Arc<TransferIdGenerator> {
        self.transfer_ids.clone().unwrap_or_default()
    }

    /// Creates the named region and the ring inside it.
    pub fn build_producer(self) -> Result<Producer> {
        let region: Arc<dyn SharedMemoryBackend> =
            Arc::from(create_shared_memory(&self.name, self.region_size)?);
        let ring = create_ring(region.as_ref(), self.config)?;
        Ok(Producer::new(region, ring, self.ids()))
    }

    /// Opens a region some producer created; the ring configuration comes
    /// from the region itself.
    pub fn build_consumer(self) -> Result<Consumer> {
        let region: Arc<dyn SharedMemoryBackend> = Arc::from(open_shared_memory(&self.name)?);
        let ring = attach_ring(region.as_ref(), Role::Consumer)?;
        Ok(Consumer::new(region, ring))
    }

    /// Both ends of one ring on a heap region, for threads of one process.
    pub fn build_in_process(self) -> Result<(Producer, Consumer)> {
        let region: Arc<dyn SharedMemoryBackend> = Arc::new(HeapMemory::new(self.region_size)?);
        let tx = create_ring(region.as_ref(), self.config)?;
        let rx = attach_ring(region.as_ref(), Role::Consumer)?;
        Ok((
            Producer::new(Arc::clone(&region), tx, self.ids()),
            Consumer::new(region, rx),
        ))
    }

    /// Creates the two regions of a duplex pipe (host side).
    pub fn create_pipe(self) -> Result<Pipe> {
        let ids = self.ids();
        Pipe::create_with(&self.name, self.region_size, self.config, ids)
    }

    /// Opens a pipe a host created (client side).
    pub fn open_pipe(self) -> Result<Pipe> {
        let ids = self.ids();
        Pipe::open_with(&self.name, ids)
    }
}

/// Initialises a ring in `region`'s data area and marks the region ready.
pub(crate) fn create_ring(region: &dyn SharedMemoryBackend, config: RingConfig) -> Result<RingBuffer> {
    // SAFETY: the data area stays mapped while `region` lives, and the
    // region was just created so nobody else uses it yet.
    let ring = unsafe { RingBuffer::create(region.data_ptr(), region.data_size(), config)? };
    region.raise(Signal::Ready);
    Ok(ring)
}

/// Attaches to the ring in `region` as `role`, failing if its creator is
/// not done.
pub(crate) fn attach_ring(region: &dyn SharedMemoryBackend, role: Role) -> Result<RingBuffer> {
    ensure!(
        region.is_raised(Signal::Ready),
        error::NotInitializedSnafu {
            name: region.name(),
        }
    );
    // SAFETY: the ready signal is raised only after `create_ring`.
    unsafe { RingBuffer::attach(region.data_ptr(), region.data_size(), role) }
}
