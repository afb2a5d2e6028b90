// Duplex channel: two independent SPSC rings, one per direction.
//
// A pipe named N lives in the regions `smipc.N.rx` and `smipc.N.tx`, named
// from the host's point of view. The host reads `.rx` and writes `.tx`; the
// client opens them the other way around.

use std::sync::Arc;

use super::builder::{attach_ring, create_ring};
use super::{Consumer, Producer};
use crate::error::{self, Error, Result};
use crate::Core::sync::Role;
use crate::Core::SharedMemory::{
    create_shared_memory, open_shared_memory, SharedMemoryBackend, Signal,
};
use crate::SPSC::Buffer::RingConfig;
use crate::SPSC::Structs::{Packet, TransferIdGenerator};

pub struct Pipe {
    pub(crate) name: String,
    pub(crate) tx: Producer,
    pub(crate) rx: Consumer,
}

fn region_names(name: &str) -> (String, String) {
    (format!("smipc.{}.rx", name), format!("smipc.{}.tx", name))
}

impl Pipe {
    /// Host side: creates both regions of `region_size` bytes each.
    pub fn create(name: &str, region_size: usize, config: RingConfig) -> Result<Self> {
        Self::create_with(name, region_size, config, Arc::default())
    }

    /// Client side: opens the regions a host created.
    pub fn open(name: &str) -> Result<Self> {
        Self::open_with(name, Arc::default())
    }

    pub(crate) fn create_with(
        name: &str,
        region_size: usize,
        config: RingConfig,
        ids: Arc<TransferIdGenerator>,
    ) -> Result<Self> {
        let (rx_name, tx_name) = region_names(name);

        let rx_region: Arc<dyn SharedMemoryBackend> =
            Arc::from(create_shared_memory(&rx_name, region_size)?);
        let tx_region: Arc<dyn SharedMemoryBackend> =
            Arc::from(create_shared_memory(&tx_name, region_size)?);

        let rx_ring = create_ring(rx_region.as_ref(), config)?;
        let tx_ring = create_ring(tx_region.as_ref(), config)?;

        tracing::debug!(name, region_size, ?config, "created pipe");
        Ok(Self {
            name: name.to_string(),
            tx: Producer::new(tx_region, tx_ring, ids),
            rx: Consumer::new(rx_region, rx_ring),
        })
    }

    pub(crate) fn open_with(name: &str, ids: Arc<TransferIdGenerator>) -> Result<Self> {
        let (host_rx, host_tx) = region_names(name);

        let rx_region: Arc<dyn SharedMemoryBackend> = Arc::from(open_shared_memory(&host_tx)?);
        let tx_region: Arc<dyn SharedMemoryBackend> = Arc::from(open_shared_memory(&host_rx)?);

        let rx_ring = attach_ring(rx_region.as_ref(), Role::Consumer)?;
        let tx_ring = attach_ring(tx_region.as_ref(), Role::Producer)?;

        // A client that went away before us left its close signal behind.
        rx_region.clear(Signal::Close);
        tx_region.clear(Signal::Close);

        tracing::debug!(name, "opened pipe");
        Ok(Self {
            name: name.to_string(),
            tx: Producer::new(tx_region, tx_ring, ids),
            rx: Consumer::new(rx_region, rx_ring),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends `bytes` as one message and returns its transfer id.
    pub fn write<T: AsRef<[u8]>>(&mut self, bytes: T) -> Result<u32> {
        self.tx.send(bytes)
    }

    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.tx.push(packet)
    }

    /// Receives the oldest message.
    ///
    /// # Returns
    /// * `Err(EmptyBuffer)` if nothing is queued and the peer is still there
    /// * `Err(Disconnected)` if nothing is queued and the peer closed its end
    pub fn read(&mut self) -> Result<Packet> {
        match self.rx.pop() {
            Err(Error::EmptyBuffer { .. }) if self.peer_closed() => {
                error::DisconnectedSnafu { name: &self.name }.fail()
            }
            other => other,
        }
    }

    /// Like [`Pipe::read`], with an empty ring reported as `Ok(None)`.
    pub fn try_read(&mut self) -> Result<Option<Packet>> {
        match self.read() {
            Ok(packet) => Ok(Some(packet)),
            Err(Error::EmptyBuffer { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// True once the other side raised the close signal.
    pub fn peer_closed(&self) -> bool {
        self.rx.region().is_raised(Signal::Close)
    }

    pub fn producer(&mut self) -> &mut Producer {
        &mut self.tx
    }

    pub fn consumer(&mut self) -> &mut Consumer {
        &mut self.rx
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.tx.region().raise(Signal::Close);
        self.rx.region().raise(Signal::Close);
        tracing::debug!(name = %self.name, "closed pipe");
    }
}
