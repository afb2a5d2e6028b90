use std::ffi::NulError;

use snafu::Location;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid argument, detail: {}", detail))]
    InvalidArgument {
        detail: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Ring buffer overflow, needed: {} bytes, free: {} bytes",
        needed,
        free
    ))]
    Overflow {
        needed: u64,
        free: u32,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Ring buffer is empty"))]
    EmptyBuffer {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Ring buffer lock is held by the peer"))]
    WouldBlock {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Shared memory region {} is not initialized", name))]
    NotInitialized {
        name: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Corrupted message header, detail: {}", detail))]
    CorruptedHeader {
        detail: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Peer closed the pipe {}", name))]
    Disconnected {
        name: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to {} shared memory {}", op, name))]
    SharedMemory {
        op: &'static str,
        name: String,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid shared memory name: {:?}", name))]
    InvalidName {
        name: String,
        source: NulError,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Conditions a polling caller is expected to see and retry on.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Overflow { .. }
                | Error::EmptyBuffer { .. }
                | Error::WouldBlock { .. }
                | Error::NotInitialized { .. }
        )
    }
}
