use std::ffi::{c_char, CStr};
use std::ptr;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::error::Error;
use crate::Core::align::Alignment;
use crate::SPSC::Buffer::{BufferLockKind, LockGranularity, RingConfig};
use crate::SPSC::Structs::{Packet, TransferIdGenerator};
use crate::SPSC::{ChannelBuilder, Pipe};

// Error codes
const SMIPC_SUCCESS: i32 = 0;
const SMIPC_ERROR_NULL_POINTER: i32 = -1;
const SMIPC_ERROR_INVALID_ARG: i32 = -2;
const SMIPC_ERROR_OVERFLOW: i32 = -3;
const SMIPC_ERROR_EMPTY: i32 = -4;
const SMIPC_ERROR_WOULD_BLOCK: i32 = -5;
const SMIPC_ERROR_NOT_INITIALIZED: i32 = -6;
const SMIPC_ERROR_DISCONNECTED: i32 = -7;
const SMIPC_ERROR_CORRUPTED: i32 = -8;
const SMIPC_ERROR_SHARED_MEMORY: i32 = -9;
const SMIPC_ERROR_BUFFER_TOO_SMALL: i32 = -10;

lazy_static! {
    // C callers have no way to hand us a generator, so every pipe opened
    // through this interface draws from the same sequence.
    static ref TRANSFER_IDS: Arc<TransferIdGenerator> = Arc::new(TransferIdGenerator::new());
}

fn status(err: &Error) -> i32 {
    match err {
        Error::InvalidArgument { .. } | Error::InvalidName { .. } => SMIPC_ERROR_INVALID_ARG,
        Error::Overflow { .. } => SMIPC_ERROR_OVERFLOW,
        Error::EmptyBuffer { .. } => SMIPC_ERROR_EMPTY,
        Error::WouldBlock { .. } => SMIPC_ERROR_WOULD_BLOCK,
        Error::NotInitialized { .. } => SMIPC_ERROR_NOT_INITIALIZED,
        Error::Disconnected { .. } => SMIPC_ERROR_DISCONNECTED,
        Error::CorruptedHeader { .. } => SMIPC_ERROR_CORRUPTED,
        Error::SharedMemory { .. } => SMIPC_ERROR_SHARED_MEMORY,
    }
}

/// Handle to a pipe endpoint (opaque pointer)
pub struct PipeHandle {
    inner: Pipe,
    // A message that did not fit the caller's buffer on the last read.
    pending: Option<Packet>,
}

unsafe fn pipe_name<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok()
}

fn into_handle(pipe: Result<Pipe, Error>, op: &str) -> *mut PipeHandle {
    match pipe {
        Ok(inner) => Box::into_raw(Box::new(PipeHandle {
            inner,
            pending: None,
        })),
        Err(e) => {
            tracing::error!(error = %e, "FFI: failed to {} pipe", op);
            ptr::null_mut()
        }
    }
}

// -----------------------------------------------------------------------------
// Pipe API
// -----------------------------------------------------------------------------

/// Create the host side of a pipe.
///
/// # Arguments
/// * `name` - NUL-terminated pipe name.
/// * `region_size` - Size of each direction's shared memory region.
/// * `alignment` - Ring alignment (power of two, 4..=128).
/// * `fine_grained` - Guard payload copies with a per-message lock.
/// * `spin_lock` - Use a CAS spinlock instead of the two-party lock.
///
/// # Returns
/// * Pointer to `PipeHandle`, or NULL on failure.
///
/// # Safety
/// `name` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn smipc_pipe_create(
    name: *const c_char,
    region_size: usize,
    alignment: u32,
    fine_grained: bool,
    spin_lock: bool,
) -> *mut PipeHandle {
    let Some(name) = pipe_name(name) else {
        return ptr::null_mut();
    };

    let config = match Alignment::new(alignment) {
        Ok(alignment) => RingConfig::new(
            alignment,
            if fine_grained {
                LockGranularity::Fine
            } else {
                LockGranularity::Coarse
            },
            if spin_lock {
                BufferLockKind::Spin
            } else {
                BufferLockKind::TwoParty
            },
        ),
        Err(e) => {
            tracing::error!(error = %e, "FFI: rejected pipe configuration");
            return ptr::null_mut();
        }
    };

    let pipe = ChannelBuilder::new()
        .with_name(name)
        .with_region_size(region_size)
        .with_config(config)
        .with_transfer_ids(Arc::clone(&TRANSFER_IDS))
        .create_pipe();
    into_handle(pipe, "create")
}

/// Open the client side of a pipe created by a host.
///
/// # Safety
/// `name` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn smipc_pipe_open(name: *const c_char) -> *mut PipeHandle {
    let Some(name) = pipe_name(name) else {
        return ptr::null_mut();
    };

    let pipe = ChannelBuilder::new()
        .with_name(name)
        .with_transfer_ids(Arc::clone(&TRANSFER_IDS))
        .open_pipe();
    into_handle(pipe, "open")
}

/// Send a message.
///
/// # Arguments
/// * `handle` - Pointer to `PipeHandle`.
/// * `data` - Pointer to data buffer.
/// * `len` - Length of data.
/// * `out_transfer_id` - Optional; receives the message's transfer id, or 0
///   when `len` is 0 and nothing was queued.
///
/// # Returns
/// * 0 on success, negative error code otherwise.
///
/// # Safety
/// `handle` must come from this module; `data` must be readable for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn smipc_pipe_write(
    handle: *mut PipeHandle,
    data: *const u8,
    len: usize,
    out_transfer_id: *mut u32,
) -> i32 {
    if handle.is_null() || (data.is_null() && len > 0) {
        return SMIPC_ERROR_NULL_POINTER;
    }

    // Empty messages are never queued, so there is no id to hand out.
    if len == 0 {
        if !out_transfer_id.is_null() {
            *out_transfer_id = 0;
        }
        return SMIPC_SUCCESS;
    }

    let pipe = &mut (*handle).inner;
    let slice = std::slice::from_raw_parts(data, len);

    match pipe.write(slice) {
        Ok(id) => {
            if !out_transfer_id.is_null() {
                *out_transfer_id = id;
            }
            SMIPC_SUCCESS
        }
        Err(e) => status(&e),
    }
}

/// Receive a message without blocking.
///
/// # Arguments
/// * `handle` - Pointer to `PipeHandle`.
/// * `out_buf` - Buffer to write message into.
/// * `out_len` - Input: size of buf, Output: size of message received.
///
/// # Returns
/// * 0 on success.
/// * SMIPC_ERROR_EMPTY if nothing is queued.
/// * SMIPC_ERROR_DISCONNECTED if nothing is queued and the peer closed.
/// * SMIPC_ERROR_BUFFER_TOO_SMALL with `*out_len` set to the needed size;
///   the message is kept for the next call.
///
/// # Safety
/// `handle` must come from this module; `out_buf` must be writable for
/// `*out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn smipc_pipe_read(
    handle: *mut PipeHandle,
    out_buf: *mut u8,
    out_len: *mut usize,
) -> i32 {
    if handle.is_null() || out_len.is_null() {
        return SMIPC_ERROR_NULL_POINTER;
    }

    let handle = &mut *handle;
    let max_len = *out_len;

    let packet = match handle.pending.take() {
        Some(packet) => packet,
        None => match handle.inner.read() {
            Ok(packet) => packet,
            Err(e) => return status(&e),
        },
    };

    if packet.len() > max_len || out_buf.is_null() {
        *out_len = packet.len();
        handle.pending = Some(packet);
        return SMIPC_ERROR_BUFFER_TOO_SMALL;
    }

    ptr::copy_nonoverlapping(packet.payload.as_ptr(), out_buf, packet.len());
    *out_len = packet.len();
    SMIPC_SUCCESS
}

/// Free a pipe handle. Signals the peer that this side closed.
///
/// # Safety
/// `handle` must be NULL or come from this module, and not be used again.
#[no_mangle]
pub unsafe extern "C" fn smipc_pipe_free(handle: *mut PipeHandle) {
    if !handle.is_null() {
        let _ = Box::from_raw(handle); // Dropped automatically
    }
}
