// Shared memory backing for the ring buffers.
// POSIX regions use shm_open + mmap; the heap backing gives the same layout
// inside one process.

use std::alloc::{self, Layout};
use std::fmt::Debug;
use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use snafu::ensure;

use crate::error::{self, Result};
use crate::Core::sync::SpinLock;

/// Byte offset of the data area inside every backing.
pub const REGION_DATA_OFFSET: usize = 128;

/// Control fields at the start of every shared memory region.
///
/// ```text
/// +------+-----+-----------+---------+-----------+---------- ... -+
/// | lock | pad | ref_count | signals | data_size | pad | data     |
/// +------+-----+-----------+---------+-----------+---------- ... -+
/// 0      1     4           8         12          16    128
/// ```
#[repr(C)]
pub struct RegionHeader {
    pub lock: AtomicBool,
    pub _pad: [u8; 3],
    pub ref_count: AtomicU32,
    pub signals: AtomicU32,
    pub data_size: u32,
}

const _: () = assert!(std::mem::size_of::<RegionHeader>() <= REGION_DATA_OFFSET);

/// Bits of the region's signal set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Signal {
    /// The side that owns this region is going away.
    Close = 0,
    /// The creator finished initialising the ring inside the data area.
    Ready = 1,
}

impl Signal {
    #[inline]
    fn mask(self) -> u32 {
        1 << self as u32
    }
}

/// Platform-specific handle type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawHandle {
    /// Unix file descriptor
    Fd(i32),
    /// Process-local heap allocation
    Heap,
}

/// Borrowed view over a region's control fields and data area.
pub struct SharedMemoryView<'a> {
    pub lock: SpinLock<'a>,
    pub ref_count: &'a AtomicU32,
    pub signals: &'a AtomicU32,
    pub data_size: u32,
    pub data: *mut u8,
}

/// A mapped shared memory region laid out as [`RegionHeader`] + data.
///
/// # Safety
/// Implementors guarantee that `as_ptr()` points to at least `size()`
/// readable and writable bytes, aligned to `REGION_DATA_OFFSET`, that stay
/// mapped for as long as the value lives, and that the first
/// `REGION_DATA_OFFSET` bytes hold an initialised [`RegionHeader`].
pub unsafe trait SharedMemoryBackend: Send + Sync + Debug {
    /// Name the region was created or opened under.
    fn name(&self) -> &str;

    /// Size of the whole mapping in bytes, header included.
    fn size(&self) -> usize;

    /// Pointer to the start of the mapping (the region header).
    fn as_ptr(&self) -> *mut u8;

    fn raw_handle(&self) -> RawHandle;

    fn view(&self) -> SharedMemoryView<'_> {
        // SAFETY: the trait contract guarantees an initialised header.
        unsafe { RegionHeader::view(self.as_ptr()) }
    }

    /// Pointer to the data area the ring buffer is placed in.
    fn data_ptr(&self) -> *mut u8 {
        self.view().data
    }

    fn data_size(&self) -> usize {
        self.view().data_size as usize
    }

    fn raise(&self, signal: Signal) {
        self.view().signals.fetch_or(signal.mask(), Ordering::AcqRel);
    }

    fn clear(&self, signal: Signal) {
        self.view()
            .signals
            .fetch_and(!signal.mask(), Ordering::AcqRel);
    }

    fn is_raised(&self, signal: Signal) -> bool {
        self.view().signals.load(Ordering::Acquire) & signal.mask() != 0
    }

    fn ref_count(&self) -> u32 {
        self.view().ref_count.load(Ordering::Acquire)
    }
}

impl RegionHeader {
    /// # Safety
    /// `base` must point to a live region header.
    unsafe fn view<'a>(base: *mut u8) -> SharedMemoryView<'a> {
        let header = base as *mut RegionHeader;
        SharedMemoryView {
            lock: SpinLock::new(&(*header).lock),
            ref_count: &(*header).ref_count,
            signals: &(*header).signals,
            data_size: ptr::addr_of!((*header).data_size).read_volatile(),
            data: base.add(REGION_DATA_OFFSET),
        }
    }

    /// Writes the header of a freshly created, zero-filled region.
    ///
    /// # Safety
    /// `base` must point to at least `REGION_DATA_OFFSET` writable bytes.
    unsafe fn init(base: *mut u8, data_size: u32) {
        let header = base as *mut RegionHeader;
        let lock = SpinLock::new(&(*header).lock);
        let _guard = lock.acquire();
        (*header).signals.store(0, Ordering::Relaxed);
        ptr::addr_of_mut!((*header).data_size).write_volatile(data_size);
        (*header).ref_count.store(1, Ordering::Release);
    }

    /// Reads `data_size` under the region lock; zero means the creator has
    /// not written the header yet.
    ///
    /// # Safety
    /// `base` must point to at least `REGION_DATA_OFFSET` readable bytes.
    unsafe fn locked_data_size(base: *mut u8) -> u32 {
        let header = base as *mut RegionHeader;
        let lock = SpinLock::new(&(*header).lock);
        let _guard = lock.acquire();
        ptr::addr_of!((*header).data_size).read_volatile()
    }
}

fn data_size_for(name: &str, size: usize) -> Result<u32> {
    ensure!(
        size > REGION_DATA_OFFSET,
        error::InvalidArgumentSnafu {
            detail: format!(
                "region {} size {} does not leave room after the {} byte header",
                name, size, REGION_DATA_OFFSET
            ),
        }
    );
    u32::try_from(size - REGION_DATA_OFFSET).map_err(|_| {
        error::InvalidArgumentSnafu {
            detail: format!("region {} size {} exceeds u32 addressing", name, size),
        }
        .build()
    })
}

/// Shared memory inside the current process, for tests and threads.
pub struct HeapMemory {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for HeapMemory {}
unsafe impl Sync for HeapMemory {}

impl HeapMemory {
    /// Allocates `size` zeroed bytes (header included).
    pub fn new(size: usize) -> Result<Self> {
        let data_size = data_size_for("heap", size)?;
        let layout = Layout::from_size_align(size, REGION_DATA_OFFSET).map_err(|e| {
            error::InvalidArgumentSnafu {
                detail: format!("heap region layout: {}", e),
            }
            .build()
        })?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };

        unsafe { RegionHeader::init(ptr.as_ptr(), data_size) };
        tracing::debug!(size, "allocated heap region");

        Ok(Self { ptr, layout })
    }
}

impl Drop for HeapMemory {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

unsafe impl SharedMemoryBackend for HeapMemory {
    fn name(&self) -> &str {
        "heap"
    }

    fn size(&self) -> usize {
        self.layout.size()
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Heap
    }
}

/// Normalises a region name to the `/name` form `shm_open` expects.
pub fn region_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    }
}

#[cfg(unix)]
pub use posix::PosixSharedMemory;

#[cfg(unix)]
mod posix {
    use std::ffi::CString;
    use std::os::unix::io::RawFd;

    use snafu::{IntoError, ResultExt};

    use super::*;

    /// A named POSIX shared memory region (`shm_open` + `mmap`).
    pub struct PosixSharedMemory {
        name: String,
        ptr: NonNull<u8>,
        size: usize,
        fd: RawFd,
        owner: bool,
        closed: bool,
    }

    unsafe impl Send for PosixSharedMemory {}
    unsafe impl Sync for PosixSharedMemory {}

    fn c_name(name: &str) -> Result<CString> {
        CString::new(name).context(error::InvalidNameSnafu { name })
    }

    fn os_error(op: &'static str, name: &str) -> error::Error {
        error::SharedMemorySnafu { op, name }.into_error(io::Error::last_os_error())
    }

    unsafe fn map(fd: RawFd, len: usize) -> *mut libc::c_void {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    }

    impl PosixSharedMemory {
        /// Creates a new region of `size` bytes. Fails if the name exists.
        pub fn create(name: &str, size: usize) -> Result<Self> {
            let name = region_name(name);
            let data_size = data_size_for(&name, size)?;
            let cname = c_name(&name)?;

            let fd = unsafe {
                libc::shm_open(
                    cname.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                    0o600 as libc::mode_t,
                )
            };
            if fd < 0 {
                return Err(os_error("create", &name));
            }

            let cleanup = |op: &'static str| {
                let err = os_error(op, &name);
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(cname.as_ptr());
                }
                err
            };

            if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                return Err(cleanup("resize"));
            }

            let raw = unsafe { map(fd, size) };
            if raw == libc::MAP_FAILED {
                return Err(cleanup("map"));
            }
            let Some(ptr) = NonNull::new(raw as *mut u8) else {
                return Err(cleanup("map"));
            };

            unsafe { RegionHeader::init(ptr.as_ptr(), data_size) };
            tracing::debug!(name = %name, size, "created shared memory region");

            Ok(Self {
                name,
                ptr,
                size,
                fd,
                owner: true,
                closed: false,
            })
        }

        /// Opens an existing region, discovering its size from the header.
        pub fn open(name: &str) -> Result<Self> {
            let name = region_name(name);
            let cname = c_name(&name)?;

            let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0) };
            if fd < 0 {
                return Err(os_error("open", &name));
            }

            let fail = |op: &'static str| {
                let err = os_error(op, &name);
                unsafe { libc::close(fd) };
                err
            };

            let mut stat: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut stat) } != 0 {
                return Err(fail("stat"));
            }
            let file_size = stat.st_size as usize;

            let not_ready = || {
                unsafe { libc::close(fd) };
                error::NotInitializedSnafu { name: name.clone() }.build()
            };

            if file_size <= REGION_DATA_OFFSET {
                return Err(not_ready());
            }

            // Map only the header first; the data size lives inside it.
            let raw = unsafe { map(fd, REGION_DATA_OFFSET) };
            if raw == libc::MAP_FAILED {
                return Err(fail("map"));
            }
            let data_size = unsafe { RegionHeader::locked_data_size(raw as *mut u8) };
            unsafe { libc::munmap(raw, REGION_DATA_OFFSET) };

            let size = REGION_DATA_OFFSET + data_size as usize;
            if data_size == 0 || size > file_size {
                return Err(not_ready());
            }

            let raw = unsafe { map(fd, size) };
            if raw == libc::MAP_FAILED {
                return Err(fail("map"));
            }
            let Some(ptr) = NonNull::new(raw as *mut u8) else {
                return Err(fail("map"));
            };

            let region = Self {
                name,
                ptr,
                size,
                fd,
                owner: false,
                closed: false,
            };
            let refs = region.view().ref_count.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::debug!(name = %region.name, size, refs, "opened shared memory region");

            Ok(region)
        }

        pub fn is_owner(&self) -> bool {
            self.owner
        }

        /// Drops this side's reference, unmaps, and unlinks the name if this
        /// side created it. Mappings held by other processes stay valid.
        pub fn close(&mut self) -> Result<()> {
            if self.closed {
                return Ok(());
            }
            self.closed = true;

            let refs = self.view().ref_count.fetch_sub(1, Ordering::AcqRel) - 1;

            let mut result = Ok(());
            unsafe {
                if libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) != 0 {
                    result = Err(os_error("unmap", &self.name));
                }
                libc::close(self.fd);
                if self.owner {
                    let cname = c_name(&self.name)?;
                    if libc::shm_unlink(cname.as_ptr()) != 0 && result.is_ok() {
                        result = Err(os_error("unlink", &self.name));
                    }
                }
            }

            tracing::debug!(name = %self.name, refs, "closed shared memory region");
            result
        }
    }

    impl Drop for PosixSharedMemory {
        fn drop(&mut self) {
            if let Err(e) = self.close() {
                tracing::warn!(name = %self.name, error = %e, "failed to close shared memory region");
            }
        }
    }

    unsafe impl SharedMemoryBackend for PosixSharedMemory {
        fn name(&self) -> &str {
            &self.name
        }

        fn size(&self) -> usize {
            self.size
        }

        fn as_ptr(&self) -> *mut u8 {
            self.ptr.as_ptr()
        }

        fn raw_handle(&self) -> RawHandle {
            RawHandle::Fd(self.fd)
        }
    }
}

/// Creates a named region; on non-unix targets this is unsupported.
pub fn create_shared_memory(name: &str, size: usize) -> Result<Box<dyn SharedMemoryBackend>> {
    #[cfg(unix)]
    {
        Ok(Box::new(PosixSharedMemory::create(name, size)?))
    }
    #[cfg(not(unix))]
    {
        let _ = size;
        Err(unsupported("create", name))
    }
}

/// Opens a named region created by another process.
pub fn open_shared_memory(name: &str) -> Result<Box<dyn SharedMemoryBackend>> {
    #[cfg(unix)]
    {
        Ok(Box::new(PosixSharedMemory::open(name)?))
    }
    #[cfg(not(unix))]
    {
        Err(unsupported("open", name))
    }
}

#[cfg(not(unix))]
fn unsupported(op: &'static str, name: &str) -> error::Error {
    use snafu::IntoError;

    error::SharedMemorySnafu { op, name }.into_error(io::Error::new(
        io::ErrorKind::Unsupported,
        "shared memory regions are only supported on unix",
    ))
}
