//! SysV Shared Memory
//!
//! Buffer names exported by the server are SysV shared-memory ids; this
//! module attaches and detaches them.

use std::io;
use std::ptr::{self, NonNull};

use tracing::{debug, warn};

use crate::types::ShmName;

/// Attaches server-exported segments into this process.
pub trait SharedMemory {
    fn attach(&self, name: ShmName) -> io::Result<NonNull<u8>>;

    fn detach(&self, addr: NonNull<u8>);
}

/// `shmat`/`shmdt` backed segments.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysvSharedMemory;

impl SharedMemory for SysvSharedMemory {
    fn attach(&self, name: ShmName) -> io::Result<NonNull<u8>> {
        let id = i32::try_from(name.0)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "shm id out of range"))?;

        // shmat signals failure with (void *)-1, not null.
        let addr = unsafe { libc::shmat(id, ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(io::Error::last_os_error());
        }

        debug!("Attached shm segment {} at {:p}", id, addr);
        NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("shmat returned a null address"))
    }

    fn detach(&self, addr: NonNull<u8>) {
        let rc = unsafe { libc::shmdt(addr.as_ptr().cast::<libc::c_void>().cast_const()) };
        if rc != 0 {
            warn!(
                "shmdt({:p}) failed: {}",
                addr.as_ptr(),
                io::Error::last_os_error()
            );
        }
    }
}

/// System page size in bytes.
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

/// Number of pages `size` bytes span.
pub fn page_span(size: usize, page_size: usize) -> usize {
    size.div_ceil(page_size)
}
