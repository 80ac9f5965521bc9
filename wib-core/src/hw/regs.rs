//! Memory-mapped firmware register access
//!
//! Maps the control/status window from `/dev/mem` and provides atomic
//! 32-bit read/write by register index. All orchestration code goes through
//! the [`RegisterIo`] trait so it can run against a simulated window.

use std::io;

use wib_error::{Result, WibError};

/// 32-bit register window access
///
/// Index is the byte offset divided by 4. Implementations must reject
/// out-of-window indexes before touching hardware.
pub trait RegisterIo: Send {
    /// Number of 32-bit registers in the window
    fn len(&self) -> usize;

    fn read(&mut self, index: usize) -> Result<u32>;

    fn write(&mut self, index: usize, value: u32) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A window of firmware registers mapped from physical memory
pub struct RegisterSpace {
    base: *mut u32,
    bytes: usize,
    phys: usize,
}

// SAFETY: the mapping is exclusively owned and all access goes through
// &mut self; the raw pointer never escapes this struct.
unsafe impl Send for RegisterSpace {}

impl RegisterSpace {
    /// Map `bytes` of physical address space starting at `phys`
    ///
    /// A failed mapping is fatal to construction and is never retried.
    pub fn open(phys: usize, bytes: usize) -> Result<Self> {
        let ptr = map_physical(phys, bytes)?;
        Ok(Self {
            base: ptr as *mut u32,
            bytes,
            phys,
        })
    }

    fn check(&self, index: usize) -> Result<()> {
        if index >= self.len() {
            return Err(WibError::RegOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }
}

impl RegisterIo for RegisterSpace {
    fn len(&self) -> usize {
        self.bytes / 4
    }

    fn read(&mut self, index: usize) -> Result<u32> {
        self.check(index)?;
        // SAFETY: index is bounds-checked above and the mapping is valid for
        // the lifetime of self. Volatile because the window is hardware.
        Ok(unsafe { self.base.add(index).read_volatile() })
    }

    fn write(&mut self, index: usize, value: u32) -> Result<()> {
        self.check(index)?;
        // SAFETY: index is bounds-checked above and the mapping is valid for
        // the lifetime of self.
        unsafe { self.base.add(index).write_volatile(value) };
        Ok(())
    }
}

impl Drop for RegisterSpace {
    fn drop(&mut self) {
        // SAFETY: base/bytes describe exactly one live mapping created in
        // open(); unmapped exactly once here.
        unsafe { libc::munmap(self.base as *mut libc::c_void, self.bytes) };
        tracing::debug!("Unmapped register window at {:#010x}", self.phys);
    }
}

/// mmap a physical window out of /dev/mem
pub(crate) fn map_physical(phys: usize, bytes: usize) -> Result<*mut libc::c_void> {
    let mmap_err = |reason: String| WibError::Mmap {
        addr: phys,
        len: bytes,
        reason,
    };

    // SAFETY: the path literal is NUL-terminated; open returns -1 on error.
    let fd = unsafe {
        libc::open(
            b"/dev/mem\0".as_ptr() as *const libc::c_char,
            libc::O_RDWR | libc::O_SYNC,
        )
    };
    if fd < 0 {
        return Err(mmap_err(format!(
            "open /dev/mem: {}",
            io::Error::last_os_error()
        )));
    }

    // SAFETY: fd is a valid descriptor and phys/bytes come from the fixed
    // firmware memory map; MAP_FAILED is checked before use.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            phys as libc::off_t,
        )
    };

    // The mapping holds its own reference to the device.
    // SAFETY: fd was opened above and is not used again.
    unsafe { libc::close(fd) };

    if ptr == libc::MAP_FAILED {
        return Err(mmap_err(io::Error::last_os_error().to_string()));
    }

    Ok(ptr)
}
