//! DAQ spy capture windows
//!
//! Two fixed-size firmware buffers exposing a snapshot of acquired data for
//! diagnostics. The firmware fills them on a trigger (see the controller's
//! `read_daq_spy`); this module only maps and copies them out.

use wib_error::{Result, WibError};

use crate::constants::map;
use crate::hw::regs::map_physical;

/// Read access to the spy capture buffers
pub trait SpyIo: Send {
    /// Copy buffer `index` (0 or 1) out of the capture window
    fn snapshot(&mut self, index: usize) -> Result<Vec<u8>>;
}

/// The two DAQ spy windows mapped from physical memory
pub struct DaqSpy {
    bufs: [*mut u8; 2],
}

// SAFETY: the mappings are exclusively owned and only read through &mut self.
unsafe impl Send for DaqSpy {}

impl DaqSpy {
    pub fn open() -> Result<Self> {
        let buf0 = map_physical(map::DAQ_SPY_0, map::DAQ_SPY_SIZE)?;
        let buf1 = match map_physical(map::DAQ_SPY_1, map::DAQ_SPY_SIZE) {
            Ok(p) => p,
            Err(e) => {
                // Release the first window before reporting the failure.
                // SAFETY: buf0 is the live mapping created just above.
                unsafe { libc::munmap(buf0, map::DAQ_SPY_SIZE) };
                return Err(e);
            }
        };
        Ok(Self {
            bufs: [buf0 as *mut u8, buf1 as *mut u8],
        })
    }
}

impl SpyIo for DaqSpy {
    fn snapshot(&mut self, index: usize) -> Result<Vec<u8>> {
        let src = *self
            .bufs
            .get(index)
            .ok_or_else(|| WibError::generic(format!("spy buffer {} does not exist", index)))?;
        let mut out = vec![0u8; map::DAQ_SPY_SIZE];
        // SAFETY: src points at a DAQ_SPY_SIZE mapping owned by self and out
        // was allocated with the same length.
        unsafe { std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), map::DAQ_SPY_SIZE) };
        Ok(out)
    }
}

impl Drop for DaqSpy {
    fn drop(&mut self) {
        for buf in self.bufs {
            // SAFETY: each pointer is a live DAQ_SPY_SIZE mapping created in
            // open(); unmapped exactly once here.
            unsafe { libc::munmap(buf as *mut libc::c_void, map::DAQ_SPY_SIZE) };
        }
    }
}
