//! Raw I2C bus access
//!
//! One handle to the shared bus device, opened at construction and closed
//! exactly once on drop. Transfers are byte-level and addressed by 7-bit
//! device address; which chip group the bus physically reaches is decided
//! by the firmware bus selector (see `hw::bus`), not here.

use std::io;

use wib_error::{Result, WibError};

/// Linux i2c-dev ioctl: set the slave address for subsequent transfers
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// Byte-level I2C master
pub trait I2cIo: Send {
    /// Write `bytes` to the device at `addr`
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<()>;

    /// Fill `buf` from the device at `addr`
    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<()>;

    /// Write `wbytes` (typically a register pointer) then read into `rbuf`
    fn write_read(&mut self, addr: u8, wbytes: &[u8], rbuf: &mut [u8]) -> Result<()> {
        self.write(addr, wbytes)?;
        self.read(addr, rbuf)
    }
}

/// A `/dev/i2c-N` bus device
pub struct I2cDev {
    fd: libc::c_int,
    device: String,
}

// SAFETY: the descriptor is exclusively owned; all transfers take &mut self.
unsafe impl Send for I2cDev {}

impl I2cDev {
    /// Open the bus device; failure is fatal to construction
    pub fn open(device: &str) -> Result<Self> {
        let path = std::ffi::CString::new(device).map_err(|_| WibError::I2cOpen {
            device: device.to_string(),
            reason: "path contains NUL".into(),
        })?;
        // SAFETY: path is a valid NUL-terminated string; the result is
        // checked before use.
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(WibError::I2cOpen {
                device: device.to_string(),
                reason: io::Error::last_os_error().to_string(),
            });
        }
        Ok(Self {
            fd,
            device: device.to_string(),
        })
    }

    fn set_slave(&self, addr: u8) -> Result<()> {
        // SAFETY: fd is a valid open descriptor and I2C_SLAVE takes the
        // address as its integer argument.
        let rc = unsafe { libc::ioctl(self.fd, I2C_SLAVE, addr as libc::c_ulong) };
        if rc < 0 {
            return Err(WibError::I2cIo {
                addr,
                reason: format!("I2C_SLAVE ioctl: {}", io::Error::last_os_error()),
            });
        }
        Ok(())
    }

    fn transfer_err(addr: u8) -> WibError {
        let err = io::Error::last_os_error();
        // The i2c-dev driver reports an unacknowledged address or byte as
        // ENXIO or EREMOTEIO.
        match err.raw_os_error() {
            Some(libc::ENXIO) | Some(libc::EREMOTEIO) => WibError::I2cNack { addr },
            _ => WibError::I2cIo {
                addr,
                reason: err.to_string(),
            },
        }
    }
}

impl I2cIo for I2cDev {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<()> {
        self.set_slave(addr)?;
        // SAFETY: fd is valid and bytes is a live slice of the given length.
        let n = unsafe { libc::write(self.fd, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
        if n < 0 {
            return Err(Self::transfer_err(addr));
        }
        if n as usize != bytes.len() {
            return Err(WibError::I2cIo {
                addr,
                reason: format!("short write ({} of {} bytes)", n, bytes.len()),
            });
        }
        Ok(())
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<()> {
        self.set_slave(addr)?;
        // SAFETY: fd is valid and buf is a live mutable slice of the given
        // length.
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            return Err(Self::transfer_err(addr));
        }
        if n as usize != buf.len() {
            return Err(WibError::I2cIo {
                addr,
                reason: format!("short read ({} of {} bytes)", n, buf.len()),
            });
        }
        Ok(())
    }
}

impl Drop for I2cDev {
    fn drop(&mut self) {
        // SAFETY: fd was opened in open() and is closed exactly once here.
        unsafe { libc::close(self.fd) };
        tracing::debug!(device = %self.device, "Closed I2C bus");
    }
}
