//! WIB control core
//!
//! Hardware coordination layer for the WIB detector front-end controller
//! board: the firmware register window, the shared I2C bus and its firmware
//! selector, the onboard sensor sweep, FEMB power sequencing, and the
//! controller state machine that hardware variants plug into.
//!
//! # Module Structure
//!
//! - `hw/` - register window, I2C bus, bus selector, sensors, power, DAQ spy
//! - `controller/` - the `Wib` orchestrator and hardware variants
//! - `sim` - simulated adapters for tests and hardware-free operation
//! - `constants` - the firmware memory map and chip constants
//!
//! # Example
//!
//! ```no_run
//! use wib_core::{CryoWib, Wib};
//!
//! let mut wib = Wib::open("/dev/i2c-0", Box::new(CryoWib)).unwrap();
//! wib.initialize().unwrap();
//! let sensors = wib.read_sensors().unwrap();
//! ```

pub mod constants;
pub mod controller;
pub mod hw;
pub mod sim;

// Re-export the controller surface
pub use controller::{CryoWib, Wib, WibHardware, WibVariant};

// Re-export the hardware seams
pub use hw::bus::I2cTarget;
pub use hw::i2c::{I2cDev, I2cIo};
pub use hw::regs::{RegisterIo, RegisterSpace};
pub use hw::spy::{DaqSpy, SpyIo};
