//! Hardware access layer
//!
//! Low-level adapters (memory-mapped registers, raw I2C, DAQ spy windows)
//! behind small traits, plus the chip-specific sensor and power sequences
//! built on top of them. Orchestration code never touches `/dev/mem` or
//! `/dev/i2c` directly; it goes through [`regs::RegisterIo`], [`i2c::I2cIo`],
//! and [`spy::SpyIo`] so it can also run against the simulated adapters.

pub mod bus;
pub mod i2c;
pub mod power;
pub mod regs;
pub mod sensors;
pub mod spy;
