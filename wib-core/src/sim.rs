//! Simulated hardware adapters
//!
//! In-memory implementations of [`RegisterIo`], [`I2cIo`], and [`SpyIo`] so
//! the orchestration and state-machine logic can run without a board. The
//! register window and the bus share one ordered event log, which lets tests
//! assert cross-resource ordering (a bus-select register write must precede
//! its paired transfer).
//!
//! The simulated window models just enough firmware behavior to keep the
//! control flow coherent: the endpoint status powers up READY, and a DAQ spy
//! trigger immediately reports both buffers full.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use wib_error::{Result, WibError};

use crate::constants::map::CTRL_REGS_LEN;
use crate::constants::power::FEMB_EN_EXPANDER_BASE;
use crate::constants::regs::*;
use crate::constants::{femb, power, sensor};
use crate::hw::i2c::I2cIo;
use crate::hw::regs::RegisterIo;
use crate::hw::spy::SpyIo;

/// One observed hardware access
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    RegWrite { index: usize, value: u32 },
    I2cWrite { addr: u8, bytes: Vec<u8> },
    I2cRead { addr: u8, len: usize },
}

/// Ordered log shared by the simulated register window and bus
pub type EventLog = Arc<Mutex<Vec<BusEvent>>>;

pub fn new_event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

// ============================================================================
// Registers
// ============================================================================

/// Simulated control/status register window
pub struct SimRegisters {
    regs: Vec<u32>,
    log: EventLog,
}

impl SimRegisters {
    pub fn new(log: EventLog) -> Self {
        let mut regs = vec![0u32; CTRL_REGS_LEN / 4];
        regs[REG_ENDPOINT_STATUS] = EP_STATE_READY;
        regs[REG_FW_TIMESTAMP] = 0x1234_5678;
        regs[REG_BACKPLANE_ADDR] = 0x15; // crate 1, slot 5
        Self { regs, log }
    }

    /// Test backdoor: read a register without logging
    pub fn get(&self, index: usize) -> u32 {
        self.regs[index]
    }

    /// Test backdoor: set a register without logging
    pub fn set(&mut self, index: usize, value: u32) {
        self.regs[index] = value;
    }
}

impl RegisterIo for SimRegisters {
    fn len(&self) -> usize {
        self.regs.len()
    }

    fn read(&mut self, index: usize) -> Result<u32> {
        self.regs
            .get(index)
            .copied()
            .ok_or(WibError::RegOutOfRange {
                index,
                len: self.regs.len(),
            })
    }

    fn write(&mut self, index: usize, value: u32) -> Result<()> {
        if index >= self.regs.len() {
            return Err(WibError::RegOutOfRange {
                index,
                len: self.regs.len(),
            });
        }
        self.regs[index] = value;
        self.log
            .lock()
            .unwrap()
            .push(BusEvent::RegWrite { index, value });

        // Firmware model: a spy trigger completes instantly
        if index == REG_FW_CTRL {
            let mut status = self.regs[REG_DAQ_SPY_STATUS];
            if value & FW_CTRL_SPY_TRIGGER_0 != 0 {
                status |= SPY_STATUS_FULL_0;
            }
            if value & FW_CTRL_SPY_TRIGGER_1 != 0 {
                status |= SPY_STATUS_FULL_1;
            }
            self.regs[REG_DAQ_SPY_STATUS] = status;
        }
        Ok(())
    }
}

// ============================================================================
// I2C bus
// ============================================================================

/// One simulated I2C device
#[derive(Debug, Default)]
pub struct SimDevice {
    /// Register-addressed contents: a write stores bytes[1..] under
    /// bytes[0]; a write_read returns them (zero-padded)
    registers: HashMap<u8, Vec<u8>>,
    /// Bytes returned by plain reads (devices without register pointers)
    read_data: Vec<u8>,
}

/// Simulated shared I2C bus
///
/// Devices that were not added NACK every transfer.
pub struct SimBus {
    devices: HashMap<u8, SimDevice>,
    log: EventLog,
}

impl SimBus {
    /// An empty bus: every address NACKs
    pub fn new(log: EventLog) -> Self {
        Self {
            devices: HashMap::new(),
            log,
        }
    }

    pub fn add_device(&mut self, addr: u8) -> &mut SimDevice {
        self.devices.entry(addr).or_default()
    }

    pub fn remove_device(&mut self, addr: u8) {
        self.devices.remove(&addr);
    }

    /// Preload a register-addressed value on a device
    pub fn set_device_reg(&mut self, addr: u8, reg: u8, bytes: &[u8]) {
        self.add_device(addr).registers.insert(reg, bytes.to_vec());
    }

    /// Preload the plain-read response of a device
    pub fn set_device_read(&mut self, addr: u8, bytes: &[u8]) {
        self.add_device(addr).read_data = bytes.to_vec();
    }

    /// Snapshot of the shared event log
    pub fn transcript(&self) -> Vec<BusEvent> {
        self.log.lock().unwrap().clone()
    }
}

impl I2cIo for SimBus {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<()> {
        self.log.lock().unwrap().push(BusEvent::I2cWrite {
            addr,
            bytes: bytes.to_vec(),
        });
        let dev = self.devices.get_mut(&addr).ok_or(WibError::I2cNack { addr })?;
        if bytes.len() >= 2 {
            dev.registers.insert(bytes[0], bytes[1..].to_vec());
        }
        Ok(())
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<()> {
        self.log.lock().unwrap().push(BusEvent::I2cRead {
            addr,
            len: buf.len(),
        });
        let dev = self.devices.get(&addr).ok_or(WibError::I2cNack { addr })?;
        for (i, b) in buf.iter_mut().enumerate() {
            *b = dev.read_data.get(i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write_read(&mut self, addr: u8, wbytes: &[u8], rbuf: &mut [u8]) -> Result<()> {
        self.log.lock().unwrap().push(BusEvent::I2cWrite {
            addr,
            bytes: wbytes.to_vec(),
        });
        self.log.lock().unwrap().push(BusEvent::I2cRead {
            addr,
            len: rbuf.len(),
        });
        let dev = self.devices.get(&addr).ok_or(WibError::I2cNack { addr })?;
        let empty = Vec::new();
        let data = wbytes
            .first()
            .and_then(|reg| dev.registers.get(reg))
            .unwrap_or(&empty);
        for (i, b) in rbuf.iter_mut().enumerate() {
            *b = data.get(i).copied().unwrap_or(0);
        }
        Ok(())
    }
}

// ============================================================================
// DAQ spy
// ============================================================================

/// Simulated spy buffer length (the real windows are 1 MiB)
pub const SIM_SPY_SIZE: usize = 256;

/// Simulated capture buffers with distinct deterministic fill
pub struct SimSpy;

impl SpyIo for SimSpy {
    fn snapshot(&mut self, index: usize) -> Result<Vec<u8>> {
        if index > 1 {
            return Err(WibError::generic(format!(
                "spy buffer {} does not exist",
                index
            )));
        }
        let seed = 0xA0u8 | index as u8;
        Ok((0..SIM_SPY_SIZE).map(|i| seed ^ (i as u8)).collect())
    }
}

// ============================================================================
// Fabric
// ============================================================================

/// A register window and bus sharing one event log, with every known board
/// device present and answering plausible values
pub fn sim_fabric() -> (SimRegisters, SimBus, EventLog) {
    let log = new_event_log();
    let regs = SimRegisters::new(log.clone());
    let mut bus = SimBus::new(log.clone());

    // FEMB enable expanders and configuration latches
    for i in 0..wib_protocol::FEMB_COUNT as u8 {
        bus.add_device(FEMB_EN_EXPANDER_BASE + i);
        bus.add_device(femb::CFG_ADDR_BASE + i);
    }

    // LTC2977 power system managers
    for addr in power::LTC2977_ADDRS {
        bus.add_device(addr);
    }

    // Monitor chips: ~1.00 V on the plain channels, ~0.50 V differential on
    // Vcc (3.0 V rail), 25 C internal temperature
    let volt = [0x0C, 0xCD]; // 3277 LSB
    let vcc = [0x06, 0x66]; // 1638 LSB
    let temp = [0x01, 0x90]; // 400 LSB
    for addr in sensor::LTC2990_ADDRS {
        for ch in 0..4u8 {
            bus.set_device_reg(addr, sensor::LTC2990_REG_V1_MSB + 2 * ch, &volt);
        }
        bus.set_device_reg(addr, sensor::LTC2990_REG_VCC_MSB, &vcc);
    }
    for ch in 0..7u8 {
        bus.set_device_reg(
            sensor::LTC2991_ADDR,
            sensor::LTC2991_REG_V1_MSB + 2 * ch,
            &volt,
        );
    }
    bus.set_device_reg(sensor::LTC2991_ADDR, sensor::LTC2991_REG_TINT_MSB, &temp);
    bus.set_device_reg(sensor::LTC2991_ADDR, sensor::LTC2991_REG_VCC_MSB, &vcc);

    // AD7414: 25.0 C = 100 LSB
    for addr in sensor::AD7414_ADDRS {
        bus.set_device_reg(addr, sensor::AD7414_REG_TEMP, &[25, 0x00]);
    }

    // LTC2499: positive mid-scale-ish code (raw25 = 0x0110_0000)
    bus.set_device_read(sensor::LTC2499_ADDR, &(0x0110_0000u32 << 5).to_be_bytes());

    (regs, bus, log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_device_nacks() {
        let mut bus = SimBus::new(new_event_log());
        let err = bus.write(0x50, &[0x00]).unwrap_err();
        assert!(matches!(err, WibError::I2cNack { addr: 0x50 }));
    }

    #[test]
    fn register_writes_are_readable_back() {
        let mut bus = SimBus::new(new_event_log());
        bus.add_device(0x20);
        bus.write(0x20, &[0x01, 0x55]).unwrap();
        let mut buf = [0u8; 1];
        bus.write_read(0x20, &[0x01], &mut buf).unwrap();
        assert_eq!(buf[0], 0x55);
    }

    #[test]
    fn spy_trigger_completes_instantly() {
        let log = new_event_log();
        let mut regs = SimRegisters::new(log);
        regs.write(REG_FW_CTRL, FW_CTRL_SPY_TRIGGER_0).unwrap();
        assert_eq!(regs.get(REG_DAQ_SPY_STATUS) & SPY_STATUS_FULL_0, SPY_STATUS_FULL_0);
    }
}
