//! WIB controller orchestration
//!
//! [`Wib`] owns the register window, the shared I2C bus, the DAQ spy
//! mappings, and the per-FEMB power/configuration state. Hardware families
//! differ only in pulser control, power-on sequencing, and configuration
//! application, supplied through the [`WibVariant`] capability trait; the
//! rest of the machinery is shared.
//!
//! Per-FEMB state machine: Unpowered -> Powered -> Configured. Configuration
//! is accepted only for modules that are already powered, and powering a
//! module off invalidates its configuration.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use wib_error::{Result, WibError};
use wib_protocol::{PowerConfig, SensorReading, TimingStatus, WibConfig, FEMB_COUNT};

use crate::constants::{map, regs::*, SW_TIMESTAMP};
use crate::hw::bus::{self, I2cTarget};
use crate::hw::i2c::{I2cDev, I2cIo};
use crate::hw::power::PowerSequencer;
use crate::hw::regs::{RegisterIo, RegisterSpace};
use crate::hw::sensors::SensorBank;
use crate::hw::spy::{DaqSpy, SpyIo};

mod cryo;
pub use cryo::CryoWib;

/// How many times to poll the spy status register before giving up
const SPY_POLL_TRIES: u32 = 100;

/// Hardware family capability set
///
/// Concrete families implement exactly these three operations over the
/// shared machinery; everything else is inherited unchanged.
pub trait WibVariant: Send {
    fn family(&self) -> &'static str;

    /// Turn the calibration pulser on or off
    fn set_pulser(&mut self, hw: &mut WibHardware, on: bool) -> Result<()>;

    /// Run the family's frontend power sequence
    ///
    /// All-or-nothing: on failure the recorded power state must be exactly
    /// as it was before the attempt.
    fn power_wib(&mut self, hw: &mut WibHardware, conf: &PowerConfig) -> Result<()>;

    /// Apply the family's frontend configuration
    ///
    /// Shared preconditions (module count, power gating) have already been
    /// checked when this is called.
    fn configure_wib(&mut self, hw: &mut WibHardware, conf: &WibConfig) -> Result<()>;
}

/// Shared controller hardware state
///
/// Owned exclusively by one [`Wib`]; variant implementations receive it by
/// mutable reference.
pub struct WibHardware {
    pub(crate) regs: Box<dyn RegisterIo>,
    pub(crate) bus: Box<dyn I2cIo>,
    pub(crate) spy: Box<dyn SpyIo>,
    pub(crate) femb_powered: [bool; FEMB_COUNT],
    pub(crate) femb_configured: [bool; FEMB_COUNT],
    pub(crate) pll_initialized: bool,
}

impl WibHardware {
    fn new(regs: Box<dyn RegisterIo>, bus: Box<dyn I2cIo>, spy: Box<dyn SpyIo>) -> Self {
        Self {
            regs,
            bus,
            spy,
            femb_powered: [false; FEMB_COUNT],
            femb_configured: [false; FEMB_COUNT],
            pll_initialized: false,
        }
    }

    fn reg_index(&self, addr: u64) -> Result<usize> {
        let base = map::CTRL_REGS as u64;
        let bytes = (self.regs.len() * 4) as u64;
        if addr % 4 != 0 || addr < base || addr >= base + bytes {
            return Err(WibError::AddrOutOfRange { addr });
        }
        Ok(((addr - base) / 4) as usize)
    }

    /// Read a register by absolute address
    pub fn peek(&mut self, addr: u64) -> Result<u32> {
        let index = self.reg_index(addr)?;
        self.regs.read(index)
    }

    /// Write a register by absolute address
    pub fn poke(&mut self, addr: u64, value: u32) -> Result<()> {
        let index = self.reg_index(addr)?;
        self.regs.write(index, value)
    }

    /// Route the shared I2C bus to `target`
    pub fn select(&mut self, target: I2cTarget) -> Result<()> {
        bus::select(self.regs.as_mut(), target)
    }

    /// A power sequencer borrowing this controller's state
    pub(crate) fn power_sequencer(&mut self) -> PowerSequencer<'_> {
        PowerSequencer::new(
            self.regs.as_mut(),
            self.bus.as_mut(),
            &mut self.femb_powered,
        )
    }

    pub fn femb_powered(&self, femb: usize) -> bool {
        self.femb_powered.get(femb).copied().unwrap_or(false)
    }

    pub(crate) fn femb_power_states(&self) -> [bool; FEMB_COUNT] {
        self.femb_powered
    }

    pub(crate) fn restore_power_flags(&mut self, states: [bool; FEMB_COUNT]) {
        self.femb_powered = states;
    }

    /// Full best-effort onboard sensor sweep
    pub fn read_sensors(&mut self) -> Result<Vec<SensorReading>> {
        self.select(I2cTarget::Sensor)?;
        Ok(SensorBank::new(self.bus.as_mut()).sweep())
    }

    /// Toggle the timing endpoint reset bit
    pub fn reset_timing_endpoint(&mut self) -> Result<()> {
        let timing = self.regs.read(REG_TIMING)?;
        self.regs.write(REG_TIMING, timing | TIMING_EP_RESET)?;
        self.regs.write(REG_TIMING, timing & !TIMING_EP_RESET)?;
        self.pll_initialized = true;
        info!("Timing endpoint reset");
        Ok(())
    }

    /// True when the endpoint state machine reports READY
    pub fn is_endpoint_locked(&mut self) -> Result<bool> {
        let status = self.regs.read(REG_ENDPOINT_STATUS)?;
        Ok(status & EP_STATE_MASK == EP_STATE_READY)
    }

    pub fn timing_status(&mut self) -> Result<TimingStatus> {
        let timing_reg = self.regs.read(REG_TIMING)?;
        let endpoint_status = self.regs.read(REG_ENDPOINT_STATUS)?;
        Ok(TimingStatus {
            locked: endpoint_status & EP_STATE_MASK == EP_STATE_READY,
            pll_initialized: self.pll_initialized,
            timing_reg,
            endpoint_status,
        })
    }

    /// Arm the fake time counter with a start value
    ///
    /// Does not start the counter; call `start_fake_time` for that.
    pub fn set_fake_time(&mut self, time: u64) -> Result<()> {
        let ctrl = self.regs.read(REG_FAKE_TIME_CTRL)?;
        self.regs.write(REG_FAKE_TIME_CTRL, ctrl & !FAKE_TIME_RUN)?;
        self.regs.write(REG_FAKE_TIME_L, time as u32)?;
        self.regs.write(REG_FAKE_TIME_H, (time >> 32) as u32)?;
        Ok(())
    }

    /// Start the fake time counter from the armed value
    pub fn start_fake_time(&mut self) -> Result<()> {
        let ctrl = self.regs.read(REG_FAKE_TIME_CTRL)?;
        self.regs.write(REG_FAKE_TIME_CTRL, ctrl | FAKE_TIME_RUN)?;
        Ok(())
    }

    /// Trigger a DAQ spy capture and copy out the requested buffers
    pub fn read_daq_spy(
        &mut self,
        buf0: bool,
        buf1: bool,
    ) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>)> {
        let mut wanted = 0u32;
        if buf0 {
            wanted |= SPY_STATUS_FULL_0;
        }
        if buf1 {
            wanted |= SPY_STATUS_FULL_1;
        }
        if wanted == 0 {
            return Ok((None, None));
        }

        let ctrl = self.regs.read(REG_FW_CTRL)?;
        let mut armed = ctrl;
        if buf0 {
            armed |= FW_CTRL_SPY_TRIGGER_0;
        }
        if buf1 {
            armed |= FW_CTRL_SPY_TRIGGER_1;
        }
        self.regs.write(REG_FW_CTRL, armed)?;

        let mut status = 0;
        let mut complete = false;
        for _ in 0..SPY_POLL_TRIES {
            status = self.regs.read(REG_DAQ_SPY_STATUS)?;
            if status & wanted == wanted {
                complete = true;
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        // Disarm whether or not the capture completed
        self.regs
            .write(REG_FW_CTRL, ctrl & !(FW_CTRL_SPY_TRIGGER_0 | FW_CTRL_SPY_TRIGGER_1))?;

        if !complete {
            return Err(WibError::SpyTimeout { status });
        }

        let out0 = if buf0 { Some(self.spy.snapshot(0)?) } else { None };
        let out1 = if buf1 { Some(self.spy.snapshot(1)?) } else { None };
        Ok((out0, out1))
    }

    pub fn read_fw_timestamp(&mut self) -> Result<u32> {
        self.regs.read(REG_FW_TIMESTAMP)
    }

    pub fn backplane_crate_num(&mut self) -> Result<u8> {
        let addr = self.regs.read(REG_BACKPLANE_ADDR)?;
        Ok(((addr & BACKPLANE_CRATE_MASK) >> BACKPLANE_CRATE_SHIFT) as u8)
    }

    pub fn backplane_slot_num(&mut self) -> Result<u8> {
        let addr = self.regs.read(REG_BACKPLANE_ADDR)?;
        Ok((addr & BACKPLANE_SLOT_MASK) as u8)
    }

    /// Timing endpoint address derived from the backplane position
    pub fn timing_addr(&mut self) -> Result<u8> {
        let crate_num = self.backplane_crate_num()?;
        let slot_num = self.backplane_slot_num()?;
        Ok((crate_num << 4) | slot_num)
    }
}

/// The WIB controller
pub struct Wib {
    hw: WibHardware,
    variant: Box<dyn WibVariant>,
}

impl Wib {
    /// Open the real board hardware
    ///
    /// Mapping or bus-open failures are fatal and reported to the caller;
    /// anything acquired before the failure is released on the way out.
    pub fn open(i2c_device: &str, variant: Box<dyn WibVariant>) -> Result<Self> {
        let regs = RegisterSpace::open(map::CTRL_REGS, map::CTRL_REGS_LEN)?;
        let bus = I2cDev::open(i2c_device)?;
        let spy = DaqSpy::open()?;
        info!(family = variant.family(), "WIB controller constructed");
        Ok(Self {
            hw: WibHardware::new(Box::new(regs), Box::new(bus), Box::new(spy)),
            variant,
        })
    }

    /// Assemble a controller from explicit adapters (simulation, tests)
    pub fn with_parts(
        regs: Box<dyn RegisterIo>,
        bus: Box<dyn I2cIo>,
        spy: Box<dyn SpyIo>,
        variant: Box<dyn WibVariant>,
    ) -> Self {
        Self {
            hw: WibHardware::new(regs, bus, spy),
            variant,
        }
    }

    pub fn family(&self) -> &'static str {
        self.variant.family()
    }

    /// Startup bring-up: check the firmware, reset timing, halt fake time
    pub fn initialize(&mut self) -> Result<()> {
        let ts = self.hw.read_fw_timestamp()?;
        info!("Initializing WIB (firmware timestamp {:#010x})", ts);
        self.hw.reset_timing_endpoint()?;
        self.hw.set_fake_time(0)?;
        if !self.hw.is_endpoint_locked()? {
            warn!("Timing endpoint not locked after initialization");
        }
        Ok(())
    }

    pub fn peek(&mut self, addr: u64) -> Result<u32> {
        self.hw.peek(addr)
    }

    pub fn poke(&mut self, addr: u64, value: u32) -> Result<()> {
        self.hw.poke(addr, value)
    }

    pub fn read_sensors(&mut self) -> Result<Vec<SensorReading>> {
        self.hw.read_sensors()
    }

    /// Run the variant's frontend power sequence
    pub fn power_wib(&mut self, conf: &PowerConfig) -> Result<()> {
        self.variant.power_wib(&mut self.hw, conf)?;
        // A module that ended up unpowered loses its configuration
        for i in 0..FEMB_COUNT {
            if !self.hw.femb_powered[i] {
                self.hw.femb_configured[i] = false;
            }
        }
        Ok(())
    }

    /// Apply a frontend configuration
    ///
    /// Rejected outright, with no state change, unless exactly one entry per
    /// FEMB slot is supplied and every enabled entry's module is powered.
    pub fn configure_wib(&mut self, conf: &WibConfig) -> Result<()> {
        if conf.fembs.len() != FEMB_COUNT {
            return Err(WibError::WrongFembCount {
                expected: FEMB_COUNT,
                got: conf.fembs.len(),
            });
        }
        for (i, femb) in conf.fembs.iter().enumerate() {
            if femb.enabled && !self.hw.femb_powered[i] {
                return Err(WibError::FembNotPowered(i));
            }
        }

        info!("Reconfiguring WIB");
        self.variant.configure_wib(&mut self.hw, conf)?;

        for (i, femb) in conf.fembs.iter().enumerate() {
            self.hw.femb_configured[i] = femb.enabled;
        }
        Ok(())
    }

    pub fn set_pulser(&mut self, on: bool) -> Result<()> {
        self.variant.set_pulser(&mut self.hw, on)
    }

    pub fn read_daq_spy(
        &mut self,
        buf0: bool,
        buf1: bool,
    ) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>)> {
        self.hw.read_daq_spy(buf0, buf1)
    }

    pub fn reset_timing_endpoint(&mut self) -> Result<()> {
        self.hw.reset_timing_endpoint()
    }

    pub fn is_endpoint_locked(&mut self) -> Result<bool> {
        self.hw.is_endpoint_locked()
    }

    pub fn timing_status(&mut self) -> Result<TimingStatus> {
        self.hw.timing_status()
    }

    pub fn set_fake_time(&mut self, time: u64) -> Result<()> {
        self.hw.set_fake_time(time)
    }

    pub fn start_fake_time(&mut self) -> Result<()> {
        self.hw.start_fake_time()
    }

    pub fn read_fw_timestamp(&mut self) -> Result<u32> {
        self.hw.read_fw_timestamp()
    }

    pub fn read_sw_timestamp(&self) -> u32 {
        SW_TIMESTAMP
    }

    pub fn backplane_crate_num(&mut self) -> Result<u8> {
        self.hw.backplane_crate_num()
    }

    pub fn backplane_slot_num(&mut self) -> Result<u8> {
        self.hw.backplane_slot_num()
    }

    pub fn timing_addr(&mut self) -> Result<u8> {
        self.hw.timing_addr()
    }

    pub fn femb_powered(&self, femb: usize) -> bool {
        self.hw.femb_powered(femb)
    }

    pub fn femb_configured(&self, femb: usize) -> bool {
        self.hw.femb_configured.get(femb).copied().unwrap_or(false)
    }
}

impl Drop for Wib {
    fn drop(&mut self) {
        // Teardown powers the frontend down; the recorded state must not
        // outlive the controller.
        for i in 0..FEMB_COUNT {
            if self.hw.femb_powered[i] {
                if let Err(e) = self.hw.power_sequencer().set_power(i, 0) {
                    warn!("FEMB {} power-off at teardown failed: {}", i, e);
                }
            }
        }
        self.hw.femb_powered = [false; FEMB_COUNT];
        self.hw.femb_configured = [false; FEMB_COUNT];
    }
}

#[cfg(test)]
mod tests;
