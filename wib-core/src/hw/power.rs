//! FEMB power distribution
//!
//! Each FEMB slot has four DC2DC converters, two LDOs, and a BIAS enable.
//! Trim voltages are adjusted through the LTC2977 power system managers
//! (PMBus PAGE + VOUT_COMMAND); on/off state is driven one rail at a time
//! through the slot's enable expander, low-current rails first to limit
//! inrush.
//!
//! The recorded power state for a module changes only when every step of a
//! sequence acknowledged; a partial hardware failure reports the error and
//! leaves the state flag untouched.

use tracing::{debug, info};

use wib_error::{Result, WibError};
use wib_protocol::FEMB_COUNT;

use crate::constants::power::*;
use crate::hw::bus::{self, I2cTarget};
use crate::hw::i2c::I2cIo;
use crate::hw::regs::RegisterIo;

/// Encode volts as PMBus L16 with the LTC2977's -13 exponent
fn l16_encode(volts: f64) -> u16 {
    (volts.max(0.0) * PMBUS_L16_SCALE).round() as u16
}

/// Regulator enable/disable and trim control for the FEMB slots
///
/// Borrows the register window (for bus selects), the I2C bus, and the
/// controller's power-state array for the duration of a sequence.
pub struct PowerSequencer<'a> {
    regs: &'a mut dyn RegisterIo,
    bus: &'a mut dyn I2cIo,
    state: &'a mut [bool; FEMB_COUNT],
}

impl<'a> PowerSequencer<'a> {
    pub fn new(
        regs: &'a mut dyn RegisterIo,
        bus: &'a mut dyn I2cIo,
        state: &'a mut [bool; FEMB_COUNT],
    ) -> Self {
        Self { regs, bus, state }
    }

    /// Adjust one regulator's trim voltage without changing its on/off state
    ///
    /// Regulator ids 0-3 are DC2DC0-3, 4-5 are LDO0-1.
    pub fn set_regulator(&mut self, femb: usize, regulator: u8, volts: f64) -> Result<()> {
        if femb >= FEMB_COUNT {
            return Err(WibError::InvalidFemb(femb));
        }
        if regulator >= REGULATOR_COUNT {
            return Err(WibError::InvalidRegulator(regulator));
        }

        bus::select(self.regs, I2cTarget::Ltc2977)?;

        let global = femb * REGULATOR_COUNT as usize + regulator as usize;
        let chip = LTC2977_ADDRS[global / LTC2977_CHANNELS];
        let page = (global % LTC2977_CHANNELS) as u8;
        let code = l16_encode(volts);

        self.bus.write(chip, &[PMBUS_CMD_PAGE, page])?;
        self.bus
            .write(chip, &[PMBUS_CMD_VOUT_COMMAND, code as u8, (code >> 8) as u8])?;

        debug!(
            "FEMB {} regulator {} trimmed to {:.3} V (chip 0x{:02x} page {})",
            femb, regulator, volts, chip, page
        );
        Ok(())
    }

    /// Turn the addressed rails on or off
    ///
    /// `mask` bits 0-3 are DC2DC0-3, 4-5 are LDO0-1, 6 is BIAS; 1 = on.
    /// Rails are switched one at a time: disables first (BIAS down to the
    /// LDOs), then enables low-current first (LDOs up to BIAS). The module's
    /// power-state flag is updated only after every step acknowledged.
    pub fn set_power(&mut self, femb: usize, mask: u8) -> Result<()> {
        if femb >= FEMB_COUNT {
            return Err(WibError::InvalidFemb(femb));
        }
        if mask & !PORT_MASK != 0 {
            return Err(WibError::config(format!(
                "enable mask {:#04x} has undefined bits",
                mask
            )));
        }

        bus::select(self.regs, I2cTarget::FembEn)?;

        let addr = FEMB_EN_EXPANDER_BASE + femb as u8;
        self.bus
            .write(addr, &[EXPANDER_REG_CONFIG, EXPANDER_ALL_OUTPUTS])?;

        let mut current = [0u8; 1];
        self.bus
            .write_read(addr, &[EXPANDER_REG_OUTPUT], &mut current)?;
        let mut out = current[0];

        // Drop rails first, highest-current last-on first-off
        for &bit in ENABLE_ORDER.iter().rev() {
            if mask & (1 << bit) == 0 && out & (1 << bit) != 0 {
                out &= !(1 << bit);
                self.bus.write(addr, &[EXPANDER_REG_OUTPUT, out])?;
            }
        }
        // Then bring rails up, low-current first
        for &bit in ENABLE_ORDER.iter() {
            if mask & (1 << bit) != 0 && out & (1 << bit) == 0 {
                out |= 1 << bit;
                self.bus.write(addr, &[EXPANDER_REG_OUTPUT, out])?;
            }
        }

        // Every step acknowledged: record the net effect. A module counts as
        // powered while any regulator rail is left on.
        let powered = mask & RAIL_MASK != 0;
        self.state[femb] = powered;
        info!("FEMB {} power sequenced (mask {:#04x}, powered {})", femb, mask, powered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{BusEvent, SimBus, SimRegisters};

    fn harness() -> (SimRegisters, SimBus) {
        let (regs, bus, _log) = crate::sim::sim_fabric();
        (regs, bus)
    }

    #[test]
    fn rejects_out_of_range_parameters_before_bus_traffic() {
        let (mut regs, mut bus) = harness();
        let mut state = [false; FEMB_COUNT];
        let mut seq = PowerSequencer::new(&mut regs, &mut bus, &mut state);

        assert!(matches!(
            seq.set_regulator(4, 0, 1.0),
            Err(WibError::InvalidFemb(4))
        ));
        assert!(matches!(
            seq.set_regulator(0, 6, 1.0),
            Err(WibError::InvalidRegulator(6))
        ));
        assert!(matches!(seq.set_power(7, 0), Err(WibError::InvalidFemb(7))));
        assert!(bus.transcript().is_empty());
    }

    #[test]
    fn full_enable_sets_power_state() {
        let (mut regs, mut bus) = harness();
        let mut state = [false; FEMB_COUNT];
        let mut seq = PowerSequencer::new(&mut regs, &mut bus, &mut state);

        seq.set_power(1, FULL_POWER_MASK).unwrap();
        assert!(state[1]);
        assert!(!state[0]);

        let mut seq = PowerSequencer::new(&mut regs, &mut bus, &mut state);
        seq.set_power(1, 0).unwrap();
        assert!(!state[1]);
    }

    #[test]
    fn failed_step_leaves_state_unchanged() {
        let (mut regs, _fabric_bus, log) = crate::sim::sim_fabric();
        // A bus with no devices: the expander NACKs immediately.
        let mut bus = SimBus::new(log);
        let mut state = [false; FEMB_COUNT];
        let mut seq = PowerSequencer::new(&mut regs, &mut bus, &mut state);

        assert!(seq.set_power(0, FULL_POWER_MASK).is_err());
        assert!(!state[0]);
    }

    #[test]
    fn rails_sequence_low_current_first() {
        let (mut regs, mut bus) = harness();
        let mut state = [false; FEMB_COUNT];
        let mut seq = PowerSequencer::new(&mut regs, &mut bus, &mut state);
        seq.set_power(0, FULL_POWER_MASK).unwrap();

        let addr = FEMB_EN_EXPANDER_BASE;
        let outputs: Vec<u8> = bus
            .transcript()
            .iter()
            .filter_map(|ev| match ev {
                BusEvent::I2cWrite { addr: a, bytes }
                    if *a == addr
                        && bytes.len() == 2
                        && bytes[0] == EXPANDER_REG_OUTPUT =>
                {
                    Some(bytes[1])
                }
                _ => None,
            })
            .collect();

        // One write per rail, each adding exactly one bit, LDO0 first and
        // BIAS last.
        assert_eq!(outputs.len(), ENABLE_ORDER.len());
        assert_eq!(outputs[0], 1 << 4);
        assert_eq!(*outputs.last().unwrap(), FULL_POWER_MASK);
        for pair in outputs.windows(2) {
            assert_eq!((pair[1] & !pair[0]).count_ones(), 1);
        }
    }

    #[test]
    fn trim_targets_the_right_chip_and_page() {
        let (mut regs, mut bus) = harness();
        let mut state = [false; FEMB_COUNT];
        let mut seq = PowerSequencer::new(&mut regs, &mut bus, &mut state);

        // FEMB 2 regulator 3 = global channel 15 -> chip 1, page 7
        seq.set_regulator(2, 3, 1.1).unwrap();
        let writes: Vec<_> = bus
            .transcript()
            .iter()
            .filter_map(|ev| match ev {
                BusEvent::I2cWrite { addr, bytes } => Some((*addr, bytes.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(writes[0], (LTC2977_ADDRS[1], vec![PMBUS_CMD_PAGE, 7]));
        let code = l16_encode(1.1);
        assert_eq!(
            writes[1],
            (
                LTC2977_ADDRS[1],
                vec![PMBUS_CMD_VOUT_COMMAND, code as u8, (code >> 8) as u8]
            )
        );
    }
}
