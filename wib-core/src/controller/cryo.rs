//! CRYO hardware family
//!
//! Power-on sequencing and frontend configuration for WIBs carrying
//! cryogenic FEMBs. The regulator trim targets and the packed configuration
//! word are deployment-specific; everything else follows the shared
//! contract: power before configure, all-or-nothing transitions.

use tracing::{debug, info, warn};

use wib_error::{Result, WibError};
use wib_protocol::{PowerConfig, WibConfig, FEMB_COUNT};

use crate::constants::femb::{CFG_ADDR_BASE, CFG_REG};
use crate::constants::power::{
    COLD_LDO1_VOLTS, DEFAULT_DC2DC_VOLTS, DEFAULT_LDO_VOLTS, FULL_POWER_MASK,
};
use crate::controller::{WibHardware, WibVariant};
use crate::hw::bus::I2cTarget;

pub struct CryoWib;

impl CryoWib {
    /// Trim every regulator of one FEMB to its default target, then bring
    /// the rails up
    fn bring_up(hw: &mut WibHardware, femb: usize, cold: bool) -> Result<()> {
        let mut seq = hw.power_sequencer();
        for (i, volts) in DEFAULT_DC2DC_VOLTS.iter().enumerate() {
            seq.set_regulator(femb, i as u8, *volts)?;
        }
        seq.set_regulator(femb, 4, DEFAULT_LDO_VOLTS[0])?;
        let ldo1 = if cold { COLD_LDO1_VOLTS } else { DEFAULT_LDO_VOLTS[1] };
        seq.set_regulator(femb, 5, ldo1)?;
        seq.set_power(femb, FULL_POWER_MASK)
    }

    fn apply(
        hw: &mut WibHardware,
        conf: &PowerConfig,
        prior: &[bool; FEMB_COUNT],
        touched: &mut Vec<usize>,
    ) -> Result<()> {
        for i in 0..FEMB_COUNT {
            if conf.fembs[i] == prior[i] {
                continue;
            }
            touched.push(i);
            if conf.fembs[i] {
                Self::bring_up(hw, i, conf.cold)?;
            } else {
                hw.power_sequencer().set_power(i, 0)?;
            }
        }
        Ok(())
    }

    /// Pack one FEMB's settings into its configuration word
    fn config_word(gain: u8, peak_time: u8, baseline: u8, test_cap: bool) -> u8 {
        (gain & 0x3)
            | (peak_time & 0x3) << 2
            | (baseline & 0x1) << 4
            | (test_cap as u8) << 5
    }
}

impl WibVariant for CryoWib {
    fn family(&self) -> &'static str {
        "CRYO"
    }

    fn set_pulser(&mut self, _hw: &mut WibHardware, _on: bool) -> Result<()> {
        Err(WibError::not_supported(
            "CRYO pulser control pending frontend hardware",
        ))
    }

    fn power_wib(&mut self, hw: &mut WibHardware, conf: &PowerConfig) -> Result<()> {
        let prior = hw.femb_power_states();
        let mut touched = Vec::new();

        if let Err(e) = Self::apply(hw, conf, &prior, &mut touched) {
            // Unwind the modules this request already switched, then restore
            // the recorded state to exactly what it was before the attempt.
            for &i in &touched {
                let mask = if prior[i] { FULL_POWER_MASK } else { 0 };
                if let Err(undo) = hw.power_sequencer().set_power(i, mask) {
                    warn!("FEMB {} rollback failed: {}", i, undo);
                }
            }
            hw.restore_power_flags(prior);
            return Err(e);
        }

        info!(fembs = ?conf.fembs, cold = conf.cold, "CRYO frontend power sequenced");
        Ok(())
    }

    fn configure_wib(&mut self, hw: &mut WibHardware, conf: &WibConfig) -> Result<()> {
        hw.select(I2cTarget::FembEn)?;
        for (i, femb) in conf.fembs.iter().enumerate() {
            if !femb.enabled {
                continue;
            }
            let word = Self::config_word(femb.gain, femb.peak_time, femb.baseline, femb.test_cap);
            let addr = CFG_ADDR_BASE + i as u8;
            hw.bus.write(addr, &[CFG_REG, word])?;

            let mut readback = [0u8; 1];
            hw.bus.write_read(addr, &[CFG_REG], &mut readback)?;
            if readback[0] != word {
                return Err(WibError::config(format!(
                    "FEMB {} config readback {:#04x} != {:#04x}",
                    i, readback[0], word
                )));
            }
            debug!("FEMB {} configured (word {:#04x})", i, word);
        }
        Ok(())
    }
}
