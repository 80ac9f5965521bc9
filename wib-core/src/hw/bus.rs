//! Firmware I2C bus selector
//!
//! The board has one physical I2C bus shared by every onboard device group.
//! A field in the firmware control register routes it to one logical target;
//! selecting is a register write, not a bus-level addressing scheme, and it
//! must immediately precede every transaction group on that target.

use tracing::trace;

use wib_error::Result;

use crate::constants::regs::{FW_CTRL_I2C_SELECT_MASK, REG_FW_CTRL};
use crate::hw::regs::RegisterIo;

/// Selectable device groups on the shared I2C bus, in firmware code order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cTarget {
    /// Si5344 clock generator
    Si5344 = 0,
    /// Si5342 clock generator
    Si5342 = 1,
    /// QSFP module management
    Qsfp = 2,
    /// FEMB power monitor group 0/1
    FembPwr = 3,
    /// FEMB power enable expanders
    FembEn = 4,
    /// Onboard sensor group
    Sensor = 5,
    /// FEMB power monitor group 2
    FembPwr2 = 6,
    /// LTC2977 voltage regulator controllers
    Ltc2977 = 7,
    /// FEMB power monitor group 3
    FembPwr3 = 8,
    /// Configuration flash
    Flash = 9,
    /// ADN2814 timing-line transceiver
    Adn2814 = 10,
}

impl I2cTarget {
    /// Firmware select code for this target
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Route the shared bus to `target`
///
/// Always writes the select field, even if the target appears unchanged:
/// the bus is physically stateful and a stale selection must never be
/// trusted across requests.
pub fn select(regs: &mut dyn RegisterIo, target: I2cTarget) -> Result<()> {
    let current = regs.read(REG_FW_CTRL)?;
    let next = (current & !FW_CTRL_I2C_SELECT_MASK) | target.code();
    regs.write(REG_FW_CTRL, next)?;
    trace!(target = ?target, "I2C bus select");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_firmware_order() {
        assert_eq!(I2cTarget::Si5344.code(), 0);
        assert_eq!(I2cTarget::Sensor.code(), 5);
        assert_eq!(I2cTarget::Ltc2977.code(), 7);
        assert_eq!(I2cTarget::Adn2814.code(), 10);
    }
}
