//! Onboard sensor chips
//!
//! Chip-specific enable/read sequences for the voltage/temperature monitors
//! on the Sensor bus target, plus the unit conversions for their raw codes.
//!
//! # Chips
//!
//! - **LTC2990** (0x4E, 0x4C): 4 single-ended voltage channels + Vcc
//! - **LTC2991** (0x48): 7 single-ended voltage channels + internal
//!   temperature + Vcc
//! - **AD7414** (0x49, 0x4D, 0x4A): one 10-bit temperature each
//! - **LTC2499** (0x15): 24-bit delta-sigma ADC polled across 7 channels
//!
//! The sweep is best-effort telemetry: a chip that does not acknowledge is
//! logged and skipped, never fatal.

use std::thread;
use std::time::Duration;

use tracing::warn;

use wib_error::Result;
use wib_protocol::{SensorReading, Unit};

use crate::constants::sensor::*;
use crate::hw::i2c::I2cIo;

// ============================================================================
// Raw code decoding
// ============================================================================

/// Decode a 15-bit signed monitor code from an MSB/LSB register pair
///
/// Bit 7 of the MSB is the data-valid flag; bit 14 is the sign.
fn monitor_code(msb: u8, lsb: u8) -> i16 {
    let v = (((msb & 0x7F) as u16) << 8) | lsb as u16;
    // Shift the sign bit into position 15 and back to sign-extend
    ((v << 1) as i16) >> 1
}

// ============================================================================
// Unit conversions
// ============================================================================

/// Single-ended monitor channel code to volts
pub fn monitor_volts(raw: i16) -> f64 {
    raw as f64 * MONITOR_VOLTS_PER_LSB
}

/// Supply-rail (Vcc) channel code to volts
///
/// Vcc channels are sampled differentially against a 2.5 V reference, so the
/// offset is always added to the scaled code.
pub fn vcc_volts(raw: i16) -> f64 {
    raw as f64 * MONITOR_VOLTS_PER_LSB + VCC_OFFSET_VOLTS
}

/// Internal temperature channel code to degrees Celsius
pub fn internal_celsius(raw: i16) -> f64 {
    raw as f64 * INTERNAL_DEG_C_PER_LSB
}

/// AD7414 10-bit temperature code to degrees Celsius
pub fn ad7414_celsius(raw: i16) -> f64 {
    raw as f64 * AD7414_DEG_C_PER_LSB
}

/// LTC2499 24-bit code to volts at the 2.5 V reference
pub fn ltc2499_volts(raw: i32) -> f64 {
    raw as f64 * LTC2499_VOLTS_PER_LSB
}

// ============================================================================
// LTC2990
// ============================================================================

/// Put an LTC2990 in repeated-acquisition single-ended mode and trigger it
pub fn enable_ltc2990(bus: &mut dyn I2cIo, addr: u8) -> Result<()> {
    bus.write(addr, &[LTC2990_REG_CONTROL, LTC2990_CTRL_MODE])?;
    bus.write(addr, &[LTC2990_REG_TRIGGER, 0x01])?;
    Ok(())
}

/// Read LTC2990 channel 1-4 (V1-V4) or 5 (Vcc)
pub fn read_ltc2990(bus: &mut dyn I2cIo, addr: u8, channel: u8) -> Result<i16> {
    debug_assert!((1..=LTC2990_CHANNELS).contains(&channel));
    let reg = if channel == 5 {
        LTC2990_REG_VCC_MSB
    } else {
        LTC2990_REG_V1_MSB + 2 * (channel - 1)
    };
    let mut buf = [0u8; 2];
    bus.write_read(addr, &[reg], &mut buf)?;
    Ok(monitor_code(buf[0], buf[1]))
}

// ============================================================================
// LTC2991
// ============================================================================

/// Put the LTC2991 in repeated-acquisition single-ended mode on all channels
pub fn enable_ltc2991(bus: &mut dyn I2cIo, addr: u8) -> Result<()> {
    bus.write(addr, &[LTC2991_REG_CTRL_V1234, LTC2991_CTRL_SINGLE_ENDED])?;
    bus.write(addr, &[LTC2991_REG_CTRL_V5678, LTC2991_CTRL_SINGLE_ENDED])?;
    bus.write(addr, &[LTC2991_REG_ACQUISITION, LTC2991_ACQ_REPEAT])?;
    bus.write(addr, &[LTC2991_REG_ENABLE, LTC2991_ENABLE_ALL])?;
    Ok(())
}

/// Read LTC2991 channel 1-7 (V1-V7), 8 (internal T), or 9 (Vcc)
pub fn read_ltc2991(bus: &mut dyn I2cIo, addr: u8, channel: u8) -> Result<i16> {
    debug_assert!((1..=LTC2991_CHANNELS).contains(&channel));
    let reg = match channel {
        8 => LTC2991_REG_TINT_MSB,
        9 => LTC2991_REG_VCC_MSB,
        ch => LTC2991_REG_V1_MSB + 2 * (ch - 1),
    };
    let mut buf = [0u8; 2];
    bus.write_read(addr, &[reg], &mut buf)?;
    Ok(monitor_code(buf[0], buf[1]))
}

// ============================================================================
// AD7414
// ============================================================================

/// Read the AD7414 10-bit temperature code
pub fn read_ad7414(bus: &mut dyn I2cIo, addr: u8) -> Result<i16> {
    let mut buf = [0u8; 2];
    bus.write_read(addr, &[AD7414_REG_TEMP], &mut buf)?;
    let code = ((buf[0] as u16) << 2) | (buf[1] >> 6) as u16;
    // 10-bit two's complement
    Ok(((code << 6) as i16) >> 6)
}

// ============================================================================
// LTC2499
// ============================================================================

/// Select a single-ended LTC2499 channel and read one conversion
///
/// The two config bytes select single-ended input `channel` at 1x speed with
/// line-frequency rejection; the conversion result is read after the
/// worst-case conversion delay.
pub fn read_ltc2499(bus: &mut dyn I2cIo, channel: u8) -> Result<i32> {
    debug_assert!(channel < LTC2499_CHANNELS);
    let odd = if channel & 1 != 0 { 0x08 } else { 0x00 };
    let cfg0 = 0xB0 | odd | (channel >> 1);
    bus.write(LTC2499_ADDR, &[cfg0, 0x80])?;

    thread::sleep(Duration::from_millis(LTC2499_CONV_DELAY_MS));

    let mut buf = [0u8; 4];
    bus.read(LTC2499_ADDR, &mut buf)?;
    let word = u32::from_be_bytes(buf);
    // Bits [29:5] hold the sign bit plus 24 data bits in offset binary
    let raw25 = ((word >> 5) & 0x01FF_FFFF) as i32;
    Ok(raw25 - (1 << 24))
}

// ============================================================================
// Sweep
// ============================================================================

/// The full onboard sensor read sequence
///
/// Callers must have routed the bus to the Sensor target first.
pub struct SensorBank<'a> {
    bus: &'a mut dyn I2cIo,
}

impl<'a> SensorBank<'a> {
    pub fn new(bus: &'a mut dyn I2cIo) -> Self {
        Self { bus }
    }

    /// Enable and read every known chip in the documented order
    ///
    /// A chip that fails contributes no readings for its channels; the rest
    /// of the sweep continues.
    pub fn sweep(&mut self) -> Vec<SensorReading> {
        let mut out = Vec::new();

        for addr in LTC2990_ADDRS {
            match self.sweep_ltc2990(addr) {
                Ok(mut readings) => out.append(&mut readings),
                Err(e) => warn!("LTC2990 0x{:02x} skipped: {}", addr, e),
            }
        }

        match self.sweep_ltc2991(LTC2991_ADDR) {
            Ok(mut readings) => out.append(&mut readings),
            Err(e) => warn!("LTC2991 0x{:02x} skipped: {}", LTC2991_ADDR, e),
        }

        for addr in AD7414_ADDRS {
            match read_ad7414(self.bus, addr) {
                Ok(raw) => out.push(SensorReading {
                    channel: format!("ad7414_{:02x}", addr),
                    raw: raw as i32,
                    value: ad7414_celsius(raw),
                    unit: Unit::Celsius,
                }),
                Err(e) => warn!("AD7414 0x{:02x} skipped: {}", addr, e),
            }
        }

        match self.sweep_ltc2499() {
            Ok(mut readings) => out.append(&mut readings),
            Err(e) => warn!("LTC2499 0x{:02x} skipped: {}", LTC2499_ADDR, e),
        }

        out
    }

    fn sweep_ltc2990(&mut self, addr: u8) -> Result<Vec<SensorReading>> {
        enable_ltc2990(self.bus, addr)?;
        let mut readings = Vec::with_capacity(LTC2990_CHANNELS as usize);
        for ch in 1..=LTC2990_CHANNELS {
            let raw = read_ltc2990(self.bus, addr, ch)?;
            let (name, value) = if ch == 5 {
                (format!("ltc2990_{:02x}_vcc", addr), vcc_volts(raw))
            } else {
                (format!("ltc2990_{:02x}_ch{}", addr, ch), monitor_volts(raw))
            };
            readings.push(SensorReading {
                channel: name,
                raw: raw as i32,
                value,
                unit: Unit::Volts,
            });
        }
        Ok(readings)
    }

    fn sweep_ltc2991(&mut self, addr: u8) -> Result<Vec<SensorReading>> {
        enable_ltc2991(self.bus, addr)?;
        let mut readings = Vec::with_capacity(LTC2991_CHANNELS as usize);
        for ch in 1..=LTC2991_CHANNELS {
            let raw = read_ltc2991(self.bus, addr, ch)?;
            let reading = match ch {
                8 => SensorReading {
                    channel: format!("ltc2991_{:02x}_t", addr),
                    raw: raw as i32,
                    value: internal_celsius(raw),
                    unit: Unit::Celsius,
                },
                9 => SensorReading {
                    channel: format!("ltc2991_{:02x}_vcc", addr),
                    raw: raw as i32,
                    value: vcc_volts(raw),
                    unit: Unit::Volts,
                },
                ch => SensorReading {
                    channel: format!("ltc2991_{:02x}_ch{}", addr, ch),
                    raw: raw as i32,
                    value: monitor_volts(raw),
                    unit: Unit::Volts,
                },
            };
            readings.push(reading);
        }
        Ok(readings)
    }

    fn sweep_ltc2499(&mut self) -> Result<Vec<SensorReading>> {
        let mut readings = Vec::with_capacity(LTC2499_CHANNELS as usize);
        for ch in 0..LTC2499_CHANNELS {
            let raw = read_ltc2499(self.bus, ch)?;
            readings.push(SensorReading {
                channel: format!("ltc2499_ch{}", ch),
                raw,
                value: ltc2499_volts(raw),
                unit: Unit::Volts,
            });
        }
        Ok(readings)
    }
}

/// Number of channels a fully responsive sensor sweep yields
pub const SWEEP_CHANNEL_COUNT: usize = 2 * LTC2990_CHANNELS as usize
    + LTC2991_CHANNELS as usize
    + AD7414_ADDRS.len()
    + LTC2499_CHANNELS as usize;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_zero_is_zero_volts() {
        assert_eq!(monitor_volts(0), 0.0);
    }

    #[test]
    fn vcc_channels_add_exactly_the_offset() {
        assert_eq!(vcc_volts(0), 2.5);
        let raw = 1000;
        assert!((vcc_volts(raw) - (monitor_volts(raw) + 2.5)).abs() < 1e-12);
    }

    #[test]
    fn monitor_code_sign_extends() {
        // Positive full-ish scale
        assert_eq!(monitor_code(0x3F, 0xFF), 0x3FFF);
        // Sign bit (D14) set
        assert_eq!(monitor_code(0x40, 0x00), -16384);
        // Data-valid flag in bit 7 is ignored
        assert_eq!(monitor_code(0x80, 0x00), 0);
    }

    #[test]
    fn internal_temperature_scale() {
        // 25.0 C = 400 LSB at 0.0625 C/LSB
        assert!((internal_celsius(400) - 25.0).abs() < 1e-12);
    }

    #[test]
    fn ad7414_decodes_ten_bit_codes() {
        // +25.0 C = 100 LSB
        let msb = (100u16 >> 2) as u8;
        let lsb = ((100u16 & 0x3) << 6) as u8;
        let code = ((msb as u16) << 2) | (lsb >> 6) as u16;
        assert_eq!(code, 100);
        // -1 LSB = all ones in 10 bits
        let raw = {
            let code = 0x3FFu16;
            ((code << 6) as i16) >> 6
        };
        assert_eq!(raw, -1);
        assert!((ad7414_celsius(raw) + 0.25).abs() < 1e-12);
    }

    #[test]
    fn sweep_covers_every_defined_channel() {
        assert_eq!(SWEEP_CHANNEL_COUNT, 29);
    }
}
