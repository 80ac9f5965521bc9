//! Constants for the WIB hardware map
//!
//! Centralizes the firmware memory map, I2C device addresses, and chip
//! register values. This is the SINGLE SOURCE OF TRUTH for hardware
//! constants - never use magic numbers in other files, add them here first.
//!
//! The control/status window and DAQ spy windows must match the deployed
//! firmware build.

/// Memory base addresses of the AXI interfaces
pub mod map {
    /// Base physical address of the control/status register window
    pub const CTRL_REGS: usize = 0xA00C_0000;

    /// Byte length of the control/status window
    pub const CTRL_REGS_LEN: usize = 0x100;

    /// Base physical addresses of the two DAQ spy capture windows
    pub const DAQ_SPY_0: usize = 0xA010_0000;
    pub const DAQ_SPY_1: usize = 0xA020_0000;

    /// Size of one DAQ spy buffer
    pub const DAQ_SPY_SIZE: usize = 0x0010_0000;
}

/// 32-bit register indexes in the control/status window (byte offset / 4)
pub mod regs {
    pub const REG_TIMING: usize = 0x0000 / 4;
    pub const REG_FW_CTRL: usize = 0x0004 / 4;
    pub const REG_FAKE_TIME_CTRL: usize = 0x000C / 4;
    pub const REG_TIMING_CMD_0: usize = 0x0010 / 4;
    pub const REG_TIMING_CMD_1: usize = 0x0014 / 4;
    pub const REG_FAKE_TIME_L: usize = 0x0018 / 4;
    pub const REG_FAKE_TIME_H: usize = 0x001C / 4;
    pub const REG_DAQ_SPY_STATUS: usize = 0x0080 / 4;
    pub const REG_FW_TIMESTAMP: usize = 0x0088 / 4;
    pub const REG_BACKPLANE_ADDR: usize = 0x008C / 4;
    pub const REG_ENDPOINT_STATUS: usize = 0x0090 / 4;

    /// REG_FW_CTRL bits [3:0]: I2C bus select code
    pub const FW_CTRL_I2C_SELECT_MASK: u32 = 0x0000_000F;
    /// REG_FW_CTRL bit 8: trigger a capture into DAQ spy buffer 0
    pub const FW_CTRL_SPY_TRIGGER_0: u32 = 1 << 8;
    /// REG_FW_CTRL bit 9: trigger a capture into DAQ spy buffer 1
    pub const FW_CTRL_SPY_TRIGGER_1: u32 = 1 << 9;

    /// REG_TIMING bit 0: timing endpoint reset
    pub const TIMING_EP_RESET: u32 = 1 << 0;

    /// REG_FAKE_TIME_CTRL bit 0: fake time counter running
    pub const FAKE_TIME_RUN: u32 = 1 << 0;

    /// REG_DAQ_SPY_STATUS bit N: buffer N capture complete
    pub const SPY_STATUS_FULL_0: u32 = 1 << 0;
    pub const SPY_STATUS_FULL_1: u32 = 1 << 1;

    /// REG_ENDPOINT_STATUS bits [3:0]: endpoint state machine
    pub const EP_STATE_MASK: u32 = 0x0000_000F;
    /// Endpoint state READY: locked to the timing reference
    pub const EP_STATE_READY: u32 = 0x8;

    /// REG_BACKPLANE_ADDR bits [3:0]: slot number
    pub const BACKPLANE_SLOT_MASK: u32 = 0x0000_000F;
    /// REG_BACKPLANE_ADDR bits [7:4]: crate number
    pub const BACKPLANE_CRATE_MASK: u32 = 0x0000_00F0;
    pub const BACKPLANE_CRATE_SHIFT: u32 = 4;
}

/// Onboard sensor chips on the Sensor bus target (7-bit I2C addresses)
pub mod sensor {
    /// LTC2990 quad voltage/temperature monitors
    pub const LTC2990_ADDRS: [u8; 2] = [0x4E, 0x4C];
    /// LTC2991 octal voltage/temperature monitor
    pub const LTC2991_ADDR: u8 = 0x48;
    /// AD7414 temperature sensors
    pub const AD7414_ADDRS: [u8; 3] = [0x49, 0x4D, 0x4A];
    /// LTC2499 multi-channel delta-sigma ADC
    pub const LTC2499_ADDR: u8 = 0x15;

    /// Single-ended monitor channel scale (12/14-bit families)
    pub const MONITOR_VOLTS_PER_LSB: f64 = 0.000_305_18;
    /// Internal temperature channel scale
    pub const INTERNAL_DEG_C_PER_LSB: f64 = 0.0625;
    /// Offset applied to supply-rail (Vcc) channels, which are sampled
    /// differentially against a 2.5 V reference
    pub const VCC_OFFSET_VOLTS: f64 = 2.5;
    /// AD7414 10-bit temperature scale
    pub const AD7414_DEG_C_PER_LSB: f64 = 0.25;
    /// LTC2499 scale for a 2.5 V reference (full scale +/- VREF/2)
    pub const LTC2499_VOLTS_PER_LSB: f64 = 1.25 / ((1u32 << 24) as f64);

    // LTC2990 register map
    pub const LTC2990_REG_CONTROL: u8 = 0x01;
    pub const LTC2990_REG_TRIGGER: u8 = 0x02;
    /// V1 MSB; data registers are contiguous MSB/LSB pairs
    pub const LTC2990_REG_V1_MSB: u8 = 0x06;
    pub const LTC2990_REG_VCC_MSB: u8 = 0x0E;
    /// Repeated acquisition, V1-V4 single-ended
    pub const LTC2990_CTRL_MODE: u8 = 0x1F;
    /// Channels: 1-4 = V1-V4, 5 = Vcc
    pub const LTC2990_CHANNELS: u8 = 5;

    // LTC2991 register map
    pub const LTC2991_REG_ENABLE: u8 = 0x01;
    pub const LTC2991_REG_CTRL_V1234: u8 = 0x06;
    pub const LTC2991_REG_CTRL_V5678: u8 = 0x07;
    pub const LTC2991_REG_ACQUISITION: u8 = 0x08;
    pub const LTC2991_REG_V1_MSB: u8 = 0x0A;
    pub const LTC2991_REG_TINT_MSB: u8 = 0x1A;
    pub const LTC2991_REG_VCC_MSB: u8 = 0x1C;
    /// Enable all V1-V8 pairs plus the internal temperature/Vcc channel
    pub const LTC2991_ENABLE_ALL: u8 = 0xF8;
    /// Single-ended voltage mode for both quads
    pub const LTC2991_CTRL_SINGLE_ENDED: u8 = 0x00;
    /// Repeated acquisition mode
    pub const LTC2991_ACQ_REPEAT: u8 = 0x10;
    /// Channels: 1-7 = V1-V7, 8 = internal T, 9 = Vcc
    pub const LTC2991_CHANNELS: u8 = 9;

    // AD7414 register map
    pub const AD7414_REG_TEMP: u8 = 0x00;

    // LTC2499 conversion
    /// Worst-case conversion time at 1x speed with 50/60 Hz rejection
    pub const LTC2499_CONV_DELAY_MS: u64 = 150;
    /// Polled single-ended channels
    pub const LTC2499_CHANNELS: u8 = 7;
}

/// FEMB power distribution
pub mod power {
    /// Regulator ids 0-3: DC2DC converters
    pub const DC2DC_COUNT: u8 = 4;
    /// Regulator ids 4-5: LDOs
    pub const LDO_COUNT: u8 = 2;
    /// Regulators per FEMB (DC2DC 0-3, LDO 0-1)
    pub const REGULATOR_COUNT: u8 = 6;

    /// Enable mask bit for the BIAS rail
    pub const BIAS_BIT: u8 = 6;
    /// Enable mask bits addressing regulator rails
    pub const RAIL_MASK: u8 = 0x3F;
    /// All defined enable mask bits (rails + bias)
    pub const PORT_MASK: u8 = 0x7F;
    /// Everything on
    pub const FULL_POWER_MASK: u8 = 0x7F;

    /// Rail sequencing order, low-current first (LDOs, then DC2DC, then
    /// BIAS last). Disables run in the reverse order.
    pub const ENABLE_ORDER: [u8; 7] = [4, 5, 0, 1, 2, 3, BIAS_BIT];

    /// Per-FEMB enable expanders on the FembEn bus target
    pub const FEMB_EN_EXPANDER_BASE: u8 = 0x20;
    /// Expander output port register
    pub const EXPANDER_REG_OUTPUT: u8 = 0x01;
    /// Expander pin direction register (0 = all outputs)
    pub const EXPANDER_REG_CONFIG: u8 = 0x03;
    pub const EXPANDER_ALL_OUTPUTS: u8 = 0x00;

    /// LTC2977 power system managers, 8 channels each; regulator channel
    /// N of FEMB F is global channel F*6+N
    pub const LTC2977_ADDRS: [u8; 3] = [0x5C, 0x5D, 0x5E];
    pub const LTC2977_CHANNELS: usize = 8;

    // PMBus command codes used for trim control
    pub const PMBUS_CMD_PAGE: u8 = 0x00;
    pub const PMBUS_CMD_VOUT_COMMAND: u8 = 0x21;
    /// VOUT_COMMAND linear format exponent is -13 (L16)
    pub const PMBUS_L16_SCALE: f64 = 8192.0;

    /// Default DC2DC trim targets applied before a power-on (volts)
    pub const DEFAULT_DC2DC_VOLTS: [f64; 4] = [1.1, 1.1, 2.5, 2.5];
    /// Default LDO trim targets applied before a power-on (volts)
    pub const DEFAULT_LDO_VOLTS: [f64; 2] = [2.5, 1.5];
    /// LDO1 trim target for a cryogenic bring-up
    pub const COLD_LDO1_VOLTS: f64 = 1.2;
}

/// FEMB frontend configuration latches
pub mod femb {
    /// Per-FEMB configuration latch on the FembEn bus target
    pub const CFG_ADDR_BASE: u8 = 0x38;
    /// Configuration word register
    pub const CFG_REG: u8 = 0x10;
}

/// Software release code reported by `read_sw_timestamp`
pub const SW_TIMESTAMP: u32 = 0x2024_0200;
