use super::*;
use crate::constants::power::{FEMB_EN_EXPANDER_BASE, LTC2977_ADDRS};
use crate::constants::sensor;
use crate::sim::{sim_fabric, BusEvent, EventLog, SimSpy, SIM_SPY_SIZE};

use wib_protocol::FembConfig;

fn sim_wib() -> (Wib, EventLog) {
    let (regs, bus, log) = sim_fabric();
    let wib = Wib::with_parts(
        Box::new(regs),
        Box::new(bus),
        Box::new(SimSpy),
        Box::new(CryoWib),
    );
    (wib, log)
}

fn all_on() -> PowerConfig {
    PowerConfig {
        fembs: [true, true, true, true],
        cold: false,
    }
}

fn only_femb0() -> PowerConfig {
    PowerConfig {
        fembs: [true, false, false, false],
        cold: false,
    }
}

fn config_enabling(enabled: [bool; FEMB_COUNT]) -> WibConfig {
    WibConfig {
        fembs: enabled
            .iter()
            .map(|&e| FembConfig {
                enabled: e,
                gain: 2,
                peak_time: 1,
                baseline: 0,
                test_cap: false,
            })
            .collect(),
    }
}

/// The select code carried by the most recent firmware-control write before
/// `pos` in the transcript
fn select_code_before(log: &[BusEvent], pos: usize) -> Option<u32> {
    log[..pos].iter().rev().find_map(|ev| match ev {
        BusEvent::RegWrite { index, value } if *index == REG_FW_CTRL => {
            Some(value & FW_CTRL_I2C_SELECT_MASK)
        }
        _ => None,
    })
}

fn first_i2c_write_to(log: &[BusEvent], addr: u8) -> Option<usize> {
    log.iter().position(|ev| matches!(ev, BusEvent::I2cWrite { addr: a, .. } if *a == addr))
}

// ============================================================================
// Register round trip
// ============================================================================

#[test]
fn peek_poke_round_trip_over_the_whole_window() {
    let (mut wib, _log) = sim_wib();
    let base = map::CTRL_REGS as u64;
    for i in 0..(map::CTRL_REGS_LEN as u64 / 4) {
        let addr = base + 4 * i;
        let value = 0x5A5A_0000 | i as u32;
        wib.peek(addr).unwrap();
        wib.poke(addr, value).unwrap();
        assert_eq!(wib.peek(addr).unwrap(), value);
    }
}

#[test]
fn peek_rejects_addresses_outside_the_window() {
    let (mut wib, _log) = sim_wib();
    let base = map::CTRL_REGS as u64;
    assert!(matches!(
        wib.peek(base + map::CTRL_REGS_LEN as u64),
        Err(WibError::AddrOutOfRange { .. })
    ));
    assert!(matches!(
        wib.peek(base - 4),
        Err(WibError::AddrOutOfRange { .. })
    ));
    assert!(matches!(
        wib.poke(base + 2, 0),
        Err(WibError::AddrOutOfRange { .. })
    ));
}

// ============================================================================
// Power / configure state machine
// ============================================================================

#[test]
fn configure_rejects_enabled_but_unpowered_modules() {
    let (mut wib, _log) = sim_wib();
    let err = wib
        .configure_wib(&config_enabling([false, false, true, false]))
        .unwrap_err();
    assert!(matches!(err, WibError::FembNotPowered(2)));
    for i in 0..FEMB_COUNT {
        assert!(!wib.femb_powered(i));
        assert!(!wib.femb_configured(i));
    }
}

#[test]
fn configure_rejects_wrong_module_count() {
    let (mut wib, _log) = sim_wib();
    wib.power_wib(&only_femb0()).unwrap();

    let mut conf = config_enabling([true, false, false, false]);
    conf.fembs.truncate(3);
    let err = wib.configure_wib(&conf).unwrap_err();
    assert!(matches!(
        err,
        WibError::WrongFembCount { expected: 4, got: 3 }
    ));
    // No state was touched by the rejected request
    assert!(wib.femb_powered(0));
    assert!(!wib.femb_configured(0));
}

#[test]
fn power_configure_power_off_scenario() {
    let (mut wib, _log) = sim_wib();

    wib.power_wib(&only_femb0()).unwrap();
    assert!(wib.femb_powered(0));
    assert!(!wib.femb_powered(1));

    wib.configure_wib(&config_enabling([true, false, false, false]))
        .unwrap();
    assert!(wib.femb_configured(0));

    wib.power_wib(&PowerConfig {
        fembs: [false; FEMB_COUNT],
        cold: false,
    })
    .unwrap();
    assert!(!wib.femb_powered(0));
    assert!(!wib.femb_configured(0));
}

#[test]
fn power_failure_rolls_back_to_prior_state() {
    let (regs, mut bus, _log) = sim_fabric();
    // FEMB 1's enable expander is absent: its sequence NACKs
    bus.remove_device(FEMB_EN_EXPANDER_BASE + 1);
    let mut wib = Wib::with_parts(
        Box::new(regs),
        Box::new(bus),
        Box::new(SimSpy),
        Box::new(CryoWib),
    );

    assert!(wib.power_wib(&all_on()).is_err());
    for i in 0..FEMB_COUNT {
        assert!(!wib.femb_powered(i), "FEMB {} flag leaked", i);
    }
}

// ============================================================================
// Bus select ordering
// ============================================================================

#[test]
fn every_transaction_group_is_preceded_by_its_own_select() {
    let (mut wib, log) = sim_wib();

    wib.read_sensors().unwrap();
    wib.power_wib(&only_femb0()).unwrap();

    let log = log.lock().unwrap().clone();

    let sensor_pos = first_i2c_write_to(&log, sensor::LTC2990_ADDRS[0]).unwrap();
    assert_eq!(
        select_code_before(&log, sensor_pos),
        Some(I2cTarget::Sensor.code())
    );

    let trim_pos = first_i2c_write_to(&log, LTC2977_ADDRS[0]).unwrap();
    assert_eq!(
        select_code_before(&log, trim_pos),
        Some(I2cTarget::Ltc2977.code())
    );

    let enable_pos = first_i2c_write_to(&log, FEMB_EN_EXPANDER_BASE).unwrap();
    assert_eq!(
        select_code_before(&log, enable_pos),
        Some(I2cTarget::FembEn.code())
    );

    // The sweep came first, so the trim writes required a fresh select
    assert!(trim_pos > sensor_pos);
}

// ============================================================================
// Sensors
// ============================================================================

#[test]
fn sensor_sweep_covers_every_channel_in_order() {
    let (mut wib, _log) = sim_wib();
    let readings = wib.read_sensors().unwrap();
    assert_eq!(readings.len(), crate::hw::sensors::SWEEP_CHANNEL_COUNT);

    let names: Vec<&str> = readings.iter().map(|r| r.channel.as_str()).collect();
    assert_eq!(names[0], "ltc2990_4e_ch1");
    assert_eq!(names[4], "ltc2990_4e_vcc");
    assert_eq!(names[5], "ltc2990_4c_ch1");
    assert_eq!(names[9], "ltc2990_4c_vcc");
    assert_eq!(names[10], "ltc2991_48_ch1");
    assert_eq!(names[17], "ltc2991_48_t");
    assert_eq!(names[18], "ltc2991_48_vcc");
    assert_eq!(names[19], "ad7414_49");
    assert_eq!(names[20], "ad7414_4d");
    assert_eq!(names[21], "ad7414_4a");
    assert_eq!(names[22], "ltc2499_ch0");
    assert_eq!(names[28], "ltc2499_ch6");

    // Vcc channels carry the fixed +2.5 V offset on top of the scaled code
    let vcc = &readings[4];
    assert!((vcc.value - (vcc.raw as f64 * 0.000_305_18 + 2.5)).abs() < 1e-12);
    // The simulated internal temperature is 25 C
    assert!((readings[17].value - 25.0).abs() < 1e-9);
}

#[test]
fn sensor_sweep_skips_a_silent_chip_and_continues() {
    let (regs, mut bus, _log) = sim_fabric();
    bus.remove_device(crate::constants::sensor::LTC2991_ADDR);
    let mut wib = Wib::with_parts(
        Box::new(regs),
        Box::new(bus),
        Box::new(SimSpy),
        Box::new(CryoWib),
    );

    let readings = wib.read_sensors().unwrap();
    assert_eq!(
        readings.len(),
        crate::hw::sensors::SWEEP_CHANNEL_COUNT - 9
    );
    assert!(readings.iter().any(|r| r.channel == "ad7414_49"));
    assert!(readings.iter().all(|r| !r.channel.starts_with("ltc2991")));
}

// ============================================================================
// Fake time, spy, variant stubs
// ============================================================================

#[test]
fn set_fake_time_arms_without_starting() {
    let (mut wib, log) = sim_wib();
    wib.set_fake_time(0x0000_0012_3456_789A).unwrap();

    let events = log.lock().unwrap().clone();
    let ctrl_writes: Vec<u32> = events
        .iter()
        .filter_map(|ev| match ev {
            BusEvent::RegWrite { index, value } if *index == REG_FAKE_TIME_CTRL => Some(*value),
            _ => None,
        })
        .collect();
    assert!(!ctrl_writes.is_empty());
    assert!(ctrl_writes.iter().all(|v| v & FAKE_TIME_RUN == 0));
    assert!(events.contains(&BusEvent::RegWrite {
        index: REG_FAKE_TIME_L,
        value: 0x3456_789A,
    }));
    assert!(events.contains(&BusEvent::RegWrite {
        index: REG_FAKE_TIME_H,
        value: 0x12,
    }));

    wib.start_fake_time().unwrap();
    let events = log.lock().unwrap().clone();
    let last_ctrl = events
        .iter()
        .rev()
        .find_map(|ev| match ev {
            BusEvent::RegWrite { index, value } if *index == REG_FAKE_TIME_CTRL => Some(*value),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_ctrl & FAKE_TIME_RUN, FAKE_TIME_RUN);
}

#[test]
fn daq_spy_returns_only_the_requested_buffers() {
    let (mut wib, _log) = sim_wib();

    let (b0, b1) = wib.read_daq_spy(true, false).unwrap();
    assert_eq!(b0.as_ref().map(Vec::len), Some(SIM_SPY_SIZE));
    assert!(b1.is_none());

    let (b0, b1) = wib.read_daq_spy(true, true).unwrap();
    assert_ne!(b0.unwrap(), b1.unwrap());

    let (b0, b1) = wib.read_daq_spy(false, false).unwrap();
    assert!(b0.is_none() && b1.is_none());
}

#[test]
fn cryo_pulser_reports_not_supported() {
    let (mut wib, _log) = sim_wib();
    assert!(matches!(
        wib.set_pulser(true),
        Err(WibError::NotSupported(_))
    ));
}

#[test]
fn initialize_brings_up_a_locked_endpoint() {
    let (mut wib, _log) = sim_wib();
    wib.initialize().unwrap();
    assert!(wib.is_endpoint_locked().unwrap());
    let status = wib.timing_status().unwrap();
    assert!(status.locked);
    assert!(status.pll_initialized);
}

#[test]
fn backplane_identity_decodes_crate_and_slot() {
    let (mut wib, _log) = sim_wib();
    // The simulated backplane address register reads 0x15
    assert_eq!(wib.backplane_crate_num().unwrap(), 1);
    assert_eq!(wib.backplane_slot_num().unwrap(), 5);
    assert_eq!(wib.timing_addr().unwrap(), 0x15);
}
