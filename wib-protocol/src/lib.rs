//! Shared request/reply protocol types for the WIB control software
//!
//! One request envelope per connection turn, answered by exactly one reply
//! envelope (synchronous rendezvous, no pipelining). Address fields are
//! 64-bit, register values unsigned 32-bit.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum request message size (8KB)
///
/// Replies are not bounded by this: a DAQ spy readout carries two megabyte
/// buffers.
pub const MAX_REQUEST_SIZE: usize = 8 * 1024;

/// Number of FEMB slots on a WIB
pub const FEMB_COUNT: usize = 4;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    /// Read all onboard I2C sensors
    GetSensors,
    /// Read timing endpoint lock state and raw status registers
    GetTimingStatus,
    /// Startup bring-up of the board
    Initialize,
    /// Unpack archives and run the firmware update procedure
    Update { root_archive: String, boot_archive: String },
    /// Reboot the board OS
    Reboot,
    /// Read a 32-bit register in the WIB address space
    Peek { addr: u64 },
    /// Write a 32-bit register in the WIB address space
    Poke { addr: u64, value: u32 },
    /// Run the frontend power sequence
    PowerWib { config: PowerConfig },
    /// Configure the frontend (requires enabled FEMBs to be powered)
    ConfigureWib { config: WibConfig },
    /// Turn the calibration pulser on or off
    SetPulser { on: bool },
    /// Trigger a DAQ spy capture and return the selected buffers
    ReadDaqSpy { buf0: bool, buf1: bool },
    /// Reset the timing endpoint
    ResetTimingEndpoint,
    /// Arm the fake time generator (does not start it)
    SetFakeTime { time: u64 },
    /// Start the fake time generator from the armed value
    StartFakeTime,
    /// Read the firmware build timestamp code
    GetFwTimestamp,
    /// Read the software release code
    GetSwTimestamp,
}

impl Request {
    /// Validate request parameters before any hardware access
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::GetSensors
            | Request::GetTimingStatus
            | Request::Initialize
            | Request::Reboot
            | Request::SetPulser { .. }
            | Request::ReadDaqSpy { .. }
            | Request::ResetTimingEndpoint
            | Request::SetFakeTime { .. }
            | Request::StartFakeTime
            | Request::GetFwTimestamp
            | Request::GetSwTimestamp => Ok(()),

            Request::Update { root_archive, boot_archive } => {
                if root_archive.is_empty() || boot_archive.is_empty() {
                    return Err("Update requires both archive paths".into());
                }
                Ok(())
            }

            Request::Peek { addr } => validate_reg_addr(*addr),
            Request::Poke { addr, .. } => validate_reg_addr(*addr),

            Request::PowerWib { .. } => Ok(()),

            Request::ConfigureWib { config } => {
                for (i, femb) in config.fembs.iter().enumerate() {
                    femb.validate().map_err(|e| format!("FEMB {}: {}", i, e))?;
                }
                Ok(())
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::GetSensors => "GetSensors",
            Request::GetTimingStatus => "GetTimingStatus",
            Request::Initialize => "Initialize",
            Request::Update { .. } => "Update",
            Request::Reboot => "Reboot",
            Request::Peek { .. } => "Peek",
            Request::Poke { .. } => "Poke",
            Request::PowerWib { .. } => "PowerWib",
            Request::ConfigureWib { .. } => "ConfigureWib",
            Request::SetPulser { .. } => "SetPulser",
            Request::ReadDaqSpy { .. } => "ReadDaqSpy",
            Request::ResetTimingEndpoint => "ResetTimingEndpoint",
            Request::SetFakeTime { .. } => "SetFakeTime",
            Request::StartFakeTime => "StartFakeTime",
            Request::GetFwTimestamp => "GetFwTimestamp",
            Request::GetSwTimestamp => "GetSwTimestamp",
        }
    }
}

/// Registers are 32-bit words; addresses must be word aligned
pub fn validate_reg_addr(addr: u64) -> Result<(), String> {
    if addr % 4 != 0 {
        return Err(format!("Address {:#x} is not 32-bit aligned", addr));
    }
    Ok(())
}

// ============================================================================
// Request payloads
// ============================================================================

/// Frontend power request: the net on/off state for each FEMB slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    /// Desired power state per FEMB slot
    pub fembs: [bool; FEMB_COUNT],
    /// Cryogenic temperature bring-up (affects variant sequencing)
    #[serde(default)]
    pub cold: bool,
}

/// Frontend configuration request (one entry per FEMB slot required)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WibConfig {
    pub fembs: Vec<FembConfig>,
}

/// Per-FEMB configuration record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FembConfig {
    pub enabled: bool,
    /// Amplifier gain selector
    #[serde(default)]
    pub gain: u8,
    /// Shaper peaking time selector
    #[serde(default)]
    pub peak_time: u8,
    /// Baseline selector
    #[serde(default)]
    pub baseline: u8,
    /// Route the test pulse to this FEMB
    #[serde(default)]
    pub test_cap: bool,
}

impl FembConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.gain > 3 {
            return Err(format!("gain {} out of range (0-3)", self.gain));
        }
        if self.peak_time > 3 {
            return Err(format!("peak_time {} out of range (0-3)", self.peak_time));
        }
        if self.baseline > 1 {
            return Err(format!("baseline {} out of range (0-1)", self.baseline));
        }
        Ok(())
    }
}

// ============================================================================
// Replies
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response data - one populated field per reply kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensors: Option<Vec<SensorReading>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spy0: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spy1: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseData {
    pub fn none() -> Self {
        Self::default()
    }
    pub fn reg(addr: u64, value: u32) -> Self {
        Self { addr: Some(addr), value: Some(value), ..Self::default() }
    }
    pub fn sensor_list(s: Vec<SensorReading>) -> Self {
        Self { sensors: Some(s), ..Self::default() }
    }
    pub fn timing_status(t: TimingStatus) -> Self {
        Self { timing: Some(t), ..Self::default() }
    }
    pub fn spy(spy0: Option<Vec<u8>>, spy1: Option<Vec<u8>>) -> Self {
        Self { spy0, spy1, ..Self::default() }
    }
    pub fn timestamp(code: u32) -> Self {
        Self { value: Some(code), ..Self::default() }
    }
    pub fn text(msg: impl Into<String>) -> Self {
        Self { message: Some(msg.into()), ..Self::default() }
    }
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_reg(addr: u64, value: u32) -> Self {
        Response::Ok(ResponseData::reg(addr, value))
    }

    pub fn ok_sensors(s: Vec<SensorReading>) -> Self {
        Response::Ok(ResponseData::sensor_list(s))
    }

    pub fn ok_timing(t: TimingStatus) -> Self {
        Response::Ok(ResponseData::timing_status(t))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}

// ============================================================================
// Reply payloads
// ============================================================================

/// Physical unit of a sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Volts,
    Celsius,
}

/// One calibrated sensor channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    /// Channel name, e.g. "ltc2990_4e_ch1"
    pub channel: String,
    /// Raw code as returned by the chip
    pub raw: i32,
    /// Calibrated physical value
    pub value: f64,
    pub unit: Unit,
}

/// Timing endpoint state
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingStatus {
    pub locked: bool,
    pub pll_initialized: bool,
    /// Raw timing control register
    pub timing_reg: u32,
    /// Raw endpoint status register
    pub endpoint_status: u32,
}
