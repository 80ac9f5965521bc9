//! Unified error handling for the WIB control software
//!
//! This crate provides a single error type used across all WIB components.
//! It uses thiserror for ergonomic error definitions with proper Display and
//! Error trait impls.

use std::io;

/// Result type alias using WibError
pub type Result<T> = std::result::Result<T, WibError>;

/// Unified error type for all WIB operations
#[derive(thiserror::Error, Debug)]
pub enum WibError {
    // ============================================================================
    // Initialization Errors (fatal to construction, never retried)
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to map register window at {addr:#010x} (+{len:#x}): {reason}")]
    Mmap {
        addr: usize,
        len: usize,
        reason: String,
    },

    #[error("Failed to open I2C bus {device}: {reason}")]
    I2cOpen {
        device: String,
        reason: String,
    },

    // ============================================================================
    // Transaction Errors (non-fatal, caller decides)
    // ============================================================================
    #[error("I2C device 0x{addr:02x} did not acknowledge")]
    I2cNack {
        addr: u8,
    },

    #[error("I2C transfer to 0x{addr:02x} failed: {reason}")]
    I2cIo {
        addr: u8,
        reason: String,
    },

    #[error("DAQ spy capture did not complete (status {status:#010x})")]
    SpyTimeout {
        status: u32,
    },

    // ============================================================================
    // Range Errors (rejected before any hardware access)
    // ============================================================================
    #[error("Register {index} outside mapped window of {len} registers")]
    RegOutOfRange {
        index: usize,
        len: usize,
    },

    #[error("Address {addr:#x} outside mapped register window")]
    AddrOutOfRange {
        addr: u64,
    },

    #[error("FEMB index {0} out of range (0-3)")]
    InvalidFemb(usize),

    #[error("Regulator id {0} out of range (0-5: DC2DC0-3, LDO0-1)")]
    InvalidRegulator(u8),

    // ============================================================================
    // State-Precondition Violations (request rejected, no partial mutation)
    // ============================================================================
    #[error("Must supply exactly {expected} FEMB configurations (got {got})")]
    WrongFembCount {
        expected: usize,
        got: usize,
    },

    #[error("Enabled FEMBs must be powered (FEMB {0} is off)")]
    FembNotPowered(usize),

    #[error("Configuration rejected: {0}")]
    ConfigRejected(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl WibError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a not-yet-supported error from a string
    ///
    /// Used for operations pending hardware support, so operators can tell
    /// "feature unimplemented" apart from "hardware rejected this".
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a configuration rejection from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigRejected(msg.into())
    }
}

// Allow converting from String to WibError
impl From<String> for WibError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to WibError
impl From<&str> for WibError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
