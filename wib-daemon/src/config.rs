//! Daemon configuration
//!
//! One JSON file selecting the hardware variant and the network/bus
//! endpoints. A missing file is not an error: the defaults describe a
//! standard production WIB.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use wib_error::{Result, WibError};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/wib/wibd.json";

/// Hardware families this daemon can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Cryo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// TCP listen address for the command server
    pub listen: String,
    /// Shared I2C bus device
    pub i2c_device: String,
    /// Attached hardware family
    pub variant: Variant,
    /// Back the controller with simulated adapters instead of the board
    pub simulation: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:1234".to_string(),
            i2c_device: "/dev/i2c-0".to_string(),
            variant: Variant::Cryo,
            simulation: false,
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, falling back to defaults if the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            WibError::generic(format!("parse {}: {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = DaemonConfig::load(Path::new("/nonexistent/wibd.json")).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:1234");
        assert_eq!(cfg.variant, Variant::Cryo);
        assert!(!cfg.simulation);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"listen": "127.0.0.1:9999", "simulation": true}}"#).unwrap();
        let cfg = DaemonConfig::load(f.path()).unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:9999");
        assert!(cfg.simulation);
        assert_eq!(cfg.i2c_device, "/dev/i2c-0");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "not json").unwrap();
        assert!(DaemonConfig::load(f.path()).is_err());
    }
}
