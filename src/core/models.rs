use std::path::PathBuf;

use serde::Serialize;

use super::version::ReleaseVersion;

/// One board variant inside an extracted release package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardEntry {
    pub id: String,
    pub name: String,
    #[serde(skip)]
    pub firmware: PathBuf,
}

/// Cache state of one release package.
#[derive(Debug, Clone, Serialize)]
pub struct PackageStatus {
    pub version: ReleaseVersion,
    pub downloaded: bool,
    pub extracted: bool,
    pub boards: Vec<BoardEntry>,
}

/// Serial port the flasher should talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSelection {
    /// Let the flasher pick the port itself.
    Auto,
    Device(String),
}

impl PortSelection {
    /// Sentinel the kflash tool uses for "pick the port yourself".
    pub const FLASHER_DEFAULT: &'static str = "DEFAULT";

    /// Parse a request value. Empty and `auto` select automatic detection.
    pub fn from_request(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Auto,
            Some(v) if v.eq_ignore_ascii_case("auto") => Self::Auto,
            Some(v) => Self::Device(v.to_string()),
        }
    }

    /// Value handed to the flashing capability.
    pub fn flasher_value(&self) -> &str {
        match self {
            Self::Auto => Self::FLASHER_DEFAULT,
            Self::Device(dev) => dev,
        }
    }
}

/// SPI flash the firmware is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashRegion {
    Spi3,
    #[default]
    Spi0,
}

impl FlashRegion {
    /// Parse the numeric selector; anything but `0` or `1` falls back to the default.
    pub fn from_request(value: Option<&str>) -> Self {
        match value.map(str::trim).and_then(|v| v.parse::<i64>().ok()) {
            Some(0) => Self::Spi3,
            _ => Self::Spi0,
        }
    }

    pub fn selector(self) -> u8 {
        match self {
            Self::Spi3 => 0,
            Self::Spi0 => 1,
        }
    }
}

/// Terminal result of one flash job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub log: Vec<String>,
}

impl FlashOutcome {
    pub fn succeeded(log: Vec<String>) -> Self {
        Self {
            success: true,
            error: None,
            log,
        }
    }

    /// Keeps everything logged before the failure and appends an `ERROR:` line.
    pub fn failed(mut log: Vec<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        log.push(format!("ERROR: {message}"));
        Self {
            success: false,
            error: Some(message),
            log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_selection_maps_auto_to_flasher_default() {
        assert_eq!(PortSelection::from_request(None), PortSelection::Auto);
        assert_eq!(PortSelection::from_request(Some("")), PortSelection::Auto);
        assert_eq!(PortSelection::from_request(Some("AUTO")), PortSelection::Auto);
        assert_eq!(PortSelection::Auto.flasher_value(), "DEFAULT");

        let dev = PortSelection::from_request(Some("/dev/ttyUSB0"));
        assert_eq!(dev.flasher_value(), "/dev/ttyUSB0");
    }

    #[test]
    fn flash_region_falls_back_to_spi0() {
        assert_eq!(FlashRegion::from_request(Some("0")), FlashRegion::Spi3);
        assert_eq!(FlashRegion::from_request(Some("1")), FlashRegion::Spi0);
        assert_eq!(FlashRegion::from_request(Some("7")), FlashRegion::Spi0);
        assert_eq!(FlashRegion::from_request(Some("abc")), FlashRegion::Spi0);
        assert_eq!(FlashRegion::from_request(None).selector(), 1);
    }

    #[test]
    fn failed_outcome_keeps_partial_log() {
        let outcome = FlashOutcome::failed(vec!["a".into(), "b".into()], "boom");
        assert!(!outcome.success);
        assert_eq!(outcome.log, vec!["a", "b", "ERROR: boom"]);
        assert_eq!(outcome.error.as_deref(), Some("boom"));
    }

    #[test]
    fn board_entry_hides_firmware_path() {
        let entry = BoardEntry {
            id: "goE".into(),
            name: "goE".into(),
            firmware: PathBuf::from("/cache/krux-v1/goE/firmware.bin"),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"id": "goE", "name": "goE"}));
    }
}
