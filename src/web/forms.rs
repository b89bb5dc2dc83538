//! Flash options shared by the upload and release endpoints.

use std::collections::HashMap;

use crate::core::{FlashRegion, FlashRequest, PortSelection, ResolvedFirmware};
use crate::error::FlashError;

pub const DEFAULT_BAUD_RATE: u32 = 1_500_000;

/// `1`, `true`, `on` and `yes` are true, case-insensitively. Absent means `default`.
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value {
        None => default,
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashOptions {
    pub port: PortSelection,
    pub board: Option<String>,
    pub baud_rate: u32,
    pub flash_region: FlashRegion,
    pub sram: bool,
    pub plain_output: bool,
}

impl FlashOptions {
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, FlashError> {
        let get = |name: &str| fields.get(name).map(String::as_str);

        let baud_rate = match get("baudrate") {
            None => DEFAULT_BAUD_RATE,
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|baud| *baud > 0)
                .ok_or_else(|| FlashError::InvalidInput(format!("Invalid baud rate: {raw:?}")))?,
        };

        let board = get("board")
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_owned);

        Ok(Self {
            port: PortSelection::from_request(get("port")),
            board,
            baud_rate,
            flash_region: FlashRegion::from_request(get("flash")),
            sram: parse_bool(get("sram"), false),
            plain_output: parse_bool(get("noansi"), true),
        })
    }

    pub fn into_request(self, firmware: ResolvedFirmware) -> FlashRequest {
        FlashRequest {
            firmware,
            port: self.port,
            board: self.board,
            baud_rate: self.baud_rate,
            flash_region: self.flash_region,
            sram: self.sram,
            plain_output: self.plain_output,
        }
    }
}
