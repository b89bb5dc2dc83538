pub mod kflash;
pub mod simulated;

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::models::FlashRegion;

pub use kflash::KflashCli;
pub use simulated::SimulatedFlasher;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ANSI pattern is valid"));

/// Everything the flashing capability needs for one run.
#[derive(Debug, Clone)]
pub struct FlashParams {
    pub firmware: PathBuf,
    /// Device path, or the flasher's own default-port sentinel.
    pub port: String,
    pub board: Option<String>,
    pub baud_rate: u32,
    pub flash_region: FlashRegion,
    pub sram: bool,
    pub plain_output: bool,
}

/// Line-oriented output channel handed to a [`Flasher`].
#[derive(Clone)]
pub struct LineSink {
    tx: mpsc::Sender<String>,
    strip_ansi: bool,
}

impl LineSink {
    pub fn new(tx: mpsc::Sender<String>, strip_ansi: bool) -> Self {
        Self { tx, strip_ansi }
    }

    /// Normalize and forward one line of output.
    pub async fn emit(&self, text: impl AsRef<str>) {
        let line = normalize_line(text.as_ref(), self.strip_ansi);
        // The receiver only goes away once the job is being torn down.
        let _ = self.tx.send(line).await;
    }
}

/// Strip surrounding line terminators, and ANSI escapes when asked to.
pub fn normalize_line(text: &str, strip_ansi: bool) -> String {
    let trimmed = text.trim_matches(|c| c == '\r' || c == '\n');
    if strip_ansi {
        ANSI_ESCAPE.replace_all(trimmed, "").into_owned()
    } else {
        trimmed.to_string()
    }
}

/// The external routine that writes firmware onto the device.
///
/// An `Err` means the flash failed. Whatever was emitted to the sink before
/// the failure is kept by the caller.
#[async_trait]
pub trait Flasher: Send + Sync {
    async fn flash(&self, params: &FlashParams, sink: LineSink) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FlasherType {
    #[default]
    Kflash,
    Simulated,
}

pub fn create_flasher(kind: FlasherType, kflash_bin: &Path) -> Arc<dyn Flasher> {
    match kind {
        FlasherType::Kflash => Arc::new(KflashCli::new(kflash_bin)),
        FlasherType::Simulated => Arc::new(SimulatedFlasher::default()),
    }
}
