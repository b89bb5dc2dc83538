use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{Duration, sleep};

use crate::core::flasher::{FlashParams, Flasher, LineSink};

/// Stand-in flasher for development without a board attached.
///
/// Emits a scripted transcript, optionally waits on a gate, and can be told
/// to fail once the transcript has been written.
pub struct SimulatedFlasher {
    pub lines: Vec<String>,
    pub step_delay: Duration,
    pub fail_with: Option<String>,
    pub gate: Option<Arc<Notify>>,
}

impl Default for SimulatedFlasher {
    fn default() -> Self {
        Self {
            lines: [
                "[INFO] Trying to enter ISP mode...",
                "[INFO] Greeting Message Detected, Start Downloading ISP",
                "Downloading ISP: |====================| 100.0% 10kiB/s",
                "[INFO] Booting From 0x80000000",
                "[INFO] Wait For 0.1 second for ISP to Boot",
                "[INFO] Boot to Flashmode Successfully",
                "Downloading: |====================| 100.0% 512kiB/s",
                "[INFO] Rebooting...",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            step_delay: Duration::from_millis(150),
            fail_with: None,
            gate: None,
        }
    }
}

impl SimulatedFlasher {
    pub fn scripted(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            step_delay: Duration::ZERO,
            fail_with: None,
            gate: None,
        }
    }

    /// Fail with `message` after emitting the transcript.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// Block after the transcript until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl Flasher for SimulatedFlasher {
    async fn flash(&self, params: &FlashParams, sink: LineSink) -> Result<()> {
        let size = tokio::fs::metadata(&params.firmware)
            .await
            .with_context(|| format!("Cannot read firmware {}", params.firmware.display()))?
            .len();

        sink.emit(format!(
            "[SIM] port={} baud={} board={} size={}",
            params.port,
            params.baud_rate,
            params.board.as_deref().unwrap_or("auto"),
            size
        ))
        .await;

        for line in &self.lines {
            if !self.step_delay.is_zero() {
                sleep(self.step_delay).await;
            }
            sink.emit(line).await;
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if let Some(message) = &self.fail_with {
            bail!("{message}");
        }
        Ok(())
    }
}
