//! Single-flight execution of the flashing capability.
//!
//! There is one serial bus and one board, so at most one flash job runs at a
//! time. A second caller is turned away with
//! [`FlashError::JobAlreadyRunning`] instead of being queued behind the
//! first. Jobs run on their own task: if the HTTP caller goes away the job
//! still finishes, and the slot is only released once it has.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use super::flasher::{FlashParams, Flasher, LineSink};
use super::models::{FlashOutcome, FlashRegion, PortSelection};
use super::resolver::ResolvedFirmware;
use crate::error::FlashError;

const LINE_BUFFER: usize = 64;

/// One flashing attempt, built per request and dropped when the job ends.
#[derive(Debug)]
pub struct FlashRequest {
    pub firmware: ResolvedFirmware,
    pub port: PortSelection,
    /// Board passed through to the flasher; `None` lets it detect the board.
    pub board: Option<String>,
    pub baud_rate: u32,
    pub flash_region: FlashRegion,
    pub sram: bool,
    pub plain_output: bool,
}

impl FlashRequest {
    fn params(&self) -> FlashParams {
        FlashParams {
            firmware: self.firmware.path.clone(),
            port: self.port.flasher_value().to_string(),
            board: self.board.clone(),
            baud_rate: self.baud_rate,
            flash_region: self.flash_region,
            sram: self.sram,
            plain_output: self.plain_output,
        }
    }
}

pub struct FlashCoordinator {
    flasher: Arc<dyn Flasher>,
    slot: Arc<Mutex<()>>,
}

/// Proof that the caller owns the flash slot.
///
/// Obtained from [`FlashCoordinator::try_begin`]; dropping it without calling
/// [`execute`](Self::execute) gives the slot back.
pub struct FlashPermit {
    guard: OwnedMutexGuard<()>,
    flasher: Arc<dyn Flasher>,
}

impl FlashCoordinator {
    pub fn new(flasher: Arc<dyn Flasher>) -> Self {
        Self {
            flasher,
            slot: Arc::new(Mutex::new(())),
        }
    }

    /// Claim the flash slot without waiting.
    pub fn try_begin(&self) -> Result<FlashPermit, FlashError> {
        let guard = self
            .slot
            .clone()
            .try_lock_owned()
            .map_err(|_| FlashError::JobAlreadyRunning)?;
        Ok(FlashPermit {
            guard,
            flasher: self.flasher.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.slot.try_lock().is_err()
    }

    /// Claim the slot and run `request` to completion.
    ///
    /// When the slot is taken the request is dropped untouched, which also
    /// removes its upload workspace.
    pub async fn run(&self, request: FlashRequest) -> Result<FlashOutcome, FlashError> {
        let permit = self.try_begin()?;
        Ok(permit.execute(request).await)
    }
}

impl FlashPermit {
    pub async fn execute(self, request: FlashRequest) -> FlashOutcome {
        let job_id = Uuid::now_v7();
        let span = info_span!(
            "flash_job",
            %job_id,
            port = %request.port.flasher_value(),
            firmware = %request.firmware.path.display(),
        );

        match tokio::spawn(run_job(self, request).instrument(span)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%job_id, error = %e, "Flash task ended abnormally");
                FlashOutcome::failed(Vec::new(), format!("Flash task ended abnormally: {e}"))
            }
        }
    }
}

async fn run_job(permit: FlashPermit, request: FlashRequest) -> FlashOutcome {
    let FlashPermit { guard, flasher } = permit;
    let params = request.params();
    let (tx, mut rx) = mpsc::channel::<String>(LINE_BUFFER);
    let sink = LineSink::new(tx, request.plain_output);
    let started = Instant::now();

    info!(board = ?params.board, baud = params.baud_rate, "Flash job started");

    // The flasher gets its own task so a panic in it leaves the collected
    // log in this one.
    let flash =
        tokio::spawn(async move { flasher.flash(&params, sink).await }.in_current_span());
    let collect = async {
        let mut log = Vec::new();
        while let Some(line) = rx.recv().await {
            info!(target: "kflashd::flasher", "{line}");
            log.push(line);
        }
        log
    };
    let (joined, log) = tokio::join!(flash, collect);

    // Workspace goes before the slot is released.
    drop(request);
    drop(guard);

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let message = match joined {
        Ok(Ok(())) => {
            info!(elapsed_ms, lines = log.len(), "Flash job succeeded");
            return FlashOutcome::succeeded(log);
        }
        Ok(Err(e)) => format!("{e:#}"),
        Err(e) => format!("Flash task ended abnormally: {e}"),
    };
    warn!(elapsed_ms, lines = log.len(), error = %message, "Flash job failed");
    FlashOutcome::failed(log, message)
}
