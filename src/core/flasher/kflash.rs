use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::core::flasher::{FlashParams, Flasher, LineSink};

const READ_CHUNK: usize = 4096;

/// Drives the `kflash` command line tool as a child process.
pub struct KflashCli {
    program: PathBuf,
}

impl KflashCli {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
        }
    }

    fn command(&self, params: &FlashParams) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg(&params.port)
            .arg("-b")
            .arg(params.baud_rate.to_string())
            .arg("-f")
            .arg(params.flash_region.selector().to_string());

        if let Some(board) = &params.board {
            cmd.arg("-B").arg(board);
        }
        if params.sram {
            cmd.arg("-s");
        }
        if params.plain_output {
            cmd.arg("-n");
        }

        cmd.arg(&params.firmware)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        cmd
    }
}

#[async_trait]
impl Flasher for KflashCli {
    async fn flash(&self, params: &FlashParams, sink: LineSink) -> Result<()> {
        debug!(program = %self.program.display(), firmware = %params.firmware.display(), "Spawning kflash");

        let mut child = self
            .command(params)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Failed to get kflash stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Failed to get kflash stderr"))?;

        let (out, err) = tokio::join!(pump_lines(stdout, &sink), pump_lines(stderr, &sink));
        let last_error_line = match out.and(err) {
            Ok(line) => line,
            Err(e) => return Err(abort_child(&mut child, e).await),
        };

        let status = child
            .wait()
            .await
            .context("Failed to wait for kflash")?;

        if status.success() {
            return Ok(());
        }

        match last_error_line {
            Some(line) => bail!("{line}"),
            None => bail!("kflash failed with status: {status}"),
        }
    }
}

/// Kill and reap `child` after its output could not be read, so no kflash
/// process outlives the job holding the serial port.
async fn abort_child(child: &mut Child, cause: std::io::Error) -> anyhow::Error {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill kflash");
    }
    anyhow::Error::new(cause).context("Failed to read kflash output")
}

/// Forward `reader` to `sink` split on `\r` and `\n`; returns the last
/// non-empty line.
///
/// Progress bars redraw with bare carriage returns, so both count as
/// terminators.
async fn pump_lines<R: AsyncRead + Unpin>(
    mut reader: R,
    sink: &LineSink,
) -> std::io::Result<Option<String>> {
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut last = None;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        for &b in &chunk[..n] {
            if b == b'\r' || b == b'\n' {
                if let Some(line) = take_line(&mut pending) {
                    sink.emit(&line).await;
                    last = Some(line);
                }
            } else {
                pending.push(b);
            }
        }
    }

    if let Some(line) = take_line(&mut pending) {
        sink.emit(&line).await;
        last = Some(line);
    }

    Ok(last)
}

fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    if pending.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    if line.trim().is_empty() { None } else { Some(line) }
}
