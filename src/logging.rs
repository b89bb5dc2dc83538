//! Logging and tracing initialization for kflashd.
//!
//! Pretty console output by default, JSON lines with `--json-logs`. Flasher
//! output is mirrored under the `kflashd::flasher` target so it can be
//! filtered on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// Output logs as JSON
    pub json: bool,
    /// Default level DEBUG instead of INFO
    pub verbose: bool,
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the `verbose` flag. Calling this twice
/// is a no-op for the second call.
pub fn init(config: LogConfig) {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("kflashd={}", default_level.as_str().to_lowercase()))
    });

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

/// Lets one progress line through per interval.
///
/// Download progress would otherwise log once per chunk.
pub struct LogThrottle {
    interval_ms: u64,
    origin: Instant,
    /// Milliseconds since `origin` before which nothing is logged.
    next_ms: AtomicU64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            origin: Instant::now(),
            next_ms: AtomicU64::new(0),
        }
    }

    pub fn should_log(&self) -> bool {
        let now_ms = self.origin.elapsed().as_millis() as u64;
        let next = self.next_ms.load(Ordering::Relaxed);
        // Losing the exchange means a concurrent caller took this slot.
        now_ms >= next
            && self
                .next_ms
                .compare_exchange(
                    next,
                    now_ms.saturating_add(self.interval_ms),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
    }
}
