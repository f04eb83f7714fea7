use crate::runtime::progress::ProgressState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Run-level counters that sit beside [`ProgressState`].
#[derive(Default, Debug)]
pub struct Telemetry {
    dispatched_leaves: AtomicU64,
    mismatches_written: AtomicU64,
    failed_units: AtomicU64,
    fetch_errors: AtomicU64,
}

impl Telemetry {
    pub fn record_dispatched_leaf(&self) {
        self.dispatched_leaves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mismatch_written(&self) {
        self.mismatches_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_unit(&self) {
        self.failed_units.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            dispatched_leaves: self.dispatched_leaves.load(Ordering::Relaxed),
            mismatches_written: self.mismatches_written.load(Ordering::Relaxed),
            failed_units: self.failed_units.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
        }
    }

    pub fn dispatched_leaves(&self) -> u64 {
        self.dispatched_leaves.load(Ordering::Relaxed)
    }

    pub fn mismatches_written(&self) -> u64 {
        self.mismatches_written.load(Ordering::Relaxed)
    }

    pub fn failed_units(&self) -> u64 {
        self.failed_units.load(Ordering::Relaxed)
    }

    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub dispatched_leaves: u64,
    pub mismatches_written: u64,
    pub failed_units: u64,
    pub fetch_errors: u64,
}

/// Spawns a background task that periodically logs leaf throughput, ETA, and
/// per-endpoint verification counts.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    progress: Arc<ProgressState>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_completed = progress.completed_leaves();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "proofaudit::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = progress.snapshot();
                    let counters = telemetry.snapshot();
                    let completed_delta = snapshot.completed_leaves.saturating_sub(last_completed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        completed_delta as f64 / elapsed
                    };
                    let eta = snapshot
                        .eta_seconds
                        .map(|secs| format!("{secs:.0}s"))
                        .unwrap_or_else(|| "unknown".to_string());

                    tracing::info!(
                        target: "proofaudit::metrics",
                        throughput = format!("{throughput:.2}"),
                        completed = snapshot.completed_leaves,
                        total = snapshot.total_leaves,
                        dispatched = counters.dispatched_leaves,
                        eta = %eta,
                        mismatches = counters.mismatches_written,
                        failed_units = counters.failed_units,
                        fetch_errors = counters.fetch_errors,
                        "audit progress snapshot"
                    );
                    for endpoint in &snapshot.endpoints {
                        tracing::debug!(
                            target: "proofaudit::metrics",
                            endpoint = %endpoint.label,
                            valid = endpoint.valid_count,
                            checked = endpoint.checked_count,
                            "endpoint verification counts"
                        );
                    }

                    last_completed = snapshot.completed_leaves;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
