//! Bounded pool of per-leaf units.
//!
//! A semaphore caps how many leaf units are outstanding at once; units run on
//! a `JoinSet` so the orchestrator can wait for full settlement before
//! reporting the run complete. Errors and panics are absorbed at the unit
//! boundary and only counted.

use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitSettlement {
    Completed,
    Failed,
    Panicked,
}

pub(crate) struct UnitPool {
    permits: Arc<Semaphore>,
    units: JoinSet<UnitSettlement>,
    telemetry: Arc<Telemetry>,
    max_in_flight: usize,
}

impl UnitPool {
    pub(crate) fn new(max_in_flight: usize, telemetry: Arc<Telemetry>) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            units: JoinSet::new(),
            telemetry,
            max_in_flight,
        }
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Waits for a free slot. Returns `None` when `cancel` fires first.
    pub(crate) async fn reserve(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.permits.clone().acquire_owned() => permit.ok(),
        }
    }

    /// Runs `unit` for `leaf_index`, holding `permit` until it settles.
    pub(crate) fn spawn<F>(&mut self, leaf_index: u64, permit: OwnedSemaphorePermit, unit: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.units.spawn(async move {
            let result = std::panic::AssertUnwindSafe(unit).catch_unwind().await;
            drop(permit);

            match result {
                Ok(Ok(())) => UnitSettlement::Completed,
                Ok(Err(err)) => {
                    tracing::error!(
                        leaf_index,
                        error = %format!("{err:#}"),
                        "leaf unit failed"
                    );
                    UnitSettlement::Failed
                }
                Err(panic_payload) => {
                    let panic_msg = panic_message(panic_payload.as_ref());
                    tracing::error!(
                        leaf_index,
                        panic = %panic_msg,
                        "leaf unit panicked"
                    );
                    UnitSettlement::Panicked
                }
            }
        });
    }

    /// Collects units that already settled without waiting.
    pub(crate) fn reap_finished(&mut self) {
        while let Some(joined) = self.units.try_join_next() {
            self.settle(joined);
        }
    }

    /// Waits until every spawned unit has settled.
    pub(crate) async fn drain(&mut self) {
        while let Some(joined) = self.units.join_next().await {
            self.settle(joined);
        }
    }

    fn settle(&self, joined: Result<UnitSettlement, JoinError>) {
        match joined {
            Ok(UnitSettlement::Completed) => {}
            Ok(UnitSettlement::Failed | UnitSettlement::Panicked) => {
                self.telemetry.record_failed_unit();
            }
            Err(err) => {
                tracing::error!(error = %err, "leaf unit task aborted");
                self.telemetry.record_failed_unit();
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
