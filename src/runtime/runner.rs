use crate::processor::orchestrator::{AuditOrchestrator, AuditSummary};
use crate::runtime::progress::ProgressState;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Runs an audit to completion and turns OS signals into a graceful stop.
pub struct Runner {
    orchestrator: AuditOrchestrator,
    shutdown: CancellationToken,
}

impl Runner {
    /// Creates a new runner with its own root [`CancellationToken`].
    pub fn new(orchestrator: AuditOrchestrator) -> Self {
        Self {
            orchestrator,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn progress(&self) -> Arc<ProgressState> {
        self.orchestrator.progress()
    }

    /// Runs the audit, stopping dispatch only when the root token is cancelled.
    pub async fn run(self) -> Result<AuditSummary> {
        self.orchestrator.run(self.shutdown).await
    }

    /// Runs the audit until it finishes or a Ctrl-C (SIGINT) arrives. After the
    /// signal no new leaves are dispatched; in-flight leaves still settle.
    pub async fn run_until_ctrl_c(self) -> Result<AuditSummary> {
        let shutdown = self.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => {
                            tracing::info!("Ctrl-C received; draining in-flight leaves");
                            shutdown.cancel();
                        }
                        Err(err) => tracing::warn!(error = %err, "failed to listen for Ctrl-C"),
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("runner shutdown token cancelled");
                }
            }
        });

        let summary = self.orchestrator.run(self.shutdown.clone()).await;
        signal_task.abort();
        summary
    }
}
