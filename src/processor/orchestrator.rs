use crate::processor::recorder::{LabelledResult, MismatchRecorder};
use crate::processor::worker_pool::{panic_message, UnitPool};
use crate::proof::{verify, AssetId, EndpointResult, FetchOutcome};
use crate::rpc::{DasRpcClient, ProofFetcher};
use crate::runtime::config::{AuditConfig, LimiterScope};
use crate::runtime::limiter::{LimiterError, RateLimiter};
use crate::runtime::progress::{ProgressSnapshot, ProgressState};
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::tree::TreeReference;
use anyhow::{bail, Context, Result};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashSet;
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A labelled proof source taking part in the audit.
#[derive(Clone)]
pub struct Endpoint {
    label: String,
    fetcher: Arc<dyn ProofFetcher>,
}

impl Endpoint {
    pub fn new(label: impl Into<String>, fetcher: Arc<dyn ProofFetcher>) -> Self {
        Self {
            label: label.into(),
            fetcher,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl From<Arc<DasRpcClient>> for Endpoint {
    fn from(client: Arc<DasRpcClient>) -> Self {
        let label = client.label().to_owned();
        Endpoint::new(label, client)
    }
}

/// Builds one DAS client per configured endpoint, in configuration order.
pub fn build_clients(config: &AuditConfig) -> Result<Vec<Arc<DasRpcClient>>> {
    let options = config.rpc_client_options();
    config
        .endpoints()
        .iter()
        .map(|endpoint| {
            DasRpcClient::with_options(&endpoint.label, &endpoint.url, options.clone())
                .with_context(|| format!("failed to build client for endpoint {}", endpoint.label))
                .map(Arc::new)
        })
        .collect()
}

/// Outcome of a completed (or cancelled) audit run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub dispatched_leaves: u64,
    pub completed_leaves: u64,
    pub mismatches_written: u64,
    pub failed_units: u64,
    pub cancelled: bool,
    pub progress: ProgressSnapshot,
}

enum DispatchLimiter {
    PerEndpoint(Vec<Arc<RateLimiter>>),
    Shared(Arc<RateLimiter>),
}

impl DispatchLimiter {
    fn from_config(config: &AuditConfig, endpoints: &[Endpoint]) -> Self {
        match config.limiter_scope() {
            LimiterScope::Shared => {
                DispatchLimiter::Shared(Arc::new(RateLimiter::per_second(config.rate_per_second())))
            }
            LimiterScope::PerEndpoint => DispatchLimiter::PerEndpoint(
                endpoints
                    .iter()
                    .map(|endpoint| {
                        let rate = config
                            .endpoints()
                            .iter()
                            .find(|candidate| candidate.label == endpoint.label)
                            .and_then(|candidate| candidate.rate_per_second)
                            .unwrap_or_else(|| config.rate_per_second());
                        Arc::new(RateLimiter::per_second(rate))
                    })
                    .collect(),
            ),
        }
    }

    /// One token per leaf from every bucket in scope.
    async fn acquire(&self, cancel: &CancellationToken) -> Result<(), LimiterError> {
        match self {
            DispatchLimiter::Shared(limiter) => limiter.acquire(1, cancel).await,
            DispatchLimiter::PerEndpoint(limiters) => {
                for limiter in limiters {
                    limiter.acquire(1, cancel).await?;
                }
                Ok(())
            }
        }
    }
}

/// Drives the leaf loop: rate-limited dispatch of one fetch-and-verify unit
/// per leaf, bounded in-flight work, and a full drain before reporting.
pub struct AuditOrchestrator {
    tree: TreeReference,
    leaves: Range<u64>,
    endpoints: Arc<[Endpoint]>,
    limiter: DispatchLimiter,
    recorder: Arc<MismatchRecorder>,
    progress: Arc<ProgressState>,
    telemetry: Arc<Telemetry>,
    max_in_flight: usize,
    metrics_interval: std::time::Duration,
}

impl AuditOrchestrator {
    /// Wires an orchestrator over DAS clients built from `config`.
    pub fn from_config(config: &AuditConfig, tree: TreeReference) -> Result<Self> {
        let endpoints = build_clients(config)?
            .into_iter()
            .map(Endpoint::from)
            .collect();
        Self::with_endpoints(config, tree, endpoints)
    }

    /// Wires an orchestrator over caller-supplied endpoints. The first endpoint
    /// is canonical for asset id derivation.
    pub fn with_endpoints(
        config: &AuditConfig,
        tree: TreeReference,
        endpoints: Vec<Endpoint>,
    ) -> Result<Self> {
        if endpoints.is_empty() {
            bail!("at least one endpoint is required");
        }
        let mut labels = HashSet::new();
        for endpoint in &endpoints {
            if endpoint.label.trim().is_empty() {
                bail!("endpoint label cannot be empty");
            }
            if !labels.insert(endpoint.label.as_str()) {
                bail!("endpoint label {:?} is duplicated", endpoint.label);
            }
        }

        let leaves = config.leaf_range(tree.num_leaves)?;
        let total_leaves = leaves.end - leaves.start;
        let progress = Arc::new(ProgressState::new(
            endpoints.iter().map(|endpoint| endpoint.label.clone()),
            total_leaves,
        ));
        let limiter = DispatchLimiter::from_config(config, &endpoints);

        Ok(Self {
            tree,
            leaves,
            endpoints: endpoints.into(),
            limiter,
            recorder: Arc::new(MismatchRecorder::new(config.output_dir())),
            progress,
            telemetry: Arc::new(Telemetry::default()),
            max_in_flight: config.max_in_flight(),
            metrics_interval: config.metrics_interval(),
        })
    }

    pub fn tree(&self) -> &TreeReference {
        &self.tree
    }

    pub fn leaf_range(&self) -> Range<u64> {
        self.leaves.clone()
    }

    /// Live progress handle for display collaborators.
    pub fn progress(&self) -> Arc<ProgressState> {
        self.progress.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Dispatches every leaf in range, in order, then waits for all
    /// outstanding units to settle.
    ///
    /// Cancelling `shutdown` stops dispatch; units already dispatched still
    /// run to completion before this returns.
    pub async fn run(self, shutdown: CancellationToken) -> Result<AuditSummary> {
        let reporter_shutdown = CancellationToken::new();
        let reporter = spawn_metrics_reporter(
            self.telemetry.clone(),
            self.progress.clone(),
            reporter_shutdown.clone(),
            self.metrics_interval,
        );

        let mut pool = UnitPool::new(self.max_in_flight, self.telemetry.clone());
        tracing::info!(
            tree = %self.tree.tree_id,
            num_leaves = self.tree.num_leaves,
            start = self.leaves.start,
            end = self.leaves.end,
            endpoints = self.endpoints.len(),
            max_in_flight = pool.max_in_flight(),
            "starting proof audit"
        );

        let canonical = self.endpoints[0].fetcher.clone();
        let mut cancelled = false;

        for leaf_index in self.leaves.clone() {
            if self.limiter.acquire(&shutdown).await.is_err() {
                cancelled = true;
                break;
            }
            let Some(permit) = pool.reserve(&shutdown).await else {
                cancelled = true;
                break;
            };
            self.telemetry.record_dispatched_leaf();

            let Some(asset_id) = canonical.derive_asset_id(&self.tree, leaf_index) else {
                tracing::error!(leaf_index, "no asset id could be derived for leaf");
                self.telemetry.record_failed_unit();
                self.progress.record_leaf_complete();
                continue;
            };

            let unit = LeafUnit {
                leaf_index,
                asset_id,
                endpoints: self.endpoints.clone(),
                recorder: self.recorder.clone(),
                progress: self.progress.clone(),
                telemetry: self.telemetry.clone(),
            };
            pool.spawn(leaf_index, permit, unit.run());
            pool.reap_finished();
        }

        if cancelled {
            tracing::warn!(
                dispatched = self.telemetry.dispatched_leaves(),
                in_flight = pool.in_flight(),
                "dispatch cancelled; waiting for in-flight leaves"
            );
        }

        pool.drain().await;
        reporter_shutdown.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter task failed");
        }

        let counters = self.telemetry.snapshot();
        let summary = AuditSummary {
            dispatched_leaves: counters.dispatched_leaves,
            completed_leaves: self.progress.completed_leaves(),
            mismatches_written: counters.mismatches_written,
            failed_units: counters.failed_units,
            cancelled,
            progress: self.progress.snapshot(),
        };

        tracing::info!(
            dispatched = summary.dispatched_leaves,
            completed = summary.completed_leaves,
            mismatches = summary.mismatches_written,
            failed_units = summary.failed_units,
            cancelled = summary.cancelled,
            "proof audit finished"
        );

        Ok(summary)
    }
}

struct LeafUnit {
    leaf_index: u64,
    asset_id: AssetId,
    endpoints: Arc<[Endpoint]>,
    recorder: Arc<MismatchRecorder>,
    progress: Arc<ProgressState>,
    telemetry: Arc<Telemetry>,
}

impl LeafUnit {
    async fn run(self) -> Result<()> {
        let leaf_index = self.leaf_index;
        let asset_id = &self.asset_id;
        let progress = &self.progress;
        let telemetry = &self.telemetry;

        let results: Vec<LabelledResult> =
            join_all(self.endpoints.iter().map(|endpoint| async move {
                let fetch_outcome = AssertUnwindSafe(endpoint.fetcher.fetch(asset_id))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        FetchOutcome::Err(format!(
                            "fetcher panicked: {}",
                            panic_message(panic.as_ref())
                        ))
                    });
                if let FetchOutcome::Err(message) = &fetch_outcome {
                    telemetry.record_fetch_error();
                    tracing::debug!(
                        leaf_index,
                        endpoint = %endpoint.label,
                        asset_id = %asset_id,
                        error = %message,
                        "proof fetch failed"
                    );
                }
                let verification_outcome = verify(&fetch_outcome);
                progress.record_outcome(&endpoint.label, verification_outcome);
                (
                    endpoint.label.clone(),
                    EndpointResult {
                        fetch_outcome,
                        verification_outcome,
                    },
                )
            }))
            .await;

        let recorded = self
            .recorder
            .record(self.leaf_index, &self.asset_id, &results)
            .await;
        self.progress.record_leaf_complete();

        match recorded {
            Ok(Some(path)) => {
                self.telemetry.record_mismatch_written();
                tracing::info!(
                    leaf_index = self.leaf_index,
                    asset_id = %self.asset_id,
                    artifact = %path.display(),
                    "endpoints disagree; comparison recorded"
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => Err(err.context(format!(
                "failed to persist comparison for leaf {}",
                self.leaf_index
            ))),
        }
    }
}
