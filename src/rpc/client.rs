//! DAS JSON-RPC client and the `ProofFetcher` seam consumed by the
//! orchestrator. Houses `DasRpcClient`, its error type, and the retry loop that
//! wraps every endpoint call with breaker gating, metrics, and backoff.

use crate::proof::{derive_asset_id, Address, AssetId, FetchOutcome, ProofBundle};
use crate::rpc::circuit_breaker::{CircuitBreakerError, RpcCircuitBreaker};
use crate::rpc::metrics::{Attempt, RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::payload::{AccountInfoResponse, AssetProofResponse};
use crate::rpc::retry::{RetryContext, GET_ACCOUNT_INFO_RETRY, GET_ASSET_PROOF_RETRY};
use crate::tree::{parse_tree_account, TreeReference};
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde_json::json;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{sleep, timeout, Instant};

const GET_ASSET_PROOF: &str = "getAssetProof";
const GET_ACCOUNT_INFO: &str = "getAccountInfo";

#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    CircuitOpen,
    Rejected {
        method: &'static str,
        code: i32,
        message: String,
    },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::CircuitOpen => write!(f, "endpoint circuit breaker is open"),
            RpcError::Rejected {
                method,
                code,
                message,
            } => write!(f, "rpc {method} rejected (code={code}, message={message})"),
        }
    }
}

impl std::error::Error for RpcError {}

/// Source of inclusion proofs for one endpoint.
///
/// `fetch` must never fail: every transport, protocol, or decoding problem is
/// reported as `FetchOutcome::Err`. Rate limiting is applied by the caller.
pub trait ProofFetcher: Send + Sync {
    fn fetch<'a>(&'a self, asset_id: &'a AssetId) -> BoxFuture<'a, FetchOutcome>;

    /// Asset id convention of this endpoint. Only the canonical endpoint's
    /// derivation is used; the result is reused for every other endpoint.
    fn derive_asset_id(&self, tree: &TreeReference, leaf_index: u64) -> Option<AssetId> {
        derive_asset_id(&tree.tree_id, leaf_index)
    }
}

#[derive(Debug, Clone)]
pub struct DasRpcClient {
    label: Arc<str>,
    url: Arc<str>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
    breaker: Arc<RpcCircuitBreaker>,
}

impl ProofFetcher for DasRpcClient {
    fn fetch<'a>(&'a self, asset_id: &'a AssetId) -> BoxFuture<'a, FetchOutcome> {
        Box::pin(async move { FetchOutcome::from(self.get_asset_proof(asset_id).await) })
    }
}

impl DasRpcClient {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        Self::with_options(label, url, RpcClientOptions::default())
    }

    pub fn with_options(
        label: impl Into<String>,
        url: impl Into<String>,
        options: RpcClientOptions,
    ) -> Result<Self> {
        let label = label.into();
        let breaker = Arc::new(RpcCircuitBreaker::labelled(&label));
        Self::with_options_and_breaker(label, url, options, breaker)
    }

    pub fn with_options_and_breaker(
        label: impl Into<String>,
        url: impl Into<String>,
        options: RpcClientOptions,
        breaker: Arc<RpcCircuitBreaker>,
    ) -> Result<Self> {
        options.validate()?;

        let label = label.into();
        let url = url.into();
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_response_size(max_response_body_size)
            .build(&url)
            .map_err(|err| anyhow!("failed to build RPC client for endpoint {label}: {err}"))?;

        Ok(Self {
            label: Arc::from(label),
            url: Arc::from(url),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
            breaker,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    /// Fetches and decodes the inclusion proof for `asset_id`.
    pub async fn get_asset_proof(&self, asset_id: &AssetId) -> Result<ProofBundle> {
        let context = RetryContext::new(&self.label, &GET_ASSET_PROOF_RETRY).with_subject(asset_id);
        let response = self
            .retry_with_breaker(context, || async {
                let mut params = ObjectParams::new();
                params
                    .insert("id", asset_id.to_string())
                    .context("failed to serialize getAssetProof params")?;
                self.call::<AssetProofResponse, _>(GET_ASSET_PROOF, params)
                    .await
            })
            .await?;

        response
            .into_bundle()
            .with_context(|| format!("malformed getAssetProof response for {asset_id}"))
    }

    /// Resolves the tree's leaf count from its on-chain account.
    pub async fn get_tree_reference(&self, tree_id: &Address) -> Result<TreeReference> {
        let context =
            RetryContext::new(&self.label, &GET_ACCOUNT_INFO_RETRY).with_subject(tree_id);
        let response = self
            .retry_with_breaker(context, || async {
                self.call::<AccountInfoResponse, _>(
                    GET_ACCOUNT_INFO,
                    rpc_params![tree_id.to_string(), json!({ "encoding": "base64" })],
                )
                .await
            })
            .await?;

        let data = response
            .decode_data()
            .with_context(|| format!("failed to read tree account {tree_id}"))?;
        let header = parse_tree_account(&data)
            .with_context(|| format!("failed to parse tree account {tree_id}"))?;

        tracing::info!(
            endpoint = %self.label,
            tree = %tree_id,
            max_depth = header.max_depth,
            max_buffer_size = header.max_buffer_size,
            num_leaves = header.num_leaves,
            "resolved tree metadata"
        );

        Ok(TreeReference::new(*tree_id, header.num_leaves))
    }

    async fn call<R, P>(&self, method: &'static str, params: P) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
        P: jsonrpsee::core::traits::ToRpcParams + Send,
    {
        timeout(
            self.options.request_timeout,
            self.client.request::<R, P>(method, params),
        )
        .await
        .map_err(|_| RpcError::Timeout { method })?
        .map_err(|err| map_rpc_error(method, err))
    }

    /// Shared retry/backoff loop: breaker gating, metrics, exponential backoff,
    /// and consistent logging. Endpoint rejections are returned immediately.
    async fn retry_with_breaker<T, F, Fut>(
        &self,
        context: RetryContext<'_>,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match self.breaker.before_request() {
                Ok(state) => context.log_permit(state),
                Err(CircuitBreakerError::CircuitOpen) => {
                    context.log_circuit_open();
                    return Err(RpcError::CircuitOpen.into());
                }
            }

            attempt += 1;
            let start = Instant::now();

            let err = match operation().await {
                Ok(value) => {
                    self.metrics.record(Attempt::Answered, start.elapsed());
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(err) => err,
            };

            let elapsed = start.elapsed();
            match err.downcast_ref::<RpcError>() {
                Some(RpcError::Rejected { .. }) => {
                    // The endpoint answered; it is healthy even if it has no proof.
                    self.metrics.record(Attempt::Rejected, elapsed);
                    self.breaker.record_success();
                    context.log_rejected(attempt, &err);
                    return Err(err);
                }
                Some(RpcError::Timeout { .. }) => {
                    self.metrics.record(Attempt::Timeout, elapsed);
                    self.breaker.record_failure();
                    if attempt < self.options.max_attempts {
                        context.log_timeout(attempt, self.backoff_delay(attempt));
                    }
                }
                _ => {
                    self.metrics.record(Attempt::Failed, elapsed);
                    self.breaker.record_failure();
                }
            }

            if attempt >= self.options.max_attempts {
                context.log_exhausted(attempt, &err);
                return Err(err);
            }

            let backoff = self.backoff_delay(attempt);
            context.log_retry(attempt, backoff, &err);
            sleep(backoff).await;
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        if attempt <= 1 {
            return self.options.initial_backoff;
        }

        let exponent = attempt.saturating_sub(1) as u32;
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.options
            .initial_backoff
            .saturating_mul(multiplier)
            .min(self.options.max_backoff)
    }
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    match err {
        JsonRpcError::Call(object) => RpcError::Rejected {
            method,
            code: object.code(),
            message: object.message().to_owned(),
        }
        .into(),
        JsonRpcError::RequestTimeout => RpcError::Timeout { method }.into(),
        other => anyhow!("rpc {method} call failed: {other}"),
    }
}
