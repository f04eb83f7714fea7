use crate::proof::Address;
use crate::rpc::options::{RpcClientOptions, DEFAULT_MAX_ATTEMPTS};
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RATE_PER_SECOND: f64 = 10.0;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_OUTPUT_DIR: &str = "mismatches";

/// Key reserved for the asset id in mismatch artifacts.
pub const RESERVED_LABEL: &str = "assetId";

/// How dispatch tokens are accounted across endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimiterScope {
    /// One bucket per endpoint; a leaf is dispatched once every endpoint has a token.
    #[default]
    PerEndpoint,
    /// One bucket for the whole run; a leaf consumes a single token.
    Shared,
}

impl FromStr for LimiterScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-endpoint" | "per_endpoint" | "endpoint" => Ok(LimiterScope::PerEndpoint),
            "shared" | "global" => Ok(LimiterScope::Shared),
            other => bail!("unknown limiter scope {other:?} (expected per-endpoint or shared)"),
        }
    }
}

/// One data source. The first endpoint of a config is canonical.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub label: String,
    pub url: String,
    pub rate_per_second: Option<f64>,
}

impl EndpointConfig {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into().trim().to_owned(),
            url: url.into().trim().to_owned(),
            rate_per_second: None,
        }
    }

    pub fn with_rate(mut self, rate_per_second: f64) -> Self {
        self.rate_per_second = Some(rate_per_second);
        self
    }

    /// Parses `label=url[@rate],label=url[@rate]`.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (label, rest) = entry
                    .split_once('=')
                    .with_context(|| format!("endpoint {entry:?} must look like label=url"))?;
                let (url, rate) = match rest.rsplit_once('@') {
                    Some((url, rate)) if !rate.contains('/') => {
                        let rate = rate
                            .trim()
                            .parse::<f64>()
                            .with_context(|| format!("invalid rate for endpoint {label}"))?;
                        (url, Some(rate))
                    }
                    _ => (rest, None),
                };
                let mut endpoint = EndpointConfig::new(label, url);
                endpoint.rate_per_second = rate;
                Ok(endpoint)
            })
            .collect()
    }
}

/// Validated runtime configuration for an audit run.
///
/// Construct through [`AuditConfig::builder`] or [`AuditConfig::new`] so every
/// invariant is checked before the run starts.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditConfig {
    tree_id: Address,
    endpoints: Vec<EndpointConfig>,
    num_leaves: Option<u64>,
    start_leaf: u64,
    end_leaf: Option<u64>,
    rate_per_second: f64,
    limiter_scope: LimiterScope,
    max_in_flight: usize,
    rpc_timeout: Duration,
    max_attempts: usize,
    metrics_interval: Duration,
    output_dir: PathBuf,
}

pub struct AuditConfigParams {
    pub tree_id: Address,
    pub endpoints: Vec<EndpointConfig>,
    pub num_leaves: Option<u64>,
    pub start_leaf: u64,
    pub end_leaf: Option<u64>,
    pub rate_per_second: f64,
    pub limiter_scope: LimiterScope,
    pub max_in_flight: usize,
    pub rpc_timeout: Duration,
    pub max_attempts: usize,
    pub metrics_interval: Duration,
    pub output_dir: PathBuf,
}

impl AuditConfig {
    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder::default()
    }

    pub fn new(params: AuditConfigParams) -> Result<Self> {
        let AuditConfigParams {
            tree_id,
            endpoints,
            num_leaves,
            start_leaf,
            end_leaf,
            rate_per_second,
            limiter_scope,
            max_in_flight,
            rpc_timeout,
            max_attempts,
            metrics_interval,
            output_dir,
        } = params;

        let config = Self {
            tree_id,
            endpoints,
            num_leaves,
            start_leaf,
            end_leaf,
            rate_per_second,
            limiter_scope,
            max_in_flight,
            rpc_timeout,
            max_attempts,
            metrics_interval,
            output_dir,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn tree_id(&self) -> &Address {
        &self.tree_id
    }

    /// Endpoints in priority order; index 0 is canonical.
    pub fn endpoints(&self) -> &[EndpointConfig] {
        &self.endpoints
    }

    /// Leaf count supplied up front; `None` means resolve it from the tree account.
    pub fn num_leaves(&self) -> Option<u64> {
        self.num_leaves
    }

    pub fn start_leaf(&self) -> u64 {
        self.start_leaf
    }

    /// Exclusive upper bound of the audited range, if any.
    pub fn end_leaf(&self) -> Option<u64> {
        self.end_leaf
    }

    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }

    pub fn limiter_scope(&self) -> LimiterScope {
        self.limiter_scope
    }

    /// Upper bound on concurrently outstanding leaf units.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Options used to build each endpoint's RPC client.
    pub fn rpc_client_options(&self) -> RpcClientOptions {
        RpcClientOptions {
            request_timeout: self.rpc_timeout,
            max_concurrent_requests: self.max_in_flight.max(1),
            max_attempts: self.max_attempts,
            ..RpcClientOptions::default()
        }
    }

    /// Resolves `[start, end)` for a tree with `num_leaves` leaves.
    pub fn leaf_range(&self, num_leaves: u64) -> Result<std::ops::Range<u64>> {
        if self.start_leaf > num_leaves {
            bail!(
                "start_leaf {} is beyond the tree's {} leaves",
                self.start_leaf,
                num_leaves
            );
        }
        let end = self.end_leaf.unwrap_or(num_leaves).min(num_leaves);
        Ok(self.start_leaf..end.max(self.start_leaf))
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            bail!("at least one endpoint is required");
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            ensure_not_empty(&endpoint.label, "endpoint label")?;
            if endpoint.label == RESERVED_LABEL {
                bail!("endpoint label {RESERVED_LABEL:?} is reserved");
            }
            if !seen.insert(endpoint.label.as_str()) {
                bail!("endpoint label {:?} is duplicated", endpoint.label);
            }
            validate_url(&endpoint.label, &endpoint.url)?;
            if let Some(rate) = endpoint.rate_per_second {
                ensure_positive_rate(rate, &format!("rate for endpoint {}", endpoint.label))?;
            }
        }

        ensure_positive_rate(self.rate_per_second, "rate_per_second")?;

        if self.limiter_scope == LimiterScope::Shared {
            if let Some(endpoint) = self
                .endpoints
                .iter()
                .find(|endpoint| endpoint.rate_per_second.is_some())
            {
                bail!(
                    "endpoint {} sets its own rate, which the shared limiter scope cannot honour",
                    endpoint.label
                );
            }
        }

        if let Some(end) = self.end_leaf {
            if end <= self.start_leaf {
                bail!("end_leaf must be greater than start_leaf");
            }
        }

        if let Some(num_leaves) = self.num_leaves {
            if self.start_leaf > num_leaves {
                bail!("start_leaf {} is beyond num_leaves {num_leaves}", self.start_leaf);
            }
        }

        if self.max_in_flight == 0 {
            bail!("max_in_flight must be greater than 0");
        }

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.output_dir.as_os_str().is_empty() {
            bail!("output_dir cannot be empty");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct AuditConfigBuilder {
    tree_id: Option<String>,
    endpoints: Vec<EndpointConfig>,
    num_leaves: Option<u64>,
    start_leaf: Option<u64>,
    end_leaf: Option<u64>,
    rate_per_second: Option<f64>,
    limiter_scope: Option<LimiterScope>,
    max_in_flight: Option<usize>,
    rpc_timeout: Option<Duration>,
    max_attempts: Option<usize>,
    metrics_interval: Option<Duration>,
    output_dir: Option<PathBuf>,
}

impl AuditConfigBuilder {
    pub fn tree_id(mut self, tree_id: impl Into<String>) -> Self {
        self.tree_id = Some(tree_id.into());
        self
    }

    pub fn endpoint(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.endpoints.push(EndpointConfig::new(label, url));
        self
    }

    pub fn endpoint_config(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn endpoints(mut self, endpoints: impl IntoIterator<Item = EndpointConfig>) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    pub fn num_leaves(mut self, num_leaves: u64) -> Self {
        self.num_leaves = Some(num_leaves);
        self
    }

    pub fn start_leaf(mut self, start_leaf: u64) -> Self {
        self.start_leaf = Some(start_leaf);
        self
    }

    pub fn end_leaf(mut self, end_leaf: u64) -> Self {
        self.end_leaf = Some(end_leaf);
        self
    }

    pub fn rate_per_second(mut self, rate: f64) -> Self {
        self.rate_per_second = Some(rate);
        self
    }

    pub fn limiter_scope(mut self, scope: LimiterScope) -> Self {
        self.limiter_scope = Some(scope);
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<AuditConfig> {
        let raw_tree = self.tree_id.context("tree_id is required")?;
        let tree_id = raw_tree
            .trim()
            .parse::<Address>()
            .with_context(|| format!("tree_id {raw_tree:?} is not a valid address"))?;

        let params = AuditConfigParams {
            tree_id,
            endpoints: self.endpoints,
            num_leaves: self.num_leaves,
            start_leaf: self.start_leaf.unwrap_or(0),
            end_leaf: self.end_leaf,
            rate_per_second: self.rate_per_second.unwrap_or(DEFAULT_RATE_PER_SECOND),
            limiter_scope: self.limiter_scope.unwrap_or_default(),
            max_in_flight: self.max_in_flight.unwrap_or(DEFAULT_MAX_IN_FLIGHT),
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            output_dir: self
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        };

        AuditConfig::new(params)
    }
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn ensure_positive_rate(rate: f64, field: &str) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        bail!("{field} must be a positive number");
    }
    Ok(())
}

fn validate_url(label: &str, url: &str) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("url for endpoint {label} must start with http:// or https://");
    }
    Ok(())
}
