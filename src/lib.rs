pub mod processor;
pub mod proof;
pub mod rpc;
pub mod runtime;
pub mod tree;

pub use processor::orchestrator::{build_clients, AuditOrchestrator, AuditSummary, Endpoint};
pub use processor::recorder::{ComparisonRecord, LabelledResult, MismatchRecorder};
pub use proof::{
    derive_asset_id, hash_pair, verify, Address, AssetId, EndpointResult, FetchOutcome, Node,
    ProofBundle, VerificationOutcome,
};
pub use rpc::circuit_breaker::{CircuitBreakerSnapshot, CircuitState, RpcCircuitBreaker};
pub use rpc::{DasRpcClient, ProofFetcher, RpcClientOptions, RpcError, RpcMetricsSnapshot};
pub use runtime::config::{
    AuditConfig, AuditConfigBuilder, AuditConfigParams, EndpointConfig, LimiterScope,
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_OUTPUT_DIR, DEFAULT_RATE_PER_SECOND,
};
pub use runtime::limiter::{LimiterError, RateLimiter};
pub use runtime::progress::{EndpointProgress, ProgressSnapshot, ProgressState};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use tree::{TreeAccountError, TreeReference};
