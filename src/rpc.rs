//! DAS JSON-RPC plumbing: the proof fetcher seam, circuit breaker, metrics,
//! retry policy, and wire payload decoding.

pub mod circuit_breaker;
pub mod client;
pub mod metrics;
pub mod options;
pub mod payload;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreakerError, CircuitBreakerSnapshot, CircuitState, RpcCircuitBreaker,
};
pub use client::{DasRpcClient, ProofFetcher, RpcError};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
