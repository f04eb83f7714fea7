//! Request accounting for one DAS endpoint.
//!
//! Every attempt lands in exactly one [`Attempt`] bucket. Rejections (the
//! endpoint answered with a JSON-RPC error such as "Asset Proof Not Found")
//! are tracked apart from transport errors since they say nothing about the
//! endpoint's health.

use crate::rpc::circuit_breaker::CircuitState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attempt {
    Answered,
    Rejected,
    Timeout,
    Failed,
}

#[derive(Debug, Default)]
pub(crate) struct RpcMetrics {
    answered: AtomicU64,
    rejected: AtomicU64,
    timeouts: AtomicU64,
    failed: AtomicU64,
    latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
}

impl RpcMetrics {
    pub(crate) fn record(&self, attempt: Attempt, latency: Duration) {
        let counter = match attempt {
            Attempt::Answered => &self.answered,
            Attempt::Rejected => &self.rejected,
            Attempt::Timeout => &self.timeouts,
            Attempt::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_ns.fetch_add(nanos, Ordering::Relaxed);
        self.max_latency_ns.fetch_max(nanos, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, breaker_state: CircuitState) -> RpcMetricsSnapshot {
        let answered = self.answered.load(Ordering::Relaxed);
        let total_rejections = self.rejected.load(Ordering::Relaxed);
        let total_timeouts = self.timeouts.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);

        let total_requests = answered + total_rejections + total_timeouts + failed;
        let average_latency_ms = match total_requests {
            0 => 0.0,
            n => self.latency_ns.load(Ordering::Relaxed) as f64 / n as f64 / 1_000_000.0,
        };

        RpcMetricsSnapshot {
            total_requests,
            total_errors: total_timeouts + failed,
            total_timeouts,
            total_rejections,
            average_latency_ms,
            max_latency_ms: self.max_latency_ns.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            breaker_state,
        }
    }
}

/// Point-in-time view of an endpoint's request counters. Timeouts are
/// included in `total_errors`; rejections are not.
#[derive(Debug, Copy, Clone)]
pub struct RpcMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
    pub total_rejections: u64,
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
    pub breaker_state: CircuitState,
}

impl RpcMetricsSnapshot {
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_requests as f64
        }
    }
}
