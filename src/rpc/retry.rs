//! Shared retry context and canned message templates so every endpoint call
//! reports breaker state, retries, and exhaustion with the same fields.

use crate::rpc::circuit_breaker::CircuitState;
use anyhow::Error;
use std::time::Duration;

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(subject) = $ctx.subject {
            tracing::$level!(
                endpoint = $ctx.endpoint,
                subject = %subject,
                $($rest)*
            );
        } else {
            tracing::$level!(endpoint = $ctx.endpoint, $($rest)*);
        }
    }};
}

/// Log lines emitted for one kind of endpoint call.
#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) permit: &'static str,
    pub(crate) circuit_open: &'static str,
    pub(crate) timeout: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) rejected: &'static str,
}

/// Passed into `retry_with_breaker` so callers can attach the endpoint label
/// and the subject of the call (asset or tree id) to every log line.
#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    endpoint: &'a str,
    subject: Option<&'a (dyn std::fmt::Display + Sync)>,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(endpoint: &'a str, messages: &'a RetryMessages) -> Self {
        Self {
            endpoint,
            subject: None,
            messages,
        }
    }

    pub(crate) fn with_subject(mut self, subject: &'a (dyn std::fmt::Display + Sync)) -> Self {
        self.subject = Some(subject);
        self
    }

    pub(crate) fn log_permit(&self, state: CircuitState) {
        log_with_retry_ctx!(trace, self, breaker_state = ?state, "{}", self.messages.permit);
    }

    pub(crate) fn log_circuit_open(&self) {
        log_with_retry_ctx!(debug, self, "{}", self.messages.circuit_open);
    }

    pub(crate) fn log_timeout(&self, attempt: usize, backoff: Duration) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            "{}",
            self.messages.timeout
        );
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &Error) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            error = %err,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &Error) {
        log_with_retry_ctx!(warn, self, attempt, error = %err, "{}", self.messages.exhausted);
    }

    pub(crate) fn log_rejected(&self, attempt: usize, err: &Error) {
        log_with_retry_ctx!(debug, self, attempt, error = %err, "{}", self.messages.rejected);
    }
}

fn duration_to_millis(backoff: Duration) -> u64 {
    backoff.as_millis().min(u128::from(u64::MAX)) as u64
}

pub(crate) const GET_ASSET_PROOF_RETRY: RetryMessages = RetryMessages {
    permit: "circuit breaker permit acquired for getAssetProof",
    circuit_open: "endpoint circuit breaker open; skipping getAssetProof",
    timeout: "getAssetProof timed out; will retry",
    retry: "getAssetProof failed; retrying",
    exhausted: "getAssetProof exhausted retries",
    rejected: "getAssetProof rejected by endpoint",
};

pub(crate) const GET_ACCOUNT_INFO_RETRY: RetryMessages = RetryMessages {
    permit: "circuit breaker permit acquired for getAccountInfo",
    circuit_open: "endpoint circuit breaker open; rejecting getAccountInfo",
    timeout: "getAccountInfo timed out; will retry",
    retry: "getAccountInfo failed; retrying",
    exhausted: "getAccountInfo exhausted retries",
    rejected: "getAccountInfo rejected by endpoint",
};
