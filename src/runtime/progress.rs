use crate::proof::VerificationOutcome;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy)]
struct EndpointCounts {
    valid: u64,
    checked: u64,
}

/// Run-wide progress counters shared by every in-flight leaf unit.
///
/// Per-endpoint counts live behind one mutex so `valid <= checked` holds in
/// every snapshot; leaf completion is a plain atomic.
#[derive(Debug)]
pub struct ProgressState {
    labels: Vec<String>,
    counts: Mutex<HashMap<String, EndpointCounts>>,
    completed_leaves: AtomicU64,
    total_leaves: u64,
    started_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointProgress {
    pub label: String,
    pub valid_count: u64,
    pub checked_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub endpoints: Vec<EndpointProgress>,
    pub completed_leaves: u64,
    pub total_leaves: u64,
    pub eta_seconds: Option<f64>,
    pub elapsed_seconds: f64,
}

impl ProgressSnapshot {
    pub fn endpoint(&self, label: &str) -> Option<&EndpointProgress> {
        self.endpoints.iter().find(|entry| entry.label == label)
    }
}

impl ProgressState {
    pub fn new<I, S>(labels: I, total_leaves: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        let counts = labels
            .iter()
            .map(|label| (label.clone(), EndpointCounts::default()))
            .collect();
        Self {
            labels,
            counts: Mutex::new(counts),
            completed_leaves: AtomicU64::new(0),
            total_leaves,
            started_at: Instant::now(),
        }
    }

    /// Counts a verification verdict for `label`. `Unknown` is not counted.
    pub fn record_outcome(&self, label: &str, outcome: VerificationOutcome) {
        if !outcome.is_checked() {
            return;
        }
        let mut counts = self.counts.lock().expect("progress mutex poisoned");
        let entry = counts.entry(label.to_owned()).or_default();
        entry.checked += 1;
        if outcome.is_valid() {
            entry.valid += 1;
        }
    }

    pub fn record_leaf_complete(&self) {
        self.completed_leaves.fetch_add(1, Ordering::SeqCst);
    }

    pub fn completed_leaves(&self) -> u64 {
        self.completed_leaves.load(Ordering::SeqCst)
    }

    pub fn total_leaves(&self) -> u64 {
        self.total_leaves
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// `(elapsed / completed) * remaining`; `None` until a leaf has completed.
    pub fn estimate_remaining_seconds(&self) -> Option<f64> {
        estimate_remaining(
            self.elapsed(),
            self.completed_leaves(),
            self.total_leaves,
        )
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.elapsed();
        let completed_leaves = self.completed_leaves();
        let counts = self.counts.lock().expect("progress mutex poisoned");
        let endpoints = self
            .labels
            .iter()
            .map(|label| {
                let entry = counts.get(label).copied().unwrap_or_default();
                EndpointProgress {
                    label: label.clone(),
                    valid_count: entry.valid,
                    checked_count: entry.checked,
                }
            })
            .collect();

        ProgressSnapshot {
            endpoints,
            completed_leaves,
            total_leaves: self.total_leaves,
            eta_seconds: estimate_remaining(elapsed, completed_leaves, self.total_leaves),
            elapsed_seconds: elapsed.as_secs_f64(),
        }
    }
}

fn estimate_remaining(elapsed: Duration, completed: u64, total: u64) -> Option<f64> {
    if completed == 0 {
        return None;
    }
    let per_leaf = elapsed.as_secs_f64() / completed as f64;
    Some(per_leaf * total.saturating_sub(completed) as f64)
}
