use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, wait_for_completed},
    merkle::MockTree,
    scripted::{Fault, ScriptedFetcher},
};
use anyhow::{Context, Result};
use proofaudit::{Address, AuditConfig, AuditOrchestrator, Endpoint, Runner};
use tempfile::TempDir;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_runner_drains_dispatched_leaves() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = Arc::new(MockTree::new(Address::new([7u8; 32]), 200));
    let config = AuditConfig::builder()
        .tree_id(tree.tree_id().to_string())
        .endpoint("a", "http://a.invalid")
        .rate_per_second(20.0)
        .output_dir(dir.path())
        .build()?;

    let mut fetcher = ScriptedFetcher::new(tree.clone());
    for leaf in 0..200 {
        fetcher = fetcher.with_fault(leaf, Fault::Delay(Duration::from_millis(50)));
    }
    let orchestrator = AuditOrchestrator::with_endpoints(
        &config,
        tree.reference(),
        vec![Endpoint::new("a", Arc::new(fetcher))],
    )?;

    let runner = Runner::new(orchestrator);
    let shutdown = runner.cancellation_token();
    let progress = runner.progress();
    let handle = tokio::spawn(runner.run_until_ctrl_c());

    wait_for_completed(&progress, 5, Duration::from_secs(5)).await?;
    shutdown.cancel();

    let summary = timeout(Duration::from_secs(5), handle)
        .await
        .context("runner should stop after cancellation")???;

    assert!(summary.cancelled);
    assert!(summary.dispatched_leaves < 200);
    assert_eq!(summary.completed_leaves, summary.dispatched_leaves);
    assert_eq!(summary.failed_units, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_completes_without_signal() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = Arc::new(MockTree::new(Address::new([7u8; 32]), 8));
    let config = AuditConfig::builder()
        .tree_id(tree.tree_id().to_string())
        .endpoint("a", "http://a.invalid")
        .endpoint("b", "http://b.invalid")
        .rate_per_second(500.0)
        .output_dir(dir.path())
        .build()?;

    let orchestrator = AuditOrchestrator::with_endpoints(
        &config,
        tree.reference(),
        vec![
            Endpoint::new("a", Arc::new(ScriptedFetcher::new(tree.clone()))),
            Endpoint::new("b", Arc::new(ScriptedFetcher::new(tree.clone()))),
        ],
    )?;

    let summary = timeout(Duration::from_secs(5), Runner::new(orchestrator).run_until_ctrl_c())
        .await
        .context("runner should finish on its own")??;

    assert!(!summary.cancelled);
    assert_eq!(summary.completed_leaves, 8);
    assert_eq!(summary.mismatches_written, 0);
    Ok(())
}
