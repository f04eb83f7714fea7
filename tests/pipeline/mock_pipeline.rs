use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::support::{
    helpers::{init_tracing, read_artifacts},
    merkle::MockTree,
    scripted::{Fault, ScriptedFetcher},
};
use anyhow::Result;
use proofaudit::{
    Address, AuditConfig, AuditConfigBuilder, AuditOrchestrator, AuditSummary, Endpoint,
    EndpointConfig, FetchOutcome, LimiterScope, VerificationOutcome,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const TREE_SEED: [u8; 32] = [7u8; 32];

fn tree(num_leaves: u64) -> Arc<MockTree> {
    Arc::new(MockTree::new(Address::new(TREE_SEED), num_leaves))
}

fn config_builder(dir: &TempDir, labels: &[&str]) -> AuditConfigBuilder {
    let mut builder = AuditConfig::builder()
        .tree_id(Address::new(TREE_SEED).to_string())
        .rate_per_second(1_000.0)
        .metrics_interval(Duration::from_millis(50))
        .output_dir(dir.path().join("mismatches"));
    for label in labels {
        builder = builder.endpoint(*label, format!("http://{label}.invalid"));
    }
    builder
}

async fn run(
    config: &AuditConfig,
    tree: &Arc<MockTree>,
    fetchers: Vec<(&str, Arc<ScriptedFetcher>)>,
) -> Result<AuditSummary> {
    let endpoints = fetchers
        .into_iter()
        .map(|(label, fetcher)| Endpoint::new(label, fetcher))
        .collect();
    let orchestrator = AuditOrchestrator::with_endpoints(config, tree.reference(), endpoints)?;
    orchestrator.run(CancellationToken::new()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flipped_proof_bit_records_only_that_leaf() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = tree(3);
    let config = config_builder(&dir, &["a", "b"]).build()?;
    let a = Arc::new(ScriptedFetcher::new(tree.clone()));
    let b = Arc::new(ScriptedFetcher::new(tree.clone()).with_fault(1, Fault::FlipFirstProofBit));

    let summary = run(&config, &tree, vec![("a", a), ("b", b)]).await?;

    let artifacts = read_artifacts(config.output_dir())?;
    assert_eq!(artifacts.keys().copied().collect::<Vec<_>>(), vec![1]);
    let record = &artifacts[&1];
    assert_eq!(record.asset_id, tree.asset_id(1));
    assert_eq!(
        record.endpoints["a"].verification_outcome,
        VerificationOutcome::Valid
    );
    assert_eq!(
        record.endpoints["b"].verification_outcome,
        VerificationOutcome::Invalid
    );

    assert_eq!(summary.dispatched_leaves, 3);
    assert_eq!(summary.completed_leaves, 3);
    assert_eq!(summary.mismatches_written, 1);
    assert_eq!(summary.failed_units, 0);
    let a = summary.progress.endpoint("a").unwrap();
    assert_eq!((a.valid_count, a.checked_count), (3, 3));
    let b = summary.progress.endpoint("b").unwrap();
    assert_eq!((b.valid_count, b.checked_count), (2, 3));
    assert_eq!(summary.progress.eta_seconds, Some(0.0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_error_yields_unknown_and_a_record() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = tree(1);
    let config = config_builder(&dir, &["a", "b", "c"]).build()?;
    let a = Arc::new(ScriptedFetcher::new(tree.clone()));
    let b = Arc::new(
        ScriptedFetcher::new(tree.clone()).with_fault(0, Fault::Error("503 upstream".into())),
    );
    let c = Arc::new(ScriptedFetcher::new(tree.clone()));

    let summary = run(&config, &tree, vec![("a", a), ("b", b), ("c", c)]).await?;

    let artifacts = read_artifacts(config.output_dir())?;
    assert_eq!(artifacts.len(), 1);
    let record = &artifacts[&0];
    assert!(!record.all_valid());
    assert!(record
        .endpoints
        .values()
        .all(|result| result.verification_outcome != VerificationOutcome::Invalid));
    assert_eq!(
        record.endpoints["b"].verification_outcome,
        VerificationOutcome::Unknown
    );
    assert_eq!(
        record.endpoints["b"].fetch_outcome,
        FetchOutcome::err("503 upstream")
    );

    let b = summary.progress.endpoint("b").unwrap();
    assert_eq!((b.valid_count, b.checked_count), (0, 0));
    let a = summary.progress.endpoint("a").unwrap();
    assert_eq!((a.valid_count, a.checked_count), (1, 1));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn agreeing_endpoints_are_idempotent_across_runs() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = tree(16);
    let config = config_builder(&dir, &["a", "b"]).build()?;

    for _ in 0..2 {
        let a = Arc::new(ScriptedFetcher::new(tree.clone()));
        let b = Arc::new(ScriptedFetcher::new(tree.clone()));
        let summary = run(&config, &tree, vec![("a", a), ("b", b)]).await?;
        assert_eq!(summary.completed_leaves, 16);
        assert_eq!(summary.mismatches_written, 0);
        assert!(read_artifacts(config.output_dir())?.is_empty());
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rerun_overwrites_existing_record() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = tree(4);
    let config = config_builder(&dir, &["a", "b"]).build()?;

    let b = Arc::new(ScriptedFetcher::new(tree.clone()).with_fault(2, Fault::Error("down".into())));
    run(&config, &tree, vec![("a", Arc::new(ScriptedFetcher::new(tree.clone()))), ("b", b)]).await?;

    let b = Arc::new(ScriptedFetcher::new(tree.clone()).with_fault(2, Fault::FlipFirstProofBit));
    run(&config, &tree, vec![("a", Arc::new(ScriptedFetcher::new(tree.clone()))), ("b", b)]).await?;

    let artifacts = read_artifacts(config.output_dir())?;
    assert_eq!(artifacts.len(), 1);
    assert_eq!(
        artifacts[&2].endpoints["b"].verification_outcome,
        VerificationOutcome::Invalid
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn progress_counts_stay_ordered() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = tree(32);
    let config = config_builder(&dir, &["a", "b"]).build()?;
    let mut b = ScriptedFetcher::new(tree.clone());
    for leaf in (0..32).step_by(3) {
        b = b.with_fault(leaf, Fault::Error("flaky".into()));
    }
    for leaf in (1..32).step_by(3) {
        b = b.with_fault(leaf, Fault::FlipFirstProofBit);
    }

    let summary = run(
        &config,
        &tree,
        vec![("a", Arc::new(ScriptedFetcher::new(tree.clone()))), ("b", Arc::new(b))],
    )
    .await?;

    for endpoint in &summary.progress.endpoints {
        assert!(endpoint.valid_count <= endpoint.checked_count);
        assert!(endpoint.checked_count <= summary.completed_leaves);
    }
    let b = summary.progress.endpoint("b").unwrap();
    let errors = (0..32).step_by(3).count() as u64;
    assert_eq!(b.checked_count, 32 - errors);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_fetcher_is_recorded_as_unknown() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = tree(6);
    let config = config_builder(&dir, &["a", "b"]).build()?;
    let a = Arc::new(ScriptedFetcher::new(tree.clone()));
    let b = Arc::new(ScriptedFetcher::new(tree.clone()).with_fault(2, Fault::Panic));

    let summary = run(&config, &tree, vec![("a", a.clone()), ("b", b)]).await?;

    assert_eq!(summary.dispatched_leaves, 6);
    assert_eq!(summary.failed_units, 0);
    assert_eq!(summary.completed_leaves, 6);
    assert_eq!(summary.mismatches_written, 1);
    assert_eq!(a.calls(), 6);

    for endpoint in &summary.progress.endpoints {
        assert!(
            endpoint.checked_count <= summary.completed_leaves,
            "{} checked {} of {} completed leaves",
            endpoint.label,
            endpoint.checked_count,
            summary.completed_leaves
        );
    }
    assert_eq!(summary.progress.endpoint("a").unwrap().checked_count, 6);
    assert_eq!(summary.progress.endpoint("b").unwrap().checked_count, 5);

    let artifacts = read_artifacts(config.output_dir())?;
    assert_eq!(artifacts.keys().copied().collect::<Vec<_>>(), vec![2]);
    let record = &artifacts[&2];
    assert_eq!(
        record.endpoints["a"].verification_outcome,
        VerificationOutcome::Valid
    );
    let panicked = &record.endpoints["b"];
    assert_eq!(panicked.verification_outcome, VerificationOutcome::Unknown);
    match &panicked.fetch_outcome {
        FetchOutcome::Err(message) => assert!(
            message.contains("fetcher panicked") && message.contains("leaf 2"),
            "unexpected error message {message}"
        ),
        FetchOutcome::Ok(_) => panic!("panicked fetch must be recorded as an error"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn persistence_failure_is_absorbed_per_leaf() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let blocker = dir.path().join("occupied");
    std::fs::write(&blocker, b"not a directory")?;
    let tree = tree(5);
    let config = config_builder(&dir, &["a", "b"])
        .output_dir(&blocker)
        .build()?;
    let b = Arc::new(
        ScriptedFetcher::new(tree.clone())
            .with_fault(1, Fault::FlipFirstProofBit)
            .with_fault(3, Fault::FlipFirstProofBit),
    );

    let summary = run(
        &config,
        &tree,
        vec![("a", Arc::new(ScriptedFetcher::new(tree.clone()))), ("b", b.clone())],
    )
    .await?;

    assert_eq!(summary.dispatched_leaves, 5);
    assert_eq!(summary.completed_leaves, 5);
    assert_eq!(summary.failed_units, 2);
    assert_eq!(summary.mismatches_written, 0);
    assert_eq!(b.calls(), 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leaf_range_resumes_in_order() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = tree(8);
    let config = config_builder(&dir, &["a"])
        .start_leaf(2)
        .end_leaf(5)
        .max_in_flight(1)
        .build()?;
    let a = Arc::new(ScriptedFetcher::new(tree.clone()));

    let summary = run(&config, &tree, vec![("a", a.clone())]).await?;

    assert_eq!(a.fetched(), vec![2, 3, 4]);
    assert_eq!(summary.progress.total_leaves, 3);
    assert_eq!(summary.completed_leaves, 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_beyond_tree_is_a_setup_error() -> Result<()> {
    let dir = TempDir::new()?;
    let tree = tree(4);
    let config = config_builder(&dir, &["a"]).start_leaf(9).build()?;
    let endpoints = vec![Endpoint::new("a", Arc::new(ScriptedFetcher::new(tree.clone())))];

    let err = AuditOrchestrator::with_endpoints(&config, tree.reference(), endpoints)
        .err()
        .expect("start beyond the tree must be rejected");
    assert!(format!("{err}").contains("beyond"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatch_does_not_wait_for_slow_units() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = tree(4);
    let config = config_builder(&dir, &["a"]).max_in_flight(8).build()?;
    let mut a = ScriptedFetcher::new(tree.clone());
    for leaf in 0..4 {
        a = a.with_fault(leaf, Fault::Delay(Duration::from_millis(300)));
    }

    let start = Instant::now();
    let summary = run(&config, &tree, vec![("a", Arc::new(a))]).await?;
    let elapsed = start.elapsed();

    assert_eq!(summary.completed_leaves, 4);
    assert!(
        elapsed < Duration::from_millis(900),
        "leaf units should overlap, took {elapsed:?}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_endpoint_rate_override_paces_dispatch() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = tree(10);
    let config = config_builder(&dir, &["fast"])
        .endpoint_config(EndpointConfig::new("slow", "http://slow.invalid").with_rate(5.0))
        .build()?;

    let start = Instant::now();
    let summary = run(
        &config,
        &tree,
        vec![
            ("fast", Arc::new(ScriptedFetcher::new(tree.clone()))),
            ("slow", Arc::new(ScriptedFetcher::new(tree.clone()))),
        ],
    )
    .await?;
    let elapsed = start.elapsed();

    assert_eq!(summary.completed_leaves, 10);
    assert!(
        elapsed >= Duration::from_millis(900),
        "slow endpoint bucket should pace dispatch, took {elapsed:?}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_scope_paces_on_one_bucket() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let tree = tree(30);
    let config = config_builder(&dir, &["a", "b"])
        .rate_per_second(10.0)
        .limiter_scope(LimiterScope::Shared)
        .build()?;

    let start = Instant::now();
    let summary = run(
        &config,
        &tree,
        vec![
            ("a", Arc::new(ScriptedFetcher::new(tree.clone()))),
            ("b", Arc::new(ScriptedFetcher::new(tree.clone()))),
        ],
    )
    .await?;
    let elapsed = start.elapsed();

    assert_eq!(summary.completed_leaves, 30);
    assert!(
        elapsed >= Duration::from_millis(1_950),
        "30 leaves at 10/s with a burst of 10 should take ~2s, took {elapsed:?}"
    );
    Ok(())
}
