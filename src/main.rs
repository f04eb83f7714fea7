use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use proofaudit::{
    build_clients, AuditConfig, AuditOrchestrator, AuditSummary, DasRpcClient, Endpoint,
    EndpointConfig, LimiterScope, ProgressState, Runner, TreeReference, DEFAULT_MAX_IN_FLIGHT,
    DEFAULT_OUTPUT_DIR, DEFAULT_RATE_PER_SECOND,
};
use tokio::task::JoinHandle;
use tokio::time::sleep;

const PROGRESS_REFRESH: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    proofaudit::init_tracing();

    let args = AuditArgs::from_env()?;
    let config = args.to_audit_config()?;
    let clients = build_clients(&config)?;
    let tree = resolve_tree(&config, &clients[0]).await?;

    let endpoints = clients.iter().cloned().map(Endpoint::from).collect();
    let orchestrator = AuditOrchestrator::with_endpoints(&config, tree, endpoints)?;
    let range = orchestrator.leaf_range();

    let bar = build_progress_bar(range.end - range.start)?;
    bar.println(format!(
        "Auditing leaves {}..{} of tree {} ({} leaves) against {} endpoint(s)",
        range.start,
        range.end,
        tree.tree_id,
        tree.num_leaves,
        clients.len()
    ));

    let runner = Runner::new(orchestrator);
    let render_handle = spawn_progress_render(runner.progress(), bar.clone());
    let run_result = runner.run_until_ctrl_c().await;
    render_handle.abort();

    let summary = match run_result {
        Ok(summary) => summary,
        Err(err) => {
            bar.abandon_with_message("audit aborted");
            return Err(err);
        }
    };

    bar.set_position(summary.completed_leaves);
    if summary.cancelled {
        bar.abandon_with_message("stopped by Ctrl-C");
    } else {
        bar.finish_with_message("done");
    }
    print_summary(&bar, &summary, &clients, &config);

    Ok(())
}

async fn resolve_tree(config: &AuditConfig, canonical: &DasRpcClient) -> Result<TreeReference> {
    if let Some(num_leaves) = config.num_leaves() {
        return Ok(TreeReference::new(*config.tree_id(), num_leaves));
    }
    canonical
        .get_tree_reference(config.tree_id())
        .await
        .with_context(|| {
            format!(
                "failed to resolve tree metadata from canonical endpoint {}",
                canonical.label()
            )
        })
}

fn build_progress_bar(total: u64) -> Result<ProgressBar> {
    let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stdout_with_hz(12));
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} leaves ({per_sec:.2} leaf/s) ETA {eta_precise} {msg}",
    )
    .context("invalid progress bar template")?
    .progress_chars("=>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    Ok(bar)
}

fn spawn_progress_render(progress: Arc<ProgressState>, bar: ProgressBar) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = progress.snapshot();
            bar.set_position(snapshot.completed_leaves);
            let message = snapshot
                .endpoints
                .iter()
                .map(|endpoint| {
                    format!(
                        "{} {}/{}",
                        endpoint.label, endpoint.valid_count, endpoint.checked_count
                    )
                })
                .collect::<Vec<_>>()
                .join(" | ");
            bar.set_message(message);
            sleep(PROGRESS_REFRESH).await;
        }
    })
}

fn print_summary(
    bar: &ProgressBar,
    summary: &AuditSummary,
    clients: &[Arc<DasRpcClient>],
    config: &AuditConfig,
) {
    bar.println(format!(
        "Completed {}/{} leaves in {:.2}s: {} mismatch artifact(s) in {}, {} failed unit(s)",
        summary.completed_leaves,
        summary.progress.total_leaves,
        summary.progress.elapsed_seconds,
        summary.mismatches_written,
        config.output_dir().display(),
        summary.failed_units,
    ));

    for endpoint in &summary.progress.endpoints {
        let ratio = if endpoint.checked_count == 0 {
            0.0
        } else {
            endpoint.valid_count as f64 * 100.0 / endpoint.checked_count as f64
        };
        bar.println(format!(
            "  {:<16} valid {}/{} checked ({ratio:.2}%)",
            endpoint.label, endpoint.valid_count, endpoint.checked_count
        ));
    }

    for client in clients {
        let metrics = client.metrics();
        bar.println(format!(
            "  {:<16} {} requests, {} errors ({} timeouts), {} rejected, avg {:.1} ms, max {:.1} ms, breaker {:?}",
            client.label(),
            metrics.total_requests,
            metrics.total_errors,
            metrics.total_timeouts,
            metrics.total_rejections,
            metrics.average_latency_ms,
            metrics.max_latency_ms,
            metrics.breaker_state,
        ));
    }
}

struct AuditArgs {
    tree: String,
    endpoints: Vec<EndpointConfig>,
    rate_per_second: f64,
    limiter_scope: LimiterScope,
    max_in_flight: usize,
    output_dir: String,
    start_leaf: u64,
    end_leaf: Option<u64>,
    num_leaves: Option<u64>,
}

impl AuditArgs {
    fn from_env() -> Result<Self> {
        let tree = read_required_env("PROOFAUDIT_TREE")?;
        let endpoints = EndpointConfig::parse_list(&read_required_env("PROOFAUDIT_ENDPOINTS")?)
            .context("failed to parse PROOFAUDIT_ENDPOINTS")?;
        let rate_per_second =
            parse_env_with_default::<f64>("PROOFAUDIT_RATE", DEFAULT_RATE_PER_SECOND)?;
        let limiter_scope = match env::var("PROOFAUDIT_SCOPE") {
            Ok(value) if !value.trim().is_empty() => value
                .parse::<LimiterScope>()
                .context("failed to parse PROOFAUDIT_SCOPE")?,
            _ => LimiterScope::default(),
        };
        let max_in_flight =
            parse_env_with_default::<usize>("PROOFAUDIT_MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT)?;
        let output_dir = read_env_or_default("PROOFAUDIT_OUTPUT_DIR", DEFAULT_OUTPUT_DIR);
        let start_leaf = parse_env_with_default::<u64>("PROOFAUDIT_START_LEAF", 0)?;
        let end_leaf = parse_optional_env::<u64>("PROOFAUDIT_END_LEAF")?;
        let num_leaves = parse_optional_env::<u64>("PROOFAUDIT_NUM_LEAVES")?;

        Ok(Self {
            tree,
            endpoints,
            rate_per_second,
            limiter_scope,
            max_in_flight,
            output_dir,
            start_leaf,
            end_leaf,
            num_leaves,
        })
    }

    fn to_audit_config(&self) -> Result<AuditConfig> {
        let mut builder = AuditConfig::builder()
            .tree_id(self.tree.clone())
            .endpoints(self.endpoints.iter().cloned())
            .rate_per_second(self.rate_per_second)
            .limiter_scope(self.limiter_scope)
            .max_in_flight(self.max_in_flight)
            .output_dir(self.output_dir.clone())
            .start_leaf(self.start_leaf);
        if let Some(end_leaf) = self.end_leaf {
            builder = builder.end_leaf(end_leaf);
        }
        if let Some(num_leaves) = self.num_leaves {
            builder = builder.num_leaves(num_leaves);
        }
        builder.build()
    }
}

fn read_required_env(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) | Err(env::VarError::NotPresent) => anyhow::bail!("{key} must be set"),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}

fn read_env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_optional_env(key)?.unwrap_or(default))
}

fn parse_optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}
