//! reaper - TTL reaper against an in-memory cluster fixture.
//!
//! `--once` runs a single pass per policy and prints the status board as JSON.
//! Without it the controller keeps running until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use reaper_core::app::ControllerBuilder;
use reaper_core::config::ReaperConfig;
use reaper_core::domain::ReaperPolicy;
use reaper_core::impls::InMemoryCluster;
use reaper_core::ports::{PolicyEvent, policy_feed};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Deletes finished cluster resources once their TTL has elapsed
#[derive(Parser, Debug)]
#[command(name = "reaper")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON fixture describing namespaces, kinds, policies and objects
    #[arg(short, long)]
    fixture: PathBuf,

    /// Run one pass per policy, print status and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Fixture {
    namespaces: Vec<String>,
    kinds: Vec<KindRef>,
    policies: Vec<ReaperPolicy>,
    objects: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KindRef {
    kind: String,
    api_version: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ReaperConfig::load(path)?,
        None => ReaperConfig::default(),
    };
    let raw = std::fs::read_to_string(&cli.fixture)
        .with_context(|| format!("failed to read fixture {}", cli.fixture.display()))?;
    let fixture: Fixture = serde_json::from_str(&raw).context("failed to parse fixture")?;

    let cluster = Arc::new(InMemoryCluster::with_resolver(config.resolver()));
    seed(&cluster, &config, &fixture).await?;

    let controller = ControllerBuilder::new(config)
        .client(cluster.clone())
        .build()
        .context("failed to build controller")?;

    if cli.once {
        for policy in &fixture.policies {
            controller.apply(PolicyEvent::Upserted(policy.clone())).await;
            match controller.reconcile_now(&policy.name).await {
                Some(Ok(report)) => info!(
                    policy = %report.policy,
                    processed = report.processed,
                    deleted = report.deleted,
                    scheduled = report.scheduled,
                    "pass finished"
                ),
                Some(Err(e)) => warn!(policy = %policy.name, error = %e, "pass failed"),
                None => {}
            }
        }
        println!("{}", serde_json::to_string_pretty(&controller.status().await)?);
        info!(
            pending_timers = controller.pending_timers().await,
            remaining_objects = cluster.object_count().await,
            "single pass complete"
        );
        return Ok(());
    }

    let (tx, feed) = policy_feed(fixture.policies.len().max(1));
    for policy in fixture.policies {
        tx.send(PolicyEvent::Upserted(policy))
            .await
            .context("policy feed closed")?;
    }

    info!("reaper running; press Ctrl+C to stop");
    controller
        .run(feed, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
            }
        })
        .await;
    drop(tx);
    info!("reaper stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn seed(cluster: &InMemoryCluster, config: &ReaperConfig, fixture: &Fixture) -> Result<()> {
    let resolver = config.resolver();
    for namespace in &fixture.namespaces {
        cluster.add_namespace(namespace.clone()).await;
    }
    for kind in &fixture.kinds {
        let locator = resolver
            .resolve(&kind.kind, &kind.api_version)
            .with_context(|| format!("invalid kind {} {}", kind.api_version, kind.kind))?;
        cluster.install(locator).await;
    }
    for (i, object) in fixture.objects.iter().enumerate() {
        cluster
            .put(object.clone())
            .await
            .with_context(|| format!("invalid fixture object #{i}"))?;
    }
    Ok(())
}
