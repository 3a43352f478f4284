mod config;
mod nftables;
mod policy;
mod reconcile;
mod registry;

use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::nftables::engine::NftCli;
use crate::policy::classify::classify;
use crate::policy::plan::{default_policy, Planner};
use crate::reconcile::Reconciler;
use crate::registry::client::{node_meta_filter, RegistryClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("allowlist_syncd=info"))
        )
        .init();

    tracing::info!("Starting allowlist-syncd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/allowlist-sync/syncd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let client = RegistryClient::new(&config.registry)?;
    let planner = Planner::new(default_policy(), config.rules.style);
    let store = NftCli::new(config.rules.nft_program.clone());
    let reconciler = Reconciler::new(store, &config.rules, planner.set_roles());

    match config.sync.interval_secs {
        Some(secs) => {
            tracing::info!("Reconciling every {}s", secs);

            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        run_pass(&config, &client, &planner, &reconciler).await?;
                    }
                    result = &mut ctrl_c => {
                        result.context("Failed to listen for ctrl-c")?;
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }
        None => {
            run_pass(&config, &client, &planner, &reconciler).await?;
        }
    }

    Ok(())
}

/// One full reconciliation pass: fetch, classify, plan, reconcile.
async fn run_pass(
    config: &Config,
    client: &RegistryClient,
    planner: &Planner,
    reconciler: &Reconciler<NftCli>,
) -> Result<()> {
    // One catalog query per (environment, stage) combination, concatenated.
    let mut records = Vec::new();
    for env in &config.registry.environments {
        for stage in &config.registry.stages {
            let filter = node_meta_filter(env, stage);
            let fetched = client
                .fetch_service(&config.registry.service, &filter)
                .await
                .with_context(|| {
                    format!(
                        "Failed to fetch service '{}' ({})",
                        config.registry.service, filter
                    )
                })?;
            records.extend(fetched);
        }
    }

    tracing::info!("Fetched {} endpoint record(s)", records.len());

    let buckets = classify(&records);
    let rules = planner.plan(&buckets);
    let summary = reconciler.run(&buckets, &rules).await?;

    tracing::info!(
        "Firewall rules updated successfully ({} desired, {} applied, {} skipped)",
        summary.desired,
        summary.applied,
        summary.skipped
    );

    Ok(())
}
