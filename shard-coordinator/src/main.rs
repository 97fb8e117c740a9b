use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use shard_coordinator::{
    catalog::Catalog,
    cli::{Cli, Command},
    cluster::{JobSpec, ResourceManager, StaticCluster, watch_job},
    config::CoordinatorConfig,
    coordinator::Coordinator,
    materialize::ScriptMaterializer,
    session::Endpoint,
    shell,
};

const JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn init_tracing(debug: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Coordinator(args) => {
            let config = CoordinatorConfig::from(args);
            init_tracing(config.debug);
            run_coordinator(config).await?;
        }
        Command::Shell(args) => {
            init_tracing(false);
            shell::run(args).await?;
        }
    }

    Ok(())
}

async fn run_coordinator(config: CoordinatorConfig) -> Result<()> {
    let catalog = Catalog::open(&config.catalog_path)
        .with_context(|| format!("failed to open catalog {}", config.catalog_path.display()))?;

    let clients = Endpoint::bind("client", config.client_listen)
        .await
        .with_context(|| format!("failed to bind client port {}", config.client_listen))?;
    let controller = Endpoint::bind("controller", config.controller_listen)
        .await
        .with_context(|| format!("failed to bind controller port {}", config.controller_listen))?;

    let cluster = Arc::new(StaticCluster::new(config.nodes.clone()));
    let discovered = cluster.list_running_nodes().await?;
    let job = cluster
        .submit_job(JobSpec {
            name: "shard-coordinator".into(),
            db: config.db,
            container_memory_mb: config.container_memory_mb,
            num_containers: config.num_containers,
            nodes: discovered.clone(),
        })
        .await?;
    info!(%job, nodes = ?discovered, "worker job submitted");

    tokio::spawn(watch_job(
        Arc::clone(&cluster),
        job,
        config.job_timeout,
        JOB_POLL_INTERVAL,
    ));

    let materializer =
        ScriptMaterializer::new(config.script_dir.clone(), config.staging_dir.clone());
    let mut coordinator = Coordinator::new(
        clients,
        controller,
        catalog,
        config.db,
        materializer,
        Arc::clone(&cluster),
    )
    .with_job(job);

    if let Err(err) = coordinator.register(discovered.len()).await {
        error!(error = %err, "registration failed");
        coordinator.shutdown().await;
        return Err(err).context("registration barrier failed");
    }

    let result = coordinator
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await;
    if let Err(err) = &result {
        warn!("coordinator exited with error: {err:?}");
    }
    result
}
