use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::{CoordinatorConfig, DbKind};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the coordinator: wait for the worker nodes, then serve client sessions.
    Coordinator(CoordinatorArgs),
    /// Open an interactive session against a running coordinator.
    Shell(ShellArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CoordinatorArgs {
    /// Address interactive shells connect to.
    #[arg(long, default_value = "0.0.0.0:23456")]
    pub client_listen: SocketAddr,

    /// Address the job controller and worker nodes connect to.
    #[arg(long, default_value = "0.0.0.0:12345")]
    pub controller_listen: SocketAddr,

    /// Catalog snapshot file, created on first use.
    #[arg(long, default_value = "partitions.data")]
    pub catalog: PathBuf,

    /// Database engine running on the worker nodes.
    #[arg(long, value_enum, default_value_t = DbKind::Sqlite3)]
    pub db: DbKind,

    /// Memory per worker container, in MB.
    #[arg(long, default_value_t = 10)]
    pub container_memory: u64,

    /// Number of worker containers to request.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub num_containers: u32,

    /// Worker node names; repeat the flag or separate names with commas.
    #[arg(long = "node", value_delimiter = ',')]
    pub nodes: Vec<String>,

    /// Kill the worker job after this many seconds.
    #[arg(long, default_value_t = 600)]
    pub job_timeout_secs: u64,

    /// Directory holding the result gather scripts.
    #[arg(long, default_value = ".")]
    pub script_dir: PathBuf,

    /// Directory workers stage result blocks in.
    #[arg(long, default_value = "/tmp")]
    pub staging_dir: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long)]
    pub debug: bool,
}

impl From<CoordinatorArgs> for CoordinatorConfig {
    fn from(args: CoordinatorArgs) -> Self {
        Self {
            client_listen: args.client_listen,
            controller_listen: args.controller_listen,
            catalog_path: args.catalog,
            db: args.db,
            container_memory_mb: args.container_memory,
            num_containers: args.num_containers,
            nodes: args
                .nodes
                .into_iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
            job_timeout: Duration::from_secs(args.job_timeout_secs),
            script_dir: args.script_dir,
            staging_dir: args.staging_dir,
            debug: args.debug,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ShellArgs {
    /// Address of the coordinator's client port.
    #[arg(long, default_value = "127.0.0.1:23456")]
    pub server: SocketAddr,
}
