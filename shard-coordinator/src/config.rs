use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::partition::NodeId;

/// Database engine the worker nodes run; decides how result blocks are gathered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbKind {
    #[default]
    Sqlite3,
    Quickstep,
}

impl DbKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DbKind::Sqlite3 => "sqlite3",
            DbKind::Quickstep => "quickstep",
        }
    }
}

impl std::fmt::Display for DbKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the coordinator process needs, independent of how it was parsed.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub client_listen: SocketAddr,
    pub controller_listen: SocketAddr,
    pub catalog_path: PathBuf,
    pub db: DbKind,
    pub container_memory_mb: u64,
    pub num_containers: u32,
    pub nodes: Vec<NodeId>,
    pub job_timeout: Duration,
    pub script_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub debug: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            client_listen: SocketAddr::from(([0, 0, 0, 0], 23456)),
            controller_listen: SocketAddr::from(([0, 0, 0, 0], 12345)),
            catalog_path: PathBuf::from("partitions.data"),
            db: DbKind::default(),
            container_memory_mb: 10,
            num_containers: 1,
            nodes: Vec::new(),
            job_timeout: Duration::from_secs(600),
            script_dir: PathBuf::from("."),
            staging_dir: PathBuf::from("/tmp"),
            debug: false,
        }
    }
}
