//! Turning the result blocks of a SELECT into the text the client sees.
//!
//! Worker nodes do not send rows back over the controller channel. They stage
//! result blocks as files and answer `OUTPUT <block>`. Once every node has
//! answered, the coordinator hands the block identifiers to a [`Materializer`],
//! which merges them into the final answer and cleans up after itself.

use std::{
    future::Future,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::DbKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherRequest {
    pub db: DbKind,
    pub blocks: Vec<String>,
    /// `select <attrs>`
    pub select: String,
    pub table: String,
    /// `where <predicate>`, or empty.
    pub where_clause: String,
}

pub trait Materializer: Send + Sync {
    fn gather(&self, request: GatherRequest) -> impl Future<Output = Result<String>> + Send;
}

/// Runs the gather scripts shipped next to the coordinator.
///
/// - sqlite3: `bash gather_sqlite_results.sh <select> <table> <where> <files...>`
///   with one staged file per block
/// - quickstep: `python gather_qs.py <select> <table> <where> <blocks> <catalog>`
///   where each block identifier reads `<blk,blk,...> <catalog json>`
#[derive(Debug, Clone)]
pub struct ScriptMaterializer {
    script_dir: PathBuf,
    staging_dir: PathBuf,
}

/// A fully prepared script invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: &'static str,
    pub args: Vec<String>,
    /// Files to delete once the script has run.
    pub staged: Vec<PathBuf>,
}

impl ScriptMaterializer {
    pub fn new(script_dir: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
            staging_dir: staging_dir.into(),
        }
    }

    fn script(&self, name: &str) -> String {
        self.script_dir.join(name).to_string_lossy().into_owned()
    }

    fn staged(&self, block: &str) -> Result<PathBuf> {
        staged_path(&self.staging_dir, block)
    }

    pub fn invocation(&self, request: &GatherRequest) -> Result<Invocation> {
        let mut args = vec![
            String::new(),
            request.select.clone(),
            request.table.clone(),
            request.where_clause.clone(),
        ];

        match request.db {
            DbKind::Sqlite3 => {
                args[0] = self.script("gather_sqlite_results.sh");
                let staged = request
                    .blocks
                    .iter()
                    .map(|b| self.staged(b))
                    .collect::<Result<Vec<_>>>()?;
                args.extend(staged.iter().map(|p| p.to_string_lossy().into_owned()));
                Ok(Invocation {
                    program: "bash",
                    args,
                    staged,
                })
            }
            DbKind::Quickstep => {
                args[0] = self.script("gather_qs.py");
                let mut block_list: Vec<&str> = Vec::new();
                let mut catalog_json: Option<&str> = None;
                for block in &request.blocks {
                    let (blocks, json) = block
                        .split_once(' ')
                        .with_context(|| format!("quickstep block '{block}' has no catalog"))?;
                    block_list.extend(blocks.split(',').filter(|b| !b.is_empty()));
                    catalog_json.get_or_insert(json);
                }
                let Some(catalog_json) = catalog_json else {
                    bail!("no quickstep catalog among the result blocks");
                };

                let staged = block_list
                    .iter()
                    .map(|b| self.staged(b))
                    .collect::<Result<Vec<_>>>()?;
                args.push(block_list.join(","));
                args.push(catalog_json.to_string());
                Ok(Invocation {
                    program: "python",
                    args,
                    staged,
                })
            }
        }
    }
}

impl Materializer for ScriptMaterializer {
    async fn gather(&self, request: GatherRequest) -> Result<String> {
        let invocation = self.invocation(&request)?;
        info!(
            db = %request.db,
            blocks = request.blocks.len(),
            program = invocation.program,
            "gathering results"
        );
        debug!(args = ?invocation.args, "gather invocation");

        let result = Command::new(invocation.program)
            .args(&invocation.args)
            .current_dir(&self.script_dir)
            .output()
            .await
            .with_context(|| format!("failed to run {}", invocation.program));

        remove_staged(&invocation.staged).await;

        let output = result?;
        if !output.status.success() {
            bail!(
                "gather script exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

async fn remove_staged(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = tokio::fs::remove_file(path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "failed to remove staged block");
            }
        }
    }
}

/// Path a worker is expected to stage `block` at.
///
/// `block` comes from a node response and must be a bare file name.
pub fn staged_path(staging_dir: &Path, block: &str) -> Result<PathBuf> {
    let mut components = Path::new(block).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(staging_dir.join(block)),
        _ => bail!("block id '{block}' is not a plain file name"),
    }
}
