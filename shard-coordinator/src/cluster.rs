//! The resource manager the coordinator's job runs under.
//!
//! The coordinator asks it which worker nodes are running (so it knows how
//! many registrations to wait for), submits the worker job, and kills it on
//! `!exit` or when [`watch_job`] sees the wall-clock budget run out.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use tokio::{
    sync::Mutex,
    time::{Instant, MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{config::DbKind, partition::NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job_{:04}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub db: DbKind,
    pub container_memory_mb: u64,
    pub num_containers: u32,
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Finished,
    Killed,
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

pub trait ResourceManager: Send + Sync {
    fn list_running_nodes(&self) -> impl Future<Output = Result<Vec<NodeId>>> + Send;
    fn submit_job(&self, spec: JobSpec) -> impl Future<Output = Result<JobId>> + Send;
    fn kill_job(&self, id: JobId) -> impl Future<Output = Result<()>> + Send;
    fn poll_status(&self, id: JobId) -> impl Future<Output = Result<JobStatus>> + Send;
}

/// A fixed set of nodes given on the command line; job state lives in memory.
#[derive(Debug)]
pub struct StaticCluster {
    nodes: Vec<NodeId>,
    jobs: Mutex<HashMap<JobId, JobStatus>>,
    next_id: AtomicU64,
}

impl StaticCluster {
    pub fn new(nodes: Vec<NodeId>) -> Self {
        Self {
            nodes,
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Marks `id` as ended with `status`, as the job itself would.
    pub async fn complete_job(&self, id: JobId, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs.get_mut(&id).ok_or_else(|| anyhow!("unknown job {id}"))?;
        *entry = status;
        Ok(())
    }
}

impl ResourceManager for StaticCluster {
    async fn list_running_nodes(&self) -> Result<Vec<NodeId>> {
        Ok(self.nodes.clone())
    }

    async fn submit_job(&self, spec: JobSpec) -> Result<JobId> {
        if spec.num_containers == 0 {
            return Err(anyhow!("job '{}' asks for zero containers", spec.name));
        }
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.jobs.lock().await.insert(id, JobStatus::Running);
        info!(
            job = %id,
            name = %spec.name,
            db = %spec.db,
            memory_mb = spec.container_memory_mb,
            containers = spec.num_containers,
            nodes = spec.nodes.len(),
            "job submitted"
        );
        Ok(id)
    }

    async fn kill_job(&self, id: JobId) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let status = jobs.get_mut(&id).ok_or_else(|| anyhow!("unknown job {id}"))?;
        if !status.is_terminal() {
            *status = JobStatus::Killed;
            info!(job = %id, "job killed");
        }
        Ok(())
    }

    async fn poll_status(&self, id: JobId) -> Result<JobStatus> {
        self.jobs
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown job {id}"))
    }
}

/// Polls `id` every `poll` until it ends, killing it once `budget` has elapsed.
///
/// Returns the job's final status.
pub async fn watch_job<R>(
    manager: Arc<R>,
    id: JobId,
    budget: Duration,
    poll: Duration,
) -> Result<JobStatus>
where
    R: ResourceManager,
{
    let started = Instant::now();
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let status = manager.poll_status(id).await?;
        debug!(job = %id, ?status, elapsed_ms = started.elapsed().as_millis() as u64, "job report");
        if status.is_terminal() {
            info!(job = %id, ?status, "job ended");
            return Ok(status);
        }

        if started.elapsed() >= budget {
            warn!(
                job = %id,
                budget_secs = budget.as_secs(),
                "job exceeded its time budget, killing"
            );
            manager.kill_job(id).await?;
            return manager.poll_status(id).await;
        }
    }
}
