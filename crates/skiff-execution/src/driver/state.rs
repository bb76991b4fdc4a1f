use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::ExecutionResult;
use crate::id::{IdGenerator, JobId, NodeUuid, WorkerId};
use crate::job::JobState;
use crate::stream::{ResultSink, ResultSource};
use crate::task::{ActionOp, Record};
use crate::worker::WorkerClient;

/// What a worker reports about its host at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    pub cpu_count: usize,
    pub os: String,
    pub arch: String,
    pub memory_used: u64,
    pub memory_total: u64,
    pub hostname: String,
    pub role: String,
}

/// The identity the coordinator hands back to a registering worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRegistration {
    pub id: WorkerId,
    pub uuid: NodeUuid,
}

pub struct WorkerDescriptor {
    pub uuid: NodeUuid,
    pub capabilities: WorkerCapabilities,
    pub client: WorkerClient,
    pub active: bool,
}

/// The coordinator's bookkeeping for one job. Results are forwarded to
/// `sink` as workers stream them; the job completes once every worker
/// has both ended its stream and reported its action done.
pub struct JobDescriptor {
    pub action: ActionOp,
    pub workers: Vec<(WorkerId, NodeUuid)>,
    pub state: JobState,
    pub sink: ResultSink,
    /// The consuming half, held until assignment succeeds.
    pub source: Option<ResultSource>,
    pub subscriber: Option<oneshot::Sender<ExecutionResult<ResultSource>>>,
    pub partials: Vec<Record>,
    pub streams_ended: HashSet<NodeUuid>,
    pub actions_done: HashSet<NodeUuid>,
    pub last_lines: HashMap<NodeUuid, Option<Record>>,
}

impl JobDescriptor {
    pub fn has_worker(&self, uuid: NodeUuid) -> bool {
        self.workers.iter().any(|(_, u)| *u == uuid)
    }

    pub fn all_reported(&self) -> bool {
        self.workers
            .iter()
            .all(|(_, u)| self.streams_ended.contains(u) && self.actions_done.contains(u))
    }
}

#[derive(Default)]
pub struct DriverState {
    pub workers: HashMap<WorkerId, WorkerDescriptor>,
    pub jobs: HashMap<JobId, JobDescriptor>,
    worker_ids: IdGenerator<WorkerId>,
    job_ids: IdGenerator<JobId>,
}

impl DriverState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_worker_id(&mut self) -> ExecutionResult<WorkerId> {
        self.worker_ids.next()
    }

    pub fn next_job_id(&mut self) -> ExecutionResult<JobId> {
        self.job_ids.next()
    }

    /// Active workers in registration order.
    pub fn active_workers(&self) -> Vec<(WorkerId, &WorkerDescriptor)> {
        let mut workers: Vec<_> = self
            .workers
            .iter()
            .filter(|(_, w)| w.active)
            .map(|(id, w)| (*id, w))
            .collect();
        workers.sort_by_key(|(id, _)| u64::from(*id));
        workers
    }
}

/// A point-in-time view of the cluster for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    pub master_uuid: NodeUuid,
    pub workers: Vec<WorkerSnapshot>,
    pub job_count: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub uuid: NodeUuid,
    pub active: bool,
    pub hostname: String,
}
