pub mod engine;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{JobId, NodeUuid, WorkerId};
use crate::shuffle::Partitioner;
use crate::task::{ActionOp, Record, StageOp};
use crate::worker::{CacheKey, SharedCache, WorkerClient};

/// The lifecycle of one job on one worker.
///
/// ```text
/// Assigned -> Ready -> Running -> Completed
///                         |  ^
///                         v  |
///                      Shuffling -> Failed
/// ```
///
/// `Running` and `Shuffling` may alternate once per shuffle stage, and
/// any non-terminal state may move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// The assignment has been received but not yet validated.
    Assigned,
    /// The assignment is validated and the job waits for the start signal.
    Ready,
    Running,
    /// Blocked on the all-peers shuffle barrier.
    Shuffling,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Assigned, JobState::Ready) => true,
            (JobState::Ready, JobState::Running) => true,
            (JobState::Running, JobState::Shuffling) => true,
            (JobState::Shuffling, JobState::Running) => true,
            (JobState::Running, JobState::Completed) => true,
            (state, JobState::Failed) => !state.is_terminal(),
            _ => false,
        }
    }
}

/// One participant in a job, as seen by every node.
#[derive(Clone)]
pub struct JobWorker {
    pub id: WorkerId,
    pub uuid: NodeUuid,
    pub host: String,
    pub client: WorkerClient,
}

/// Everything a worker needs to run its part of a job. The input is
/// pre-split by the coordinator; each worker takes the share at its own
/// position in `workers`.
#[derive(Clone)]
pub struct JobAssignment {
    pub job_id: JobId,
    pub master_uuid: NodeUuid,
    pub workers: Vec<JobWorker>,
    pub stages: Vec<StageOp>,
    pub action: ActionOp,
    pub partitioner: Partitioner,
    pub input: Vec<Vec<Record>>,
    pub read_cache: Option<CacheKey>,
    pub publish_cache: Option<CacheKey>,
}

/// The per-job view a worker builds from a validated assignment.
#[derive(Clone)]
pub struct AppContext {
    pub workers: Vec<JobWorker>,
    pub self_index: usize,
    pub master_uuid: NodeUuid,
    pub cache: SharedCache,
}

impl AppContext {
    /// Fails when the worker is not listed in the assignment, in which
    /// case the job must be rejected before any state is created for it.
    pub fn try_new(
        assignment: &JobAssignment,
        self_uuid: NodeUuid,
        cache: SharedCache,
    ) -> ExecutionResult<Self> {
        let self_index = assignment
            .workers
            .iter()
            .position(|w| w.uuid == self_uuid)
            .ok_or_else(|| {
                ExecutionError::InvalidJob(format!(
                    "worker {self_uuid} is not part of job {}",
                    assignment.job_id
                ))
            })?;
        Ok(Self {
            workers: assignment.workers.clone(),
            self_index,
            master_uuid: assignment.master_uuid,
            cache,
        })
    }

    pub fn self_worker(&self) -> &JobWorker {
        &self.workers[self.self_index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_accept_no_transition() {
        for next in [
            JobState::Assigned,
            JobState::Ready,
            JobState::Running,
            JobState::Shuffling,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert!(!JobState::Completed.can_transition_to(next));
            assert!(!JobState::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_shuffle_round_trip() {
        assert!(JobState::Running.can_transition_to(JobState::Shuffling));
        assert!(JobState::Shuffling.can_transition_to(JobState::Running));
        assert!(!JobState::Shuffling.can_transition_to(JobState::Completed));
    }

    #[test]
    fn test_any_live_state_may_fail() {
        assert!(JobState::Assigned.can_transition_to(JobState::Failed));
        assert!(JobState::Shuffling.can_transition_to(JobState::Failed));
    }
}
